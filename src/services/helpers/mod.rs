pub mod docker_helper;
pub mod stats_helper;
pub mod template;
