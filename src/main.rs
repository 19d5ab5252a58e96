mod config;
mod error;
mod metrics;
mod routes;
mod services;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics::MetricSink;
use crate::routes::{health_check_route, metrics_route, root_redirect_route};
use crate::services::collector::Collector;

use bollard::Docker;
use std::sync::Arc;
use warp::Filter;

/// Entry point for the exporter.
///
/// Reads the configuration from the environment (and an optional `.env` file),
/// connects to the Docker daemon and serves the following routes:
/// - `/metrics` (GET): runs one scrape of every container and returns the samples.
/// - `/` (GET): redirects to `/metrics`.
/// - `/health` (GET): simple health check.
///
/// # Example
///
/// ```sh
/// ADDR=:9338 LABEL_image='{{.ContainerJSON.Config.Image}}' docker-exporter
/// curl http://127.0.0.1:9338/metrics
/// ```
#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run().await {
        log::error!("{}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;

    // Same registry a scrape builds; fails here if prometheus rejects the labels.
    MetricSink::new(&config.labels.label_names())?;

    let docker = Docker::connect_with_defaults().map_err(Error::Connect)?;
    let docker = match docker.clone().negotiate_version().await {
        Ok(negotiated) => negotiated,
        Err(err) => {
            log::warn!("cannot negotiate docker API version, using client default: {}", err);
            docker
        }
    };

    let collector = Arc::new(Collector::new(
        Arc::new(docker),
        Arc::new(config.labels),
        config.scrape_timeout,
    ));

    let routes = metrics_route(collector)
        .or(root_redirect_route())
        .or(health_check_route())
        .with(warp::log("docker_exporter"));

    log::info!("Listening on http://{}...", config.listen_addr);

    warp::serve(routes).run(config.listen_addr).await;
    Ok(())
}
