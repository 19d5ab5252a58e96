pub mod collector;
pub mod deriver;
pub mod fetcher;
pub mod helpers;
pub mod labels;

#[cfg(test)]
pub(crate) mod testing;
