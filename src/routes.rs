use crate::services::collector::Collector;
use std::sync::Arc;
use warp::http::{StatusCode, Uri};
use warp::Filter;

/// Creates the route serving the metrics.
///
/// This route listens for GET requests at the `/metrics` path. Every request
/// runs exactly one scrape of all containers.
///
/// Returns a boxed Warp filter that answers with the text exposition format, or
/// with a 500 when no container list could be obtained.
pub fn metrics_route(collector: Arc<Collector>) -> warp::filters::BoxedFilter<(impl warp::Reply,)> {
    warp::get()
        .and(warp::path("metrics"))
        .and(warp::path::end())
        .and(warp::any().map(move || Arc::clone(&collector)))
        .and_then(handle_metrics)
        .boxed()
}

/// Creates the route redirecting `/` to `/metrics`.
pub fn root_redirect_route() -> warp::filters::BoxedFilter<(impl warp::Reply,)> {
    warp::get()
        .and(warp::path::end())
        .map(|| warp::redirect(Uri::from_static("/metrics")))
        .boxed()
}

/// Creates the route for health checks.
///
/// This route listens for GET requests at the `/health` path.
/// It is used to verify the server's status and returns a JSON response "OK".
///
/// Returns a boxed Warp filter that handles health check requests.
pub fn health_check_route() -> warp::filters::BoxedFilter<(impl warp::Reply,)> {
    warp::get()
        .and(warp::path("health"))
        .map(|| warp::reply::json(&"OK"))
        .boxed()
}

/// Handles a scrape request.
///
/// # Arguments
///
/// * `collector` - The collector running the scrape.
///
/// # Returns
///
/// A result containing a Warp reply or a Warp rejection.
async fn handle_metrics(collector: Arc<Collector>) -> Result<impl warp::Reply, warp::Rejection> {
    let (body, content_type, status) = match collector.scrape().await.and_then(|sink| sink.render()) {
        Ok(body) => (body, prometheus::TEXT_FORMAT, StatusCode::OK),
        Err(err) => {
            log::error!("scrape failed: {}", err);
            (
                format!("{}\n", err),
                "text/plain; charset=utf-8",
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    };

    Ok(warp::reply::with_status(
        warp::reply::with_header(body, "content-type", content_type),
        status,
    ))
}
