//! The observability surface's HTTP side: `GET /metrics` and `GET /health`.
//! Grounded on `original_source/Shared/Monitoring/PrometheusExporter.h`'s
//! shape (`Start(port, provider)`/`Stop`/`IsRunning`) and built on `warp`,
//! matching `infrastructure/metrics`'s `pull` feature dependency — but with
//! an explicit status/verb/header contract (405 on wrong verb, 404 on
//! unknown path, 400 on malformed requests, `Connection: close` on every
//! response) that a bare `warp::serve` of the registry wouldn't give you by
//! default.

use std::{net::SocketAddr, sync::Arc};

use tracing::{error, info};
use warp::{
    http::{Method, StatusCode},
    Filter, Rejection, Reply,
};

use crate::metrics::RpcMetrics;

const CONTENT_TYPE_PROMETHEUS: &str = "text/plain; version=0.0.4";

/// Runs the `/metrics` + `/health` HTTP server on `addr` until `shutdown`
/// resolves. `Start`/`Stop`/`IsRunning` in the original become "this future
/// is polled" / "drop or signal `shutdown`" / "the task is still running" in
/// idiomatic async Rust — there is no separate thread to join.
pub async fn serve(addr: SocketAddr, metrics: Arc<RpcMetrics>, shutdown: helianthus_shutdown::ShutdownSignal) {
    let metrics_route = warp::path("metrics")
        .and(warp::method())
        .and(with_metrics(metrics.clone()))
        .and_then(handle_metrics);

    let health_route = warp::path("health")
        .and(warp::get())
        .map(|| close_connection(warp::reply::with_status("ok", StatusCode::OK)));

    let routes = metrics_route
        .or(health_route)
        .recover(handle_rejection);

    info!(%addr, "metrics http endpoint listening");
    let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async move {
        shutdown.await;
    });
    server.await;
}

fn with_metrics(metrics: Arc<RpcMetrics>) -> impl Filter<Extract = (Arc<RpcMetrics>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || metrics.clone())
}

async fn handle_metrics(method: Method, metrics: Arc<RpcMetrics>) -> Result<Box<dyn Reply>, Rejection> {
    match method {
        Method::GET => Ok(Box::new(render_metrics_body(&metrics))),
        Method::HEAD => Ok(Box::new(close_connection(warp::reply::with_header(
            warp::reply(),
            "Content-Type",
            CONTENT_TYPE_PROMETHEUS,
        )))),
        _ => Err(warp::reject::custom(MethodNotAllowed)),
    }
}

fn render_metrics_body(metrics: &RpcMetrics) -> impl Reply {
    let body = match helianthus_metrics::encode(metrics.registry()) {
        Ok(text) => format!("helianthus_up 1\n{text}"),
        Err(err) => {
            error!(%err, "failed to encode metrics");
            "helianthus_up 1\n".to_string()
        },
    };
    close_connection(warp::reply::with_header(body, "Content-Type", CONTENT_TYPE_PROMETHEUS))
}

/// Forces `Connection: close` on a reply — `warp`/Hyper otherwise manage
/// keep-alive themselves, but every response here must close the
/// connection.
fn close_connection(reply: impl Reply) -> impl Reply {
    warp::reply::with_header(reply, "Connection", "close")
}

#[derive(Debug)]
struct MethodNotAllowed;
impl warp::reject::Reject for MethodNotAllowed {}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, std::convert::Infallible> {
    if err.find::<MethodNotAllowed>().is_some() {
        return Ok(close_connection(warp::reply::with_header(
            warp::reply::with_status("method not allowed", StatusCode::METHOD_NOT_ALLOWED),
            "Allow",
            "GET, HEAD",
        )));
    }
    if err.is_not_found() {
        return Ok(close_connection(warp::reply::with_header(
            warp::reply::with_status("not found", StatusCode::NOT_FOUND),
            "Allow",
            "",
        )));
    }
    Ok(close_connection(warp::reply::with_header(
        warp::reply::with_status("bad request", StatusCode::BAD_REQUEST),
        "Allow",
        "",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use helianthus_metrics::Registry;
    use warp::http::StatusCode;

    fn test_metrics() -> Arc<RpcMetrics> {
        Arc::new(RpcMetrics::new(Registry::new()).unwrap())
    }

    #[tokio::test]
    async fn get_metrics_returns_200_with_prometheus_content_type_and_up_gauge() {
        let metrics = test_metrics();
        let routes = warp::path("metrics")
            .and(warp::method())
            .and(with_metrics(metrics))
            .and_then(handle_metrics)
            .recover(handle_rejection);

        let res = warp::test::request().method("GET").path("/metrics").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get("Content-Type").unwrap(), CONTENT_TYPE_PROMETHEUS);
        assert!(String::from_utf8_lossy(res.body()).contains("helianthus_up 1"));
    }

    #[tokio::test]
    async fn head_metrics_returns_empty_body_with_same_headers() {
        let metrics = test_metrics();
        let routes = warp::path("metrics")
            .and(warp::method())
            .and(with_metrics(metrics))
            .and_then(handle_metrics)
            .recover(handle_rejection);

        let res = warp::test::request().method("HEAD").path("/metrics").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.body().is_empty());
    }

    #[tokio::test]
    async fn post_metrics_returns_405_with_allow_header() {
        let metrics = test_metrics();
        let routes = warp::path("metrics")
            .and(warp::method())
            .and(with_metrics(metrics))
            .and_then(handle_metrics)
            .recover(handle_rejection);

        let res = warp::test::request().method("POST").path("/metrics").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.headers().get("Allow").unwrap(), "GET, HEAD");
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let health_route = warp::path("health").and(warp::get()).map(|| close_connection(warp::reply::with_status("ok", StatusCode::OK)));
        let res = warp::test::request().method("GET").path("/health").reply(&health_route).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body(), "ok");
    }

    #[tokio::test]
    async fn unknown_path_returns_404() {
        let metrics = test_metrics();
        let routes = warp::path("metrics")
            .and(warp::method())
            .and(with_metrics(metrics))
            .and_then(handle_metrics)
            .recover(handle_rejection);

        let res = warp::test::request().method("GET").path("/nope").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
