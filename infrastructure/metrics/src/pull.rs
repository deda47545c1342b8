//! A minimal pull-based exporter: serves the registry's current state as
//! plain Prometheus text on `GET /metrics`. Consumers that need the fuller
//! HTTP contract (HEAD support, 404/405 handling, `Connection: close`) build
//! their own `warp` filter against [`encode`](crate::encode) instead of using
//! this module; it exists for callers that just want "give me a metrics
//! endpoint" with no further ceremony.

use std::net::SocketAddr;

use tracing::error;
use warp::Filter;

use crate::{encode, Registry};

pub async fn serve(addr: SocketAddr, registry: Registry) {
    let route = warp::path("metrics").map(move || match encode(&registry) {
        Ok(body) => warp::reply::with_header(body, "Content-Type", "text/plain; version=0.0.4"),
        Err(err) => {
            error!(%err, "failed to encode metrics");
            warp::reply::with_header(String::new(), "Content-Type", "text/plain; version=0.0.4")
        },
    });
    warp::serve(route).run(addr).await;
}
