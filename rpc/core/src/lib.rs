//! The Helianthus RPC core: a request/response (and notification/heartbeat)
//! framework over a reactor-style async TCP transport, with pluggable wire
//! serialization, a middleware/interceptor pipeline, a reflection-driven
//! service registry, and a Prometheus-backed observability surface.
//!
//! Everything the rest of the Helianthus stack builds services against lives
//! behind three modules: [`registry`] (the reflection bridge services
//! register into), [`server`] (hosts registered services on a listening
//! socket), and [`client`] (talks to a server and correlates responses by
//! [`context::CallId`]). [`codec`], [`context`], and [`message`] define the
//! wire format and the envelope that crosses it; [`interceptor`] is the
//! cross-cutting hook chain both the server and, in principle, future client
//! middleware run calls through; [`metrics`] and [`http`] are the
//! observability surface exposed over `/metrics` and `/health`.

pub mod client;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod interceptor;
pub mod message;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod transport;

pub use client::{ClientStats, RpcClient, RpcClientBuilder};
pub use codec::HelianthusCodec;
pub use config::{RpcConfig, RpcConfigBuilder};
pub use context::{CallId, CallKind, RpcContext, SerializationFormat};
pub use error::{RpcError, RpcOutcome};
pub use message::RpcMessage;
pub use metrics::RpcMetrics;
pub use registry::{MethodMeta, ServiceInstance, ServiceMeta};
pub use server::{RpcServer, RpcServerBuilder};

/// Re-exports consumed only by code `helianthus_rpc_macros` generates, so a
/// crate using `#[rpc_service]` doesn't have to add `bytes`/`serde_json` as
/// direct dependencies of its own just to satisfy the generated handler
/// bodies.
#[doc(hidden)]
pub mod macro_support {
    pub use bytes::Bytes;
    pub use serde_json;
}
