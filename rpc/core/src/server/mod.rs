//! The server core: accepts connections, decodes frames, dispatches through
//! middleware and the interceptor chain to a mounted service method, encodes
//! the response, writes it back. See spec §4.5's dispatch steps 1–8 and the
//! per-connection state machine.
//!
//! Grounded on
//! `examples/other_examples/.../comms-core-src-protocol-rpc-server-mod.rs.rs`
//! (`RpcServer`/`RpcServerBuilder`, its per-session executor, its
//! `Framed`-stream `run()` loop reading one request at a time and its
//! `log_timing` helper) generalized from a single-protocol peer server to a
//! name-addressed multi-service RPC dispatcher.

mod stats;

pub use stats::ServerStats;

use std::{
    collections::{HashMap, VecDeque},
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::Semaphore};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    codec::HelianthusCodec,
    config::RpcConfig,
    context::{CallId, CallKind, RpcContext},
    error::{RpcError, RpcOutcome},
    interceptor::{Annotations, ChainBeforeOutcome, Interceptor, InterceptorChain},
    message::RpcMessage,
    metrics::{CallOutcome, RpcMetrics},
    registry::{MethodHandler, ServiceInstance},
    transport::Listener,
};

/// A lightweight pre-dispatch gate, run once per incoming call before the
/// interceptor chain. Returning `false` rejects the call with
/// `RpcError::ClientError` without ever reaching a service method.
pub type Middleware = Arc<dyn Fn(&RpcContext, &RpcMessage) -> bool + Send + Sync>;

/// Builder for [`RpcServer`], in the usual chainable-setter style.
pub struct RpcServerBuilder {
    config: RpcConfig,
    metrics: Option<Arc<RpcMetrics>>,
}

impl RpcServerBuilder {
    fn new() -> Self {
        Self {
            config: RpcConfig::default(),
            metrics: None,
        }
    }

    pub fn with_config(mut self, config: RpcConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RpcMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn finish(self) -> RpcOutcome<RpcServer> {
        let metrics = match self.metrics {
            Some(m) => m,
            None => Arc::new(
                RpcMetrics::new(helianthus_metrics::Registry::new())
                    .map_err(|e| RpcError::InternalError(format!("failed to construct default metrics: {e}")))?,
            ),
        };
        Ok(RpcServer {
            config: self.config,
            metrics,
            interceptors: InterceptorChain::new(),
            middlewares: std::sync::RwLock::new(Vec::new()),
            services: std::sync::RwLock::new(HashMap::new()),
            stats: stats::AtomicServerStats::default(),
        })
    }
}

/// Accepts connections, decodes frames, dispatches to mounted services.
/// Owns its accept socket and connection set exclusively; a connection holds
/// only a non-owning `Arc<RpcServer>` back-reference for dispatch, never the
/// reverse, so there is no ownership cycle (spec §9's rearchitecture note).
pub struct RpcServer {
    config: RpcConfig,
    metrics: Arc<RpcMetrics>,
    interceptors: InterceptorChain,
    middlewares: std::sync::RwLock<Vec<Middleware>>,
    services: std::sync::RwLock<HashMap<String, ServiceInstance>>,
    stats: stats::AtomicServerStats,
}

impl RpcServer {
    pub fn builder() -> RpcServerBuilder {
        RpcServerBuilder::new()
    }

    pub fn new(config: RpcConfig) -> RpcOutcome<Self> {
        Self::builder().with_config(config).finish()
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<RpcMetrics> {
        &self.metrics
    }

    pub fn use_middleware(&self, middleware: Middleware) {
        self.middlewares.write().expect("middleware list poisoned").push(middleware);
    }

    pub fn use_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.register(interceptor);
    }

    /// Mounts a whole [`ServiceInstance`] (as produced by
    /// `registry::create`), replacing any previously mounted instance of the
    /// same name. This is what `registry::mount_all`/`mount_by_tags` call.
    pub fn register_service_instance(&self, instance: ServiceInstance) {
        let mut services = self.services.write().expect("service table poisoned");
        services.insert(instance.name().to_string(), instance);
    }

    /// Registers one method handler directly, auto-vivifying the named
    /// service's instance if it doesn't exist yet. Useful for tests and
    /// applications that don't go through the process-wide registry.
    pub fn register_handler(&self, service_name: &str, method_name: &str, handler: MethodHandler) {
        let mut services = self.services.write().expect("service table poisoned");
        let instance = services
            .entry(service_name.to_string())
            .or_insert_with(|| ServiceInstance::new(service_name));
        instance.insert_method(method_name, handler);
    }

    pub fn has_service(&self, service_name: &str) -> bool {
        self.services.read().expect("service table poisoned").contains_key(service_name)
    }

    pub fn stats(&self) -> ServerStats {
        self.stats.snapshot()
    }

    /// Runs the accept loop, spawning one task per connection, until
    /// `shutdown` resolves. Existing connections get `grace_period` to
    /// finish in-flight calls before this function returns.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr, shutdown: helianthus_shutdown::ShutdownSignal) -> RpcOutcome<()> {
        let global_in_flight = Arc::new(Semaphore::new(self.config.max_concurrent_calls as usize));
        let listener = Listener::bind(addr, true).await?;
        info!(%addr, "rpc server listening");

        let connections = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let server = self.clone();
        let conns_for_accept = connections.clone();
        listener
            .accept_loop(shutdown.clone(), move |stream, peer_addr| {
                let server = server.clone();
                let global_in_flight = global_in_flight.clone();
                let conns = conns_for_accept.clone();
                let handle = tokio::spawn(async move {
                    server.serve_connection(stream, peer_addr, global_in_flight).await;
                });
                // Best-effort: a connection we can't register for drain
                // tracking still runs; it just won't be waited on during
                // shutdown (never blocks accept on lock contention).
                if let Ok(mut guard) = conns.try_lock() {
                    guard.push(handle);
                }
            })
            .await;

        let grace_period = Duration::from_secs(5);
        let mut handles = connections.lock().await;
        let _ = tokio::time::timeout(grace_period, async {
            for handle in handles.drain(..) {
                let _ = handle.await;
            }
        })
        .await;

        Ok(())
    }

    #[instrument(name = "rpc::server::connection", skip(self, stream, global_in_flight), fields(peer = %peer_addr))]
    async fn serve_connection(self: Arc<Self>, stream: TcpStream, peer_addr: SocketAddr, global_in_flight: Arc<Semaphore>) {
        let client_identity = peer_addr.to_string();
        let codec = HelianthusCodec::new(self.config.max_frame_bytes);
        let mut framed = Framed::new(stream, codec);
        let connection_semaphore = Arc::new(Semaphore::new(self.config.in_flight_window.max(1)));
        let mut pending: VecDeque<RpcMessage> = VecDeque::new();
        let next_sequence = Arc::new(AtomicU64::new(1));

        loop {
            tokio::select! {
                biased;
                frame = framed.next() => {
                    match frame {
                        Some(Ok(message)) => pending.push_back(message),
                        Some(Err(err)) => {
                            warn!(%err, "decode error, closing connection");
                            let _ = framed.close().await;
                            return;
                        },
                        None => {
                            debug!("peer closed connection");
                            return;
                        },
                    }
                }
            }

            while let Some(message) = pending.pop_front() {
                let connection_semaphore = connection_semaphore.clone();
                let global_in_flight = global_in_flight.clone();
                let server = self.clone();
                let client_identity = client_identity.clone();
                let sequence = next_sequence.clone();

                let Ok(conn_permit) = connection_semaphore.try_acquire_owned() else {
                    // Fairness window exhausted: buffer, don't dispatch yet.
                    pending.push_front(message);
                    break;
                };

                let response = server.dispatch_one(message, &client_identity, global_in_flight, sequence).await;
                drop(conn_permit);

                if let Some(response) = response {
                    if let Err(err) = framed.send(response).await {
                        warn!(%err, "failed to write response, closing connection");
                        return;
                    }
                }
            }
        }
    }

    /// Runs the full dispatch pipeline (spec §4.5 steps 1–8) for one decoded
    /// message. Returns the response frame to write back, or `None` for
    /// notifications and heartbeats (which never get a `Response`/`Error`
    /// frame of their own, except heartbeats which echo).
    async fn dispatch_one(
        self: Arc<Self>,
        mut message: RpcMessage,
        client_identity: &str,
        global_in_flight: Arc<Semaphore>,
        sequence: Arc<AtomicU64>,
    ) -> Option<RpcMessage> {
        message.context.client_id = client_identity.to_string();
        let _ = sequence.fetch_add(1, Ordering::Relaxed);

        if message.context.call_kind == CallKind::Heartbeat {
            return Some(RpcMessage {
                context: message.context,
                parameters: Bytes::new(),
                result: Bytes::new(),
                error_code: 0,
                error_message: String::new(),
            });
        }

        let is_notification = message.context.call_kind == CallKind::Notification;
        let service_name = message.context.service_name.clone();
        self.metrics.call_started(&service_name);
        let started_at = Instant::now();

        let outcome = self.dispatch_guarded(&message, global_in_flight, is_notification).await;

        let call_outcome = match &outcome {
            Ok(_) => CallOutcome::Success,
            Err(RpcError::Timeout(_)) => CallOutcome::Timeout,
            Err(_) => CallOutcome::Failure,
        };
        self.metrics.call_finished(&service_name, call_outcome);
        self.metrics.observe_latency(
            &format!("{}.{}", message.context.service_name, message.context.method_name),
            started_at.elapsed().as_secs_f64() * 1000.0,
        );
        self.stats.record(call_outcome);

        if is_notification {
            if outcome.is_err() {
                debug!(service = %message.context.service_name, "notification handler failed, no response expected");
            }
            return None;
        }

        message.context.call_kind = CallKind::Response;
        Some(match outcome {
            Ok(result) => RpcMessage::response(message.context, result),
            Err(err) => RpcMessage::error(message.context, &err),
        })
    }

    /// The middleware → interceptor → dispatch → interceptor pipeline,
    /// gated by the global in-flight semaphore (`ServerOverloaded` when
    /// exhausted, per spec §4.5's backpressure rule).
    async fn dispatch_guarded(&self, message: &RpcMessage, global_in_flight: Arc<Semaphore>, is_notification: bool) -> RpcOutcome<Bytes> {
        let permit = match global_in_flight.try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                if is_notification {
                    self.stats.record_dropped_notification();
                } else {
                    self.stats.record_overloaded();
                }
                return Err(RpcError::ServerOverloaded);
            },
        };

        let result = self.run_pipeline(message).await;
        drop(permit);
        result
    }

    async fn run_pipeline(&self, message: &RpcMessage) -> RpcOutcome<Bytes> {
        let ctx = &message.context;

        for middleware in self.middlewares.read().expect("middleware list poisoned").iter() {
            if !middleware(ctx, message) {
                return Err(RpcError::ClientError("middleware refused the call".into()));
            }
        }

        let mut annotations = Annotations::new();
        match self.interceptors.run_before(ctx, message, &mut annotations).await {
            ChainBeforeOutcome::Rejected => return Err(RpcError::ClientError("interceptor chain rejected the call".into())),
            ChainBeforeOutcome::ShortCircuit(bytes) => return Ok(bytes),
            ChainBeforeOutcome::Proceed => {},
        }

        let result = self.invoke_handler(ctx, message).await;

        match &result {
            Ok(_) => self.interceptors.run_after(ctx, message, &result).await,
            Err(err) => self.interceptors.run_error(ctx, message, &err.to_string()).await,
        }

        result
    }

    async fn invoke_handler(&self, ctx: &RpcContext, message: &RpcMessage) -> RpcOutcome<Bytes> {
        let handler = {
            let services = self.services.read().expect("service table poisoned");
            let service = services
                .get(&ctx.service_name)
                .ok_or_else(|| RpcError::ServiceNotFound(ctx.service_name.clone()))?;
            service
                .method(&ctx.method_name)
                .ok_or_else(|| RpcError::MethodNotFound {
                    service: ctx.service_name.clone(),
                    method: ctx.method_name.clone(),
                })?
                .clone()
        };

        let future = (handler)(ctx.clone(), message.parameters.clone());
        match futures::FutureExt::catch_unwind(std::panic::AssertUnwindSafe(future)).await {
            Ok(result) => result,
            Err(panic) => Err(RpcError::from(panic)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RpcContext;
    use std::sync::Arc as StdArc;

    fn echo_handler() -> MethodHandler {
        StdArc::new(|_ctx, params| Box::pin(async move { Ok(params) }))
    }

    fn failing_handler() -> MethodHandler {
        StdArc::new(|_ctx, _params| Box::pin(async move { Err(RpcError::Failed("boom".into())) }))
    }

    fn sample_request(service: &str, method: &str) -> RpcMessage {
        let mut ctx = RpcContext::new(service, method);
        ctx.call_id = CallId(1);
        RpcMessage::request(ctx, Bytes::from_static(b"params"))
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let server = RpcServer::new(RpcConfig::default()).unwrap();
        server.register_handler("EchoService", "echo", echo_handler());

        let message = sample_request("EchoService", "echo");
        let result = server.run_pipeline(&message).await.unwrap();
        assert_eq!(&result[..], b"params");
    }

    #[tokio::test]
    async fn unknown_service_returns_service_not_found() {
        let server = RpcServer::new(RpcConfig::default()).unwrap();
        let message = sample_request("NoSuchService", "m");
        let err = server.run_pipeline(&message).await.unwrap_err();
        assert!(matches!(err, RpcError::ServiceNotFound(_)));
    }

    #[tokio::test]
    async fn unknown_method_returns_method_not_found() {
        let server = RpcServer::new(RpcConfig::default()).unwrap();
        server.register_handler("CalculatorService", "add", echo_handler());
        let message = sample_request("CalculatorService", "nope");
        let err = server.run_pipeline(&message).await.unwrap_err();
        assert!(matches!(err, RpcError::MethodNotFound { .. }));
    }

    #[tokio::test]
    async fn middleware_veto_short_circuits_before_interceptors() {
        let server = RpcServer::new(RpcConfig::default()).unwrap();
        server.register_handler("Svc", "m", echo_handler());
        server.use_middleware(StdArc::new(|_ctx, _msg| false));

        let message = sample_request("Svc", "m");
        let err = server.run_pipeline(&message).await.unwrap_err();
        assert!(matches!(err, RpcError::ClientError(_)));
    }

    #[tokio::test]
    async fn panicking_handler_becomes_internal_error() {
        let server = RpcServer::new(RpcConfig::default()).unwrap();
        server.register_handler("Svc", "boom", StdArc::new(|_ctx, _params| Box::pin(async move { panic!("handler exploded") })));

        let message = sample_request("Svc", "boom");
        let err = server.run_pipeline(&message).await.unwrap_err();
        assert!(matches!(err, RpcError::InternalError(_)));
    }

    #[tokio::test]
    async fn handler_error_is_propagated() {
        let server = RpcServer::new(RpcConfig::default()).unwrap();
        server.register_handler("Svc", "fails", failing_handler());
        let message = sample_request("Svc", "fails");
        let err = server.run_pipeline(&message).await.unwrap_err();
        assert!(matches!(err, RpcError::Failed(_)));
    }

    #[tokio::test]
    async fn overload_rejects_without_invoking_handler() {
        let server = StdArc::new(RpcServer::new(RpcConfig::builder().max_concurrent_calls(0).build()).unwrap());
        server.register_handler("Svc", "m", echo_handler());

        let global_in_flight = Arc::new(Semaphore::new(0));
        let message = sample_request("Svc", "m");
        let outcome = server.dispatch_guarded(&message, global_in_flight, false).await;
        assert!(matches!(outcome, Err(RpcError::ServerOverloaded)));
    }
}
