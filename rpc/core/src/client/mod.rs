//! The client core: one outbound connection, correlating responses to
//! waiters by `CallId`. `PendingCalls` below is a
//! `tokio::sync::Mutex<HashMap<CallId, PendingEntry>>`, and the "background
//! worker task" is a Tokio task reading the connection's `Framed` stream
//! directly; the original's ≈10ms polling cadence becomes an `interval` used
//! purely for deadline-expiry sweeps, since response delivery itself is
//! event-driven, not polled. The same worker also originates
//! `RpcConfig::heartbeat_interval_ms`-spaced `Heartbeat` frames so a server
//! has a liveness signal to bounce back.
//!
//! Grounded on `original_source/Shared/RPC/IRpcClient.h`'s
//! `Connect`/`Disconnect`/`Call`/`CallAsync`/`CallFuture`/`Notify`/
//! `BatchCall`/`GetStats`/`ResetStats` surface, and on `RpcServer`/
//! `RpcServerBuilder`'s chainable-builder style from `server/mod.rs`.

mod stats;

pub use stats::ClientStats;

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use helianthus_shutdown::{Shutdown, ShutdownSignal};
use tokio::{
    net::TcpStream,
    sync::{oneshot, Mutex as AsyncMutex},
    task::JoinHandle,
};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::{
    codec::HelianthusCodec,
    config::RpcConfig,
    context::{CallId, CallIdGenerator, CallKind, RpcContext, SerializationFormat},
    error::{RpcError, RpcOutcome},
    message::RpcMessage,
    metrics::{CallOutcome, RpcMetrics},
    transport,
};

type ConnSink = SplitSink<Framed<TcpStream, HelianthusCodec>, RpcMessage>;
type ConnStream = SplitStream<Framed<TcpStream, HelianthusCodec>>;
type PendingMap = AsyncMutex<HashMap<CallId, PendingEntry>>;

/// How a registered call is eventually delivered its outcome. The original
/// three waiter kinds — sync-blocking, future, async-callback — collapse to
/// two in Rust: a blocking `Call` and a spawned `CallFuture` both just await
/// the same [`oneshot::Receiver`]; only `CallAsync`'s fire-and-notify shape
/// needs a distinct boxed closure.
enum Waiter {
    Oneshot(oneshot::Sender<RpcOutcome<Bytes>>),
    Callback(Box<dyn FnOnce(RpcOutcome<Bytes>) + Send>),
}

impl Waiter {
    fn resolve(self, result: RpcOutcome<Bytes>) {
        match self {
            Waiter::Oneshot(tx) => {
                let _ = tx.send(result);
            },
            Waiter::Callback(callback) => callback(result),
        }
    }
}

struct PendingEntry {
    waiter: Waiter,
    deadline: Instant,
    timeout_ms: u32,
}

/// Builder for [`RpcClient`], matching [`crate::server::RpcServerBuilder`]'s
/// chainable-setter style.
pub struct RpcClientBuilder {
    config: RpcConfig,
    metrics: Option<Arc<RpcMetrics>>,
}

impl RpcClientBuilder {
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

    /// Connects to `addr` and starts the background worker task. The
    /// returned client is `Arc`-wrapped so [`RpcClient::call_future`] can
    /// spawn a task holding its own reference.
    pub async fn connect(self, addr: SocketAddr) -> RpcOutcome<Arc<RpcClient>> {
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(
                RpcMetrics::new(helianthus_metrics::Registry::new())
                    .map_err(|e| RpcError::InternalError(format!("failed to construct default metrics: {e}")))?,
            ),
        };

        let stream = transport::connect(addr, Duration::from_millis(self.config.default_timeout_ms as u64), true).await?;
        let framed = Framed::new(stream, HelianthusCodec::new(self.config.max_frame_bytes));
        let (sink, stream) = framed.split();

        let pending: Arc<PendingMap> = Arc::new(AsyncMutex::new(HashMap::new()));
        let stats = Arc::new(stats::AtomicClientStats::default());
        let writer: Arc<AsyncMutex<ConnSink>> = Arc::new(AsyncMutex::new(sink));

        let mut shutdown_owner = Shutdown::new();
        let signal = shutdown_owner.to_signal();
        let worker = tokio::spawn(worker_loop(
            stream,
            pending.clone(),
            metrics.clone(),
            stats.clone(),
            signal,
            writer.clone(),
            self.config.heartbeat_interval_ms,
            self.config.default_format,
        ));

        Ok(Arc::new(RpcClient {
            config: self.config,
            metrics,
            call_ids: CallIdGenerator::new(),
            pending,
            writer,
            stats,
            shutdown: std::sync::Mutex::new(Some(shutdown_owner)),
            worker: std::sync::Mutex::new(Some(worker)),
        }))
    }
}

/// One outbound connection to an RPC server. All public call methods take
/// `&self`; many clones of the returned `Arc<RpcClient>` may issue calls
/// concurrently over the one connection, matching spec §5's "per-connection:
/// frames dispatched in receive order, responses in completion order,
/// clients MUST correlate by CallId" guarantee.
pub struct RpcClient {
    config: RpcConfig,
    metrics: Arc<RpcMetrics>,
    call_ids: CallIdGenerator,
    pending: Arc<PendingMap>,
    writer: Arc<AsyncMutex<ConnSink>>,
    stats: Arc<stats::AtomicClientStats>,
    shutdown: std::sync::Mutex<Option<Shutdown>>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RpcClient {
    pub fn builder() -> RpcClientBuilder {
        RpcClientBuilder::new()
    }

    pub async fn connect(addr: SocketAddr, config: RpcConfig) -> RpcOutcome<Arc<Self>> {
        Self::builder().with_config(config).connect(addr).await
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<RpcMetrics> {
        &self.metrics
    }

    pub fn is_connected(&self) -> bool {
        self.shutdown
            .lock()
            .expect("shutdown lock poisoned")
            .as_ref()
            .map(|s| !s.is_triggered())
            .unwrap_or(false)
    }

    pub fn stats(&self) -> ClientStats {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Triggers shutdown (failing every pending waiter with a
    /// [`RpcError::NetworkError`]) and joins the worker task. Idempotent.
    pub async fn disconnect(&self) {
        if let Some(mut shutdown) = self.shutdown.lock().expect("shutdown lock poisoned").take() {
            shutdown.trigger();
        }
        let handle = self.worker.lock().expect("worker lock poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Synchronous call: blocks the caller until a response arrives or the
    /// deadline the worker enforces expires. `timeout_ms` of `None` uses
    /// [`RpcConfig::default_timeout_ms`].
    pub async fn call(&self, service: &str, method: &str, params: Bytes, timeout_ms: Option<u32>) -> RpcOutcome<Bytes> {
        let timeout_ms = timeout_ms.unwrap_or(self.config.default_timeout_ms).max(1);
        let mut ctx = RpcContext::new(service, method);
        ctx.call_id = self.call_ids.next();
        ctx.timeout_ms = timeout_ms;
        ctx.format = self.config.default_format;

        let (tx, rx) = oneshot::channel();
        self.metrics.call_started(service);
        let started = Instant::now();

        self.send_request(ctx, params, Waiter::Oneshot(tx), timeout_ms).await?;

        let outcome = rx
            .await
            .unwrap_or_else(|_| Err(RpcError::NetworkError("client shut down before a response arrived".into())));

        self.finish(service, method, started, &outcome);
        outcome
    }

    /// Returns immediately once the request is enqueued; `callback` runs
    /// exactly once, from the worker task, with the eventual outcome
    /// (success, timeout, or network error) — matching spec §4.6's
    /// `CallAsync` contract.
    pub async fn call_async<F>(&self, service: &str, method: &str, params: Bytes, timeout_ms: Option<u32>, callback: F) -> RpcOutcome<()>
    where
        F: FnOnce(RpcOutcome<Bytes>) + Send + 'static,
    {
        let timeout_ms = timeout_ms.unwrap_or(self.config.default_timeout_ms).max(1);
        let mut ctx = RpcContext::new(service, method);
        ctx.call_id = self.call_ids.next();
        ctx.timeout_ms = timeout_ms;
        ctx.format = self.config.default_format;

        let metrics = self.metrics.clone();
        let service_owned = service.to_string();
        let endpoint = format!("{service}.{method}");
        let started = Instant::now();
        let wrapped: Box<dyn FnOnce(RpcOutcome<Bytes>) + Send> = Box::new(move |result| {
            let outcome = outcome_kind(&result);
            metrics.call_finished(&service_owned, outcome);
            metrics.observe_latency(&endpoint, started.elapsed().as_secs_f64() * 1000.0);
            callback(result);
        });

        self.metrics.call_started(service);
        self.send_request(ctx, params, Waiter::Callback(wrapped), timeout_ms).await?;
        Ok(())
    }

    /// Spawns `call` as its own task and returns a handle to it, for callers
    /// that want to start a call now and await its outcome later — the
    /// future-based variant of spec §4.6's three waiter kinds. Consumes an
    /// `Arc` clone rather than `&self` since the spawned task must outlive
    /// this call.
    pub fn call_future(self: Arc<Self>, service: impl Into<String>, method: impl Into<String>, params: Bytes, timeout_ms: Option<u32>) -> JoinHandle<RpcOutcome<Bytes>> {
        let service = service.into();
        let method = method.into();
        tokio::spawn(async move { self.call(&service, &method, params, timeout_ms).await })
    }

    /// One-way notification: enqueues the frame and returns as soon as it's
    /// written, with no waiter registered and no correlation to a response.
    /// Never retried on failure, regardless of `RpcConfig::max_retries` —
    /// there is nothing to retry against, since a notification carries no
    /// response to wait for in the first place.
    pub async fn notify(&self, service: &str, method: &str, params: Bytes) -> RpcOutcome<()> {
        let mut ctx = RpcContext::new(service, method);
        ctx.call_kind = CallKind::Notification;
        ctx.call_id = CallId::INVALID;
        ctx.format = self.config.default_format;

        let message = RpcMessage::request(ctx, params);
        self.writer.lock().await.send(message).await?;
        self.stats.record_notification_sent();
        Ok(())
    }

    /// Issues every call concurrently over the same connection and returns
    /// their outcomes in input order, regardless of completion order —
    /// spec §4.6's "implementation may pipeline them ... results returned in
    /// input order".
    pub async fn batch_call(&self, calls: Vec<(String, String, Bytes)>, timeout_ms: Option<u32>) -> Vec<RpcOutcome<Bytes>> {
        let futures = calls.into_iter().map(|(service, method, params)| self.call(&service, &method, params, timeout_ms));
        futures::future::join_all(futures).await
    }

    fn finish(&self, service: &str, method: &str, started: Instant, outcome: &RpcOutcome<Bytes>) {
        let kind = outcome_kind(outcome);
        self.metrics.call_finished(service, kind);
        self.metrics.observe_latency(&format!("{service}.{method}"), started.elapsed().as_secs_f64() * 1000.0);
    }

    /// Registers `waiter` under `ctx.call_id` before writing the frame, so a
    /// response racing ahead of the registration can never be missed. On a
    /// write failure the waiter is resolved immediately with that error
    /// (the worker will never see this call_id, since nothing was sent).
    async fn send_request(&self, ctx: RpcContext, params: Bytes, waiter: Waiter, timeout_ms: u32) -> RpcOutcome<CallId> {
        let call_id = ctx.call_id;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        self.pending.lock().await.insert(call_id, PendingEntry { waiter, deadline, timeout_ms });

        let message = RpcMessage::request(ctx, params);
        let send_result = self.writer.lock().await.send(message).await;

        if let Err(err) = send_result {
            if let Some(entry) = self.pending.lock().await.remove(&call_id) {
                self.stats.record(CallOutcome::Failure);
                entry.waiter.resolve(Err(err.clone()));
            }
            return Err(err);
        }
        Ok(call_id)
    }
}

fn outcome_kind(outcome: &RpcOutcome<Bytes>) -> CallOutcome {
    match outcome {
        Ok(_) => CallOutcome::Success,
        Err(RpcError::Timeout(_)) => CallOutcome::Timeout,
        Err(_) => CallOutcome::Failure,
    }
}

/// Reads responses off the connection, correlates them to pending waiters,
/// sweeps expired deadlines every 10ms (spec §4.6's cadence, repurposed:
/// delivery itself is event-driven off the stream, not polled), and
/// originates a `Heartbeat` frame every `heartbeat_interval_ms` (spec §4.5:
/// "used by clients to validate liveness") unless that interval is `0`, in
/// which case the heartbeat branch is never polled. Exits (after failing
/// every still-pending waiter) on shutdown, a decode error, or the peer
/// closing the connection.
#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    mut responses: ConnStream,
    pending: Arc<PendingMap>,
    metrics: Arc<RpcMetrics>,
    stats: Arc<stats::AtomicClientStats>,
    shutdown: ShutdownSignal,
    writer: Arc<AsyncMutex<ConnSink>>,
    heartbeat_interval_ms: u32,
    format: SerializationFormat,
) {
    tokio::pin!(shutdown);
    let mut sweep = tokio::time::interval(Duration::from_millis(10));
    let mut heartbeat = tokio::time::interval(Duration::from_millis(heartbeat_interval_ms.max(1) as u64));
    heartbeat.tick().await; // first tick fires immediately; consume it so the cadence starts at a full interval

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                debug!("rpc client worker stopping: shutdown signaled");
                fail_all_pending(&pending, &stats, RpcError::NetworkError("client disconnected".into())).await;
                return;
            }
            _ = sweep.tick() => {
                expire_deadlines(&pending, &stats).await;
            }
            _ = heartbeat.tick(), if heartbeat_interval_ms > 0 => {
                send_heartbeat(&writer, &stats, format).await;
            }
            frame = responses.next() => {
                match frame {
                    Some(Ok(message)) => deliver(&pending, &metrics, &stats, message).await,
                    Some(Err(err)) => {
                        warn!(%err, "rpc client decode error, failing pending calls");
                        fail_all_pending(&pending, &stats, RpcError::NetworkError(err.to_string())).await;
                        return;
                    },
                    None => {
                        debug!("rpc client connection closed by peer");
                        fail_all_pending(&pending, &stats, RpcError::NetworkError("connection closed by peer".into())).await;
                        return;
                    },
                }
            }
        }
    }
}

/// Sends one `Heartbeat` frame with no waiter and no call id to correlate —
/// the server echoes it back (`RpcServer::dispatch_one`), and `deliver`
/// recognizes the echo by `CallKind::Heartbeat` rather than by id. A write
/// failure here is left for the next response read or sweep to surface as a
/// connection-level error; it is not itself fatal to the worker.
async fn send_heartbeat(writer: &Arc<AsyncMutex<ConnSink>>, stats: &stats::AtomicClientStats, format: SerializationFormat) {
    let mut ctx = RpcContext::new("", "");
    ctx.call_kind = CallKind::Heartbeat;
    ctx.call_id = CallId::INVALID;
    ctx.format = format;
    let message = RpcMessage::request(ctx, Bytes::new());

    match writer.lock().await.send(message).await {
        Ok(()) => stats.record_heartbeat_sent(),
        Err(err) => warn!(%err, "failed to send heartbeat"),
    }
}

/// Delivers one decoded response to its waiter. A `Heartbeat` echo carries no
/// waiter by design — it is counted and returned, never treated as a late
/// response. A non-heartbeat response whose `call_id` is no longer pending
/// (already timed out and resolved locally) is a late response per spec
/// §4.6 — silently dropped from the caller's perspective, but counted so
/// `GetStats`/`/metrics` can show it happened.
async fn deliver(pending: &PendingMap, metrics: &RpcMetrics, stats: &stats::AtomicClientStats, message: RpcMessage) {
    if message.context.call_kind == CallKind::Heartbeat {
        stats.record_heartbeat_acked();
        return;
    }

    let call_id = message.context.call_id;
    let entry = pending.lock().await.remove(&call_id);

    let Some(entry) = entry else {
        metrics.late_response(&message.context.service_name);
        stats.record_late_response();
        return;
    };

    let result = if message.is_error() {
        Err(RpcError::from_code(message.error_code, message.error_message.clone()).unwrap_or(RpcError::Failed(message.error_message)))
    } else {
        Ok(message.result)
    };
    stats.record(outcome_kind(&result));
    entry.waiter.resolve(result);
}

async fn expire_deadlines(pending: &PendingMap, stats: &stats::AtomicClientStats) {
    let now = Instant::now();
    let expired: Vec<PendingEntry> = {
        let mut guard = pending.lock().await;
        let expired_ids: Vec<CallId> = guard.iter().filter(|(_, entry)| entry.deadline <= now).map(|(id, _)| *id).collect();
        expired_ids.into_iter().filter_map(|id| guard.remove(&id)).collect()
    };
    for entry in expired {
        stats.record(CallOutcome::Timeout);
        let timeout_ms = entry.timeout_ms;
        entry.waiter.resolve(Err(RpcError::Timeout(timeout_ms)));
    }
}

async fn fail_all_pending(pending: &PendingMap, stats: &stats::AtomicClientStats, err: RpcError) {
    let mut guard = pending.lock().await;
    for (_, entry) in guard.drain() {
        stats.record(CallOutcome::Failure);
        entry.waiter.resolve(Err(err.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// A minimal one-shot echo server: accepts one connection, reads one
    /// request, and writes back a response carrying the same parameters as
    /// the result.
    async fn spawn_echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, HelianthusCodec::default());
            if let Some(Ok(request)) = framed.next().await {
                let response = RpcMessage::response(request.context, request.parameters);
                let _ = framed.send(response).await;
            }
        });
        addr
    }

    /// A server that accepts a connection and then never writes back,
    /// letting the client's deadline expire.
    async fn spawn_silent_server() -> (SocketAddr, tokio::task::JoinHandle<Framed<TcpStream, HelianthusCodec>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            Framed::new(stream, HelianthusCodec::default())
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn call_round_trips_through_an_echo_server() {
        let addr = spawn_echo_server().await;
        let client = RpcClient::connect(addr, RpcConfig::default()).await.unwrap();

        let result = client.call("EchoService", "echo", Bytes::from_static(b"hello"), None).await.unwrap();
        assert_eq!(&result[..], b"hello");
        assert_eq!(client.stats().successful_calls, 1);
    }

    #[tokio::test]
    async fn call_times_out_against_a_silent_server() {
        let (addr, _server) = spawn_silent_server().await;
        let client = RpcClient::connect(addr, RpcConfig::default()).await.unwrap();

        let err = client.call("Svc", "m", Bytes::new(), Some(30)).await.unwrap_err();
        assert!(matches!(err, RpcError::Timeout(_)));
        assert_eq!(client.stats().timeout_calls, 1);
    }

    #[tokio::test]
    async fn notify_does_not_block_on_a_response() {
        let (addr, _server) = spawn_silent_server().await;
        let client = RpcClient::connect(addr, RpcConfig::default()).await.unwrap();

        client.notify("Svc", "m", Bytes::from_static(b"fire-and-forget")).await.unwrap();
        assert_eq!(client.stats().notifications_sent, 1);
        assert_eq!(client.stats().total_calls, 0);
    }

    #[tokio::test]
    async fn disconnect_fails_pending_calls_with_network_error() {
        let (addr, _server) = spawn_silent_server().await;
        let client = RpcClient::connect(addr, RpcConfig::default()).await.unwrap();
        let client_for_call = client.clone();

        let call_task = tokio::spawn(async move { client_for_call.call("Svc", "m", Bytes::new(), Some(60_000)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        client.disconnect().await;

        let err = call_task.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::NetworkError(_)));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn batch_call_preserves_input_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, HelianthusCodec::default());
            for _ in 0..3 {
                if let Some(Ok(request)) = framed.next().await {
                    let response = RpcMessage::response(request.context, request.parameters);
                    let _ = framed.send(response).await;
                }
            }
        });

        let client = RpcClient::connect(addr, RpcConfig::default()).await.unwrap();
        let calls = vec![
            ("Svc".to_string(), "m".to_string(), Bytes::from_static(b"1")),
            ("Svc".to_string(), "m".to_string(), Bytes::from_static(b"2")),
            ("Svc".to_string(), "m".to_string(), Bytes::from_static(b"3")),
        ];
        let results = client.batch_call(calls, None).await;
        let payloads: Vec<Vec<u8>> = results.into_iter().map(|r| r.unwrap().to_vec()).collect();
        assert_eq!(payloads, vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);
    }

    /// A server that echoes every frame it receives back unchanged, so a
    /// `Heartbeat` the client originates comes straight back as its own echo
    /// (exactly how `RpcServer::dispatch_one` answers a real heartbeat).
    async fn spawn_echoing_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, HelianthusCodec::default());
            while let Some(Ok(message)) = framed.next().await {
                if framed.send(message).await.is_err() {
                    break;
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn heartbeat_interval_originates_and_acks_heartbeats() {
        let addr = spawn_echoing_server().await;
        let config = RpcConfig::builder().heartbeat_interval_ms(20).build();
        let client = RpcClient::connect(addr, config).await.unwrap();

        tokio::time::sleep(Duration::from_millis(90)).await;

        let stats = client.stats();
        assert!(stats.heartbeats_sent >= 2, "expected several heartbeats, got {}", stats.heartbeats_sent);
        assert!(stats.heartbeats_acked >= 2, "expected several heartbeat acks, got {}", stats.heartbeats_acked);
        // Heartbeats never touch the call-tracking counters.
        assert_eq!(stats.total_calls, 0);
        assert_eq!(stats.late_responses, 0);
    }

    #[tokio::test]
    async fn zero_heartbeat_interval_disables_heartbeats() {
        let (addr, _server) = spawn_silent_server().await;
        let config = RpcConfig::builder().heartbeat_interval_ms(0).build();
        let client = RpcClient::connect(addr, config).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = client.stats();
        assert_eq!(stats.heartbeats_sent, 0);
    }
}
