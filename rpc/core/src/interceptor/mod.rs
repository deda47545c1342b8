//! Ordered pre/post/error hooks run around every dispatched call, plus the
//! five built-ins the original design ships: logging, a latency/throughput
//! histogram, authentication, rate limiting, and a response cache.
//!
//! The chain is a copy-on-write snapshot (`arc-swap`), per the concurrency
//! model's rule that the dispatch path must never take a lock to read the
//! interceptor list — `register` builds a new sorted `Vec` and swaps it in;
//! `execute` loads the current snapshot once and runs outside any lock.

mod auth;
mod cache;
mod logging;
mod performance;
mod rate_limit;

pub use auth::AuthenticationInterceptor;
pub use cache::CacheInterceptor;
pub use logging::LoggingInterceptor;
pub use performance::PerformanceInterceptor;
pub use rate_limit::RateLimitInterceptor;

use std::{collections::HashMap, panic::AssertUnwindSafe, sync::Arc};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use futures::FutureExt;
use tracing::warn;

use crate::{context::RpcContext, error::RpcOutcome, message::RpcMessage};

/// Side channel interceptors may use to pass data to later interceptors or
/// to logging, without touching the immutable `RpcContext` core fields.
pub type Annotations = HashMap<String, String>;

/// What an interceptor's before-call hook decided to do with the call.
#[derive(Debug)]
pub enum BeforeDecision {
    /// Proceed to the next interceptor, then the handler.
    Continue,
    /// Skip the handler entirely and use this as the call's result — the
    /// mechanism [`CacheInterceptor`] uses for a true cache-hit bypass.
    ShortCircuit(Bytes),
    /// Veto the call. Every interceptor whose `on_before_call` already ran
    /// for this call receives `on_error` in reverse order, and the caller
    /// gets `RpcError::ClientError`.
    Reject(String),
}

#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn on_before_call(&self, ctx: &RpcContext, msg: &RpcMessage, annotations: &mut Annotations) -> BeforeDecision;

    async fn on_after_call(&self, ctx: &RpcContext, msg: &RpcMessage, result: &RpcOutcome<Bytes>);

    async fn on_error(&self, ctx: &RpcContext, msg: &RpcMessage, error: &str);

    fn name(&self) -> &str;

    /// Lower runs earlier in `on_before_call`, later (reverse order) in
    /// `on_after_call`/`on_error`.
    fn priority(&self) -> i32;
}

/// Outcome of running the chain's before-call phase for one call.
pub enum ChainBeforeOutcome {
    Proceed,
    ShortCircuit(Bytes),
    Rejected,
}

#[derive(Default)]
pub struct InterceptorChain {
    interceptors: ArcSwap<Vec<Arc<dyn Interceptor>>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self {
            interceptors: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Adds `interceptor` to the chain, re-sorting by ascending priority.
    /// Copy-on-write: builds a new `Vec` and swaps it in atomically so a
    /// concurrent `execute` call always sees either the whole old list or
    /// the whole new one, never a partial mutation.
    pub fn register(&self, interceptor: Arc<dyn Interceptor>) {
        let mut next: Vec<Arc<dyn Interceptor>> = (**self.interceptors.load()).clone();
        next.push(interceptor);
        next.sort_by_key(|i| i.priority());
        self.interceptors.store(Arc::new(next));
    }

    pub fn len(&self) -> usize {
        self.interceptors.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `on_before_call` on every interceptor in ascending priority
    /// order. On the first `Reject`, runs `on_error` on every interceptor
    /// that already ran, in reverse order, and returns `Rejected`. On the
    /// first `ShortCircuit`, stops iterating and returns it directly — later
    /// before-hooks never see this call.
    pub async fn run_before(&self, ctx: &RpcContext, msg: &RpcMessage, annotations: &mut Annotations) -> ChainBeforeOutcome {
        let snapshot = self.interceptors.load_full();
        let mut ran = Vec::with_capacity(snapshot.len());

        for interceptor in snapshot.iter() {
            let decision = guard_panic(
                interceptor.name(),
                AssertUnwindSafe(interceptor.on_before_call(ctx, msg, annotations)).catch_unwind(),
            )
            .await;

            match decision {
                Some(BeforeDecision::Continue) => ran.push(interceptor.clone()),
                Some(BeforeDecision::ShortCircuit(bytes)) => {
                    ran.push(interceptor.clone());
                    return ChainBeforeOutcome::ShortCircuit(bytes);
                },
                Some(BeforeDecision::Reject(reason)) => {
                    ran.push(interceptor.clone());
                    for done in ran.iter().rev() {
                        run_on_error(done.as_ref(), ctx, msg, &reason).await;
                    }
                    return ChainBeforeOutcome::Rejected;
                },
                None => {
                    // Panicked: treated as an internal failure, not a veto.
                    // `on_error` still runs for everyone who ran so far.
                    ran.push(interceptor.clone());
                    for done in ran.iter().rev() {
                        run_on_error(done.as_ref(), ctx, msg, "interceptor panicked").await;
                    }
                    return ChainBeforeOutcome::Rejected;
                },
            }
        }

        ChainBeforeOutcome::Proceed
    }

    /// Runs `on_after_call` on every interceptor in descending priority
    /// order (the reverse of `run_before`). A panicking interceptor is
    /// logged and skipped; it never aborts the rest of the chain.
    pub async fn run_after(&self, ctx: &RpcContext, msg: &RpcMessage, result: &RpcOutcome<Bytes>) {
        let snapshot = self.interceptors.load_full();
        for interceptor in snapshot.iter().rev() {
            guard_panic(
                interceptor.name(),
                AssertUnwindSafe(interceptor.on_after_call(ctx, msg, result)).catch_unwind(),
            )
            .await;
        }
    }

    /// Runs `on_error` on every interceptor in descending priority order,
    /// used when the handler itself failed (as opposed to a before-call
    /// veto, which handles its own reverse-order `on_error` pass inline).
    pub async fn run_error(&self, ctx: &RpcContext, msg: &RpcMessage, error: &str) {
        let snapshot = self.interceptors.load_full();
        for interceptor in snapshot.iter().rev() {
            run_on_error(interceptor.as_ref(), ctx, msg, error).await;
        }
    }
}

async fn run_on_error(interceptor: &dyn Interceptor, ctx: &RpcContext, msg: &RpcMessage, error: &str) {
    guard_panic(
        interceptor.name(),
        AssertUnwindSafe(interceptor.on_error(ctx, msg, error)).catch_unwind(),
    )
    .await;
}

async fn guard_panic<F, T>(interceptor_name: &str, fut: F) -> Option<T>
where
    F: std::future::Future<Output = Result<T, Box<dyn std::any::Any + Send>>>,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            warn!(interceptor = interceptor_name, %message, "interceptor panicked, continuing chain");
            None
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RpcContext;

    struct Recorder {
        name: &'static str,
        priority: i32,
        before_log: Arc<std::sync::Mutex<Vec<&'static str>>>,
        after_log: Arc<std::sync::Mutex<Vec<&'static str>>>,
        veto: bool,
    }

    #[async_trait]
    impl Interceptor for Recorder {
        async fn on_before_call(&self, _ctx: &RpcContext, _msg: &RpcMessage, _annotations: &mut Annotations) -> BeforeDecision {
            self.before_log.lock().unwrap().push(self.name);
            if self.veto {
                BeforeDecision::Reject("vetoed".into())
            } else {
                BeforeDecision::Continue
            }
        }

        async fn on_after_call(&self, _ctx: &RpcContext, _msg: &RpcMessage, _result: &RpcOutcome<Bytes>) {
            self.after_log.lock().unwrap().push(self.name);
        }

        async fn on_error(&self, _ctx: &RpcContext, _msg: &RpcMessage, _error: &str) {
            self.after_log.lock().unwrap().push(self.name);
        }

        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }
    }

    fn sample_message() -> (RpcContext, RpcMessage) {
        let mut ctx = RpcContext::new("Svc", "m");
        ctx.call_id = crate::context::CallId(1);
        let msg = RpcMessage::request(ctx.clone(), Bytes::new());
        (ctx, msg)
    }

    #[tokio::test]
    async fn runs_before_in_ascending_and_after_in_descending_priority() {
        let chain = InterceptorChain::new();
        let before_log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let after_log = Arc::new(std::sync::Mutex::new(Vec::new()));

        chain.register(Arc::new(Recorder {
            name: "low",
            priority: 10,
            before_log: before_log.clone(),
            after_log: after_log.clone(),
            veto: false,
        }));
        chain.register(Arc::new(Recorder {
            name: "high",
            priority: 200,
            before_log: before_log.clone(),
            after_log: after_log.clone(),
            veto: false,
        }));

        let (ctx, msg) = sample_message();
        let mut annotations = Annotations::new();
        matches!(chain.run_before(&ctx, &msg, &mut annotations).await, ChainBeforeOutcome::Proceed);
        chain.run_after(&ctx, &msg, &Ok(Bytes::new())).await;

        assert_eq!(*before_log.lock().unwrap(), vec!["low", "high"]);
        assert_eq!(*after_log.lock().unwrap(), vec!["high", "low"]);
    }

    #[tokio::test]
    async fn veto_stops_remaining_before_hooks_and_runs_on_error_in_reverse() {
        let chain = InterceptorChain::new();
        let before_log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let after_log = Arc::new(std::sync::Mutex::new(Vec::new()));

        chain.register(Arc::new(Recorder {
            name: "first",
            priority: 10,
            before_log: before_log.clone(),
            after_log: after_log.clone(),
            veto: true,
        }));
        chain.register(Arc::new(Recorder {
            name: "second",
            priority: 20,
            before_log: before_log.clone(),
            after_log: after_log.clone(),
            veto: false,
        }));

        let (ctx, msg) = sample_message();
        let mut annotations = Annotations::new();
        let outcome = chain.run_before(&ctx, &msg, &mut annotations).await;
        assert!(matches!(outcome, ChainBeforeOutcome::Rejected));
        assert_eq!(*before_log.lock().unwrap(), vec!["first"]);
        assert_eq!(*after_log.lock().unwrap(), vec!["first"]);
    }
}
