//! Delegates the accept/reject decision to a user-supplied callback. Mirrors
//! `RpcInterceptors.h`'s `AuthenticationInterceptor`: if no callback has been
//! set, every call is rejected (fail closed, not fail open); if the callback
//! panics, the call is rejected rather than propagating the panic past this
//! interceptor.

use std::{panic::AssertUnwindSafe, sync::RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use super::{Annotations, BeforeDecision, Interceptor};
use crate::{context::RpcContext, error::RpcOutcome, message::RpcMessage};

/// `(ctx, msg) -> bool`. Must be `Send + Sync` since the interceptor chain
/// may run concurrently for many connections.
pub type AuthCallback = Box<dyn Fn(&RpcContext, &RpcMessage) -> bool + Send + Sync>;

pub struct AuthenticationInterceptor {
    callback: RwLock<Option<AuthCallback>>,
}

impl AuthenticationInterceptor {
    /// Starts with no callback set, which rejects every call until
    /// [`set_callback`](Self::set_callback) is called — matching the
    /// original's fail-closed default.
    pub fn new() -> Self {
        Self {
            callback: RwLock::new(None),
        }
    }

    pub fn with_callback(callback: AuthCallback) -> Self {
        Self {
            callback: RwLock::new(Some(callback)),
        }
    }

    pub fn set_callback(&self, callback: AuthCallback) {
        *self.callback.write().expect("auth callback lock poisoned") = Some(callback);
    }
}

impl Default for AuthenticationInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Interceptor for AuthenticationInterceptor {
    async fn on_before_call(&self, ctx: &RpcContext, msg: &RpcMessage, _annotations: &mut Annotations) -> BeforeDecision {
        let guard = self.callback.read().expect("auth callback lock poisoned");
        let Some(callback) = guard.as_ref() else {
            return BeforeDecision::Reject("no authentication callback configured".into());
        };

        // Runs the user callback on the current (already-async) task; a
        // panicking callback must not take down the dispatch path, so it is
        // caught here rather than relying on the chain's outer guard, which
        // treats a panic as an interceptor crash rather than a plain reject.
        match std::panic::catch_unwind(AssertUnwindSafe(|| callback(ctx, msg))) {
            Ok(true) => BeforeDecision::Continue,
            Ok(false) => BeforeDecision::Reject("authentication callback rejected the call".into()),
            Err(_) => BeforeDecision::Reject("authentication callback panicked".into()),
        }
    }

    async fn on_after_call(&self, _ctx: &RpcContext, _msg: &RpcMessage, _result: &RpcOutcome<Bytes>) {}

    async fn on_error(&self, _ctx: &RpcContext, _msg: &RpcMessage, _error: &str) {}

    fn name(&self) -> &str {
        "AuthenticationInterceptor"
    }

    fn priority(&self) -> i32 {
        10
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CallId;

    fn sample() -> (RpcContext, RpcMessage) {
        let mut ctx = RpcContext::new("Svc", "m");
        ctx.call_id = CallId(1);
        let msg = RpcMessage::request(ctx.clone(), Bytes::new());
        (ctx, msg)
    }

    #[tokio::test]
    async fn rejects_when_no_callback_is_set() {
        let interceptor = AuthenticationInterceptor::new();
        let (ctx, msg) = sample();
        let mut annotations = Annotations::new();
        let decision = interceptor.on_before_call(&ctx, &msg, &mut annotations).await;
        assert!(matches!(decision, BeforeDecision::Reject(_)));
    }

    #[tokio::test]
    async fn continues_when_callback_returns_true() {
        let interceptor = AuthenticationInterceptor::with_callback(Box::new(|_, _| true));
        let (ctx, msg) = sample();
        let mut annotations = Annotations::new();
        let decision = interceptor.on_before_call(&ctx, &msg, &mut annotations).await;
        assert!(matches!(decision, BeforeDecision::Continue));
    }

    #[tokio::test]
    async fn rejects_when_callback_returns_false() {
        let interceptor = AuthenticationInterceptor::with_callback(Box::new(|_, _| false));
        let (ctx, msg) = sample();
        let mut annotations = Annotations::new();
        let decision = interceptor.on_before_call(&ctx, &msg, &mut annotations).await;
        assert!(matches!(decision, BeforeDecision::Reject(_)));
    }

    #[tokio::test]
    async fn rejects_when_callback_panics() {
        let interceptor = AuthenticationInterceptor::with_callback(Box::new(|_, _| panic!("boom")));
        let (ctx, msg) = sample();
        let mut annotations = Annotations::new();
        let decision = interceptor.on_before_call(&ctx, &msg, &mut annotations).await;
        assert!(matches!(decision, BeforeDecision::Reject(_)));
    }
}
