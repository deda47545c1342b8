//! Token-bucket rate limiting, one bucket per process (not per client, per
//! `RpcInterceptors.h`'s `RateLimitInterceptor`). The window resets every
//! second; a call is admitted if the running count for the current window is
//! still under `min(max_rps, burst_size)`.

use std::{
    sync::Mutex,
    time::Instant,
};

use async_trait::async_trait;
use bytes::Bytes;

use super::{Annotations, BeforeDecision, Interceptor};
use crate::{context::RpcContext, error::RpcOutcome, message::RpcMessage};

struct Window {
    started_at: Instant,
    count: u32,
}

pub struct RateLimitInterceptor {
    max_requests_per_second: u32,
    burst_size: u32,
    window: Mutex<Window>,
}

impl RateLimitInterceptor {
    /// `burst_size = 0` means "use `max_requests_per_second` as the burst
    /// cap too", matching the original's `BurstSize = 0` default.
    pub fn new(max_requests_per_second: u32, burst_size: u32) -> Self {
        Self {
            max_requests_per_second,
            burst_size,
            window: Mutex::new(Window {
                started_at: Instant::now(),
                count: 0,
            }),
        }
    }

    fn effective_burst(&self) -> u32 {
        if self.burst_size == 0 {
            self.max_requests_per_second
        } else {
            self.burst_size
        }
    }

    pub fn update_rate_limit(&mut self, max_requests_per_second: u32, burst_size: u32) {
        self.max_requests_per_second = max_requests_per_second;
        self.burst_size = burst_size;
    }

    /// True if admitting one more call would exceed the current window's
    /// budget. Resets the window first if a full second has elapsed.
    fn is_rate_limit_exceeded(&self) -> bool {
        let mut window = self.window.lock().expect("rate limit window poisoned");
        if window.started_at.elapsed().as_secs() >= 1 {
            window.started_at = Instant::now();
            window.count = 0;
        }

        let limit = self.max_requests_per_second.min(self.effective_burst());
        if window.count >= limit {
            return true;
        }
        window.count += 1;
        false
    }
}

#[async_trait]
impl Interceptor for RateLimitInterceptor {
    async fn on_before_call(&self, _ctx: &RpcContext, _msg: &RpcMessage, _annotations: &mut Annotations) -> BeforeDecision {
        if self.is_rate_limit_exceeded() {
            BeforeDecision::Reject("rate limit exceeded".into())
        } else {
            BeforeDecision::Continue
        }
    }

    async fn on_after_call(&self, _ctx: &RpcContext, _msg: &RpcMessage, _result: &RpcOutcome<Bytes>) {}

    async fn on_error(&self, _ctx: &RpcContext, _msg: &RpcMessage, _error: &str) {}

    fn name(&self) -> &str {
        "RateLimitInterceptor"
    }

    fn priority(&self) -> i32 {
        50
    }
}
