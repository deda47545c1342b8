//! Updates a global, lock-free (atomics-only) histogram of call counts and
//! response times, mirroring `RpcInterceptors.h`'s `PerformanceInterceptor`
//! and its `PerformanceStats` struct.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::Instant,
};

use async_trait::async_trait;
use bytes::Bytes;

use super::{Annotations, BeforeDecision, Interceptor};
use crate::{context::RpcContext, error::RpcOutcome, message::RpcMessage};

#[derive(Debug, Default)]
pub struct PerformanceStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub total_response_time_ms: u64,
    pub min_response_time_ms: u64,
    pub max_response_time_ms: u64,
}

struct AtomicStats {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    total_response_time_ms: AtomicU64,
    min_response_time_ms: AtomicU64,
    max_response_time_ms: AtomicU64,
}

impl Default for AtomicStats {
    fn default() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            total_response_time_ms: AtomicU64::new(0),
            min_response_time_ms: AtomicU64::new(u64::MAX),
            max_response_time_ms: AtomicU64::new(0),
        }
    }
}

pub struct PerformanceInterceptor {
    stats: AtomicStats,
    start_times: Mutex<HashMap<u64, Instant>>,
}

impl PerformanceInterceptor {
    pub fn new() -> Self {
        Self {
            stats: AtomicStats::default(),
            start_times: Mutex::new(HashMap::new()),
        }
    }

    pub fn stats(&self) -> PerformanceStats {
        let min = self.stats.min_response_time_ms.load(Ordering::Relaxed);
        PerformanceStats {
            total_calls: self.stats.total_calls.load(Ordering::Relaxed),
            successful_calls: self.stats.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.stats.failed_calls.load(Ordering::Relaxed),
            total_response_time_ms: self.stats.total_response_time_ms.load(Ordering::Relaxed),
            min_response_time_ms: if min == u64::MAX { 0 } else { min },
            max_response_time_ms: self.stats.max_response_time_ms.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.stats.total_calls.store(0, Ordering::Relaxed);
        self.stats.successful_calls.store(0, Ordering::Relaxed);
        self.stats.failed_calls.store(0, Ordering::Relaxed);
        self.stats.total_response_time_ms.store(0, Ordering::Relaxed);
        self.stats.min_response_time_ms.store(u64::MAX, Ordering::Relaxed);
        self.stats.max_response_time_ms.store(0, Ordering::Relaxed);
    }

    fn record(&self, elapsed_ms: u64, success: bool) {
        self.stats.total_calls.fetch_add(1, Ordering::Relaxed);
        if success {
            self.stats.successful_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.failed_calls.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.total_response_time_ms.fetch_add(elapsed_ms, Ordering::Relaxed);

        // CAS loops: plain stores would race and lose updates under
        // concurrent calls.
        let mut current_min = self.stats.min_response_time_ms.load(Ordering::Relaxed);
        while elapsed_ms < current_min {
            match self.stats.min_response_time_ms.compare_exchange_weak(
                current_min,
                elapsed_ms,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current_min = observed,
            }
        }

        let mut current_max = self.stats.max_response_time_ms.load(Ordering::Relaxed);
        while elapsed_ms > current_max {
            match self.stats.max_response_time_ms.compare_exchange_weak(
                current_max,
                elapsed_ms,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current_max = observed,
            }
        }
    }

    fn take_elapsed_ms(&self, call_id: u64) -> u64 {
        let mut start_times = self.start_times.lock().expect("performance start-times poisoned");
        start_times
            .remove(&call_id)
            .map(|start| start.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }
}

impl Default for PerformanceInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Interceptor for PerformanceInterceptor {
    async fn on_before_call(&self, ctx: &RpcContext, _msg: &RpcMessage, _annotations: &mut Annotations) -> BeforeDecision {
        self.start_times.lock().expect("performance start-times poisoned").insert(ctx.call_id.0, Instant::now());
        BeforeDecision::Continue
    }

    async fn on_after_call(&self, ctx: &RpcContext, _msg: &RpcMessage, result: &RpcOutcome<Bytes>) {
        let elapsed_ms = self.take_elapsed_ms(ctx.call_id.0);
        self.record(elapsed_ms, result.is_ok());
    }

    async fn on_error(&self, ctx: &RpcContext, _msg: &RpcMessage, _error: &str) {
        let elapsed_ms = self.take_elapsed_ms(ctx.call_id.0);
        self.record(elapsed_ms, false);
    }

    fn name(&self) -> &str {
        "PerformanceInterceptor"
    }

    fn priority(&self) -> i32 {
        200
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CallId;

    #[tokio::test]
    async fn records_success_and_failure_counts() {
        let interceptor = PerformanceInterceptor::new();
        let mut ctx = RpcContext::new("Svc", "m");
        ctx.call_id = CallId(1);
        let msg = RpcMessage::request(ctx.clone(), Bytes::new());
        let mut annotations = Annotations::new();

        interceptor.on_before_call(&ctx, &msg, &mut annotations).await;
        interceptor.on_after_call(&ctx, &msg, &Ok(Bytes::new())).await;

        ctx.call_id = CallId(2);
        interceptor.on_before_call(&ctx, &msg, &mut annotations).await;
        interceptor.on_error(&ctx, &msg, "boom").await;

        let stats = interceptor.stats();
        assert_eq!(stats.total_calls, 2);
        assert_eq!(stats.successful_calls, 1);
        assert_eq!(stats.failed_calls, 1);
    }

    #[tokio::test]
    async fn reset_clears_accumulated_stats() {
        let interceptor = PerformanceInterceptor::new();
        let mut ctx = RpcContext::new("Svc", "m");
        ctx.call_id = CallId(1);
        let msg = RpcMessage::request(ctx.clone(), Bytes::new());
        let mut annotations = Annotations::new();
        interceptor.on_before_call(&ctx, &msg, &mut annotations).await;
        interceptor.on_after_call(&ctx, &msg, &Ok(Bytes::new())).await;

        interceptor.reset_stats();
        let stats = interceptor.stats();
        assert_eq!(stats.total_calls, 0);
        assert_eq!(stats.min_response_time_ms, 0);
    }
}
