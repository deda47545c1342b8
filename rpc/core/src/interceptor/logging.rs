//! Records request, response (with duration), and error lines for every
//! call. Sampling is all-or-nothing via the three constructor flags, mapped
//! onto `RpcInterceptors.h`'s `LoggingInterceptor(bool, bool, bool)`.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::Instant,
};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{error, info};

use super::{Annotations, BeforeDecision, Interceptor};
use crate::{context::RpcContext, error::RpcOutcome, message::RpcMessage};

pub struct LoggingInterceptor {
    log_requests: bool,
    log_responses: bool,
    log_performance: bool,
    start_times: Mutex<HashMap<u64, Instant>>,
}

impl LoggingInterceptor {
    pub fn new(log_requests: bool, log_responses: bool, log_performance: bool) -> Self {
        Self {
            log_requests,
            log_responses,
            log_performance,
            start_times: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for LoggingInterceptor {
    fn default() -> Self {
        Self::new(true, true, true)
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn on_before_call(&self, ctx: &RpcContext, _msg: &RpcMessage, _annotations: &mut Annotations) -> BeforeDecision {
        if self.log_performance {
            self.start_times.lock().expect("logging start-times poisoned").insert(ctx.call_id.0, Instant::now());
        }
        if self.log_requests {
            info!(
                call_id = ctx.call_id.0,
                service = %ctx.service_name,
                method = %ctx.method_name,
                "rpc request"
            );
        }
        BeforeDecision::Continue
    }

    async fn on_after_call(&self, ctx: &RpcContext, _msg: &RpcMessage, result: &RpcOutcome<Bytes>) {
        let duration_ms = self.take_elapsed_ms(ctx.call_id.0);
        if self.log_responses {
            match result {
                Ok(bytes) => info!(
                    call_id = ctx.call_id.0,
                    service = %ctx.service_name,
                    method = %ctx.method_name,
                    duration_ms,
                    result_len = bytes.len(),
                    "rpc response"
                ),
                Err(err) => error!(
                    call_id = ctx.call_id.0,
                    service = %ctx.service_name,
                    method = %ctx.method_name,
                    duration_ms,
                    %err,
                    "rpc response error"
                ),
            }
        }
    }

    async fn on_error(&self, ctx: &RpcContext, _msg: &RpcMessage, error_message: &str) {
        let duration_ms = self.take_elapsed_ms(ctx.call_id.0);
        error!(
            call_id = ctx.call_id.0,
            service = %ctx.service_name,
            method = %ctx.method_name,
            duration_ms,
            error = error_message,
            "rpc call errored"
        );
    }

    fn name(&self) -> &str {
        "LoggingInterceptor"
    }

    fn priority(&self) -> i32 {
        100
    }
}

impl LoggingInterceptor {
    fn take_elapsed_ms(&self, call_id: u64) -> f64 {
        let mut start_times = self.start_times.lock().expect("logging start-times poisoned");
        start_times
            .remove(&call_id)
            .map(|start| start.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CallId;

    #[tokio::test]
    async fn records_and_clears_start_time_across_the_call_lifecycle() {
        let interceptor = LoggingInterceptor::default();
        let mut ctx = RpcContext::new("Svc", "m");
        ctx.call_id = CallId(42);
        let msg = RpcMessage::request(ctx.clone(), Bytes::new());
        let mut annotations = Annotations::new();

        interceptor.on_before_call(&ctx, &msg, &mut annotations).await;
        assert!(interceptor.start_times.lock().unwrap().contains_key(&42));

        interceptor.on_after_call(&ctx, &msg, &Ok(Bytes::new())).await;
        assert!(!interceptor.start_times.lock().unwrap().contains_key(&42));
    }
}
