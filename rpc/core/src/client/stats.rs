//! Client-side counters, mirroring `original_source/Shared/RPC/RpcTypes.h`'s
//! `RpcStats` the way `server::stats` mirrors it for the server side, plus
//! `late_responses` — a call the client already gave up on whose response
//! shows up anyway. Only the client's pending-calls table knows that
//! happened, so it lives here rather than in `server::stats`.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::metrics::CallOutcome;

#[derive(Debug, Default)]
pub(super) struct AtomicClientStats {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    timeout_calls: AtomicU64,
    notifications_sent: AtomicU64,
    late_responses: AtomicU64,
    heartbeats_sent: AtomicU64,
    heartbeats_acked: AtomicU64,
}

impl AtomicClientStats {
    pub(super) fn record(&self, outcome: CallOutcome) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        match outcome {
            CallOutcome::Success => self.successful_calls.fetch_add(1, Ordering::Relaxed),
            CallOutcome::Failure => self.failed_calls.fetch_add(1, Ordering::Relaxed),
            CallOutcome::Timeout => self.timeout_calls.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub(super) fn record_notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_late_response(&self) {
        self.late_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_heartbeat_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_heartbeat_acked(&self) {
        self.heartbeats_acked.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn snapshot(&self) -> ClientStats {
        ClientStats {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            timeout_calls: self.timeout_calls.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            late_responses: self.late_responses.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            heartbeats_acked: self.heartbeats_acked.load(Ordering::Relaxed),
        }
    }

    pub(super) fn reset(&self) {
        self.total_calls.store(0, Ordering::Relaxed);
        self.successful_calls.store(0, Ordering::Relaxed);
        self.failed_calls.store(0, Ordering::Relaxed);
        self.timeout_calls.store(0, Ordering::Relaxed);
        self.notifications_sent.store(0, Ordering::Relaxed);
        self.late_responses.store(0, Ordering::Relaxed);
        self.heartbeats_sent.store(0, Ordering::Relaxed);
        self.heartbeats_acked.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub timeout_calls: u64,
    pub notifications_sent: u64,
    pub late_responses: u64,
    pub heartbeats_sent: u64,
    pub heartbeats_acked: u64,
}
