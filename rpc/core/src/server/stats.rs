//! Process-local counters mirroring `original_source/Shared/RPC/RpcTypes.h`'s
//! `RpcStats` in full, for in-process callers that want a plain snapshot
//! without going through Prometheus text parsing.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::metrics::CallOutcome;

#[derive(Debug, Default)]
pub(super) struct AtomicServerStats {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    timeout_calls: AtomicU64,
    overloaded_calls: AtomicU64,
    dropped_notifications: AtomicU64,
}

impl AtomicServerStats {
    pub(super) fn record(&self, outcome: CallOutcome) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        match outcome {
            CallOutcome::Success => self.successful_calls.fetch_add(1, Ordering::Relaxed),
            CallOutcome::Failure => self.failed_calls.fetch_add(1, Ordering::Relaxed),
            CallOutcome::Timeout => self.timeout_calls.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub(super) fn record_overloaded(&self) {
        self.overloaded_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn record_dropped_notification(&self) {
        self.dropped_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn snapshot(&self) -> ServerStats {
        ServerStats {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            timeout_calls: self.timeout_calls.load(Ordering::Relaxed),
            overloaded_calls: self.overloaded_calls.load(Ordering::Relaxed),
            dropped_notifications: self.dropped_notifications.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub timeout_calls: u64,
    pub overloaded_calls: u64,
    pub dropped_notifications: u64,
}
