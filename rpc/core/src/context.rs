//! The RPC call context: identifies a call, its service/method target, its
//! serialization format, and its retry/timeout budget.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A call identifier. `CallId(0)` is never assigned to a real call and is
/// used as a sentinel for "no call" (e.g. a bare notification the sender
/// does not intend to correlate a response to).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub u64);

impl CallId {
    pub const INVALID: CallId = CallId(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic, process-wide generator for [`CallId`]s. Shared by every
/// `RpcClient` in a process so ids never collide even across independent
/// client instances talking to different servers.
#[derive(Debug, Default)]
pub struct CallIdGenerator(AtomicU64);

impl CallIdGenerator {
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> CallId {
        CallId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CallKind {
    Request = 0,
    Response = 1,
    Notification = 2,
    Heartbeat = 3,
    Error = 4,
}

impl CallKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CallKind::Request),
            1 => Some(CallKind::Response),
            2 => Some(CallKind::Notification),
            3 => Some(CallKind::Heartbeat),
            4 => Some(CallKind::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SerializationFormat {
    Json = 0,
    Binary = 1,
}

impl SerializationFormat {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => SerializationFormat::Binary,
            // Any unrecognized format defaults to JSON, matching the
            // original RpcMessage::ToMessage behavior.
            _ => SerializationFormat::Json,
        }
    }
}

impl Default for SerializationFormat {
    fn default() -> Self {
        SerializationFormat::Json
    }
}

/// Maximum allowed `max_retries` value; enforced at decode time.
pub const MAX_RETRIES_CEILING: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcContext {
    pub call_id: CallId,
    pub service_name: String,
    pub method_name: String,
    pub call_kind: CallKind,
    pub format: SerializationFormat,
    pub timestamp_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u32,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub server_id: String,
}

fn default_timeout_ms() -> u32 {
    5000
}

fn default_max_retries() -> u32 {
    3
}

impl RpcContext {
    pub fn new(service_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            call_id: CallId::INVALID,
            service_name: service_name.into(),
            method_name: method_name.into(),
            call_kind: CallKind::Request,
            format: SerializationFormat::Json,
            timestamp_ms: now_ms(),
            timeout_ms: default_timeout_ms(),
            retry_count: 0,
            max_retries: default_max_retries(),
            client_id: String::new(),
            server_id: String::new(),
        }
    }

    /// Validates the invariants spec'd for a context: call id validity
    /// against call kind, and the retry/max-retry bounds.
    pub fn validate(&self) -> Result<(), crate::error::RpcError> {
        use crate::error::RpcError;

        if self.max_retries > MAX_RETRIES_CEILING {
            return Err(RpcError::InvalidParameters(format!(
                "max_retries {} exceeds ceiling {}",
                self.max_retries, MAX_RETRIES_CEILING
            )));
        }
        if self.retry_count > self.max_retries {
            return Err(RpcError::InvalidParameters(format!(
                "retry_count {} exceeds max_retries {}",
                self.retry_count, self.max_retries
            )));
        }
        if matches!(self.call_kind, CallKind::Request) && !self.call_id.is_valid() {
            return Err(RpcError::InvalidParameters(
                "request context requires a valid call_id".into(),
            ));
        }
        Ok(())
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_never_yields_zero() {
        let gen = CallIdGenerator::new();
        for _ in 0..100 {
            assert!(gen.next().is_valid());
        }
    }

    #[test]
    fn rejects_max_retries_above_ceiling() {
        let mut ctx = RpcContext::new("svc", "method");
        ctx.call_id = CallId(1);
        ctx.max_retries = 11;
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn rejects_retry_count_above_max() {
        let mut ctx = RpcContext::new("svc", "method");
        ctx.call_id = CallId(1);
        ctx.retry_count = 4;
        ctx.max_retries = 3;
        assert!(ctx.validate().is_err());
    }

    #[test]
    fn unrecognized_format_defaults_to_json() {
        assert_eq!(SerializationFormat::from_u8(99), SerializationFormat::Json);
    }
}
