//! The closed error taxonomy every public entry point in this crate returns.
//!
//! There is deliberately no `Success` variant: success is represented by
//! `Ok(T)` in [`RpcOutcome`]. Everything that was a negative `RpcResult` code
//! in the originating design is a variant here.

use std::fmt;

/// Result alias used throughout the crate so call sites read the same way a
/// typed `RpcResult` would: `RpcOutcome<Bytes>` rather than
/// `Result<Bytes, RpcError>` at every signature.
pub type RpcOutcome<T> = Result<T, RpcError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    #[error("rpc call failed: {0}")]
    Failed(String),

    #[error("rpc call timed out after {0}ms")]
    Timeout(u32),

    #[error("service not found: {0}")]
    ServiceNotFound(String),

    #[error("method not found: {service}.{method}")]
    MethodNotFound { service: String, method: String },

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("server overloaded")]
    ServerOverloaded,

    #[error("client error: {0}")]
    ClientError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl RpcError {
    /// The numeric code the original taxonomy assigned this kind. Exposed so
    /// wire encoders and callers that need to cross a non-Rust boundary can
    /// reproduce the original `RpcResult` integers.
    pub fn code(&self) -> i32 {
        match self {
            RpcError::Failed(_) => -1,
            RpcError::Timeout(_) => -2,
            RpcError::ServiceNotFound(_) => -3,
            RpcError::MethodNotFound { .. } => -4,
            RpcError::InvalidParameters(_) => -5,
            RpcError::SerializationError(_) => -6,
            RpcError::NetworkError(_) => -7,
            RpcError::ServerOverloaded => -8,
            RpcError::ClientError(_) => -9,
            RpcError::InternalError(_) => -10,
        }
    }

    pub fn from_code(code: i32, message: impl Into<String>) -> Option<Self> {
        let message = message.into();
        let err = match code {
            -1 => RpcError::Failed(message),
            -2 => RpcError::Timeout(message.parse().unwrap_or_default()),
            -3 => RpcError::ServiceNotFound(message),
            -5 => RpcError::InvalidParameters(message),
            -6 => RpcError::SerializationError(message),
            -7 => RpcError::NetworkError(message),
            -8 => RpcError::ServerOverloaded,
            -9 => RpcError::ClientError(message),
            -10 => RpcError::InternalError(message),
            _ => return None,
        };
        Some(err)
    }
}

/// A panic caught from a third-party interceptor or handler, converted into
/// an `InternalError` so one misbehaving callback can never corrupt the
/// dispatch pipeline or poison a connection's state.
impl From<Box<dyn std::any::Any + Send>> for RpcError {
    fn from(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic with non-string payload".to_string());
        RpcError::InternalError(format!("panicked: {message}"))
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::NetworkError(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for RpcError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        RpcError::Timeout(0)
    }
}

/// Distinguishes errors a client should retry (transient) from those it
/// should not (the request itself is bad, or the server explicitly refused
/// it). Used by the client core's notification-retry policy.
pub fn is_retryable(err: &RpcError) -> bool {
    matches!(
        err,
        RpcError::Timeout(_) | RpcError::NetworkError(_) | RpcError::ServerOverloaded
    )
}

impl<T> fmt::Display for RpcOutcomeDisplay<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Ok(_) => write!(f, "success"),
            Err(e) => write!(f, "{e}"),
        }
    }
}

/// Helper wrapper for logging an `RpcOutcome` without matching on it at every
/// call site.
pub struct RpcOutcomeDisplay<'a, T>(pub &'a RpcOutcome<T>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip_through_from_code() {
        let err = RpcError::ServiceNotFound("calculator".into());
        let code = err.code();
        assert_eq!(code, -3);
        let rebuilt = RpcError::from_code(code, "calculator").unwrap();
        assert_eq!(rebuilt.code(), err.code());
    }

    #[test]
    fn retry_policy_excludes_client_errors() {
        assert!(is_retryable(&RpcError::Timeout(100)));
        assert!(!is_retryable(&RpcError::ClientError("bad auth".into())));
        assert!(!is_retryable(&RpcError::InvalidParameters("x".into())));
    }
}
