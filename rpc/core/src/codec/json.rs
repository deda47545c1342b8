//! JSON payload schema: `{"context": {...}, "parameters", "result",
//! "error_code", "error_message"}`, matching the original
//! `RpcMessagePayload::ToJson`/`FromJson` field names exactly. Opaque
//! `parameters`/`result` bytes are carried as base64 strings since the
//! crate's payload type is `Bytes`, not a nested string.

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    context::{CallKind, RpcContext, SerializationFormat},
    error::RpcError,
    message::RpcMessage,
};

#[derive(Serialize, Deserialize)]
struct WireContext {
    call_id: u64,
    service_name: String,
    method_name: String,
    call_type: u8,
    format: u8,
    timestamp: u64,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u32,
    #[serde(default)]
    retry_count: u32,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    server_id: String,
}

fn default_timeout_ms() -> u32 {
    5000
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Serialize, Deserialize)]
struct WirePayload {
    context: WireContext,
    #[serde(default)]
    parameters: String,
    #[serde(default)]
    result: String,
    #[serde(default)]
    error_code: i32,
    #[serde(default)]
    error_message: String,
    /// Unknown fields are tolerated and ignored, per spec.
    #[serde(flatten)]
    _extra: std::collections::HashMap<String, Value>,
}

pub fn encode(message: &RpcMessage) -> Result<Bytes, RpcError> {
    let ctx = &message.context;
    let wire = WirePayload {
        context: WireContext {
            call_id: ctx.call_id.0,
            service_name: ctx.service_name.clone(),
            method_name: ctx.method_name.clone(),
            call_type: ctx.call_kind as u8,
            format: ctx.format as u8,
            timestamp: ctx.timestamp_ms,
            timeout_ms: ctx.timeout_ms,
            retry_count: ctx.retry_count,
            max_retries: ctx.max_retries,
            client_id: ctx.client_id.clone(),
            server_id: ctx.server_id.clone(),
        },
        parameters: STANDARD.encode(&message.parameters),
        result: STANDARD.encode(&message.result),
        error_code: message.error_code,
        error_message: message.error_message.clone(),
        _extra: Default::default(),
    };
    let bytes = serde_json::to_vec(&wire)?;
    Ok(Bytes::from(bytes))
}

pub fn decode(bytes: &[u8]) -> Result<RpcMessage, RpcError> {
    let wire: WirePayload = serde_json::from_slice(bytes)?;
    let context = RpcContext {
        call_id: crate::context::CallId(wire.context.call_id),
        service_name: wire.context.service_name,
        method_name: wire.context.method_name,
        call_kind: CallKind::from_u8(wire.context.call_type).ok_or_else(|| {
            RpcError::SerializationError(format!("unknown call_type {}", wire.context.call_type))
        })?,
        format: SerializationFormat::from_u8(wire.context.format),
        timestamp_ms: wire.context.timestamp,
        timeout_ms: wire.context.timeout_ms,
        retry_count: wire.context.retry_count,
        max_retries: wire.context.max_retries,
        client_id: wire.context.client_id,
        server_id: wire.context.server_id,
    };

    let parameters = STANDARD
        .decode(wire.parameters)
        .map_err(|e| RpcError::SerializationError(format!("invalid parameters base64: {e}")))?;
    let result = STANDARD
        .decode(wire.result)
        .map_err(|e| RpcError::SerializationError(format!("invalid result base64: {e}")))?;

    Ok(RpcMessage {
        context,
        parameters: Bytes::from(parameters),
        result: Bytes::from(result),
        error_code: wire.error_code,
        error_message: wire.error_message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_request() {
        let ctx = RpcContext::new("CalculatorService", "add");
        let mut ctx = ctx;
        ctx.call_id = crate::context::CallId(7);
        let message = RpcMessage::request(ctx, Bytes::from_static(b"{\"a\":1,\"b\":2}"));

        let bytes = encode(&message).unwrap();
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.context.call_id.0, 7);
        assert_eq!(decoded.context.service_name, "CalculatorService");
        assert_eq!(&decoded.parameters[..], b"{\"a\":1,\"b\":2}");
    }

    #[test]
    fn missing_optional_fields_default() {
        let raw = serde_json::json!({
            "context": {
                "call_id": 1,
                "service_name": "Svc",
                "method_name": "m",
                "call_type": 0,
                "format": 0,
                "timestamp": 0,
            }
        });
        let decoded = decode(raw.to_string().as_bytes()).unwrap();
        assert_eq!(decoded.context.timeout_ms, 5000);
        assert_eq!(decoded.context.max_retries, 3);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let raw = serde_json::json!({
            "context": {
                "call_id": 1,
                "service_name": "Svc",
                "method_name": "m",
                "call_type": 0,
                "format": 0,
                "timestamp": 0,
            },
            "some_future_field": "ignored",
        });
        assert!(decode(raw.to_string().as_bytes()).is_ok());
    }
}
