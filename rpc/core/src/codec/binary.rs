//! Binary TLV payload format, modeled on the original `RpcMessagePayload::
//! ToBinary`/`FromBinary`: call id first as raw bytes (not length-prefixed),
//! then a fixed sequence of length-prefixed strings, little-endian u32
//! lengths with no null terminator.
//!
//! The original only carries `ServiceName`, `MethodName`, `Parameters`,
//! `Result`, `ErrorMessage` and a trailing `ErrorCode` in the TLV body,
//! leaning on values already present in its context struct for everything
//! else. This codec additionally carries `client_id`/`server_id` in the TLV
//! body (the original drops them on the binary path, which would otherwise
//! violate the framing round-trip invariant) and reconstructs the remaining
//! context fields — call kind, format, timestamp, timeout, retry counters —
//! from the frame header, which already carries them numerically.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    codec::frame::FrameHeader,
    context::{CallId, CallKind, RpcContext, SerializationFormat},
    error::RpcError,
    message::RpcMessage,
};

fn put_lp_bytes(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(data);
}

fn get_lp_bytes(buf: &mut Bytes) -> Result<Bytes, RpcError> {
    if buf.remaining() < 4 {
        return Err(RpcError::SerializationError(
            "truncated length-prefixed field".into(),
        ));
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(RpcError::SerializationError(
            "length-prefixed field exceeds remaining buffer".into(),
        ));
    }
    Ok(buf.copy_to_bytes(len))
}

fn get_lp_string(buf: &mut Bytes) -> Result<String, RpcError> {
    let bytes = get_lp_bytes(buf)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| RpcError::SerializationError(format!("invalid utf8 in TLV string: {e}")))
}

pub fn encode(message: &RpcMessage) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u64(message.context.call_id.0);
    put_lp_bytes(&mut buf, message.context.service_name.as_bytes());
    put_lp_bytes(&mut buf, message.context.method_name.as_bytes());
    put_lp_bytes(&mut buf, &message.parameters);
    put_lp_bytes(&mut buf, &message.result);
    put_lp_bytes(&mut buf, message.error_message.as_bytes());
    put_lp_bytes(&mut buf, message.context.client_id.as_bytes());
    put_lp_bytes(&mut buf, message.context.server_id.as_bytes());
    buf.put_i32(message.error_code);
    buf.freeze()
}

pub fn decode(header: &FrameHeader, mut bytes: Bytes) -> Result<RpcMessage, RpcError> {
    if bytes.remaining() < 8 {
        return Err(RpcError::SerializationError(
            "truncated binary payload: missing call_id".into(),
        ));
    }
    let call_id = bytes.get_u64();
    let service_name = get_lp_string(&mut bytes)?;
    let method_name = get_lp_string(&mut bytes)?;
    let parameters = get_lp_bytes(&mut bytes)?;
    let result = get_lp_bytes(&mut bytes)?;
    let error_message = get_lp_string(&mut bytes)?;
    let client_id = get_lp_string(&mut bytes)?;
    let server_id = get_lp_string(&mut bytes)?;

    if bytes.remaining() < 4 {
        return Err(RpcError::SerializationError(
            "truncated binary payload: missing error_code".into(),
        ));
    }
    let error_code = bytes.get_i32();

    let call_kind = CallKind::from_u8(header.call_kind)
        .ok_or_else(|| RpcError::SerializationError(format!("unknown call_kind {}", header.call_kind)))?;

    let context = RpcContext {
        call_id: CallId(call_id),
        service_name,
        method_name,
        call_kind,
        format: SerializationFormat::Binary,
        timestamp_ms: header.timestamp_ms,
        timeout_ms: header.timeout_ms,
        retry_count: header.retry_count,
        max_retries: header.max_retries,
        client_id,
        server_id,
    };

    Ok(RpcMessage {
        context,
        parameters,
        result,
        error_code,
        error_message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_for(ctx: &RpcContext) -> FrameHeader {
        FrameHeader {
            call_id: ctx.call_id.0,
            msg_type: ctx.call_kind as u16,
            priority: 0,
            call_kind: ctx.call_kind as u8,
            sender_id: 0,
            receiver_id: 0,
            timestamp_ms: ctx.timestamp_ms,
            payload_size: 0,
            checksum: 0,
            sequence_number: 0,
            retry_count: ctx.retry_count,
            max_retries: ctx.max_retries,
            timeout_ms: ctx.timeout_ms,
        }
    }

    #[test]
    fn round_trips_a_request() {
        let mut ctx = RpcContext::new("CalculatorService", "add");
        ctx.call_id = CallId(99);
        ctx.client_id = "client-a".into();
        let message = RpcMessage::request(ctx.clone(), Bytes::from_static(b"\x01\x02\x03"));

        let header = header_for(&ctx);
        let encoded = encode(&message);
        let decoded = decode(&header, encoded).unwrap();

        assert_eq!(decoded.context.call_id.0, 99);
        assert_eq!(decoded.context.service_name, "CalculatorService");
        assert_eq!(decoded.context.client_id, "client-a");
        assert_eq!(&decoded.parameters[..], b"\x01\x02\x03");
    }

    #[test]
    fn rejects_truncated_payload() {
        let header = FrameHeader {
            call_id: 1,
            msg_type: 0,
            priority: 0,
            call_kind: 0,
            sender_id: 0,
            receiver_id: 0,
            timestamp_ms: 0,
            payload_size: 0,
            checksum: 0,
            sequence_number: 0,
            retry_count: 0,
            max_retries: 3,
            timeout_ms: 5000,
        };
        let truncated = Bytes::from_static(b"\x00\x00\x00\x00\x00\x00\x00");
        assert!(decode(&header, truncated).is_err());
    }
}
