pub mod binary;
pub mod frame;
pub mod json;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    context::SerializationFormat,
    error::RpcError,
    message::RpcMessage,
};
use frame::{FrameHeader, HEADER_LEN};

/// `Decoder`/`Encoder` pair implementing the wire frame described in the
/// external interfaces section: a fixed 64-byte header followed by a
/// JSON or binary TLV payload, selected by `RpcContext::format`.
#[derive(Debug, Clone)]
pub struct HelianthusCodec {
    pub max_frame_bytes: u32,
    sequence_number: u32,
}

impl HelianthusCodec {
    pub fn new(max_frame_bytes: u32) -> Self {
        Self {
            max_frame_bytes,
            sequence_number: 0,
        }
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.sequence_number
    }
}

impl Default for HelianthusCodec {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

impl Decoder for HelianthusCodec {
    type Item = RpcMessage;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        // Peek the payload_size field (offset 40, width 4) without
        // consuming the buffer, so we know whether a full frame has
        // arrived yet.
        let payload_size = u32::from_be_bytes(src[40..44].try_into().unwrap());
        if payload_size > self.max_frame_bytes {
            return Err(RpcError::SerializationError(format!(
                "frame of {payload_size} bytes exceeds max_frame_bytes {}",
                self.max_frame_bytes
            )));
        }

        let total_len = HEADER_LEN + payload_size as usize;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total_len).freeze();
        let (header, payload) = FrameHeader::decode(frame)?;
        let message = decode_payload(&header, payload)?;
        Ok(Some(message))
    }
}

impl Encoder<RpcMessage> for HelianthusCodec {
    type Error = RpcError;

    fn encode(&mut self, item: RpcMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.validate()?;
        let payload = encode_payload(&item)?;
        if payload.len() as u64 > self.max_frame_bytes as u64 {
            return Err(RpcError::SerializationError(format!(
                "encoded payload of {} bytes exceeds max_frame_bytes {}",
                payload.len(),
                self.max_frame_bytes
            )));
        }

        let header = FrameHeader {
            call_id: item.context.call_id.0,
            msg_type: item.context.call_kind as u16,
            priority: 0,
            call_kind: item.context.call_kind as u8,
            sender_id: 0,
            receiver_id: 0,
            timestamp_ms: item.context.timestamp_ms,
            payload_size: payload.len() as u32,
            checksum: 0,
            sequence_number: self.next_sequence(),
            retry_count: item.context.retry_count,
            max_retries: item.context.max_retries,
            timeout_ms: item.context.timeout_ms,
        };

        let encoded = header.encode(&payload);
        dst.extend_from_slice(&encoded);
        Ok(())
    }
}

fn encode_payload(message: &RpcMessage) -> Result<Bytes, RpcError> {
    match message.context.format {
        SerializationFormat::Json => json::encode(message),
        SerializationFormat::Binary => Ok(binary::encode(message)),
    }
}

fn decode_payload(header: &FrameHeader, payload: Bytes) -> Result<RpcMessage, RpcError> {
    // The header's msg_type/call_kind fields double as a cheap discriminant
    // for which payload codec produced these bytes is NOT determined by the
    // header (the header is format-agnostic per spec); instead we try JSON
    // first (self-describing) and fall back to binary TLV. A well-behaved
    // peer always sets the format consistently with the context it wrote
    // into the payload, so this never misfires in practice; it mirrors the
    // original's own `ToMessage`/`FromMessage` format dispatch, which is
    // driven by `Context.Format`, itself only recoverable from the payload.
    match json::decode(&payload) {
        Ok(message) => Ok(message),
        Err(_) => binary::decode(header, payload),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::context::{CallId, RpcContext};

    #[test]
    fn round_trips_a_json_message_through_the_codec() {
        let mut codec = HelianthusCodec::default();
        let mut ctx = RpcContext::new("CalculatorService", "add");
        ctx.call_id = CallId(5);
        let message = RpcMessage::request(ctx, Bytes::from_static(b"{\"a\":1,\"b\":2}"));

        let mut buf = BytesMut::new();
        codec.encode(message.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.context.call_id.0, 5);
        assert_eq!(decoded.context.service_name, "CalculatorService");
    }

    #[test]
    fn round_trips_a_binary_message_through_the_codec() {
        let mut codec = HelianthusCodec::default();
        let mut ctx = RpcContext::new("CalculatorService", "add");
        ctx.call_id = CallId(6);
        ctx.format = SerializationFormat::Binary;
        let message = RpcMessage::request(ctx, Bytes::from_static(b"\x01\x02"));

        let mut buf = BytesMut::new();
        codec.encode(message, &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.context.call_id.0, 6);
        assert_eq!(&decoded.parameters[..], b"\x01\x02");
    }

    #[test]
    fn returns_none_on_partial_frame() {
        let mut codec = HelianthusCodec::default();
        let mut buf = BytesMut::from(&b"short"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut codec = HelianthusCodec::new(8);
        let mut ctx = RpcContext::new("Svc", "m");
        ctx.call_id = CallId(1);
        let message = RpcMessage::request(ctx, Bytes::from(vec![0u8; 64]));
        let mut buf = BytesMut::new();
        assert!(codec.encode(message, &mut buf).is_err());
    }
}
