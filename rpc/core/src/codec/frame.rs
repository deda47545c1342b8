//! The fixed 64-byte wire header (see wire frame v1 layout) and its CRC32
//! integrity check. The header is payload-format-agnostic: whether the
//! payload bytes are JSON or binary TLV is a property of the payload itself,
//! not the header.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::RpcError;

pub const MAGIC: u32 = 0x4845_4C49; // "HELI"
pub const HEADER_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub call_id: u64,
    pub msg_type: u16,
    pub priority: u8,
    pub call_kind: u8,
    pub sender_id: u64,
    pub receiver_id: u64,
    pub timestamp_ms: u64,
    pub payload_size: u32,
    pub checksum: u32,
    pub sequence_number: u32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_ms: u32,
}

impl FrameHeader {
    /// Encodes the header fields (everything but `checksum`) in wire order,
    /// used both to compute the checksum and to write the final header.
    fn write_fields(&self, buf: &mut BytesMut, checksum: u32) {
        buf.put_u32(MAGIC);
        buf.put_u64(self.call_id);
        buf.put_u16(self.msg_type);
        buf.put_u8(self.priority);
        buf.put_u8(self.call_kind);
        buf.put_u64(self.sender_id);
        buf.put_u64(self.receiver_id);
        buf.put_u64(self.timestamp_ms);
        buf.put_u32(self.payload_size);
        buf.put_u32(checksum);
        buf.put_u32(self.sequence_number);
        buf.put_u32(self.retry_count);
        buf.put_u32(self.max_retries);
        buf.put_u32(self.timeout_ms);
    }

    /// Computes the header's checksum contribution: CRC32 over every header
    /// field except the checksum field itself, in wire order.
    fn header_crc(&self) -> u32 {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        self.write_fields(&mut buf, 0);
        // Checksum field occupies bytes [44, 48); zero it for the crc input
        // (write_fields already wrote 0 there, so buf is ready as-is).
        crc32fast::hash(&buf)
    }

    /// Computes the final checksum field: header CRC XOR-folded with the
    /// payload's CRC.
    pub fn compute_checksum(&self, payload: &[u8]) -> u32 {
        self.header_crc() ^ crc32fast::hash(payload)
    }

    pub fn encode(&self, payload: &[u8]) -> BytesMut {
        let checksum = self.compute_checksum(payload);
        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        self.write_fields(&mut buf, checksum);
        buf.extend_from_slice(payload);
        buf
    }

    pub fn decode(mut bytes: Bytes) -> Result<(Self, Bytes), RpcError> {
        if bytes.len() < HEADER_LEN {
            return Err(RpcError::SerializationError(format!(
                "frame too short: {} bytes, need at least {}",
                bytes.len(),
                HEADER_LEN
            )));
        }

        let magic = bytes.get_u32();
        if magic != MAGIC {
            return Err(RpcError::SerializationError(format!(
                "unknown magic number: {magic:#x}"
            )));
        }

        let call_id = bytes.get_u64();
        let msg_type = bytes.get_u16();
        let priority = bytes.get_u8();
        let call_kind = bytes.get_u8();
        let sender_id = bytes.get_u64();
        let receiver_id = bytes.get_u64();
        let timestamp_ms = bytes.get_u64();
        let payload_size = bytes.get_u32();
        let checksum = bytes.get_u32();
        let sequence_number = bytes.get_u32();
        let retry_count = bytes.get_u32();
        let max_retries = bytes.get_u32();
        let timeout_ms = bytes.get_u32();

        if bytes.len() != payload_size as usize {
            return Err(RpcError::SerializationError(format!(
                "payload_size header field ({}) does not match actual payload length ({})",
                payload_size,
                bytes.len()
            )));
        }

        let header = FrameHeader {
            call_id,
            msg_type,
            priority,
            call_kind,
            sender_id,
            receiver_id,
            timestamp_ms,
            payload_size,
            checksum,
            sequence_number,
            retry_count,
            max_retries,
            timeout_ms,
        };

        let expected = header.compute_checksum(&bytes);
        if expected != checksum {
            return Err(RpcError::SerializationError(format!(
                "checksum mismatch: header claims {checksum:#x}, computed {expected:#x}"
            )));
        }

        Ok((header, bytes))
    }
}
