//! The RPC message: a context plus an opaque parameter/result payload and an
//! optional error. `parameters` and `result` are kept as [`Bytes`] — this
//! crate's codecs decide how to turn them into bytes on the wire; what they
//! *mean* is up to the service.

use bytes::Bytes;

use crate::{
    context::{CallKind, RpcContext},
    error::RpcError,
};

#[derive(Debug, Clone)]
pub struct RpcMessage {
    pub context: RpcContext,
    pub parameters: Bytes,
    pub result: Bytes,
    pub error_code: i32,
    pub error_message: String,
}

impl RpcMessage {
    pub fn request(context: RpcContext, parameters: Bytes) -> Self {
        Self {
            context,
            parameters,
            result: Bytes::new(),
            error_code: 0,
            error_message: String::new(),
        }
    }

    pub fn response(context: RpcContext, result: Bytes) -> Self {
        let mut context = context;
        context.call_kind = CallKind::Response;
        Self {
            context,
            parameters: Bytes::new(),
            result,
            error_code: 0,
            error_message: String::new(),
        }
    }

    pub fn error(mut context: RpcContext, err: &RpcError) -> Self {
        context.call_kind = CallKind::Error;
        Self {
            context,
            parameters: Bytes::new(),
            result: Bytes::new(),
            error_code: err.code(),
            error_message: err.to_string(),
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self.context.call_kind, CallKind::Request)
    }

    pub fn is_response(&self) -> bool {
        matches!(self.context.call_kind, CallKind::Response)
    }

    pub fn is_notification(&self) -> bool {
        matches!(self.context.call_kind, CallKind::Notification)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.context.call_kind, CallKind::Error) || self.error_code != 0
    }

    /// Total size this message would occupy on the wire, header included.
    pub fn serialized_size_estimate(&self) -> usize {
        crate::codec::frame::HEADER_LEN
            + self.parameters.len()
            + self.result.len()
            + self.error_message.len()
    }

    pub fn validate(&self) -> Result<(), RpcError> {
        self.context.validate()
    }
}
