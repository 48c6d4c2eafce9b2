//! Wire model and streaming codec for the text-line pub/sub protocol.

pub mod frame;
mod helper;
pub mod packet;

pub use frame::LineCodec;
pub use packet::*;

#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown operation {0:?}")]
    UnknownOp(String),

    #[error("malformed {op} line: {line:?}")]
    Malformed { op: &'static str, line: String },

    #[error("invalid {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("control line is not valid utf-8")]
    InvalidUtf8,

    #[error("control line longer than {max} bytes")]
    LineTooLong { max: usize },

    #[error("payload of {len} bytes exceeds limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("payload not followed by CRLF")]
    MissingPayloadTerminator,

    #[error("invalid CONNECT object: {0}")]
    InvalidConnect(#[from] serde_json::Error),

    #[error("stream ended inside a frame ({buffered} bytes buffered)")]
    Truncated { buffered: usize },
}
