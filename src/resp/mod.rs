//! Minimal RESP codec used to talk to key-value nodes.
//!
//! Commands go out as arrays of bulk strings; replies are parsed
//! incrementally from a read buffer. Both RESP2 null encodings
//! (`$-1`, `*-1`) and the RESP3 null (`_`) decode to [`Frame::Null`].

mod frame;
mod parse;

pub use frame::Frame;
pub use parse::parse_frame;

use thiserror::Error;

/// Errors that can occur when parsing the RESP wire format.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The buffer doesn't hold a complete frame yet.
    #[error("incomplete frame: need more data")]
    Incomplete,

    /// The first byte of a frame didn't match any known type prefix.
    #[error("invalid type prefix: {0:#04x}")]
    InvalidPrefix(u8),

    #[error("invalid integer encoding")]
    InvalidInteger,

    #[error("invalid frame length: {0}")]
    InvalidFrameLength(i64),

    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("nesting too deep (max {0})")]
    NestingTooDeep(usize),

    /// A reply had a shape the caller didn't expect.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}
