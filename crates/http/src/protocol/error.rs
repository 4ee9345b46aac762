//! Errors produced while parsing HTTP requests.
//!
//! Every variant maps to a 400 problem response at the connection driver;
//! the distinction exists for logs and for tests that pin limit behavior.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    /// Request line exceeds the configured limit.
    #[error("request line exceeds the limit of {limit} bytes")]
    RequestLineTooLong { limit: usize },

    /// Head section (request line + headers) exceeds the configured limit.
    #[error("header section size {current} exceeds the limit of {limit} bytes")]
    HeaderSectionTooLarge { current: usize, limit: usize },

    /// Header count exceeds the configured limit.
    #[error("header count exceeds the limit of {limit}")]
    TooManyHeaders { limit: usize },

    /// URI exceeds the configured limit.
    #[error("uri exceeds the limit of {limit} bytes")]
    UriTooLong { limit: usize },

    /// Body larger than the configured limit.
    #[error("body exceeds the limit of {limit} bytes")]
    BodyTooLarge { limit: u64 },

    /// Malformed request line or header block.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Unsupported HTTP version.
    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    /// Invalid or missing HTTP method token.
    #[error("invalid http method")]
    InvalidMethod,

    /// Invalid Content-Length header.
    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    /// Transfer-Encoding and Content-Length both present.
    #[error("conflicting body framing: transfer-encoding and content-length both present")]
    ConflictingFraming,

    /// Malformed chunked transfer encoding.
    #[error("invalid chunk: {reason}")]
    InvalidChunk { reason: String },
}

impl ParseError {
    /// Creates a new InvalidRequest error
    pub fn invalid_request<S: ToString>(reason: S) -> Self {
        Self::InvalidRequest { reason: reason.to_string() }
    }

    /// Creates a new InvalidContentLength error
    pub fn invalid_content_length<S: ToString>(reason: S) -> Self {
        Self::InvalidContentLength { reason: reason.to_string() }
    }

    /// Creates a new InvalidChunk error
    pub fn invalid_chunk<S: ToString>(reason: S) -> Self {
        Self::InvalidChunk { reason: reason.to_string() }
    }
}
