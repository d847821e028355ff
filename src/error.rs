//! Error taxonomy shared by the codec, framing, store, dispatcher and client.

use std::io;

/// Failures at the wire level: framing and envelope decoding.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("connection closed mid-frame ({buffered} bytes buffered)")]
    ConnectionTruncated { buffered: usize },

    #[error("invalid magic in frame header")]
    BadMagic,

    #[error("protocol version mismatch: got {got}, expected {expected}")]
    VersionMismatch { got: u16, expected: u16 },

    #[error("unexpected frame kind {0}")]
    UnexpectedFrameKind(u8),

    #[error("frame payload too large: {len} bytes (max: {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Failures turning a decoded envelope into a typed request.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Unknown request type: {0}")]
    UnknownRequestType(String),

    #[error("{op}: missing or invalid field: {field}")]
    MissingField {
        op: &'static str,
        field: &'static str,
    },

    #[error("invalid content encoding: {0}")]
    InvalidContent(#[from] base64::DecodeError),
}

/// Failures of the file store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid filename: {0:?}")]
    InvalidName(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("I/O error on {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(name: &str, source: io::Error) -> Self {
        StoreError::Io {
            name: name.to_string(),
            source,
        }
    }
}

/// Outcomes a client session surfaces to its caller.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("not connected to server")]
    NotConnected,

    #[error("server closed the connection")]
    Disconnected,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("server error: {0}")]
    Server(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("local file {path}: {source}")]
    LocalFile {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl ClientError {
    /// True when the server answered with an `error` status, as opposed to a
    /// transport or local failure.
    pub fn is_server_error(&self) -> bool {
        matches!(self, ClientError::Server(_))
    }
}
