//! # Errors
//!
//! Error types for the message bus. Each concern has its own enum; `BusError`
//! wraps them for the orchestrator and the facade.

use thiserror::Error;

/// Errors from encoding or decoding a [`Message`](crate::Message).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before all declared fields were read.
    #[error("message truncated: needed {needed} bytes at offset {offset}, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The block was written by an incompatible format version.
    #[error("unsupported message version {found} (expected {expected})")]
    UnsupportedVersion { found: i16, expected: i16 },

    /// A string field is not valid UTF-8.
    #[error("field `{field}` is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    /// A variable-length field does not fit its length prefix.
    #[error("field `{field}` is too long: {len} bytes (max {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// JSON projection could not be parsed.
    #[error("invalid message JSON: {0}")]
    Json(String),

    /// Base64 text could not be decoded.
    #[error("invalid base64 payload: {0}")]
    Base64(String),
}

/// Errors from the per-publisher archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Underlying file I/O failed.
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The archive was closed; no further reads or writes are accepted.
    #[error("archive for `{publisher}` is closed")]
    Closed { publisher: String },

    /// A block is too large for the index record's length field.
    #[error("message block of {len} bytes exceeds the archive block limit")]
    BlockTooLarge { len: usize },
}

/// Errors reported by the transport collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport connection is not established.
    #[error("transport is not connected")]
    NotConnected,

    /// The producer or consumer handle was already closed.
    #[error("transport handle `{name}` is closed")]
    HandleClosed { name: String },

    /// Sending to a destination failed.
    #[error("send to `{destination}` failed: {reason}")]
    SendFailed { destination: String, reason: String },

    /// Acknowledging a received message failed.
    #[error("acknowledge failed: {0}")]
    AcknowledgeFailed(String),

    /// Any other transport failure.
    #[error("transport error: {0}")]
    Other(String),
}

/// Errors from configuration sources.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration could not be read.
    #[error("configuration unavailable: {0}")]
    Unavailable(String),

    /// The configuration was read but is malformed.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors surfaced by the orchestrator and the facade.
#[derive(Debug, Error)]
pub enum BusError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The bus has not been started (or was stopped).
    #[error("message bus is not running")]
    NotRunning,

    /// No publisher is bound for this identity.
    #[error("no publisher for microservice `{0}`")]
    UnknownPublisher(String),

    /// The receiver is not part of the publisher's route.
    #[error("receiver `{receiver}` is not routed from publisher `{publisher}`")]
    NotRouted { publisher: String, receiver: String },

    /// A time-range query with `from` after `to`.
    #[error("invalid time range: from {from} is after to {to}")]
    InvalidTimeRange { from: i64, to: i64 },
}
