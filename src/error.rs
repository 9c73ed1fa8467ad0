//! Error taxonomy for the replica and its collaborators.
//!
//! Mirrors E1-E4 of the design: malformed peer input and out-of-range
//! local edits are reported to the immediate caller; transport failures
//! never bubble out of [`crate::transport::Session`] as an `Err` — they
//! surface only as a state transition. Persistence failures are logged
//! and degrade to best-effort in-memory operation.

use snafu::Snafu;

/// Errors raised while mutating [`crate::document::Replica`] state.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DocumentError {
    #[snafu(display("malformed operation: {reason}"))]
    MalformedOperation { reason: String },

    #[snafu(display("index {index} out of range for length {len}"))]
    InvalidIndex { index: usize, len: usize },
}

/// Errors raised by the outbound queue's persistent store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueueError {
    #[snafu(display("persistence failure: {source}"))]
    Persistence { source: sled::Error },

    #[snafu(display("failed to encode queued operation: {source}"))]
    Encode { source: bincode::Error },
}

/// Errors surfaced while establishing or maintaining the transport.
///
/// Per spec, `TransportFailure` is absorbed by the session's state
/// machine and never bubbles to the caller as a `Result::Err` from the
/// application-facing API; this type exists so the internal reconnect
/// loop has something concrete to log.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("handshake failed: {source}"))]
    Handshake { source: tokio_tungstenite::tungstenite::Error },

    #[snafu(display("write failed: {source}"))]
    Write { source: tokio_tungstenite::tungstenite::Error },

    #[snafu(display("connection closed"))]
    Closed,
}
