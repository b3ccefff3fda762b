//! Protocol error types

use thiserror::Error;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Header could not be parsed
    #[error("Invalid frame header: {0}")]
    InvalidHeader(String),

    /// Unknown packet type token
    #[error("Unknown packet type: {0}")]
    UnknownPacketType(String),

    /// Session id token has the wrong shape
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    /// No separator found within the header size limit
    #[error("Header exceeds {max} bytes without a separator")]
    HeaderTooLong { max: usize },

    /// Declared body length exceeds the maximum
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Recomputed payload digest disagrees with the header
    #[error("{algorithm} digest mismatch on {packet} frame")]
    DigestMismatch {
        algorithm: &'static str,
        packet: &'static str,
    },

    /// Fragments sharing a session id declared different totals
    #[error("Fragment total changed mid-reassembly: expected {expected}, got {got}")]
    FragmentTotalConflict { expected: u32, got: u32 },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
