//! Error types for the link layer boundary
//!
//! The security manager never talks to the controller directly. Requests
//! that end up as HCI commands (starting encryption with an LTK, answering a
//! long term key request) go through the transport and fail with these.

use thiserror::Error;

/// Errors reported by the HCI side of the transport
#[derive(Error, Debug)]
pub enum HciError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to send HCI command: {0}")]
    SendError(std::io::Error),

    #[error("Command rejected by controller with status 0x{0:02x}")]
    CommandRejected(u8),

    #[error("No connection for the given peer")]
    UnknownConnection,

    #[error("Unsupported operation")]
    Unsupported,
}
