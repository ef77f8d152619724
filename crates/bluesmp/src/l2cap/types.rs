//! Type definitions for the L2CAP boundary

use thiserror::Error;

/// Error types reported when handing a PDU to L2CAP
#[derive(Debug, Error)]
pub enum L2capError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Channel not found: 0x{0:04x}")]
    ChannelNotFound(u16),

    #[error("MTU exceeded")]
    MtuExceeded,

    #[error("Connection terminated")]
    ConnectionTerminated,

    #[error("Connection not established")]
    NotConnected,

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HCI error: {0}")]
    HciError(#[from] crate::error::HciError),
}

/// Result type for L2CAP operations
pub type L2capResult<T> = std::result::Result<T, L2capError>;
