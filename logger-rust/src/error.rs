//! Error kinds for the link driver and its callers.
//!
//! The polling engine absorbs the recoverable ones, the IPC layer turns
//! them into `{ok:false, error}` replies, and the driver retries before
//! surfacing any of them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    /// No ACK or a short read within the transport timeout.
    #[error("timed out waiting for the station")]
    Timeout,
    /// CCITT validation failed on a payload that requires it.
    #[error("CRC validation failed")]
    CrcMismatch,
    /// Wrong SOH, unexpected NAK/CAN, or a malformed field.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// Command issued while the port is closed. Fails fast, no retry.
    #[error("not connected")]
    NotConnected,
    /// Caller parameter outside the permitted domain.
    #[error("{0}")]
    InvalidRange(String),
    /// Shutdown requested mid-retry.
    #[error("operation cancelled")]
    Cancelled,
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkError {
    /// Whether another attempt after a flush can possibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::CrcMismatch | Self::Protocol(_) | Self::Io(_)
        )
    }
}

pub type LinkResult<T> = Result<T, LinkError>;
