use thiserror::Error;

/// Main error type for KNXnet/IP operations
#[derive(Error, Debug)]
pub enum KnxError {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Field '{field}' out of range: expected {min}..={max}, got {actual}")]
    OutOfRange {
        field: &'static str,
        min: u32,
        max: u32,
        actual: u32,
    },

    #[error("Unknown code for field '{field}': 0x{code:04X}")]
    UnknownCode { field: &'static str, code: u16 },

    #[error("Frame invalid: {0}")]
    FrameInvalid(String),

    #[error("Timeout")]
    Timeout,

    #[error("No response for {service} after {attempts} attempts")]
    NoResponse { service: &'static str, attempts: u8 },

    #[error("Channel not established: {0}")]
    ChannelNotEstablished(String),

    #[error("Channel mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: u8, actual: u8 },

    #[error("Heartbeat failure: connection-state deadline missed")]
    HeartbeatFailure,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Communicator is closed")]
    Closed,
}

/// Result type alias for KNXnet/IP operations
pub type KnxResult<T> = Result<T, KnxError>;

impl KnxError {
    /// Check whether the error is recoverable at the receive loop
    ///
    /// Decode errors drop a single frame; they never terminate the loop.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            KnxError::OutOfRange { .. }
                | KnxError::UnknownCode { .. }
                | KnxError::FrameInvalid(_)
                | KnxError::ChannelMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(KnxError::FrameInvalid("truncated".to_string()).is_recoverable());
        assert!(KnxError::ChannelMismatch {
            expected: 7,
            actual: 8
        }
        .is_recoverable());
        assert!(KnxError::UnknownCode {
            field: "status",
            code: 0x55
        }
        .is_recoverable());
        assert!(!KnxError::Timeout.is_recoverable());
        assert!(!KnxError::Closed.is_recoverable());
        assert!(!KnxError::Connection(std::io::Error::other("socket gone")).is_recoverable());
    }
}
