//! Status codes carried in response and acknowledgement bodies

use knx_core::{KnxError, KnxResult};
use std::fmt;

/// KNXnet/IP status code
///
/// Carried by Connect/ConnectionState/Disconnect responses and by
/// Tunneling/DeviceConfiguration acknowledgements. Anything other than
/// `NoError` marks the exchange as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    NoError = 0x00,
    HostProtocolType = 0x01,
    VersionNotSupported = 0x02,
    SequenceNumber = 0x04,
    ConnectionId = 0x21,
    ConnectionType = 0x22,
    ConnectionOption = 0x23,
    NoMoreConnections = 0x24,
    DataConnection = 0x26,
    KnxConnection = 0x27,
    TunnelingLayer = 0x29,
}

impl Status {
    /// Map a status code to its variant
    ///
    /// # Errors
    /// Returns `KnxError::UnknownCode` for codes outside the supported set
    pub fn from_code(code: u8) -> KnxResult<Self> {
        match code {
            0x00 => Ok(Status::NoError),
            0x01 => Ok(Status::HostProtocolType),
            0x02 => Ok(Status::VersionNotSupported),
            0x04 => Ok(Status::SequenceNumber),
            0x21 => Ok(Status::ConnectionId),
            0x22 => Ok(Status::ConnectionType),
            0x23 => Ok(Status::ConnectionOption),
            0x24 => Ok(Status::NoMoreConnections),
            0x26 => Ok(Status::DataConnection),
            0x27 => Ok(Status::KnxConnection),
            0x29 => Ok(Status::TunnelingLayer),
            _ => Err(KnxError::UnknownCode {
                field: "status",
                code: code as u16,
            }),
        }
    }

    /// Get the status code
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Whether this status marks a successful exchange
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::NoError)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::NoError => "E_NO_ERROR",
            Status::HostProtocolType => "E_HOST_PROTOCOL_TYPE",
            Status::VersionNotSupported => "E_VERSION_NOT_SUPPORTED",
            Status::SequenceNumber => "E_SEQUENCE_NUMBER",
            Status::ConnectionId => "E_CONNECTION_ID",
            Status::ConnectionType => "E_CONNECTION_TYPE",
            Status::ConnectionOption => "E_CONNECTION_OPTION",
            Status::NoMoreConnections => "E_NO_MORE_CONNECTIONS",
            Status::DataConnection => "E_DATA_CONNECTION",
            Status::KnxConnection => "E_KNX_CONNECTION",
            Status::TunnelingLayer => "E_TUNNELLING_LAYER",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for code in [0x00, 0x01, 0x02, 0x04, 0x21, 0x22, 0x23, 0x24, 0x26, 0x27, 0x29] {
            let status = Status::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
    }

    #[test]
    fn test_unknown_code() {
        assert!(Status::from_code(0x55).is_err());
    }

    #[test]
    fn test_is_ok() {
        assert!(Status::NoError.is_ok());
        assert!(!Status::NoMoreConnections.is_ok());
    }
}
