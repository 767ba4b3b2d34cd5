//! KNXnet/IP frame header

use crate::service_type::ServiceType;
use knx_core::{KnxError, KnxResult};

/// Fixed header length in bytes
pub const HEADER_LENGTH: usize = 6;

/// The single supported protocol version (1.0)
pub const PROTOCOL_VERSION: u8 = 0x10;

/// KNXnet/IP frame header
///
/// Fixed 6-byte preamble of every frame:
///
/// ```text
/// byte 0     header length (constant 6)
/// byte 1     protocol version (constant 0x10)
/// bytes 2-3  service type code (big-endian)
/// bytes 4-5  total frame length = header + body (big-endian)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    service_type: ServiceType,
    total_length: u16,
}

impl Header {
    /// Create a header with an explicit total frame length
    ///
    /// # Errors
    /// Returns `KnxError::OutOfRange` if `total_length` is below the
    /// 6-byte header minimum
    pub fn new(service_type: ServiceType, total_length: u16) -> KnxResult<Self> {
        if (total_length as usize) < HEADER_LENGTH {
            return Err(KnxError::OutOfRange {
                field: "header total length",
                min: HEADER_LENGTH as u32,
                max: u16::MAX as u32,
                actual: total_length as u32,
            });
        }
        Ok(Self {
            service_type,
            total_length,
        })
    }

    /// Create a header for a body of the given encoded length
    ///
    /// # Errors
    /// Returns `KnxError::OutOfRange` if header plus body exceed 65535 bytes
    pub fn for_body(service_type: ServiceType, body_length: usize) -> KnxResult<Self> {
        let total = HEADER_LENGTH + body_length;
        if total > u16::MAX as usize {
            return Err(KnxError::OutOfRange {
                field: "header total length",
                min: HEADER_LENGTH as u32,
                max: u16::MAX as u32,
                actual: total as u32,
            });
        }
        Ok(Self {
            service_type,
            total_length: total as u16,
        })
    }

    /// Get the service type
    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    /// Get the total frame length (header + body)
    pub fn total_length(&self) -> u16 {
        self.total_length
    }

    /// Get the body length this header declares
    pub fn body_length(&self) -> usize {
        self.total_length as usize - HEADER_LENGTH
    }

    /// Encode the header into its 6-byte wire form
    pub fn encode(&self) -> [u8; HEADER_LENGTH] {
        let code = self.service_type.code().to_be_bytes();
        let total = self.total_length.to_be_bytes();
        [
            HEADER_LENGTH as u8,
            PROTOCOL_VERSION,
            code[0],
            code[1],
            total[0],
            total[1],
        ]
    }

    /// Decode a header from the start of a frame
    ///
    /// Validates minimum length, the header-length constant, the protocol
    /// version and service code membership. The caller is responsible for
    /// checking `total_length()` against the full frame slice.
    pub fn decode(bytes: &[u8]) -> KnxResult<Self> {
        if bytes.len() < HEADER_LENGTH {
            return Err(KnxError::OutOfRange {
                field: "frame length",
                min: HEADER_LENGTH as u32,
                max: u16::MAX as u32,
                actual: bytes.len() as u32,
            });
        }
        if bytes[0] as usize != HEADER_LENGTH {
            return Err(KnxError::OutOfRange {
                field: "header length",
                min: HEADER_LENGTH as u32,
                max: HEADER_LENGTH as u32,
                actual: bytes[0] as u32,
            });
        }
        if bytes[1] != PROTOCOL_VERSION {
            return Err(KnxError::UnknownCode {
                field: "protocol version",
                code: bytes[1] as u16,
            });
        }
        let service_type = ServiceType::from_code(u16::from_be_bytes([bytes[2], bytes[3]]))?;
        let total_length = u16::from_be_bytes([bytes[4], bytes[5]]);
        Self::new(service_type, total_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let header = Header::for_body(ServiceType::ConnectRequest, 20).unwrap();
        let decoded = Header::decode(&header.encode()).unwrap();
        assert_eq!(header, decoded);
        assert_eq!(decoded.total_length(), 26);
    }

    #[test]
    fn test_total_length_bounds() {
        // Below the 6-byte minimum is rejected, the 16-bit maximum is accepted
        assert!(Header::new(ServiceType::SearchRequest, 5).is_err());
        let header = Header::new(ServiceType::SearchRequest, 65535).unwrap();
        assert_eq!(header.total_length(), 65535);
    }

    #[test]
    fn test_decode_rejects_bad_constants() {
        let mut bytes = Header::for_body(ServiceType::SearchRequest, 8)
            .unwrap()
            .encode();
        bytes[0] = 7;
        assert!(Header::decode(&bytes).is_err());

        let mut bytes = Header::for_body(ServiceType::SearchRequest, 8)
            .unwrap()
            .encode();
        bytes[1] = 0x20;
        assert!(matches!(
            Header::decode(&bytes).unwrap_err(),
            KnxError::UnknownCode {
                field: "protocol version",
                ..
            }
        ));
    }

    #[test]
    fn test_decode_too_short() {
        assert!(Header::decode(&[0x06, 0x10, 0x02]).is_err());
    }
}
