//! Host address descriptor (HPAI)

use knx_core::{KnxError, KnxResult};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Fixed HPAI structure length in bytes
pub const HPAI_LENGTH: usize = 8;

/// Host protocol carried by an HPAI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HostProtocol {
    Udp = 0x01,
    Tcp = 0x02,
}

impl HostProtocol {
    /// Map a host protocol code to its variant
    ///
    /// # Errors
    /// Returns `KnxError::UnknownCode` for codes other than 1 (UDP) and 2 (TCP)
    pub fn from_code(code: u8) -> KnxResult<Self> {
        match code {
            0x01 => Ok(HostProtocol::Udp),
            0x02 => Ok(HostProtocol::Tcp),
            _ => Err(KnxError::UnknownCode {
                field: "host protocol",
                code: code as u16,
            }),
        }
    }

    /// Get the protocol code
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// Host address descriptor
///
/// Describes one endpoint of a connection: transport protocol, IPv4
/// address and port.
///
/// ```text
/// byte 0     structure length (constant 8)
/// byte 1     host protocol code (1=UDP, 2=TCP)
/// bytes 2-5  IPv4 address
/// bytes 6-7  port (big-endian)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hpai {
    protocol: HostProtocol,
    address: Ipv4Addr,
    port: u16,
}

impl Hpai {
    /// Create an HPAI
    pub fn new(protocol: HostProtocol, address: Ipv4Addr, port: u16) -> Self {
        Self {
            protocol,
            address,
            port,
        }
    }

    /// The wildcard UDP HPAI (`0.0.0.0:0`), used in NAT-aware requests
    pub fn unbound_udp() -> Self {
        Self::new(HostProtocol::Udp, Ipv4Addr::UNSPECIFIED, 0)
    }

    /// Get the host protocol
    pub fn protocol(&self) -> HostProtocol {
        self.protocol
    }

    /// Get the IPv4 address
    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    /// Get the port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The endpoint as a socket address
    pub fn endpoint(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.address, self.port)
    }

    /// Encode into the 8-byte wire form
    pub fn encode(&self) -> [u8; HPAI_LENGTH] {
        let ip = self.address.octets();
        let port = self.port.to_be_bytes();
        [
            HPAI_LENGTH as u8,
            self.protocol.code(),
            ip[0],
            ip[1],
            ip[2],
            ip[3],
            port[0],
            port[1],
        ]
    }

    /// Decode an HPAI from the start of a slice
    pub fn decode(bytes: &[u8]) -> KnxResult<Self> {
        if bytes.len() < HPAI_LENGTH {
            return Err(KnxError::OutOfRange {
                field: "HPAI length",
                min: HPAI_LENGTH as u32,
                max: u16::MAX as u32,
                actual: bytes.len() as u32,
            });
        }
        if bytes[0] as usize != HPAI_LENGTH {
            return Err(KnxError::OutOfRange {
                field: "HPAI structure length",
                min: HPAI_LENGTH as u32,
                max: HPAI_LENGTH as u32,
                actual: bytes[0] as u32,
            });
        }
        let protocol = HostProtocol::from_code(bytes[1])?;
        let address = Ipv4Addr::new(bytes[2], bytes[3], bytes[4], bytes[5]);
        let port = u16::from_be_bytes([bytes[6], bytes[7]]);
        Ok(Self::new(protocol, address, port))
    }
}

impl fmt::Display for Hpai {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = match self.protocol {
            HostProtocol::Udp => "udp",
            HostProtocol::Tcp => "tcp",
        };
        write!(f, "{}://{}:{}", proto, self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let hpai = Hpai::new(HostProtocol::Udp, Ipv4Addr::new(192, 168, 1, 10), 3671);
        let decoded = Hpai::decode(&hpai.encode()).unwrap();
        assert_eq!(hpai, decoded);
    }

    #[test]
    fn test_wire_layout() {
        let hpai = Hpai::new(HostProtocol::Udp, Ipv4Addr::new(10, 0, 0, 1), 0x0E57);
        assert_eq!(hpai.encode(), [8, 1, 10, 0, 0, 1, 0x0E, 0x57]);
    }

    #[test]
    fn test_unknown_protocol_code() {
        let mut bytes = Hpai::unbound_udp().encode();
        bytes[1] = 3;
        assert!(matches!(
            Hpai::decode(&bytes).unwrap_err(),
            KnxError::UnknownCode {
                field: "host protocol",
                code: 3
            }
        ));
    }

    #[test]
    fn test_bad_structure_length() {
        let mut bytes = Hpai::unbound_udp().encode();
        bytes[0] = 9;
        assert!(Hpai::decode(&bytes).is_err());
        assert!(Hpai::decode(&bytes[..7]).is_err());
    }
}
