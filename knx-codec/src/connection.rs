//! Connection request/response data structures (CRI and CRD)

use knx_core::{IndividualAddress, KnxError, KnxResult};

/// Fixed CRI/CRD structure length in bytes
pub const CONNECTION_DATA_LENGTH: usize = 4;

/// Connection type negotiated on Connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionType {
    DeviceManagement = 0x03,
    Tunnel = 0x04,
    RemoteLogging = 0x06,
    RemoteConfiguration = 0x07,
    ObjectServer = 0x08,
}

impl ConnectionType {
    /// Map a connection type code to its variant
    pub fn from_code(code: u8) -> KnxResult<Self> {
        match code {
            0x03 => Ok(ConnectionType::DeviceManagement),
            0x04 => Ok(ConnectionType::Tunnel),
            0x06 => Ok(ConnectionType::RemoteLogging),
            0x07 => Ok(ConnectionType::RemoteConfiguration),
            0x08 => Ok(ConnectionType::ObjectServer),
            _ => Err(KnxError::UnknownCode {
                field: "connection type",
                code: code as u16,
            }),
        }
    }

    /// Get the connection type code
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// Tunneling layer requested in a CRI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LayerType {
    LinkLayer = 0x02,
    Raw = 0x04,
    Busmonitor = 0x80,
}

impl LayerType {
    /// Map a layer type code to its variant
    pub fn from_code(code: u8) -> KnxResult<Self> {
        match code {
            0x02 => Ok(LayerType::LinkLayer),
            0x04 => Ok(LayerType::Raw),
            0x80 => Ok(LayerType::Busmonitor),
            _ => Err(KnxError::UnknownCode {
                field: "layer type",
                code: code as u16,
            }),
        }
    }

    /// Get the layer type code
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// Connection request information (CRI)
///
/// Carried in a Connect request; pairs the desired connection type with
/// the tunneling layer:
///
/// ```text
/// byte 0  structure length (constant 4)
/// byte 1  connection type code
/// byte 2  layer type code
/// byte 3  reserved (0)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRequestInformation {
    connection_type: ConnectionType,
    layer_type: LayerType,
}

impl ConnectionRequestInformation {
    /// Create a CRI
    pub fn new(connection_type: ConnectionType, layer_type: LayerType) -> Self {
        Self {
            connection_type,
            layer_type,
        }
    }

    /// The usual tunneling CRI: tunnel connection on the link layer
    pub fn tunnel_link_layer() -> Self {
        Self::new(ConnectionType::Tunnel, LayerType::LinkLayer)
    }

    /// Get the connection type
    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    /// Get the layer type
    pub fn layer_type(&self) -> LayerType {
        self.layer_type
    }

    /// Encode into the 4-byte wire form
    pub fn encode(&self) -> [u8; CONNECTION_DATA_LENGTH] {
        [
            CONNECTION_DATA_LENGTH as u8,
            self.connection_type.code(),
            self.layer_type.code(),
            0x00,
        ]
    }

    /// Decode a CRI from the start of a slice
    pub fn decode(bytes: &[u8]) -> KnxResult<Self> {
        check_structure(bytes, "CRI")?;
        let connection_type = ConnectionType::from_code(bytes[1])?;
        let layer_type = LayerType::from_code(bytes[2])?;
        Ok(Self::new(connection_type, layer_type))
    }
}

/// Connection response data (CRD)
///
/// Carried in a Connect response; pairs the granted connection type with
/// the individually-assigned tunnel address:
///
/// ```text
/// byte 0    structure length (constant 4)
/// byte 1    connection type code
/// bytes 2-3 assigned individual address (big-endian)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionResponseData {
    connection_type: ConnectionType,
    address: IndividualAddress,
}

impl ConnectionResponseData {
    /// Create a CRD
    pub fn new(connection_type: ConnectionType, address: IndividualAddress) -> Self {
        Self {
            connection_type,
            address,
        }
    }

    /// Get the connection type
    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    /// Get the assigned individual address
    pub fn address(&self) -> IndividualAddress {
        self.address
    }

    /// Encode into the 4-byte wire form
    pub fn encode(&self) -> [u8; CONNECTION_DATA_LENGTH] {
        let addr = self.address.to_bytes();
        [
            CONNECTION_DATA_LENGTH as u8,
            self.connection_type.code(),
            addr[0],
            addr[1],
        ]
    }

    /// Decode a CRD from the start of a slice
    pub fn decode(bytes: &[u8]) -> KnxResult<Self> {
        check_structure(bytes, "CRD")?;
        let connection_type = ConnectionType::from_code(bytes[1])?;
        let address = IndividualAddress::from_bytes([bytes[2], bytes[3]]);
        Ok(Self::new(connection_type, address))
    }
}

fn check_structure(bytes: &[u8], field: &'static str) -> KnxResult<()> {
    if bytes.len() < CONNECTION_DATA_LENGTH {
        return Err(KnxError::OutOfRange {
            field,
            min: CONNECTION_DATA_LENGTH as u32,
            max: u16::MAX as u32,
            actual: bytes.len() as u32,
        });
    }
    if bytes[0] as usize != CONNECTION_DATA_LENGTH {
        return Err(KnxError::OutOfRange {
            field,
            min: CONNECTION_DATA_LENGTH as u32,
            max: CONNECTION_DATA_LENGTH as u32,
            actual: bytes[0] as u32,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cri_round_trip() {
        let cri = ConnectionRequestInformation::tunnel_link_layer();
        assert_eq!(cri.encode(), [4, 0x04, 0x02, 0x00]);
        let decoded = ConnectionRequestInformation::decode(&cri.encode()).unwrap();
        assert_eq!(cri, decoded);
    }

    #[test]
    fn test_crd_round_trip() {
        let crd = ConnectionResponseData::new(
            ConnectionType::Tunnel,
            IndividualAddress::new(1, 1, 5).unwrap(),
        );
        assert_eq!(crd.encode(), [4, 0x04, 0x11, 0x05]);
        let decoded = ConnectionResponseData::decode(&crd.encode()).unwrap();
        assert_eq!(crd, decoded);
    }

    #[test]
    fn test_unknown_codes() {
        assert!(ConnectionType::from_code(0x05).is_err());
        assert!(LayerType::from_code(0x03).is_err());
        assert!(ConnectionRequestInformation::decode(&[4, 0x05, 0x02, 0x00]).is_err());
        assert!(ConnectionRequestInformation::decode(&[4, 0x04, 0x03, 0x00]).is_err());
    }

    #[test]
    fn test_bad_structure_length() {
        assert!(ConnectionRequestInformation::decode(&[3, 0x04, 0x02, 0x00]).is_err());
        assert!(ConnectionRequestInformation::decode(&[4, 0x04]).is_err());
    }
}
