//! cEMI application frame
//!
//! The common external message interface frame carried inside Tunneling
//! and Routing bodies:
//!
//! ```text
//! byte 0    message code
//! byte 1    additional info length
//! ...       additional info (carried opaque)
//! byte n    control field 1
//! byte n+1  control field 2 (bit 7: group destination)
//! bytes +2  source individual address
//! bytes +2  destination address (group or individual per control 2)
//! byte      NPDU length (octets following the TPCI octet)
//! bytes     TPCI/APCI and data
//! ```
//!
//! Interpreting payloads against the datapoint-type catalog is out of
//! scope here; the frame exposes the raw transport/application control
//! bytes and the data octets.

use knx_core::{GroupAddress, IndividualAddress, KnxError, KnxResult};
use std::fmt;

/// Minimum L_Data frame length: code, info length, two control fields,
/// source, destination, NPDU length and the TPCI octet
const MIN_LDATA_LENGTH: usize = 10;

/// Default control field 1: standard frame, no repeat, broadcast, low priority
const CONTROL1_DEFAULT: u8 = 0xBC;

/// Default control field 2 for group traffic: group destination, hop count 6
const CONTROL2_GROUP: u8 = 0xE0;

/// cEMI message code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageCode {
    /// `L_Data.req` - client to bus
    LDataReq = 0x11,
    /// `L_Data.ind` - bus to client
    LDataInd = 0x29,
    /// `L_Data.con` - confirmation of a request
    LDataCon = 0x2E,
}

impl MessageCode {
    /// Map a message code byte to its variant
    pub fn from_code(code: u8) -> KnxResult<Self> {
        match code {
            0x11 => Ok(MessageCode::LDataReq),
            0x29 => Ok(MessageCode::LDataInd),
            0x2E => Ok(MessageCode::LDataCon),
            _ => Err(KnxError::UnknownCode {
                field: "cEMI message code",
                code: code as u16,
            }),
        }
    }

    /// Get the message code byte
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// APCI service extracted from the TPCI/APCI octets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Apci {
    GroupValueRead,
    GroupValueResponse,
    GroupValueWrite,
    Other(u16),
}

impl Apci {
    /// Parse the 4-bit APCI service from the two TPCI/APCI octets
    pub fn from_bytes(tpci: u8, apci: u8) -> Self {
        let value = ((tpci as u16 & 0x03) << 8) | (apci as u16 & 0xC0);
        match value {
            0x000 => Apci::GroupValueRead,
            0x040 => Apci::GroupValueResponse,
            0x080 => Apci::GroupValueWrite,
            other => Apci::Other(other),
        }
    }
}

/// cEMI L_Data frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cemi {
    message_code: MessageCode,
    additional_info: Vec<u8>,
    control1: u8,
    control2: u8,
    source: IndividualAddress,
    destination_raw: u16,
    /// TPCI/APCI octets plus data; always at least the TPCI octet
    npdu: Vec<u8>,
}

impl Cemi {
    /// Create a frame from raw parts
    ///
    /// # Errors
    /// Returns `KnxError::OutOfRange` if the NPDU is empty (the TPCI octet
    /// is mandatory) or the additional info block exceeds one length byte
    pub fn new(
        message_code: MessageCode,
        additional_info: Vec<u8>,
        control1: u8,
        control2: u8,
        source: IndividualAddress,
        destination_raw: u16,
        npdu: Vec<u8>,
    ) -> KnxResult<Self> {
        if npdu.is_empty() {
            return Err(KnxError::OutOfRange {
                field: "cEMI NPDU length",
                min: 1,
                max: 256,
                actual: 0,
            });
        }
        if npdu.len() > 256 {
            return Err(KnxError::OutOfRange {
                field: "cEMI NPDU length",
                min: 1,
                max: 256,
                actual: npdu.len() as u32,
            });
        }
        if additional_info.len() > u8::MAX as usize {
            return Err(KnxError::OutOfRange {
                field: "cEMI additional info length",
                min: 0,
                max: u8::MAX as u32,
                actual: additional_info.len() as u32,
            });
        }
        Ok(Self {
            message_code,
            additional_info,
            control1,
            control2,
            source,
            destination_raw,
            npdu,
        })
    }

    /// Build a GroupValue-Write request
    ///
    /// Payloads of a single octet below 0x40 use the 6-bit optimized form
    /// packed into the APCI octet; anything larger is appended.
    pub fn group_write(
        source: IndividualAddress,
        destination: GroupAddress,
        data: &[u8],
    ) -> KnxResult<Self> {
        let npdu = if data.len() == 1 && data[0] < 0x40 {
            vec![0x00, 0x80 | data[0]]
        } else {
            let mut npdu = vec![0x00, 0x80];
            npdu.extend_from_slice(data);
            npdu
        };
        Self::new(
            MessageCode::LDataReq,
            Vec::new(),
            CONTROL1_DEFAULT,
            CONTROL2_GROUP,
            source,
            destination.raw(),
            npdu,
        )
    }

    /// Build a GroupValue-Read request
    pub fn group_read(source: IndividualAddress, destination: GroupAddress) -> KnxResult<Self> {
        Self::new(
            MessageCode::LDataReq,
            Vec::new(),
            CONTROL1_DEFAULT,
            CONTROL2_GROUP,
            source,
            destination.raw(),
            vec![0x00, 0x00],
        )
    }

    /// Get the message code
    pub fn message_code(&self) -> MessageCode {
        self.message_code
    }

    /// Get the source individual address
    pub fn source(&self) -> IndividualAddress {
        self.source
    }

    /// Whether the destination is a group address (control field 2, bit 7)
    pub fn is_group_destination(&self) -> bool {
        (self.control2 & 0x80) != 0
    }

    /// Get the raw 2-byte destination
    pub fn destination_raw(&self) -> u16 {
        self.destination_raw
    }

    /// The destination as a group address
    ///
    /// # Errors
    /// Fails when the destination is an individual address or the reserved
    /// group value `0`
    pub fn group_destination(&self) -> KnxResult<GroupAddress> {
        if !self.is_group_destination() {
            return Err(KnxError::InvalidData(
                "cEMI destination is an individual address".to_string(),
            ));
        }
        GroupAddress::from_bytes(self.destination_raw.to_be_bytes())
    }

    /// The APCI service of this frame
    pub fn apci(&self) -> Apci {
        if self.npdu.len() < 2 {
            return Apci::Other(0xFFFF);
        }
        Apci::from_bytes(self.npdu[0], self.npdu[1])
    }

    /// The group value payload
    ///
    /// Returns the 6-bit optimized value when the payload is packed into
    /// the APCI octet, otherwise the appended data octets.
    pub fn group_value(&self) -> Vec<u8> {
        match self.npdu.len() {
            0 | 1 => Vec::new(),
            2 => vec![self.npdu[1] & 0x3F],
            _ => self.npdu[2..].to_vec(),
        }
    }

    /// Raw TPCI/APCI and data octets
    pub fn npdu(&self) -> &[u8] {
        &self.npdu
    }

    /// Encode into wire form
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MIN_LDATA_LENGTH + self.additional_info.len());
        out.push(self.message_code.code());
        out.push(self.additional_info.len() as u8);
        out.extend_from_slice(&self.additional_info);
        out.push(self.control1);
        out.push(self.control2);
        out.extend_from_slice(&self.source.to_bytes());
        out.extend_from_slice(&self.destination_raw.to_be_bytes());
        // NPDU length counts the octets following the TPCI octet
        out.push((self.npdu.len() - 1) as u8);
        out.extend_from_slice(&self.npdu);
        out
    }

    /// Decode a frame, consuming the whole slice
    pub fn decode(bytes: &[u8]) -> KnxResult<Self> {
        if bytes.len() < MIN_LDATA_LENGTH {
            return Err(KnxError::OutOfRange {
                field: "cEMI frame length",
                min: MIN_LDATA_LENGTH as u32,
                max: u16::MAX as u32,
                actual: bytes.len() as u32,
            });
        }
        let message_code = MessageCode::from_code(bytes[0])?;
        let info_len = bytes[1] as usize;
        let service_start = 2 + info_len;
        // control(2) + source(2) + destination(2) + length(1) + TPCI(1)
        if bytes.len() < service_start + 8 {
            return Err(KnxError::OutOfRange {
                field: "cEMI frame length",
                min: (service_start + 8) as u32,
                max: u16::MAX as u32,
                actual: bytes.len() as u32,
            });
        }
        let additional_info = bytes[2..service_start].to_vec();
        let control1 = bytes[service_start];
        let control2 = bytes[service_start + 1];
        let source =
            IndividualAddress::from_bytes([bytes[service_start + 2], bytes[service_start + 3]]);
        let destination_raw =
            u16::from_be_bytes([bytes[service_start + 4], bytes[service_start + 5]]);
        let npdu_length = bytes[service_start + 6] as usize;
        let npdu_start = service_start + 7;
        let npdu_end = npdu_start + npdu_length + 1;
        if bytes.len() != npdu_end {
            return Err(KnxError::OutOfRange {
                field: "cEMI NPDU length",
                min: npdu_end as u32,
                max: npdu_end as u32,
                actual: bytes.len() as u32,
            });
        }
        Self::new(
            message_code,
            additional_info,
            control1,
            control2,
            source,
            destination_raw,
            bytes[npdu_start..npdu_end].to_vec(),
        )
    }
}

impl fmt::Display for Cemi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_group_destination() {
            let dest = GroupAddress::from_bytes(self.destination_raw.to_be_bytes())
                .map(|g| g.to_string())
                .unwrap_or_else(|_| "0/0/0".to_string());
            write!(
                f,
                "{:?} {} -> {} ({} data octets)",
                self.message_code,
                self.source,
                dest,
                self.group_value().len()
            )
        } else {
            write!(
                f,
                "{:?} {} -> {}",
                self.message_code,
                self.source,
                IndividualAddress::from_raw(self.destination_raw)
            )
        }
    }
}
