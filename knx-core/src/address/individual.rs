//! KNX individual (physical) address

use crate::error::{KnxError, KnxResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const AREA_MAX: u8 = 15;
const LINE_MAX: u8 = 15;

/// KNX individual address
///
/// A 2-byte device address decomposed into area (4 bits), line (4 bits)
/// and device (8 bits). The canonical text form is `area.line.device`,
/// e.g. `1.1.5`.
///
/// Equality and hashing are defined on the raw 2-byte value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndividualAddress {
    raw: u16,
}

impl IndividualAddress {
    /// Create an individual address from its components
    ///
    /// # Arguments
    /// * `area` - Area number (0..=15)
    /// * `line` - Line number (0..=15)
    /// * `device` - Device number (0..=255)
    ///
    /// # Errors
    /// Returns `KnxError::OutOfRange` if area or line exceed their 4-bit range
    pub fn new(area: u8, line: u8, device: u8) -> KnxResult<Self> {
        if area > AREA_MAX {
            return Err(KnxError::OutOfRange {
                field: "individual address area",
                min: 0,
                max: AREA_MAX as u32,
                actual: area as u32,
            });
        }
        if line > LINE_MAX {
            return Err(KnxError::OutOfRange {
                field: "individual address line",
                min: 0,
                max: LINE_MAX as u32,
                actual: line as u32,
            });
        }
        Ok(Self {
            raw: ((area as u16) << 12) | ((line as u16) << 8) | device as u16,
        })
    }

    /// Create an individual address from its raw 2-byte value
    pub fn from_raw(raw: u16) -> Self {
        Self { raw }
    }

    /// Decode from two big-endian bytes
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self::from_raw(u16::from_be_bytes(bytes))
    }

    /// Encode to two big-endian bytes
    pub fn to_bytes(&self) -> [u8; 2] {
        self.raw.to_be_bytes()
    }

    /// Get the raw 2-byte value
    pub fn raw(&self) -> u16 {
        self.raw
    }

    /// Get the area number (high nibble of byte 0)
    pub fn area(&self) -> u8 {
        (self.raw >> 12) as u8
    }

    /// Get the line number (low nibble of byte 0)
    pub fn line(&self) -> u8 {
        ((self.raw >> 8) & 0x0F) as u8
    }

    /// Get the device number (byte 1)
    pub fn device(&self) -> u8 {
        (self.raw & 0xFF) as u8
    }
}

impl Default for IndividualAddress {
    /// The unregistered address `0.0.0`, used before a tunnel address
    /// has been assigned by the gateway.
    fn default() -> Self {
        Self { raw: 0 }
    }
}

impl fmt::Display for IndividualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.area(), self.line(), self.device())
    }
}

impl FromStr for IndividualAddress {
    type Err = KnxError;

    fn from_str(s: &str) -> KnxResult<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(KnxError::InvalidData(format!(
                "Individual address must have the form 'area.line.device', got '{}'",
                s
            )));
        }
        let parse = |part: &str, field: &'static str| -> KnxResult<u8> {
            part.parse::<u8>().map_err(|_| {
                KnxError::InvalidData(format!("Invalid {} in individual address: '{}'", field, part))
            })
        };
        Self::new(
            parse(parts[0], "area")?,
            parse(parts[1], "line")?,
            parse(parts[2], "device")?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_and_components() {
        let addr = IndividualAddress::new(1, 1, 5).unwrap();
        assert_eq!(addr.area(), 1);
        assert_eq!(addr.line(), 1);
        assert_eq!(addr.device(), 5);
        assert_eq!(addr.to_string(), "1.1.5");
    }

    #[test]
    fn test_boundary_encoding() {
        // Device 255 lands in byte 1, area/line 15 fill both nibbles of byte 0
        let addr = IndividualAddress::new(15, 15, 255).unwrap();
        assert_eq!(addr.to_bytes(), [0xFF, 0xFF]);

        let addr = IndividualAddress::new(1, 2, 255).unwrap();
        assert_eq!(addr.to_bytes(), [0x12, 0xFF]);
    }

    #[test]
    fn test_out_of_range() {
        assert!(IndividualAddress::new(16, 0, 0).is_err());
        assert!(IndividualAddress::new(0, 16, 0).is_err());
    }

    #[test]
    fn test_round_trip() {
        let addr = IndividualAddress::new(3, 7, 42).unwrap();
        let decoded = IndividualAddress::from_bytes(addr.to_bytes());
        assert_eq!(addr, decoded);
    }

    #[test]
    fn test_from_str() {
        let addr: IndividualAddress = "2.3.100".parse().unwrap();
        assert_eq!(addr, IndividualAddress::new(2, 3, 100).unwrap());

        assert!("1.2".parse::<IndividualAddress>().is_err());
        assert!("1.2.3.4".parse::<IndividualAddress>().is_err());
        assert!("16.0.0".parse::<IndividualAddress>().is_err());
        assert!("a.b.c".parse::<IndividualAddress>().is_err());
    }
}
