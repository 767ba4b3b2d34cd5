//! KNX group address

use crate::error::{KnxError, KnxResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MAIN_MAX: u8 = 31;
const MIDDLE_MAX: u8 = 7;
const TWO_LEVEL_SUB_MAX: u16 = 2047;

/// KNX group address
///
/// A 2-byte bus address identifying a communication group. The same raw
/// value can be written in three notations:
///
/// - free level: `1..=65535`
/// - 2-level: `main/sub` (5 bits / 11 bits)
/// - 3-level: `main/middle/sub` (5 bits / 3 bits / 8 bits)
///
/// Equality and hashing are defined on the raw 2-byte value only; the
/// notation used to construct the address carries no identity. The raw
/// value `0` (`0/0`, `0/0/0`) is reserved and rejected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupAddress {
    raw: u16,
}

impl GroupAddress {
    /// Create a group address from a free-level value
    ///
    /// # Errors
    /// Returns `KnxError::OutOfRange` for the reserved value `0`
    pub fn free(value: u16) -> KnxResult<Self> {
        if value == 0 {
            return Err(KnxError::OutOfRange {
                field: "group address",
                min: 1,
                max: u16::MAX as u32,
                actual: 0,
            });
        }
        Ok(Self { raw: value })
    }

    /// Create a group address in 2-level notation (`main/sub`)
    ///
    /// # Arguments
    /// * `main` - Main group (0..=31)
    /// * `sub` - Sub group (0..=2047)
    pub fn two_level(main: u8, sub: u16) -> KnxResult<Self> {
        if main > MAIN_MAX {
            return Err(KnxError::OutOfRange {
                field: "group address main",
                min: 0,
                max: MAIN_MAX as u32,
                actual: main as u32,
            });
        }
        if sub > TWO_LEVEL_SUB_MAX {
            return Err(KnxError::OutOfRange {
                field: "group address sub (2-level)",
                min: 0,
                max: TWO_LEVEL_SUB_MAX as u32,
                actual: sub as u32,
            });
        }
        let raw = ((main as u16) << 11) | sub;
        if raw == 0 {
            return Err(KnxError::InvalidData(
                "Group address 0/0 is reserved".to_string(),
            ));
        }
        Ok(Self { raw })
    }

    /// Create a group address in 3-level notation (`main/middle/sub`)
    ///
    /// # Arguments
    /// * `main` - Main group (0..=31)
    /// * `middle` - Middle group (0..=7)
    /// * `sub` - Sub group (0..=255)
    pub fn three_level(main: u8, middle: u8, sub: u8) -> KnxResult<Self> {
        if main > MAIN_MAX {
            return Err(KnxError::OutOfRange {
                field: "group address main",
                min: 0,
                max: MAIN_MAX as u32,
                actual: main as u32,
            });
        }
        if middle > MIDDLE_MAX {
            return Err(KnxError::OutOfRange {
                field: "group address middle",
                min: 0,
                max: MIDDLE_MAX as u32,
                actual: middle as u32,
            });
        }
        let raw = ((main as u16) << 11) | ((middle as u16) << 8) | sub as u16;
        if raw == 0 {
            return Err(KnxError::InvalidData(
                "Group address 0/0/0 is reserved".to_string(),
            ));
        }
        Ok(Self { raw })
    }

    /// Decode from two big-endian bytes
    ///
    /// # Errors
    /// Returns an error for the reserved raw value `0`
    pub fn from_bytes(bytes: [u8; 2]) -> KnxResult<Self> {
        Self::free(u16::from_be_bytes(bytes))
    }

    /// Encode to two big-endian bytes
    pub fn to_bytes(&self) -> [u8; 2] {
        self.raw.to_be_bytes()
    }

    /// Get the raw 2-byte value
    pub fn raw(&self) -> u16 {
        self.raw
    }

    /// Main group in 2-level and 3-level notation (top 5 bits)
    pub fn main(&self) -> u8 {
        (self.raw >> 11) as u8
    }

    /// Middle group in 3-level notation (3 bits)
    pub fn middle(&self) -> u8 {
        ((self.raw >> 8) & 0x07) as u8
    }

    /// Sub group in 3-level notation (low byte)
    pub fn sub_three_level(&self) -> u8 {
        (self.raw & 0xFF) as u8
    }

    /// Sub group in 2-level notation (low 11 bits)
    pub fn sub_two_level(&self) -> u16 {
        self.raw & 0x07FF
    }
}

impl fmt::Display for GroupAddress {
    /// Canonical 3-level form `main/middle/sub`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.main(),
            self.middle(),
            self.sub_three_level()
        )
    }
}

impl FromStr for GroupAddress {
    type Err = KnxError;

    /// Parse any of the three notations: `x/y/z`, `x/y` or a free value `x`
    fn from_str(s: &str) -> KnxResult<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        let invalid =
            |part: &str| KnxError::InvalidData(format!("Invalid group address part: '{}'", part));
        match parts.as_slice() {
            [free] => Self::free(free.parse::<u16>().map_err(|_| invalid(free))?),
            [main, sub] => Self::two_level(
                main.parse::<u8>().map_err(|_| invalid(main))?,
                sub.parse::<u16>().map_err(|_| invalid(sub))?,
            ),
            [main, middle, sub] => Self::three_level(
                main.parse::<u8>().map_err(|_| invalid(main))?,
                middle.parse::<u8>().map_err(|_| invalid(middle))?,
                sub.parse::<u8>().map_err(|_| invalid(sub))?,
            ),
            _ => Err(KnxError::InvalidData(format!(
                "Group address must have 1-3 parts, got '{}'",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_level_boundary() {
        // 31/7/255 packs into all 16 bits
        let addr = GroupAddress::three_level(31, 7, 255).unwrap();
        assert_eq!(addr.to_bytes(), [0xFF, 0xFF]);
        assert_eq!(addr.main(), 31);
        assert_eq!(addr.middle(), 7);
        assert_eq!(addr.sub_three_level(), 255);
    }

    #[test]
    fn test_reserved_rejected() {
        assert!(GroupAddress::free(0).is_err());
        assert!(GroupAddress::two_level(0, 0).is_err());
        assert!(GroupAddress::three_level(0, 0, 0).is_err());
    }

    #[test]
    fn test_out_of_range() {
        assert!(GroupAddress::three_level(32, 0, 1).is_err());
        assert!(GroupAddress::three_level(0, 8, 1).is_err());
        assert!(GroupAddress::two_level(0, 2048).is_err());
    }

    #[test]
    fn test_notation_independent_equality() {
        // 1/0/1 and 1/1 (2-level sub = 1 under main 1) share raw value only
        // when the packed bits agree; equality is on the raw value
        let a = GroupAddress::three_level(1, 2, 3).unwrap();
        let b = GroupAddress::two_level(1, (2 << 8) | 3).unwrap();
        let c = GroupAddress::free(a.raw()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_round_trip() {
        let addr = GroupAddress::three_level(5, 3, 200).unwrap();
        let decoded = GroupAddress::from_bytes(addr.to_bytes()).unwrap();
        assert_eq!(addr, decoded);
    }

    #[test]
    fn test_from_str() {
        assert_eq!(
            "1/2/3".parse::<GroupAddress>().unwrap(),
            GroupAddress::three_level(1, 2, 3).unwrap()
        );
        assert_eq!(
            "1/515".parse::<GroupAddress>().unwrap(),
            GroupAddress::two_level(1, 515).unwrap()
        );
        assert_eq!(
            "2563".parse::<GroupAddress>().unwrap(),
            GroupAddress::free(2563).unwrap()
        );
        assert!("0/0/0".parse::<GroupAddress>().is_err());
        assert!("1/2/3/4".parse::<GroupAddress>().is_err());
    }

    #[test]
    fn test_display() {
        let addr = GroupAddress::three_level(1, 2, 3).unwrap();
        assert_eq!(addr.to_string(), "1/2/3");
    }
}
