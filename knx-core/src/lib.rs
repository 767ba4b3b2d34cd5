//! Core types and utilities for the KNXnet/IP client
//!
//! This crate provides fundamental types, error handling, and the KNX
//! address value objects used throughout the implementation.

pub mod address;
pub mod error;

pub use address::{GroupAddress, IndividualAddress};
pub use error::{KnxError, KnxResult};
