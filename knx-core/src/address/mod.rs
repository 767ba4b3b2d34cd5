//! KNX address value types

pub mod group;
pub mod individual;

pub use group::GroupAddress;
pub use individual::IndividualAddress;
