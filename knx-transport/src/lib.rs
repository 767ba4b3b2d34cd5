//! Transport layer for the KNXnet/IP client
//!
//! This crate provides the channel communicator: one UDP socket per
//! protocol role with an inbound receive loop and an outbound send queue
//! running concurrently, plus the wire-traffic statistics they maintain.

pub mod communicator;
pub mod statistics;

pub use communicator::{ChannelEvent, ChannelRole, Communicator, MAX_FRAME_SIZE};
pub use statistics::{KnxStatistics, StatisticsSnapshot};
