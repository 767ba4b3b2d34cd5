//! Session layer for the KNXnet/IP client
//!
//! This crate provides the event correlator that matches outgoing
//! requests to their asynchronous responses with bounded retry and
//! timeout, the correlation records it keeps, and the connection state
//! enum driven by the client's state machine.

pub mod correlator;
pub mod event;
pub mod state;

pub use correlator::{EventCorrelator, MAX_ATTEMPTS};
pub use event::KnxEvent;
pub use state::ConnectionState;
