//! Rust implementation of the KNXnet/IP tunneling protocol
//!
//! This library talks to KNX home-automation installations through an
//! IP gateway: it establishes a tunnel connection, keeps it alive with
//! heartbeats, and exchanges group telegrams with the bus.
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `knx-core`: Error handling and the KNX address value types
//! - `knx-codec`: Frame codec for all supported KNXnet/IP services
//! - `knx-transport`: Channel communicators and wire-traffic statistics
//! - `knx-session`: Request/response correlation and connection state
//! - `knx-client`: Connection state machine, configuration and plugins
//!
//! # Usage
//!
//! ```no_run
//! use knx::client::KnxClientBuilder;
//! use knx::GroupAddress;
//!
//! # async fn run() -> knx::KnxResult<()> {
//! let mut client = KnxClientBuilder::new()
//!     .gateway_ip("192.168.1.10".parse().unwrap())
//!     .build()?;
//! client.connect().await?;
//! client
//!     .group_write("1/2/3".parse::<GroupAddress>()?, &[0x01])
//!     .await?;
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

// Re-export core types
pub use knx_core::{GroupAddress, IndividualAddress, KnxError, KnxResult};

// Re-export the codec types callers see in plugin callbacks
pub use knx_codec::{Body, Cemi, ServiceType, Status};

// Re-export client API
pub mod client {
    pub use knx_client::*;
}

// Re-export session API
pub mod session {
    pub use knx_session::*;
}

// Re-export transport API
pub mod transport {
    pub use knx_transport::*;
}

// Re-export codec API
pub mod codec {
    pub use knx_codec::*;
}
