//! KNXnet/IP tunneling client
//!
//! This crate ties the lower layers together: the connection state
//! machine driving discovery, connect, heartbeat and teardown; the
//! client configuration; the plugin notification boundary; and the
//! builder that assembles a client.

pub mod builder;
pub mod client;
pub mod config;
pub mod plugin;

pub use builder::KnxClientBuilder;
pub use client::{KnxClient, DISCOVERY_MULTICAST, KNX_PORT};
pub use config::ClientConfig;
pub use plugin::{Plugin, PluginManager};
