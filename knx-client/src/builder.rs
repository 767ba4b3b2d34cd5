//! Client builder
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use knx_client::KnxClientBuilder;
//! use std::net::{Ipv4Addr, SocketAddrV4};
//!
//! # async fn run() -> knx_core::KnxResult<()> {
//! // Connect to a known gateway
//! let mut client = KnxClientBuilder::new()
//!     .gateway(SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 10), 3671))
//!     .build()?;
//! client.connect().await?;
//!
//! // Or let discovery find one
//! let mut client = KnxClientBuilder::new().build()?;
//! client.connect().await?;
//! # Ok(())
//! # }
//! ```

use crate::client::{KnxClient, KNX_PORT};
use crate::config::ClientConfig;
use crate::plugin::Plugin;
use knx_core::KnxResult;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

/// Builder for [`KnxClient`]
///
/// Configures the gateway endpoint (or leaves it to discovery), the
/// client configuration and the plugins, then validates everything in
/// `build()`.
pub struct KnxClientBuilder {
    gateway: Option<SocketAddrV4>,
    config: ClientConfig,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl KnxClientBuilder {
    /// Create a builder with the default configuration and no gateway
    /// endpoint; without one, `connect()` runs discovery first
    pub fn new() -> Self {
        Self {
            gateway: None,
            config: ClientConfig::default(),
            plugins: Vec::new(),
        }
    }

    /// Configure the gateway control endpoint
    ///
    /// # Arguments
    /// * `endpoint` - The gateway's control address and port
    pub fn gateway(mut self, endpoint: SocketAddrV4) -> Self {
        self.gateway = Some(endpoint);
        self
    }

    /// Configure the gateway by IPv4 address on the well-known port 3671
    pub fn gateway_ip(mut self, address: Ipv4Addr) -> Self {
        self.gateway = Some(SocketAddrV4::new(address, KNX_PORT));
        self
    }

    /// Replace the whole client configuration
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a plugin; plugins are notified in registration order
    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Build the client
    ///
    /// # Errors
    /// Returns `KnxError::InvalidConfig` when the configuration fails
    /// validation
    pub fn build(self) -> KnxResult<KnxClient> {
        self.config.validate()?;
        Ok(KnxClient::new(self.gateway, self.config, self.plugins))
    }
}

impl Default for KnxClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
