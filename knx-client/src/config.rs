//! Client configuration

use knx_core::{KnxError, KnxResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest accepted request timeout
const MIN_REQUEST_TIMEOUT: Duration = Duration::from_millis(10);

/// Smallest accepted heartbeat interval
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Client configuration
///
/// Every field has a working default; construct with `ClientConfig::default()`
/// and override what differs. Where the configuration comes from is the
/// caller's business, the struct only derives the serde traits for it.
///
/// # Fields
/// * `socket_timeout` - Read guard on the control and data sockets
/// * `description_request_timeout` - Per-attempt deadline for Description exchanges
/// * `connect_request_timeout` - Per-attempt deadline for the Connect exchange
/// * `disconnect_request_timeout` - Per-attempt deadline for the Disconnect exchange
/// * `connection_state_request_timeout` - Per-attempt deadline for heartbeats
/// * `tunneling_request_timeout` - Per-attempt deadline for tunneling acks
/// * `discovery_timeout` - Window in which Search responses are gathered
/// * `heartbeat_interval` - Pause between ConnectionState requests
/// * `connection_alive_timeout` - Silence after which the connection is declared dead
/// * `outbound_queue_capacity` - Bound of each communicator's send queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub socket_timeout: Duration,
    pub description_request_timeout: Duration,
    pub connect_request_timeout: Duration,
    pub disconnect_request_timeout: Duration,
    pub connection_state_request_timeout: Duration,
    pub tunneling_request_timeout: Duration,
    pub discovery_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub connection_alive_timeout: Duration,
    pub outbound_queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_timeout: Duration::from_secs(3),
            description_request_timeout: Duration::from_millis(1500),
            connect_request_timeout: Duration::from_secs(3),
            disconnect_request_timeout: Duration::from_secs(3),
            connection_state_request_timeout: Duration::from_secs(3),
            tunneling_request_timeout: Duration::from_secs(1),
            discovery_timeout: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(60),
            connection_alive_timeout: Duration::from_secs(120),
            outbound_queue_capacity: 64,
        }
    }
}

impl ClientConfig {
    /// Validate the configuration
    ///
    /// # Errors
    /// Returns `KnxError::InvalidConfig` when a request timeout drops below
    /// 10 ms, the heartbeat interval below 10 s, the alive timeout below the
    /// heartbeat interval, or the queue capacity to zero
    pub fn validate(&self) -> KnxResult<()> {
        let request_timeouts = [
            ("socket_timeout", self.socket_timeout),
            (
                "description_request_timeout",
                self.description_request_timeout,
            ),
            ("connect_request_timeout", self.connect_request_timeout),
            ("disconnect_request_timeout", self.disconnect_request_timeout),
            (
                "connection_state_request_timeout",
                self.connection_state_request_timeout,
            ),
            ("tunneling_request_timeout", self.tunneling_request_timeout),
            ("discovery_timeout", self.discovery_timeout),
        ];
        for (name, timeout) in request_timeouts {
            if timeout < MIN_REQUEST_TIMEOUT {
                return Err(KnxError::InvalidConfig(format!(
                    "{} must be at least {:?}, got {:?}",
                    name, MIN_REQUEST_TIMEOUT, timeout
                )));
            }
        }
        if self.heartbeat_interval < MIN_HEARTBEAT_INTERVAL {
            return Err(KnxError::InvalidConfig(format!(
                "heartbeat_interval must be at least {:?}, got {:?}",
                MIN_HEARTBEAT_INTERVAL, self.heartbeat_interval
            )));
        }
        if self.connection_alive_timeout < self.heartbeat_interval {
            return Err(KnxError::InvalidConfig(format!(
                "connection_alive_timeout {:?} is shorter than the heartbeat interval {:?}",
                self.connection_alive_timeout, self.heartbeat_interval
            )));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(KnxError::InvalidConfig(
                "outbound_queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
