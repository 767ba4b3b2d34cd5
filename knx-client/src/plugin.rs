//! Plugin notification boundary
//!
//! Plugins observe the client without influencing it: every decoded
//! inbound frame, every frame written to a socket and every recoverable
//! error is handed to each registered plugin in registration order. A
//! plugin that ignores a callback costs nothing.

use crate::client::KnxClient;
use knx_codec::Body;
use knx_transport::{ChannelEvent, Communicator};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Observer of the client's lifecycle and traffic
///
/// All methods default to doing nothing, so a plugin implements only the
/// callbacks it cares about. Callbacks run on the notification task; they
/// should return quickly and must never assume a particular connection
/// state.
#[async_trait::async_trait]
pub trait Plugin: Send + Sync {
    /// Plugin name used in log output
    fn name(&self) -> &str;

    /// Called once when the client starts its first connection attempt
    async fn on_initialization(&self, _client: &KnxClient) {}

    /// Called once the tunnel is established
    async fn on_start(&self) {}

    /// Called exactly once during teardown, before the sockets close
    async fn on_shutdown(&self) {}

    /// Called for every decoded inbound frame, including frames dropped
    /// for correlation because of a foreign channel id
    async fn on_incoming_body(&self, _body: &Body) {}

    /// Called for every frame written to a socket
    async fn on_outgoing_body(&self, _body: &Body) {}

    /// Called for recoverable receive/decode failures and for the error
    /// that forced a teardown
    async fn on_error(&self, _message: &str) {}
}

/// Fan-out of client events to the registered plugins
pub struct PluginManager {
    plugins: Vec<Arc<dyn Plugin>>,
    shutdown_notified: AtomicBool,
}

impl PluginManager {
    /// Create a manager over the given plugins
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self {
            plugins,
            shutdown_notified: AtomicBool::new(false),
        }
    }

    /// Number of registered plugins
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugins are registered
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Notify every plugin that the client is initializing
    pub async fn notify_initialization(&self, client: &KnxClient) {
        for plugin in &self.plugins {
            plugin.on_initialization(client).await;
        }
    }

    /// Notify every plugin that the tunnel is up
    pub async fn notify_start(&self) {
        for plugin in &self.plugins {
            plugin.on_start().await;
        }
    }

    /// Notify every plugin of the teardown; repeated calls are no-ops
    pub async fn notify_shutdown(&self) {
        if self.shutdown_notified.swap(true, Ordering::AcqRel) {
            return;
        }
        for plugin in &self.plugins {
            plugin.on_shutdown().await;
        }
    }

    /// Hand an error message to every plugin
    pub async fn notify_error(&self, message: &str) {
        for plugin in &self.plugins {
            plugin.on_error(message).await;
        }
    }

    async fn notify_incoming(&self, body: &Body) {
        for plugin in &self.plugins {
            plugin.on_incoming_body(body).await;
        }
    }

    async fn notify_outgoing(&self, body: &Body) {
        for plugin in &self.plugins {
            plugin.on_outgoing_body(body).await;
        }
    }

    /// Forward a communicator's event stream to the plugins
    ///
    /// The spawned task lives until the communicator's event channel
    /// closes. Channel-id validity is ignored on purpose: observers see
    /// every frame the engine saw.
    pub fn attach(self: &Arc<Self>, communicator: &Communicator) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut events = communicator.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ChannelEvent::Incoming { body, .. }) => {
                        manager.notify_incoming(&body).await;
                    }
                    Ok(ChannelEvent::Outgoing(body)) => {
                        manager.notify_outgoing(&body).await;
                    }
                    Ok(ChannelEvent::Error(message)) => {
                        manager.notify_error(&message).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        shutdowns: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Plugin for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        async fn on_shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_shutdown_notified_once() {
        let counter = Arc::new(Counter {
            shutdowns: AtomicUsize::new(0),
        });
        let manager = PluginManager::new(vec![Arc::clone(&counter) as Arc<dyn Plugin>]);

        manager.notify_shutdown().await;
        manager.notify_shutdown().await;
        assert_eq!(counter.shutdowns.load(Ordering::SeqCst), 1);
    }
}
