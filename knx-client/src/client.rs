//! Connection state machine
//!
//! The client drives one tunnel connection through its lifecycle: an
//! optional discovery phase, the Connect exchange on the control channel,
//! a Connected phase with a heartbeat task and tunneling on the data
//! channel, and an orderly (or forced) teardown. All waits go through the
//! correlator; the client never reads sockets itself.

use crate::config::ClientConfig;
use crate::plugin::{Plugin, PluginManager};
use knx_codec::{
    Body, Cemi, ConnectionRequestInformation, Hpai, ServiceType, Status,
};
use knx_core::{GroupAddress, IndividualAddress, KnxError, KnxResult};
use knx_session::{ConnectionState, EventCorrelator};
use knx_transport::{ChannelEvent, ChannelRole, Communicator, KnxStatistics, StatisticsSnapshot};
use log::{debug, info, warn};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

/// Well-known KNXnet/IP port
pub const KNX_PORT: u16 = 3671;

/// Multicast group gateways listen on for Search requests
pub const DISCOVERY_MULTICAST: Ipv4Addr = Ipv4Addr::new(224, 0, 23, 12);

/// One negotiated tunnel: the communicator pair, the channel id the
/// gateway granted and the outgoing sequence counter
struct Link {
    control: Arc<Communicator>,
    data: Arc<Communicator>,
    channel_id: u8,
    tunnel_address: IndividualAddress,
    sequence: AtomicU8,
    torn_down: AtomicBool,
    // flipped to true exactly once, by teardown(); background tasks
    // select on it so a forced teardown also ends them
    shutdown: watch::Sender<bool>,
}

/// KNXnet/IP tunneling client
///
/// Create through [`crate::KnxClientBuilder`], then `connect()`,
/// `group_write()`/`group_read()`, and `disconnect()`. A client drives at
/// most one connection; after `Closed` it is done.
pub struct KnxClient {
    config: ClientConfig,
    gateway: Option<SocketAddrV4>,
    state: Arc<Mutex<ConnectionState>>,
    statistics: Arc<KnxStatistics>,
    correlator: Arc<EventCorrelator>,
    plugins: Arc<PluginManager>,
    link: Option<Arc<Link>>,
    tasks: Vec<JoinHandle<()>>,
}

impl KnxClient {
    pub(crate) fn new(
        gateway: Option<SocketAddrV4>,
        config: ClientConfig,
        plugins: Vec<Arc<dyn Plugin>>,
    ) -> Self {
        Self {
            config,
            gateway,
            state: Arc::new(Mutex::new(ConnectionState::default())),
            statistics: Arc::new(KnxStatistics::new()),
            correlator: Arc::new(EventCorrelator::new()),
            plugins: Arc::new(PluginManager::new(plugins)),
            link: None,
            tasks: Vec::new(),
        }
    }

    /// The configured or discovered gateway control endpoint
    pub fn gateway(&self) -> Option<SocketAddrV4> {
        self.gateway
    }

    /// The client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The negotiated channel id, once connected
    pub fn channel_id(&self) -> Option<u8> {
        self.link.as_ref().map(|link| link.channel_id)
    }

    /// The individual address the gateway assigned to this tunnel
    pub fn tunnel_address(&self) -> Option<IndividualAddress> {
        self.link.as_ref().map(|link| link.tunnel_address)
    }

    /// The current connection state
    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    /// A point-in-time copy of the wire-traffic counters
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }

    /// Establish the tunnel
    ///
    /// Runs discovery first when no gateway endpoint was configured, then
    /// the Connect exchange. On success the heartbeat task is running and
    /// tunneling is available; on failure the client ends up `Closed`.
    ///
    /// # Errors
    /// `ChannelNotEstablished` when no gateway answered discovery, the
    /// Connect exchange timed out, or the gateway refused the connection
    pub async fn connect(&mut self) -> KnxResult<()> {
        let plugins = Arc::clone(&self.plugins);
        plugins.notify_initialization(self).await;

        let gateway = match self.gateway {
            Some(endpoint) => {
                transition(&self.state, ConnectionState::Connecting).await?;
                endpoint
            }
            None => {
                let found = self.discover().await?;
                transition(&self.state, ConnectionState::Connecting).await?;
                self.gateway = Some(found);
                found
            }
        };

        match self.establish(gateway).await {
            Ok(()) => {
                self.plugins.notify_start().await;
                Ok(())
            }
            Err(err) => {
                transition(&self.state, ConnectionState::Closed).await?;
                Err(err)
            }
        }
    }

    /// Tear the tunnel down
    ///
    /// Sends a Disconnect request and waits for the acknowledgement on a
    /// best-effort basis; `Closed` is reached whether or not the gateway
    /// answers. Safe to call repeatedly and after a forced teardown.
    pub async fn disconnect(&mut self) -> KnxResult<()> {
        let Some(link) = self.link.take() else {
            return Ok(());
        };
        if !link.torn_down.load(Ordering::Acquire) {
            let _ = transition(&self.state, ConnectionState::Disconnecting).await;
            let request = Body::DisconnectRequest {
                channel_id: link.channel_id,
                control_endpoint: Hpai::unbound_udp(),
            };
            match self
                .correlator
                .send_and_await(
                    &link.control,
                    request,
                    ServiceType::DisconnectResponse,
                    Some(link.channel_id),
                    self.config.disconnect_request_timeout,
                )
                .await
            {
                Ok(_) => debug!(
                    "Gateway acknowledged disconnect of channel {}",
                    link.channel_id
                ),
                Err(err) => debug!("Disconnect exchange failed, closing anyway: {}", err),
            }
            teardown(&self.state, &link, &self.plugins, None).await;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        Ok(())
    }

    /// Write a group value to the bus
    ///
    /// Single-octet payloads below 0x40 go out in the 6-bit optimized
    /// form; everything else is appended to the APCI octet.
    ///
    /// # Errors
    /// `ChannelNotEstablished` when never connected; `Closed` after a
    /// teardown; `NoResponse` when the gateway never acknowledged the
    /// tunneling request
    pub async fn group_write(&self, destination: GroupAddress, payload: &[u8]) -> KnxResult<()> {
        let link = self.active_link().await?;
        let cemi = Cemi::group_write(link.tunnel_address, destination, payload)?;
        self.tunnel(&link, cemi).await
    }

    /// Request a group value read on the bus
    ///
    /// The answering device's GroupValue-Response arrives later as a bus
    /// frame and is delivered through the plugin boundary.
    pub async fn group_read(&self, destination: GroupAddress) -> KnxResult<()> {
        let link = self.active_link().await?;
        let cemi = Cemi::group_read(link.tunnel_address, destination)?;
        self.tunnel(&link, cemi).await
    }

    /// Fetch the gateway's self-description block
    pub async fn description(&self) -> KnxResult<Vec<u8>> {
        let link = self.active_link().await?;
        let request = Body::DescriptionRequest {
            control_endpoint: Hpai::unbound_udp(),
        };
        let event = self
            .correlator
            .send_and_await(
                &link.control,
                request,
                ServiceType::DescriptionResponse,
                None,
                self.config.description_request_timeout,
            )
            .await?;
        match event.response() {
            Some(Body::DescriptionResponse { description }) => Ok(description.clone()),
            _ => Err(KnxError::InvalidData(
                "Description exchange produced no usable response".to_string(),
            )),
        }
    }

    async fn discover(&mut self) -> KnxResult<SocketAddrV4> {
        transition(&self.state, ConnectionState::Discovering).await?;
        let target = SocketAddrV4::new(DISCOVERY_MULTICAST, KNX_PORT);
        let discovery = Communicator::open(
            ChannelRole::Discovery,
            target,
            Arc::clone(&self.statistics),
            self.config.outbound_queue_capacity,
        )
        .await?;
        let dispatch = self.correlator.attach(&discovery);
        // observers see the search traffic too; the task ends once the
        // discovery communicator is dropped
        self.tasks.push(self.plugins.attach(&discovery));

        let request = Body::SearchRequest {
            discovery_endpoint: Hpai::unbound_udp(),
        };
        let result = self
            .correlator
            .collect_responses(
                &discovery,
                request,
                ServiceType::SearchResponse,
                self.config.discovery_timeout,
            )
            .await;
        dispatch.abort();
        discovery.close().await;

        let event = match result {
            Ok(event) => event,
            Err(err) => {
                let _ = transition(&self.state, ConnectionState::Closed).await;
                return Err(err);
            }
        };
        let endpoint = event.responses().find_map(|body| match body {
            Body::SearchResponse {
                control_endpoint, ..
            } => Some(control_endpoint.endpoint()),
            _ => None,
        });
        match endpoint {
            Some(found) => {
                info!("Discovered gateway at {}", found);
                Ok(found)
            }
            None => {
                let _ = transition(&self.state, ConnectionState::Closed).await;
                Err(KnxError::ChannelNotEstablished(
                    "No gateway answered the search".to_string(),
                ))
            }
        }
    }

    async fn establish(&mut self, gateway: SocketAddrV4) -> KnxResult<()> {
        let control = Arc::new(
            Communicator::open(
                ChannelRole::ControlUnicast,
                gateway,
                Arc::clone(&self.statistics),
                self.config.outbound_queue_capacity,
            )
            .await?,
        );
        let data = match Communicator::open(
            ChannelRole::DataUnicast,
            gateway,
            Arc::clone(&self.statistics),
            self.config.outbound_queue_capacity,
        )
        .await
        {
            Ok(data) => Arc::new(data),
            Err(err) => {
                control.close().await;
                return Err(err);
            }
        };
        self.tasks.push(self.correlator.attach(&control));
        self.tasks.push(self.correlator.attach(&data));
        self.tasks.push(self.plugins.attach(&control));
        self.tasks.push(self.plugins.attach(&data));

        let request = Body::ConnectRequest {
            control_endpoint: Hpai::unbound_udp(),
            data_endpoint: Hpai::unbound_udp(),
            cri: ConnectionRequestInformation::tunnel_link_layer(),
        };
        let exchange = self
            .correlator
            .send_and_await(
                &control,
                request,
                ServiceType::ConnectResponse,
                None,
                self.config.connect_request_timeout,
            )
            .await;
        let response = match exchange {
            Ok(event) => event.response().cloned(),
            Err(err) => {
                close_pair(&control, &data).await;
                return Err(match err {
                    KnxError::NoResponse { .. } => KnxError::ChannelNotEstablished(
                        "Gateway did not answer the connect request".to_string(),
                    ),
                    other => other,
                });
            }
        };
        let (channel_id, data_endpoint, crd) = match response {
            Some(Body::ConnectResponse {
                channel_id,
                status,
                data_endpoint,
                crd,
            }) if status.is_ok() => (channel_id, data_endpoint, crd),
            Some(Body::ConnectResponse { status, .. }) => {
                close_pair(&control, &data).await;
                return Err(KnxError::ChannelNotEstablished(format!(
                    "Gateway refused the connection: {:?}",
                    status
                )));
            }
            _ => {
                close_pair(&control, &data).await;
                return Err(KnxError::ChannelNotEstablished(
                    "Connect exchange produced no usable response".to_string(),
                ));
            }
        };

        control.bind_channel(channel_id);
        data.bind_channel(channel_id);
        if let Some(endpoint) = data_endpoint {
            // NAT-mode gateways advertise 0.0.0.0; keep the control address then
            if endpoint.address() != Ipv4Addr::UNSPECIFIED {
                data.set_remote(endpoint.endpoint()).await;
            }
        }
        let tunnel_address = crd.map(|crd| crd.address()).unwrap_or_default();
        info!(
            "Tunnel established on channel {} as {}",
            channel_id, tunnel_address
        );

        let (shutdown, _) = watch::channel(false);
        let link = Arc::new(Link {
            control,
            data,
            channel_id,
            tunnel_address,
            sequence: AtomicU8::new(0),
            torn_down: AtomicBool::new(false),
            shutdown,
        });
        self.link = Some(Arc::clone(&link));
        transition(&self.state, ConnectionState::Connected).await?;
        self.tasks.push(self.spawn_heartbeat(Arc::clone(&link)));
        self.tasks.push(self.spawn_gateway_service(link));
        Ok(())
    }

    /// Heartbeat: a ConnectionState exchange every interval. One failed
    /// exchange is tolerated until the alive deadline; past it the
    /// connection is torn down with a single HeartbeatFailure event.
    fn spawn_heartbeat(&self, link: Arc<Link>) -> JoinHandle<()> {
        let correlator = Arc::clone(&self.correlator);
        let plugins = Arc::clone(&self.plugins);
        let state = Arc::clone(&self.state);
        let interval = self.config.heartbeat_interval;
        let timeout = self.config.connection_state_request_timeout;
        let alive_timeout = self.config.connection_alive_timeout;
        let socket_timeout = self.config.socket_timeout;
        tokio::spawn(async move {
            let mut shutdown = link.shutdown.subscribe();
            let mut last_ok = Instant::now();
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.wait_for(|stop| *stop) => break,
                }
                if link.torn_down.load(Ordering::Acquire) {
                    break;
                }
                let request = Body::ConnectionStateRequest {
                    channel_id: link.channel_id,
                    control_endpoint: Hpai::unbound_udp(),
                };
                let healthy = match correlator
                    .send_and_await(
                        &link.control,
                        request,
                        ServiceType::ConnectionStateResponse,
                        Some(link.channel_id),
                        timeout,
                    )
                    .await
                {
                    Ok(event) => matches!(
                        event.response(),
                        Some(Body::ConnectionStateResponse { status, .. }) if status.is_ok()
                    ),
                    Err(_) => false,
                };
                if healthy {
                    last_ok = Instant::now();
                    continue;
                }
                debug!("Heartbeat on channel {} went unanswered", link.channel_id);
                if last_ok.elapsed() >= alive_timeout {
                    warn!(
                        "Gateway missed the connection-alive deadline, tearing down channel {}",
                        link.channel_id
                    );
                    // the gateway is presumed dead: announce the close
                    // once, but never wait for an answer
                    let notice = Body::DisconnectRequest {
                        channel_id: link.channel_id,
                        control_endpoint: Hpai::unbound_udp(),
                    };
                    match tokio::time::timeout(socket_timeout, link.control.send(notice)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            debug!("Disconnect notice failed: {}", err);
                        }
                        Err(_) => {
                            debug!(
                                "Disconnect notice for channel {} timed out",
                                link.channel_id
                            );
                        }
                    }
                    teardown(&state, &link, &plugins, Some(KnxError::HeartbeatFailure)).await;
                    break;
                }
            }
        })
    }

    /// Serve gateway-initiated traffic: acknowledge inbound tunneling
    /// requests (bus frames) and honor a gateway disconnect.
    fn spawn_gateway_service(&self, link: Arc<Link>) -> JoinHandle<()> {
        let plugins = Arc::clone(&self.plugins);
        let state = Arc::clone(&self.state);
        let socket_timeout = self.config.socket_timeout;
        let mut control_events = link.control.subscribe();
        let mut data_events = link.data.subscribe();
        tokio::spawn(async move {
            let mut shutdown = link.shutdown.subscribe();
            loop {
                let event = tokio::select! {
                    _ = shutdown.wait_for(|stop| *stop) => break,
                    event = control_events.recv() => event,
                    event = data_events.recv() => event,
                };
                let body = match event {
                    Ok(ChannelEvent::Incoming { body, valid: true }) => body,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                match body {
                    Body::TunnelingRequest {
                        channel_id,
                        sequence,
                        cemi,
                    } => {
                        debug!("Bus frame on channel {}: {}", channel_id, cemi);
                        let ack = Body::TunnelingAck {
                            channel_id,
                            sequence,
                            status: Status::NoError,
                        };
                        // a wedged outbound queue must not stall this loop
                        match tokio::time::timeout(socket_timeout, link.data.send(ack)).await {
                            Ok(Err(err)) => debug!("Failed to acknowledge bus frame: {}", err),
                            Err(_) => debug!("Bus frame acknowledgement timed out"),
                            Ok(Ok(())) => {}
                        }
                    }
                    Body::DisconnectRequest { channel_id, .. } => {
                        info!("Gateway requested disconnect of channel {}", channel_id);
                        let response = Body::DisconnectResponse {
                            channel_id,
                            status: Status::NoError,
                        };
                        let _ = tokio::time::timeout(socket_timeout, link.control.send(response))
                            .await;
                        teardown(&state, &link, &plugins, None).await;
                        break;
                    }
                    _ => {}
                }
            }
        })
    }

    async fn active_link(&self) -> KnxResult<Arc<Link>> {
        let state = *self.state.lock().await;
        if state.is_tearing_down() {
            return Err(KnxError::Closed);
        }
        if !state.is_connected() {
            return Err(KnxError::ChannelNotEstablished(format!(
                "Client is {}",
                state.as_str()
            )));
        }
        match &self.link {
            Some(link) if !link.torn_down.load(Ordering::Acquire) => Ok(Arc::clone(link)),
            Some(_) => Err(KnxError::Closed),
            None => Err(KnxError::ChannelNotEstablished(
                "No active tunnel".to_string(),
            )),
        }
    }

    async fn tunnel(&self, link: &Link, cemi: Cemi) -> KnxResult<()> {
        // fetch_add wraps at 255 -> 0, matching the protocol's counter
        let sequence = link.sequence.fetch_add(1, Ordering::AcqRel);
        let request = Body::TunnelingRequest {
            channel_id: link.channel_id,
            sequence,
            cemi,
        };
        let event = self
            .correlator
            .send_and_await(
                &link.data,
                request,
                ServiceType::TunnelingAck,
                Some(link.channel_id),
                self.config.tunneling_request_timeout,
            )
            .await?;
        match event.response() {
            Some(Body::TunnelingAck {
                sequence: acked,
                status,
                ..
            }) => {
                if !status.is_ok() {
                    return Err(KnxError::InvalidData(format!(
                        "Gateway rejected the tunneling request: {:?}",
                        status
                    )));
                }
                if *acked != sequence {
                    return Err(KnxError::InvalidData(format!(
                        "Tunneling ack for sequence {} while {} was pending",
                        acked, sequence
                    )));
                }
                Ok(())
            }
            _ => Err(KnxError::InvalidData(
                "Tunneling exchange produced no acknowledgement".to_string(),
            )),
        }
    }
}

async fn transition(state: &Mutex<ConnectionState>, to: ConnectionState) -> KnxResult<()> {
    let mut current = state.lock().await;
    current.validate_transition(to)?;
    debug!("Connection state: {} -> {}", current.as_str(), to.as_str());
    *current = to;
    Ok(())
}

async fn close_pair(control: &Communicator, data: &Communicator) {
    data.close().await;
    control.close().await;
}

/// Shared teardown path for explicit disconnects, heartbeat failures and
/// gateway-initiated disconnects. Runs at most once per link; the plugin
/// shutdown callback fires before the sockets close.
async fn teardown(
    state: &Mutex<ConnectionState>,
    link: &Link,
    plugins: &PluginManager,
    cause: Option<KnxError>,
) {
    if link.torn_down.swap(true, Ordering::AcqRel) {
        return;
    }
    link.shutdown.send_replace(true);
    {
        let mut current = state.lock().await;
        if current.validate_transition(ConnectionState::Disconnecting).is_ok() {
            *current = ConnectionState::Disconnecting;
        }
    }
    if let Some(err) = &cause {
        plugins.notify_error(&err.to_string()).await;
    }
    plugins.notify_shutdown().await;
    link.data.close().await;
    link.control.close().await;
    link.control.clear_channel();
    link.data.clear_channel();
    *state.lock().await = ConnectionState::Closed;
    info!("Channel {} closed", link.channel_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use knx_codec::{ConnectionResponseData, ConnectionType, HostProtocol};
    use knx_transport::MAX_FRAME_SIZE;
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    const GATEWAY_CHANNEL: u8 = 7;

    fn test_config() -> ClientConfig {
        ClientConfig {
            connect_request_timeout: Duration::from_millis(300),
            disconnect_request_timeout: Duration::from_millis(200),
            connection_state_request_timeout: Duration::from_millis(150),
            tunneling_request_timeout: Duration::from_millis(300),
            description_request_timeout: Duration::from_millis(300),
            discovery_timeout: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(100),
            connection_alive_timeout: Duration::from_millis(250),
            outbound_queue_capacity: 8,
            ..ClientConfig::default()
        }
    }

    async fn gateway_socket() -> (Arc<UdpSocket>, SocketAddrV4) {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = match socket.local_addr().unwrap() {
            SocketAddr::V4(v4) => v4,
            other => panic!("unexpected local address {}", other),
        };
        (Arc::new(socket), addr)
    }

    /// A gateway that answers everything addressed to its channel.
    /// `answer_heartbeats` off simulates a dead gateway after connect.
    fn spawn_gateway(socket: Arc<UdpSocket>, addr: SocketAddrV4, answer_heartbeats: bool) {
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_FRAME_SIZE];
            loop {
                let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                let Ok(body) = Body::decode(&buf[..len]) else {
                    continue;
                };
                let reply = match body {
                    Body::ConnectRequest { .. } => Some(Body::ConnectResponse {
                        channel_id: GATEWAY_CHANNEL,
                        status: Status::NoError,
                        data_endpoint: Some(Hpai::new(
                            HostProtocol::Udp,
                            *addr.ip(),
                            addr.port(),
                        )),
                        crd: Some(ConnectionResponseData::new(
                            ConnectionType::Tunnel,
                            IndividualAddress::new(1, 1, 5).unwrap(),
                        )),
                    }),
                    Body::ConnectionStateRequest { channel_id, .. }
                        if answer_heartbeats && channel_id == GATEWAY_CHANNEL =>
                    {
                        Some(Body::ConnectionStateResponse {
                            channel_id,
                            status: Status::NoError,
                        })
                    }
                    Body::TunnelingRequest {
                        channel_id,
                        sequence,
                        ..
                    } if channel_id == GATEWAY_CHANNEL => Some(Body::TunnelingAck {
                        channel_id,
                        sequence,
                        status: Status::NoError,
                    }),
                    Body::DisconnectRequest { channel_id, .. }
                        if channel_id == GATEWAY_CHANNEL =>
                    {
                        Some(Body::DisconnectResponse {
                            channel_id,
                            status: Status::NoError,
                        })
                    }
                    _ => None,
                };
                if let Some(reply) = reply {
                    let _ = socket.send_to(&reply.encode().unwrap(), from).await;
                }
            }
        });
    }

    struct Recorder {
        starts: AtomicUsize,
        shutdowns: AtomicUsize,
        heartbeat_failures: AtomicUsize,
        outgoing_searches: AtomicUsize,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                starts: AtomicUsize::new(0),
                shutdowns: AtomicUsize::new(0),
                heartbeat_failures: AtomicUsize::new(0),
                outgoing_searches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl Plugin for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn on_start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_outgoing_body(&self, body: &Body) {
            if matches!(body, Body::SearchRequest { .. }) {
                self.outgoing_searches.fetch_add(1, Ordering::SeqCst);
            }
        }

        async fn on_error(&self, message: &str) {
            if message.contains("Heartbeat") {
                self.heartbeat_failures.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    async fn wait_for_closed(client: &KnxClient) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if client.state().await.is_closed() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("client never reached Closed");
    }

    #[tokio::test]
    async fn test_connect_and_tunnel() {
        let (socket, addr) = gateway_socket().await;
        spawn_gateway(socket, addr, true);

        let mut client = KnxClient::new(Some(addr), test_config(), Vec::new());
        client.connect().await.unwrap();

        assert!(client.state().await.is_connected());
        assert_eq!(client.channel_id(), Some(GATEWAY_CHANNEL));
        assert_eq!(
            client.tunnel_address(),
            Some(IndividualAddress::new(1, 1, 5).unwrap())
        );

        // The gateway only acks requests tagged with its channel
        let group = GroupAddress::three_level(1, 2, 3).unwrap();
        client.group_write(group, &[0x01]).await.unwrap();
        client.group_read(group).await.unwrap();

        let stats = client.statistics();
        assert_eq!(stats.sent_count(ServiceType::TunnelingRequest), 2);
        assert_eq!(stats.received_count(ServiceType::TunnelingAck), 2);

        client.disconnect().await.unwrap();
        assert!(client.state().await.is_closed());
    }

    #[tokio::test]
    async fn test_sequence_counter_increments() {
        let (socket, addr) = gateway_socket().await;
        spawn_gateway(socket, addr, true);

        let mut client = KnxClient::new(Some(addr), test_config(), Vec::new());
        client.connect().await.unwrap();

        let group = GroupAddress::two_level(1, 200).unwrap();
        for _ in 0..3 {
            client.group_write(group, &[0x2A]).await.unwrap();
        }
        let link = client.link.as_ref().unwrap();
        assert_eq!(link.sequence.load(Ordering::Acquire), 3);

        client.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused_by_gateway() {
        let (socket, addr) = gateway_socket().await;
        {
            let socket = Arc::clone(&socket);
            tokio::spawn(async move {
                let mut buf = [0u8; MAX_FRAME_SIZE];
                while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                    if let Ok(Body::ConnectRequest { .. }) = Body::decode(&buf[..len]) {
                        let reply = Body::ConnectResponse {
                            channel_id: 0,
                            status: Status::NoMoreConnections,
                            data_endpoint: None,
                            crd: None,
                        };
                        let _ = socket.send_to(&reply.encode().unwrap(), from).await;
                    }
                }
            });
        }

        let mut client = KnxClient::new(Some(addr), test_config(), Vec::new());
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, KnxError::ChannelNotEstablished(_)));
        assert!(client.state().await.is_closed());
    }

    #[tokio::test]
    async fn test_heartbeat_loss_forces_teardown() {
        let (socket, addr) = gateway_socket().await;
        spawn_gateway(socket, addr, false);
        let recorder = Recorder::new();

        let mut client = KnxClient::new(
            Some(addr),
            test_config(),
            vec![Arc::clone(&recorder) as Arc<dyn Plugin>],
        );
        client.connect().await.unwrap();
        assert_eq!(recorder.starts.load(Ordering::SeqCst), 1);

        wait_for_closed(&client).await;
        assert_eq!(recorder.heartbeat_failures.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.shutdowns.load(Ordering::SeqCst), 1);

        // Tunneling after teardown is refused, and a second disconnect
        // does not notify the plugins again
        let group = GroupAddress::three_level(1, 2, 3).unwrap();
        assert!(matches!(
            client.group_write(group, &[0x01]).await.unwrap_err(),
            KnxError::Closed
        ));
        client.disconnect().await.unwrap();
        assert_eq!(recorder.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_teardown_notifies_gateway() {
        let (socket, addr) = gateway_socket().await;
        let disconnects = Arc::new(AtomicUsize::new(0));
        {
            // Answers the connect, then goes silent except for counting
            // the disconnect notices it receives
            let socket = Arc::clone(&socket);
            let disconnects = Arc::clone(&disconnects);
            tokio::spawn(async move {
                let mut buf = [0u8; MAX_FRAME_SIZE];
                while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                    match Body::decode(&buf[..len]) {
                        Ok(Body::ConnectRequest { .. }) => {
                            let reply = Body::ConnectResponse {
                                channel_id: GATEWAY_CHANNEL,
                                status: Status::NoError,
                                data_endpoint: None,
                                crd: Some(ConnectionResponseData::new(
                                    ConnectionType::Tunnel,
                                    IndividualAddress::new(1, 1, 5).unwrap(),
                                )),
                            };
                            let _ = socket.send_to(&reply.encode().unwrap(), from).await;
                        }
                        Ok(Body::DisconnectRequest { channel_id, .. })
                            if channel_id == GATEWAY_CHANNEL =>
                        {
                            disconnects.fetch_add(1, Ordering::SeqCst);
                        }
                        _ => {}
                    }
                }
            });
        }

        let mut client = KnxClient::new(Some(addr), test_config(), Vec::new());
        client.connect().await.unwrap();
        wait_for_closed(&client).await;

        // The notice is fire-and-forget; give the datagram a moment
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_background_tasks_exit_after_forced_teardown() {
        let (socket, addr) = gateway_socket().await;
        spawn_gateway(socket, addr, false);

        let mut client = KnxClient::new(Some(addr), test_config(), Vec::new());
        client.connect().await.unwrap();
        wait_for_closed(&client).await;

        // Heartbeat and gateway-service tasks finish on their own once
        // the link is torn down; nothing should need an abort
        let service = client.tasks.pop().unwrap();
        let heartbeat = client.tasks.pop().unwrap();
        tokio::time::timeout(Duration::from_secs(2), service)
            .await
            .unwrap()
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), heartbeat)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_discovery_traffic_reaches_plugins() {
        let recorder = Recorder::new();
        let mut client = KnxClient::new(
            None,
            test_config(),
            vec![Arc::clone(&recorder) as Arc<dyn Plugin>],
        );

        // Nothing answers on the multicast group, so the attempt fails,
        // but the outgoing search is still observable
        assert!(client.connect().await.is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(recorder.outgoing_searches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gateway_initiated_disconnect() {
        let (socket, addr) = gateway_socket().await;
        spawn_gateway(Arc::clone(&socket), addr, true);
        let recorder = Recorder::new();

        let mut client = KnxClient::new(
            Some(addr),
            test_config(),
            vec![Arc::clone(&recorder) as Arc<dyn Plugin>],
        );
        client.connect().await.unwrap();

        // The gateway pushes a disconnect for the negotiated channel to
        // the client's control endpoint
        let control_port = {
            let link = client.link.as_ref().unwrap();
            link.control.local_addr().unwrap().port()
        };
        let request = Body::DisconnectRequest {
            channel_id: GATEWAY_CHANNEL,
            control_endpoint: Hpai::unbound_udp(),
        };
        socket
            .send_to(
                &request.encode().unwrap(),
                SocketAddrV4::new(Ipv4Addr::LOCALHOST, control_port),
            )
            .await
            .unwrap();

        wait_for_closed(&client).await;
        assert_eq!(recorder.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.heartbeat_failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_noop() {
        let mut client = KnxClient::new(None, test_config(), Vec::new());
        client.disconnect().await.unwrap();
        assert_eq!(client.state().await, ConnectionState::Idle);
    }
}
