//! Channel communicator
//!
//! A communicator owns exactly one UDP socket bound to one protocol role
//! and runs two independent directional queues:
//!
//! - an inbound loop that reads one datagram at a time, decodes it and
//!   republishes the decoded body to all subscribers, and
//! - an outbound drainer that serializes all socket writes, so frames go
//!   out in submission order from a single writer.
//!
//! A read or decode failure is published as an error event and never
//! terminates the loop; a write failure is returned to the caller that
//! submitted the frame.

use crate::statistics::KnxStatistics;
use bytes::BytesMut;
use knx_codec::Body;
use knx_core::{KnxError, KnxResult};
use log::{debug, warn};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

/// Largest frame a communicator will read in one datagram
pub const MAX_FRAME_SIZE: usize = 512;

/// Capacity of the subscriber fan-out channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Protocol role a communicator's socket is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// Unicast control endpoint (connect, heartbeat, disconnect)
    ControlUnicast,
    /// Unicast data endpoint (tunneling)
    DataUnicast,
    /// Broadcast socket for gateway discovery
    Discovery,
    /// Multicast socket for routing-mode traffic
    Multicast,
}

/// Event republished to subscribers by a communicator
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A decoded inbound frame
    ///
    /// `valid` is false when the frame carries a channel id that differs
    /// from the communicator's negotiated one. Invalid frames are dropped
    /// for correlation but still observable.
    Incoming { body: Body, valid: bool },
    /// A frame that was written to the socket
    Outgoing(Body),
    /// A recoverable read or decode failure
    Error(String),
}

struct Outbound {
    body: Body,
    done: oneshot::Sender<KnxResult<()>>,
}

/// Channel communicator owning one socket
///
/// The negotiated channel id starts unbound; while unbound, every inbound
/// frame is considered valid (there is nothing to mismatch against). The
/// id is written only during state transitions via [`Communicator::bind_channel`]
/// and [`Communicator::clear_channel`]. Channel ids are assigned by the
/// gateway from `1..=255`, so `0` serves as the unbound sentinel.
pub struct Communicator {
    role: ChannelRole,
    socket: Arc<UdpSocket>,
    remote: Arc<Mutex<SocketAddrV4>>,
    outbound: mpsc::Sender<Outbound>,
    events: broadcast::Sender<ChannelEvent>,
    channel_id: Arc<AtomicU8>,
    statistics: Arc<KnxStatistics>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Communicator {
    /// Open a communicator and start both loops
    ///
    /// # Arguments
    /// * `role` - Protocol role; decides socket binding (discovery enables
    ///   broadcast, multicast binds the group port and joins the group)
    /// * `remote` - Default destination for outbound frames
    /// * `statistics` - Shared wire-traffic counters
    /// * `queue_capacity` - Outbound queue bound; enqueue blocks when full
    pub async fn open(
        role: ChannelRole,
        remote: SocketAddrV4,
        statistics: Arc<KnxStatistics>,
        queue_capacity: usize,
    ) -> KnxResult<Self> {
        let socket = match role {
            ChannelRole::Multicast => {
                let socket =
                    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, remote.port())).await?;
                socket.join_multicast_v4(*remote.ip(), Ipv4Addr::UNSPECIFIED)?;
                socket
            }
            ChannelRole::Discovery => {
                let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
                socket.set_broadcast(true)?;
                socket
            }
            ChannelRole::ControlUnicast | ChannelRole::DataUnicast => {
                UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?
            }
        };
        let socket = Arc::new(socket);
        let remote = Arc::new(Mutex::new(remote));
        let (outbound_tx, outbound_rx) = mpsc::channel(queue_capacity.max(1));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let channel_id = Arc::new(AtomicU8::new(0));

        let inbound_task = tokio::spawn(inbound_loop(
            role,
            Arc::clone(&socket),
            events.clone(),
            Arc::clone(&channel_id),
            Arc::clone(&statistics),
            shutdown_rx.clone(),
        ));
        let outbound_task = tokio::spawn(outbound_loop(
            Arc::clone(&socket),
            Arc::clone(&remote),
            outbound_rx,
            events.clone(),
            Arc::clone(&statistics),
            shutdown_rx,
        ));

        Ok(Self {
            role,
            socket,
            remote,
            outbound: outbound_tx,
            events,
            channel_id,
            statistics,
            closed: AtomicBool::new(false),
            shutdown,
            tasks: Mutex::new(vec![inbound_task, outbound_task]),
        })
    }

    /// Get the protocol role
    pub fn role(&self) -> ChannelRole {
        self.role
    }

    /// Subscribe to inbound/outbound/error events
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// The local socket address
    pub fn local_addr(&self) -> KnxResult<SocketAddrV4> {
        match self.socket.local_addr()? {
            SocketAddr::V4(addr) => Ok(addr),
            SocketAddr::V6(addr) => Err(KnxError::InvalidData(format!(
                "Socket unexpectedly bound to IPv6 address {}",
                addr
            ))),
        }
    }

    /// Change the default destination for outbound frames
    ///
    /// Used on the data communicator once the Connect response names the
    /// gateway's data endpoint.
    pub async fn set_remote(&self, remote: SocketAddrV4) {
        *self.remote.lock().await = remote;
    }

    /// Bind the negotiated channel id; inbound frames for other channels
    /// are marked invalid from now on
    pub fn bind_channel(&self, channel_id: u8) {
        self.channel_id.store(channel_id, Ordering::Release);
    }

    /// Clear the negotiated channel id
    pub fn clear_channel(&self) {
        self.channel_id.store(0, Ordering::Release);
    }

    /// The currently negotiated channel id, if any
    pub fn channel_id(&self) -> Option<u8> {
        match self.channel_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    /// Shared wire-traffic counters
    pub fn statistics(&self) -> Arc<KnxStatistics> {
        Arc::clone(&self.statistics)
    }

    /// Submit a frame to the outbound queue and wait for the write result
    ///
    /// Blocks the caller only while the bounded queue is full, then until
    /// the single drainer has performed this frame's socket write.
    pub async fn send(&self, body: Body) -> KnxResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KnxError::Closed);
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.outbound
            .send(Outbound {
                body,
                done: done_tx,
            })
            .await
            .map_err(|_| KnxError::Closed)?;
        done_rx.await.map_err(|_| KnxError::Closed)?
    }

    /// Whether the communicator has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the communicator
    ///
    /// Stops accepting new sends, discards the remaining outbound queue,
    /// stops both loops and drops the socket. Idempotent: closing twice
    /// is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.send(true);
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        debug!("{:?} communicator closed", self.role);
    }
}

async fn inbound_loop(
    role: ChannelRole,
    socket: Arc<UdpSocket>,
    events: broadcast::Sender<ChannelEvent>,
    channel_id: Arc<AtomicU8>,
    statistics: Arc<KnxStatistics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = BytesMut::zeroed(MAX_FRAME_SIZE);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buf[..]) => match result {
                Ok((length, peer)) => {
                    handle_datagram(role, &buf[..length], peer, &events, &channel_id, &statistics);
                }
                Err(err) => {
                    let err = KnxError::from(err);
                    statistics.record_error();
                    let _ = events.send(ChannelEvent::Error(err.to_string()));
                    if !err.is_recoverable() {
                        // one failed read must not spin the loop
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            },
        }
    }
}

fn handle_datagram(
    role: ChannelRole,
    datagram: &[u8],
    peer: SocketAddr,
    events: &broadcast::Sender<ChannelEvent>,
    channel_id: &AtomicU8,
    statistics: &KnxStatistics,
) {
    match Body::decode(datagram) {
        Ok(body) => {
            statistics.record_received(body.service_type(), datagram.len());
            let valid = match body.channel_id() {
                // Discovery/description frames carry no channel id
                None => true,
                Some(id) => {
                    let bound = channel_id.load(Ordering::Acquire);
                    bound == 0 || id == bound
                }
            };
            if !valid {
                let mismatch = KnxError::ChannelMismatch {
                    expected: channel_id.load(Ordering::Acquire),
                    actual: body.channel_id().unwrap_or(0),
                };
                debug!(
                    "{:?}: dropping {} from {}: {}",
                    role,
                    body.service_type(),
                    peer,
                    mismatch,
                );
            }
            let _ = events.send(ChannelEvent::Incoming { body, valid });
        }
        Err(err) => {
            statistics.record_error();
            warn!("{:?}: dropping undecodable frame from {}: {}", role, peer, err);
            let _ = events.send(ChannelEvent::Error(err.to_string()));
        }
    }
}

async fn outbound_loop(
    socket: Arc<UdpSocket>,
    remote: Arc<Mutex<SocketAddrV4>>,
    mut queue: mpsc::Receiver<Outbound>,
    events: broadcast::Sender<ChannelEvent>,
    statistics: Arc<KnxStatistics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let item = tokio::select! {
            _ = shutdown.changed() => break,
            item = queue.recv() => item,
        };
        let Some(Outbound { body, done }) = item else {
            break;
        };
        let result = write_frame(&socket, &remote, &body, &statistics).await;
        if result.is_ok() {
            let _ = events.send(ChannelEvent::Outgoing(body));
        }
        let _ = done.send(result);
    }
}

async fn write_frame(
    socket: &UdpSocket,
    remote: &Mutex<SocketAddrV4>,
    body: &Body,
    statistics: &KnxStatistics,
) -> KnxResult<()> {
    let bytes = body.encode()?;
    let target = *remote.lock().await;
    socket.send_to(&bytes, SocketAddr::V4(target)).await?;
    statistics.record_sent(body.service_type(), bytes.len());
    Ok(())
}
