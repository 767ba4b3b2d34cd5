//! Request/response correlation with bounded retry

use crate::event::KnxEvent;
use knx_codec::{Body, ServiceType};
use knx_core::{KnxError, KnxResult};
use knx_transport::{ChannelEvent, Communicator};
use log::debug;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

/// Total attempts per exchange (one send plus two retries)
pub const MAX_ATTEMPTS: u8 = 3;

/// Identity of a pending request: the expected response service type,
/// scoped to a channel id where the exchange carries one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct EventKey {
    service: ServiceType,
    channel_id: Option<u8>,
}

/// Request/response correlator
///
/// Maps an in-flight request to the response(s) the communicator's
/// inbound loop delivers for it. Waits are signalled through per-entry
/// channels fired by the dispatch task, never polled.
pub struct EventCorrelator {
    pending: Arc<Mutex<HashMap<EventKey, mpsc::UnboundedSender<Body>>>>,
}

impl EventCorrelator {
    /// Create an empty correlator
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Attach the correlator to a communicator's event stream
    ///
    /// Spawns the dispatch task that feeds matching inbound frames to
    /// pending waits. Frames marked invalid (foreign channel id) never
    /// reach a pending wait. The returned handle is owned by the caller;
    /// aborting it detaches the correlator from that communicator.
    pub fn attach(&self, communicator: &Communicator) -> JoinHandle<()> {
        let mut events = communicator.subscribe();
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ChannelEvent::Incoming { body, valid: true }) => {
                        dispatch(&pending, body).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!("Correlator lagged behind event stream by {} frames", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Send a request and wait for its matching response
    ///
    /// Registers the in-flight entry, dispatches the request, and waits
    /// up to `timeout` per attempt. On expiry the identical request is
    /// re-sent, up to [`MAX_ATTEMPTS`] total attempts; only then does the
    /// operation fail with `KnxError::NoResponse`. On success the entry
    /// is retired and the completed record returned.
    ///
    /// # Arguments
    /// * `communicator` - Channel the exchange runs on
    /// * `request` - Request body; retries re-send it unmodified
    /// * `expected` - Service type of the matching response
    /// * `channel_id` - Channel scope of the exchange, where applicable
    /// * `timeout` - Per-attempt response deadline
    pub async fn send_and_await(
        &self,
        communicator: &Communicator,
        request: Body,
        expected: ServiceType,
        channel_id: Option<u8>,
        timeout: Duration,
    ) -> KnxResult<KnxEvent> {
        let key = EventKey {
            service: expected,
            channel_id,
        };
        let mut receiver = self.register(key).await?;
        let mut event = KnxEvent::new_single(request.clone());

        let outcome = async {
            for attempt in 1..=MAX_ATTEMPTS {
                communicator.send(request.clone()).await?;
                event.mark_sent();
                match await_response(&mut receiver, timeout).await {
                    Ok(response) => {
                        event.add_response(response);
                        return Ok(());
                    }
                    Err(KnxError::Timeout) => {
                        debug!(
                            "No {} within {:?} (attempt {}/{})",
                            expected, timeout, attempt, MAX_ATTEMPTS
                        );
                    }
                    Err(err) => return Err(err),
                }
            }
            Err(KnxError::NoResponse {
                service: expected.name(),
                attempts: MAX_ATTEMPTS,
            })
        }
        .await;

        self.retire(key).await;
        outcome.map(|_| event)
    }

    /// Send a request once and accumulate every matching response within
    /// the window
    ///
    /// The multi variant used for broadcast-style exchanges where several
    /// gateways may answer one request. An empty result is not an error
    /// here; the caller decides whether zero responders is fatal.
    pub async fn collect_responses(
        &self,
        communicator: &Communicator,
        request: Body,
        expected: ServiceType,
        window: Duration,
    ) -> KnxResult<KnxEvent> {
        let key = EventKey {
            service: expected,
            channel_id: None,
        };
        let mut receiver = self.register(key).await?;
        let mut event = KnxEvent::new_multi(request.clone());

        let outcome = async {
            communicator.send(request).await?;
            event.mark_sent();
            let deadline = Instant::now() + window;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(());
                }
                match await_response(&mut receiver, remaining).await {
                    Ok(response) => event.add_response(response),
                    Err(KnxError::Timeout) => return Ok(()),
                    Err(err) => return Err(err),
                }
            }
        }
        .await;

        self.retire(key).await;
        outcome.map(|_| event)
    }

    /// Number of in-flight entries
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn register(&self, key: EventKey) -> KnxResult<mpsc::UnboundedReceiver<Body>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut pending = self.pending.lock().await;
        if pending.contains_key(&key) {
            return Err(KnxError::InvalidData(format!(
                "An exchange awaiting {} is already in flight",
                key.service
            )));
        }
        pending.insert(key, tx);
        Ok(rx)
    }

    async fn retire(&self, key: EventKey) {
        self.pending.lock().await.remove(&key);
    }
}

impl Default for EventCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

/// One bounded wait on a pending entry's channel
async fn await_response(
    receiver: &mut mpsc::UnboundedReceiver<Body>,
    timeout: Duration,
) -> KnxResult<Body> {
    match tokio::time::timeout(timeout, receiver.recv()).await {
        Ok(Some(body)) => Ok(body),
        Ok(None) => Err(KnxError::Closed),
        Err(_) => Err(KnxError::Timeout),
    }
}

async fn dispatch(
    pending: &Mutex<HashMap<EventKey, mpsc::UnboundedSender<Body>>>,
    body: Body,
) {
    let scoped = EventKey {
        service: body.service_type(),
        channel_id: body.channel_id(),
    };
    let unscoped = EventKey {
        service: body.service_type(),
        channel_id: None,
    };
    let pending = pending.lock().await;
    let slot = pending.get(&scoped).or_else(|| pending.get(&unscoped));
    if let Some(tx) = slot {
        let _ = tx.send(body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knx_codec::{Hpai, Status};
    use knx_transport::{ChannelRole, KnxStatistics, MAX_FRAME_SIZE};
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
    use tokio::net::UdpSocket;

    const ATTEMPT_TIMEOUT: Duration = Duration::from_millis(150);

    async fn peer_socket() -> (Arc<UdpSocket>, SocketAddrV4) {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = match socket.local_addr().unwrap() {
            SocketAddr::V4(v4) => v4,
            other => panic!("unexpected local address {}", other),
        };
        (Arc::new(socket), addr)
    }

    async fn open_communicator(remote: SocketAddrV4) -> Communicator {
        Communicator::open(
            ChannelRole::ControlUnicast,
            remote,
            Arc::new(KnxStatistics::new()),
            8,
        )
        .await
        .unwrap()
    }

    fn state_request(channel_id: u8) -> Body {
        Body::ConnectionStateRequest {
            channel_id,
            control_endpoint: Hpai::unbound_udp(),
        }
    }

    fn state_response(channel_id: u8) -> Body {
        Body::ConnectionStateResponse {
            channel_id,
            status: Status::NoError,
        }
    }

    /// Reply to the nth received request (1-based); drop the others
    fn spawn_replying_gateway(socket: Arc<UdpSocket>, reply: Body, reply_on: usize) {
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_FRAME_SIZE];
            let mut seen = 0usize;
            loop {
                let Ok((_, from)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                seen += 1;
                if seen == reply_on {
                    let bytes = reply.encode().unwrap();
                    let _ = socket.send_to(&bytes, from).await;
                }
            }
        });
    }

    #[tokio::test]
    async fn test_send_and_await_success() {
        let (peer, peer_addr) = peer_socket().await;
        let comm = open_communicator(peer_addr).await;
        let correlator = EventCorrelator::new();
        let dispatch = correlator.attach(&comm);
        spawn_replying_gateway(Arc::clone(&peer), state_response(7), 1);

        let event = correlator
            .send_and_await(
                &comm,
                state_request(7),
                ServiceType::ConnectionStateResponse,
                Some(7),
                ATTEMPT_TIMEOUT,
            )
            .await
            .unwrap();

        assert_eq!(event.response(), Some(&state_response(7)));
        assert_eq!(correlator.pending_count().await, 0);
        dispatch.abort();
        comm.close().await;
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let (peer, peer_addr) = peer_socket().await;
        let comm = open_communicator(peer_addr).await;
        let correlator = EventCorrelator::new();
        let dispatch = correlator.attach(&comm);
        // Count attempts on the gateway side, never reply
        let received = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        {
            let peer = Arc::clone(&peer);
            let received = Arc::clone(&received);
            tokio::spawn(async move {
                let mut buf = [0u8; MAX_FRAME_SIZE];
                while peer.recv_from(&mut buf).await.is_ok() {
                    received.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }
            });
        }

        let err = correlator
            .send_and_await(
                &comm,
                state_request(7),
                ServiceType::ConnectionStateResponse,
                Some(7),
                ATTEMPT_TIMEOUT,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            KnxError::NoResponse {
                service: "CONNECTIONSTATE_RESPONSE",
                attempts: MAX_ATTEMPTS
            }
        ));
        // The identical request went out exactly three times
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(received.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert_eq!(
            comm.statistics().sent_count(ServiceType::ConnectionStateRequest),
            3
        );
        assert_eq!(correlator.pending_count().await, 0);
        dispatch.abort();
        comm.close().await;
    }

    #[tokio::test]
    async fn test_late_response_counts_once_in_statistics() {
        let (peer, peer_addr) = peer_socket().await;
        let comm = open_communicator(peer_addr).await;
        let correlator = EventCorrelator::new();
        let dispatch = correlator.attach(&comm);
        // Only the second attempt gets an answer
        spawn_replying_gateway(Arc::clone(&peer), state_response(7), 2);

        let event = correlator
            .send_and_await(
                &comm,
                state_request(7),
                ServiceType::ConnectionStateResponse,
                Some(7),
                ATTEMPT_TIMEOUT,
            )
            .await
            .unwrap();

        assert_eq!(event.response(), Some(&state_response(7)));
        assert_eq!(
            comm.statistics()
                .received_count(ServiceType::ConnectionStateResponse),
            1
        );
        dispatch.abort();
        comm.close().await;
    }

    #[tokio::test]
    async fn test_foreign_channel_never_satisfies_wait() {
        let (peer, peer_addr) = peer_socket().await;
        let comm = open_communicator(peer_addr).await;
        comm.bind_channel(7);
        let correlator = EventCorrelator::new();
        let dispatch = correlator.attach(&comm);
        // The gateway answers with a foreign channel id
        spawn_replying_gateway(Arc::clone(&peer), state_response(8), 1);

        let err = correlator
            .send_and_await(
                &comm,
                state_request(7),
                ServiceType::ConnectionStateResponse,
                Some(7),
                ATTEMPT_TIMEOUT,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, KnxError::NoResponse { .. }));
        dispatch.abort();
        comm.close().await;
    }

    #[tokio::test]
    async fn test_collect_responses_accumulates_all() {
        let (peer, peer_addr) = peer_socket().await;
        let comm = open_communicator(peer_addr).await;
        let correlator = EventCorrelator::new();
        let dispatch = correlator.attach(&comm);
        {
            let peer = Arc::clone(&peer);
            tokio::spawn(async move {
                let mut buf = [0u8; MAX_FRAME_SIZE];
                let Ok((_, from)) = peer.recv_from(&mut buf).await else {
                    return;
                };
                for port in [3671u16, 3672] {
                    let reply = Body::SearchResponse {
                        control_endpoint: Hpai::new(
                            knx_codec::HostProtocol::Udp,
                            Ipv4Addr::new(192, 168, 1, 10),
                            port,
                        ),
                        description: Vec::new(),
                    };
                    let _ = peer.send_to(&reply.encode().unwrap(), from).await;
                }
            });
        }

        let event = correlator
            .collect_responses(
                &comm,
                Body::SearchRequest {
                    discovery_endpoint: Hpai::unbound_udp(),
                },
                ServiceType::SearchResponse,
                Duration::from_millis(400),
            )
            .await
            .unwrap();

        assert_eq!(event.response_count(), 2);
        match event.response_at(0).unwrap() {
            Body::SearchResponse {
                control_endpoint, ..
            } => assert_eq!(control_endpoint.port(), 3671),
            other => panic!("unexpected body {:?}", other),
        }
        dispatch.abort();
        comm.close().await;
    }

    #[tokio::test]
    async fn test_bounded_wait_expires_with_timeout() {
        let (_tx, mut rx) = mpsc::unbounded_channel::<Body>();
        let err = await_response(&mut rx, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, KnxError::Timeout));
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_rejected() {
        let (_peer, peer_addr) = peer_socket().await;
        let comm = open_communicator(peer_addr).await;
        let correlator = EventCorrelator::new();
        let _dispatch = correlator.attach(&comm);

        let slow = correlator.send_and_await(
            &comm,
            state_request(7),
            ServiceType::ConnectionStateResponse,
            Some(7),
            Duration::from_millis(500),
        );
        let racing = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            correlator
                .send_and_await(
                    &comm,
                    state_request(7),
                    ServiceType::ConnectionStateResponse,
                    Some(7),
                    Duration::from_millis(50),
                )
                .await
        };
        let (first, second) = tokio::join!(slow, racing);
        assert!(first.is_err());
        assert!(matches!(second.unwrap_err(), KnxError::InvalidData(_)));
        comm.close().await;
    }
}
