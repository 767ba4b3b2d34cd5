//! Correlation records

use knx_codec::Body;
use std::time::Instant;

/// Response accumulation mode of a correlation record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseMode {
    /// Exactly one response slot; a later write replaces the earlier one
    Single,
    /// Ordered accumulation of every response (discovery broadcasts)
    Multi,
}

/// Correlation record for one request/response exchange
///
/// Holds the sent request with its send timestamp and the received
/// response(s), each with a receive timestamp. The record is created
/// when a request is dispatched and retired from the correlator's
/// in-flight set when a response is matched or the retry budget is
/// exhausted.
#[derive(Debug, Clone)]
pub struct KnxEvent {
    request: Body,
    sent_at: Instant,
    mode: ResponseMode,
    responses: Vec<(Body, Instant)>,
}

impl KnxEvent {
    /// Create a single-response record (1:1 exchanges)
    pub fn new_single(request: Body) -> Self {
        Self {
            request,
            sent_at: Instant::now(),
            mode: ResponseMode::Single,
            responses: Vec::new(),
        }
    }

    /// Create a multi-response record (broadcast-style exchanges)
    pub fn new_multi(request: Body) -> Self {
        Self {
            request,
            sent_at: Instant::now(),
            mode: ResponseMode::Multi,
            responses: Vec::with_capacity(4),
        }
    }

    /// Refresh the send timestamp; called per wire dispatch, so retries
    /// measure from the attempt that actually got answered
    pub fn mark_sent(&mut self) {
        self.sent_at = Instant::now();
    }

    /// Record one received response
    pub fn add_response(&mut self, response: Body) {
        match self.mode {
            ResponseMode::Single => {
                self.responses.clear();
                self.responses.push((response, Instant::now()));
            }
            ResponseMode::Multi => self.responses.push((response, Instant::now())),
        }
    }

    /// The sent request
    pub fn request(&self) -> &Body {
        &self.request
    }

    /// When the request was (last) dispatched
    pub fn sent_at(&self) -> Instant {
        self.sent_at
    }

    /// The most recent response, if any
    pub fn response(&self) -> Option<&Body> {
        self.responses.last().map(|(body, _)| body)
    }

    /// A response by arrival index (multi records)
    pub fn response_at(&self, index: usize) -> Option<&Body> {
        self.responses.get(index).map(|(body, _)| body)
    }

    /// Number of recorded responses
    pub fn response_count(&self) -> usize {
        self.responses.len()
    }

    /// All responses in arrival order
    pub fn responses(&self) -> impl Iterator<Item = &Body> {
        self.responses.iter().map(|(body, _)| body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knx_codec::{Hpai, Status};

    fn request() -> Body {
        Body::SearchRequest {
            discovery_endpoint: Hpai::unbound_udp(),
        }
    }

    fn response(channel_id: u8) -> Body {
        Body::ConnectionStateResponse {
            channel_id,
            status: Status::NoError,
        }
    }

    #[test]
    fn test_single_keeps_last_response() {
        let mut event = KnxEvent::new_single(request());
        assert!(event.response().is_none());
        event.add_response(response(1));
        event.add_response(response(2));
        assert_eq!(event.response_count(), 1);
        assert_eq!(event.response(), Some(&response(2)));
    }

    #[test]
    fn test_multi_accumulates_in_order() {
        let mut event = KnxEvent::new_multi(request());
        event.add_response(response(1));
        event.add_response(response(2));
        event.add_response(response(3));
        assert_eq!(event.response_count(), 3);
        assert_eq!(event.response_at(0), Some(&response(1)));
        assert_eq!(event.response_at(2), Some(&response(3)));
        assert_eq!(event.response(), Some(&response(3)));
    }
}
