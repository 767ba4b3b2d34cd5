//! Wire-traffic statistics

use knx_codec::ServiceType;
use std::sync::atomic::{AtomicU64, Ordering};

const SERVICE_COUNT: usize = ServiceType::ALL.len();

/// Wire-traffic counters
///
/// Monotonically increasing counters updated by the communicators, exactly
/// once per observed frame. They reflect wire traffic, not logical
/// attempts: a response that satisfies a request after two retries still
/// counts once. Counters live for the lifetime of the client and are
/// reset only when the client itself is recreated.
#[derive(Debug, Default)]
pub struct KnxStatistics {
    packets_received: AtomicU64,
    packets_sent: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    errors: AtomicU64,
    received_by_service: [AtomicU64; SERVICE_COUNT],
    sent_by_service: [AtomicU64; SERVICE_COUNT],
}

fn service_index(service: ServiceType) -> usize {
    // ALL is in code order; position is the counter slot
    ServiceType::ALL
        .iter()
        .position(|s| *s == service)
        .unwrap_or(0)
}

impl KnxStatistics {
    /// Create statistics with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one received frame of `length` bytes
    pub fn record_received(&self, service: ServiceType, length: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(length as u64, Ordering::Relaxed);
        self.received_by_service[service_index(service)].fetch_add(1, Ordering::Relaxed);
    }

    /// Count one sent frame of `length` bytes
    pub fn record_sent(&self, service: ServiceType, length: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(length as u64, Ordering::Relaxed);
        self.sent_by_service[service_index(service)].fetch_add(1, Ordering::Relaxed);
    }

    /// Count one receive or decode error
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Total frames received
    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    /// Total frames sent
    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    /// Total bytes received
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Total bytes sent
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Total receive and decode errors
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Frames received for one service type
    pub fn received_count(&self, service: ServiceType) -> u64 {
        self.received_by_service[service_index(service)].load(Ordering::Relaxed)
    }

    /// Frames sent for one service type
    pub fn sent_count(&self, service: ServiceType) -> u64 {
        self.sent_by_service[service_index(service)].load(Ordering::Relaxed)
    }

    /// Take a point-in-time copy of all counters
    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            packets_received: self.packets_received(),
            packets_sent: self.packets_sent(),
            bytes_received: self.bytes_received(),
            bytes_sent: self.bytes_sent(),
            errors: self.errors(),
            received_by_service: ServiceType::ALL.map(|s| (s, self.received_count(s))),
            sent_by_service: ServiceType::ALL.map(|s| (s, self.sent_count(s))),
        }
    }
}

/// Point-in-time copy of the statistics counters
#[derive(Debug, Clone)]
pub struct StatisticsSnapshot {
    pub packets_received: u64,
    pub packets_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub errors: u64,
    pub received_by_service: [(ServiceType, u64); SERVICE_COUNT],
    pub sent_by_service: [(ServiceType, u64); SERVICE_COUNT],
}

impl StatisticsSnapshot {
    /// Frames received for one service type at snapshot time
    pub fn received_count(&self, service: ServiceType) -> u64 {
        self.received_by_service
            .iter()
            .find(|(s, _)| *s == service)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    /// Frames sent for one service type at snapshot time
    pub fn sent_count(&self, service: ServiceType) -> u64 {
        self.sent_by_service
            .iter()
            .find(|(s, _)| *s == service)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = KnxStatistics::new();
        stats.record_received(ServiceType::ConnectResponse, 26);
        stats.record_received(ServiceType::TunnelingAck, 10);
        stats.record_sent(ServiceType::ConnectRequest, 26);
        stats.record_error();

        assert_eq!(stats.packets_received(), 2);
        assert_eq!(stats.packets_sent(), 1);
        assert_eq!(stats.bytes_received(), 36);
        assert_eq!(stats.bytes_sent(), 26);
        assert_eq!(stats.errors(), 1);
        assert_eq!(stats.received_count(ServiceType::ConnectResponse), 1);
        assert_eq!(stats.received_count(ServiceType::TunnelingAck), 1);
        assert_eq!(stats.received_count(ServiceType::SearchRequest), 0);
        assert_eq!(stats.sent_count(ServiceType::ConnectRequest), 1);
    }

    #[test]
    fn test_snapshot_is_consistent_copy() {
        let stats = KnxStatistics::new();
        stats.record_sent(ServiceType::TunnelingRequest, 21);
        let snapshot = stats.snapshot();
        stats.record_sent(ServiceType::TunnelingRequest, 21);

        assert_eq!(snapshot.packets_sent, 1);
        assert_eq!(snapshot.sent_count(ServiceType::TunnelingRequest), 1);
        assert_eq!(stats.sent_count(ServiceType::TunnelingRequest), 2);
    }
}
