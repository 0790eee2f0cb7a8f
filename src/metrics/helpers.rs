//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::hub::{EventKind, EvictionReason};

use super::{
    CONNECTIONS_ACTIVE, DECODE_FAILURES_TOTAL, EVENTS_DELIVERED_TOTAL, EVENTS_DISPATCHED_TOTAL,
    EVICTIONS_TOTAL, HANDSHAKE_REJECTED_TOTAL, SCOPE_MISMATCHES_TOTAL, WS_CONNECTIONS_CLOSED,
    WS_CONNECTIONS_OPENED, WS_CONNECTION_DURATION,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Metrics recorded by the hub dispatcher
pub struct HubMetrics;

impl HubMetrics {
    pub fn set_active_connections(count: usize) {
        CONNECTIONS_ACTIVE.set(count as i64);
    }

    /// Record one dispatched event and how many queues it reached
    pub fn record_dispatched(kind: EventKind, delivered: u64) {
        EVENTS_DISPATCHED_TOTAL
            .with_label_values(&[kind.entity(), kind.as_str()])
            .inc();
        EVENTS_DELIVERED_TOTAL.inc_by(delivered);
    }

    pub fn record_eviction(reason: EvictionReason) {
        EVICTIONS_TOTAL.with_label_values(&[reason.as_str()]).inc();
    }
}

/// Metrics for the session lifecycle
pub struct SessionMetrics;

impl SessionMetrics {
    pub fn record_opened() {
        WS_CONNECTIONS_OPENED.inc();
    }

    pub fn record_closed(duration_secs: f64) {
        WS_CONNECTIONS_CLOSED.inc();
        WS_CONNECTION_DURATION.observe(duration_secs);
    }
}

/// Metrics for payloads entering the hub
pub struct SubmitMetrics;

impl SubmitMetrics {
    /// `source` is "peer", "external" or "http"
    pub fn record_decode_failure(source: &str) {
        DECODE_FAILURES_TOTAL.with_label_values(&[source]).inc();
    }

    pub fn record_scope_mismatch() {
        SCOPE_MISMATCHES_TOTAL.inc();
    }
}

/// Metrics for the authentication and scoping handshake
pub struct HandshakeMetrics;

impl HandshakeMetrics {
    pub fn record_rejected(reason: &str) {
        HANDSHAKE_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_recorded_metrics() {
        HubMetrics::record_dispatched(EventKind::TaskCreated, 2);
        HubMetrics::record_eviction(EvictionReason::Backpressure);
        HandshakeMetrics::record_rejected("invalid_token");

        let output = encode_metrics().unwrap();

        assert!(output.contains("devsync_events_dispatched_total"));
        assert!(output.contains("type=\"task_created\""));
        assert!(output.contains("devsync_evictions_total"));
        assert!(output.contains("devsync_handshake_rejected_total"));
    }
}
