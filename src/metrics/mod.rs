//! Prometheus metrics for the realtime hub.
//!
//! - Connection metrics (active connections, opened/closed, session duration)
//! - Dispatch metrics (events by kind, deliveries, evictions by reason)
//! - Ingress metrics (decode failures, scope mismatches, handshake rejections)

mod helpers;

pub use helpers::{encode_metrics, HandshakeMetrics, HubMetrics, SessionMetrics, SubmitMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "devsync";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Connections currently in the hub registry
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_ws_connections_active", METRIC_PREFIX),
        "Number of WebSocket connections currently registered with the hub"
    ).unwrap();

    /// Total sessions that completed the handshake
    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket sessions opened"
    ).unwrap();

    /// Total sessions torn down
    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket sessions closed"
    ).unwrap();

    /// Session lifetime
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket session duration in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]
    ).unwrap();

    // ============================================================================
    // Dispatch Metrics
    // ============================================================================

    /// Events dispatched by entity and kind
    pub static ref EVENTS_DISPATCHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_events_dispatched_total", METRIC_PREFIX),
        "Total events processed by the hub dispatcher",
        &["entity", "type"]
    ).unwrap();

    /// Events enqueued to connections
    pub static ref EVENTS_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_events_delivered_total", METRIC_PREFIX),
        "Total event frames enqueued to connection outbound queues"
    ).unwrap();

    /// Connections removed by the hub
    pub static ref EVICTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_evictions_total", METRIC_PREFIX),
        "Total connections evicted by the hub",
        &["reason"]
    ).unwrap();

    // ============================================================================
    // Ingress Metrics
    // ============================================================================

    /// Payloads that could not be decoded into an event
    pub static ref DECODE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_decode_failures_total", METRIC_PREFIX),
        "Total payloads dropped because they could not be decoded",
        &["source"]
    ).unwrap();

    /// Peer frames addressed to a project other than the session's
    pub static ref SCOPE_MISMATCHES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_scope_mismatches_total", METRIC_PREFIX),
        "Total peer frames dropped for targeting another project"
    ).unwrap();

    /// Refused handshakes
    pub static ref HANDSHAKE_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_handshake_rejected_total", METRIC_PREFIX),
        "Total WebSocket handshakes refused",
        &["reason"]
    ).unwrap();
}
