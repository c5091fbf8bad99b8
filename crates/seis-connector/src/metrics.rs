//! Prometheus metrics for the ingress service

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};

const LABEL_FORMAT: &str = "format";

static PACKETS_RECEIVED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "seis_connector_packets_received_total",
        "Data packets received from the SeedLink server",
        &[LABEL_FORMAT]
    )
    .expect("Failed to register packets_received metric")
});

static PACKETS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "seis_connector_packets_dropped_total",
        "Packets dropped because no stream identifier could be derived"
    )
    .expect("Failed to register packets_dropped metric")
});

static MESSAGES_PUBLISHED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "seis_connector_messages_published_total",
        "Messages handed to the broker"
    )
    .expect("Failed to register messages_published metric")
});

static PUBLISH_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "seis_connector_publish_failures_total",
        "Publishes that failed and were dropped"
    )
    .expect("Failed to register publish_failures metric")
});

static CONNECT_ATTEMPTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "seis_connector_broker_connect_attempts_total",
        "Broker connection attempts"
    )
    .expect("Failed to register connect_attempts metric")
});

/// 1 = connected, 0 = disconnected
static BROKER_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "seis_connector_broker_connected",
        "Broker connection status"
    )
    .expect("Failed to register broker_connected metric")
});

static SOURCE_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "seis_connector_seedlink_connected",
        "SeedLink link status"
    )
    .expect("Failed to register seedlink_connected metric")
});

pub fn inc_packets_received(format: u8) {
    let label = [format];
    let label = std::str::from_utf8(&label).unwrap_or("?");
    PACKETS_RECEIVED.with_label_values(&[label]).inc();
}

pub fn inc_packets_dropped() {
    PACKETS_DROPPED.inc();
}

pub fn inc_published() {
    MESSAGES_PUBLISHED.inc();
}

pub fn inc_publish_failures() {
    PUBLISH_FAILURES.inc();
}

pub fn inc_connect_attempts() {
    CONNECT_ATTEMPTS.inc();
}

pub fn set_broker_connected(connected: bool) {
    BROKER_CONNECTED.set(i64::from(connected));
}

pub fn set_source_connected(connected: bool) {
    SOURCE_CONNECTED.set(i64::from(connected));
}
