//! Prometheus metrics for the egress service

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};

static MESSAGES_CONSUMED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "seis_consumer_messages_consumed_total",
        "Messages delivered by the broker"
    )
    .expect("Failed to register messages_consumed metric")
});

static ROWS_COMMITTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "seis_consumer_rows_committed_total",
        "Sample rows committed to the store"
    )
    .expect("Failed to register rows_committed metric")
});

static FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "seis_consumer_failures_total",
        "Messages whose samples were not stored, by cause",
        &["kind"]
    )
    .expect("Failed to register failures metric")
});

static SETTLED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "seis_consumer_settled_total",
        "Deliveries settled, by disposition",
        &["disposition"]
    )
    .expect("Failed to register settled metric")
});

static CONNECT_ATTEMPTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "seis_consumer_broker_connect_attempts_total",
        "Broker connection attempts"
    )
    .expect("Failed to register connect_attempts metric")
});

static BROKER_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "seis_consumer_broker_connected",
        "Broker connection status"
    )
    .expect("Failed to register broker_connected metric")
});

pub fn inc_consumed() {
    MESSAGES_CONSUMED.inc();
}

pub fn add_rows_committed(rows: u64) {
    ROWS_COMMITTED.inc_by(rows);
}

/// `kind` is "decode", "store" or "store_unavailable"
pub fn inc_failure(kind: &str) {
    FAILURES.with_label_values(&[kind]).inc();
}

pub fn inc_settled(disposition: &str) {
    SETTLED.with_label_values(&[disposition]).inc();
}

pub fn inc_connect_attempts() {
    CONNECT_ATTEMPTS.inc();
}

pub fn set_broker_connected(connected: bool) {
    BROKER_CONNECTED.set(i64::from(connected));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_registered() {
        inc_consumed();
        add_rows_committed(3);
        inc_failure("decode");
        inc_settled("ack");

        let text = seis_middleware::encode_metrics().unwrap();
        assert!(text.contains("seis_consumer_messages_consumed_total"));
        assert!(text.contains("seis_consumer_rows_committed_total"));
        assert!(text.contains("seis_consumer_failures_total{kind=\"decode\"}"));
        assert!(text.contains("seis_consumer_settled_total{disposition=\"ack\"}"));
    }
}
