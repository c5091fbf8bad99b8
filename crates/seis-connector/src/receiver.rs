//! Ingress receive loop: packet source -> stream identifier -> broker

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use seis_middleware::hex_preview;
use seis_middleware::preview::PREVIEW_BYTES;
use seis_mseed::stream_identifier;

use crate::metrics;
use crate::publisher::BrokerPublisher;
use crate::source::{Collect, PacketInfo, PacketSource};

pub const DEFAULT_BUFFER_SIZE: usize = 16384;
pub const NO_PACKET_SLEEP: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub buffer_size: usize,
    /// Log a line per packet with its stream identifier
    pub print_packets: bool,
    pub idle_sleep: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            print_packets: false,
            idle_sleep: NO_PACKET_SLEEP,
        }
    }
}

/// Why the receive loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverExit {
    /// Source reported a clean stop
    Terminated,
    /// A payload did not fit the receive buffer
    Oversized { needed: usize, capacity: usize },
}

pub struct StreamReceiver<S: PacketSource> {
    source: S,
    publisher: BrokerPublisher,
    buffer: Vec<u8>,
    print_packets: bool,
    idle_sleep: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<S: PacketSource> StreamReceiver<S> {
    pub fn new(
        source: S,
        publisher: BrokerPublisher,
        config: ReceiverConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            publisher,
            // Allocated once, never resized
            buffer: vec![0u8; config.buffer_size],
            print_packets: config.print_packets,
            idle_sleep: config.idle_sleep,
            shutdown,
        }
    }

    pub fn publisher(&self) -> &BrokerPublisher {
        &self.publisher
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run until the source terminates or a payload overflows the buffer
    pub async fn run(&mut self) -> ReceiverExit {
        info!(buffer_size = self.buffer.len(), "Receive loop started");
        loop {
            if *self.shutdown.borrow() {
                self.source.terminate();
            }

            match self.source.collect(&mut self.buffer).await {
                Collect::Packet(info) => self.handle_packet(&info).await,
                Collect::NoPacket => {
                    debug!("No packet available, sleeping");
                    tokio::time::sleep(self.idle_sleep).await;
                }
                Collect::TooLarge { needed, capacity } => {
                    error!(
                        needed = needed,
                        capacity = capacity,
                        "Received payload too large for buffer, stopping"
                    );
                    return ReceiverExit::Oversized { needed, capacity };
                }
                Collect::Terminate => {
                    info!("Packet source terminated");
                    return ReceiverExit::Terminated;
                }
            }
        }
    }

    async fn handle_packet(&mut self, info: &PacketInfo) {
        metrics::inc_packets_received(info.format);
        let payload = &self.buffer[..info.payload_len];
        debug!(
            seq = info.seqnum,
            bytes = info.payload_len,
            format = %char::from(info.format),
            "Received packet"
        );

        let derive = self.publisher.routing_key().is_empty() || self.print_packets;
        let sid = if derive {
            match stream_identifier(info.format, payload) {
                Ok(sid) => Some(sid),
                Err(e) if self.publisher.routing_key().is_empty() => {
                    metrics::inc_packets_dropped();
                    warn!(
                        seq = info.seqnum,
                        error = %e,
                        preview = %hex_preview(payload, PREVIEW_BYTES),
                        "Dropping packet without stream identifier"
                    );
                    return;
                }
                Err(e) => {
                    debug!(seq = info.seqnum, error = %e, "No stream identifier for packet");
                    None
                }
            }
        } else {
            None
        };

        if self.print_packets {
            info!(
                seq = info.seqnum,
                sid = sid.as_deref().unwrap_or("-"),
                station = info.station.as_deref().unwrap_or("-"),
                bytes = info.payload_len,
                format = %char::from(info.format),
                "Packet"
            );
        }

        let fallback = sid.as_deref().unwrap_or("");
        if let Err(e) = self.publisher.publish(payload, fallback).await {
            warn!(seq = info.seqnum, error = %e, "Failed to publish packet");
        }
    }

    /// Disconnect from the broker, then close the source (saving state)
    pub async fn close(&mut self) {
        self.publisher.disconnect().await;
        self.source.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::PublisherConfig;
    use async_trait::async_trait;
    use seis_middleware::{InMemoryBroker, InMemoryConnector, RetryConfig};
    use std::collections::VecDeque;
    use std::sync::Arc;

    enum Scripted {
        Packet(u64, u8, Vec<u8>),
        NoPacket,
        TooLarge(usize),
    }

    struct MockSource {
        script: VecDeque<Scripted>,
        terminated: bool,
        closed: bool,
        collects: usize,
    }

    impl MockSource {
        fn new(script: Vec<Scripted>) -> Self {
            Self {
                script: script.into(),
                terminated: false,
                closed: false,
                collects: 0,
            }
        }
    }

    #[async_trait]
    impl PacketSource for MockSource {
        async fn collect(&mut self, buf: &mut [u8]) -> Collect {
            self.collects += 1;
            if self.terminated {
                return Collect::Terminate;
            }
            match self.script.pop_front() {
                Some(Scripted::Packet(seqnum, format, payload)) => {
                    buf[..payload.len()].copy_from_slice(&payload);
                    Collect::Packet(PacketInfo {
                        seqnum,
                        format,
                        payload_len: payload.len(),
                        station: None,
                    })
                }
                Some(Scripted::NoPacket) => Collect::NoPacket,
                Some(Scripted::TooLarge(needed)) => Collect::TooLarge {
                    needed,
                    capacity: buf.len(),
                },
                None => Collect::Terminate,
            }
        }

        fn terminate(&mut self) {
            self.terminated = true;
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }

    fn v2_record(net: &str, sta: &str, loc: &str, chan: &str) -> Vec<u8> {
        let mut rec = vec![b' '; 512];
        rec[0..6].copy_from_slice(b"000001");
        rec[6] = b'D';
        rec[8..8 + sta.len()].copy_from_slice(sta.as_bytes());
        rec[13..13 + loc.len()].copy_from_slice(loc.as_bytes());
        rec[15..18].copy_from_slice(chan.as_bytes());
        rec[18..20].copy_from_slice(net.as_bytes());
        rec
    }

    fn receiver(
        script: Vec<Scripted>,
        routing_key: &str,
        broker: &InMemoryBroker,
    ) -> (StreamReceiver<MockSource>, watch::Sender<bool>) {
        let connector = Arc::new(InMemoryConnector::new(broker.clone()));
        let publisher = BrokerPublisher::new(
            connector,
            PublisherConfig {
                exchange: String::new(),
                routing_key: routing_key.to_string(),
                retry: RetryConfig::from_max_attempts(3),
            },
        );
        let (tx, rx) = watch::channel(false);
        let config = ReceiverConfig {
            buffer_size: 1024,
            ..Default::default()
        };
        (StreamReceiver::new(MockSource::new(script), publisher, config, rx), tx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_packets_forwarded_byte_identical() {
        let broker = InMemoryBroker::new();
        let record = v2_record("IU", "COLA", "00", "BHZ");
        let (mut rx, _tx) = receiver(
            vec![
                Scripted::Packet(1, b'2', record.clone()),
                Scripted::NoPacket,
                Scripted::Packet(2, b'2', record.clone()),
            ],
            "",
            &broker,
        );

        assert_eq!(rx.run().await, ReceiverExit::Terminated);

        let published = broker.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].routing_key, "IU.COLA.00.B.H.Z");
        assert_eq!(published[0].payload.as_ref(), record.as_slice());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_packet_sleeps() {
        let broker = InMemoryBroker::new();
        let (mut rx, _tx) = receiver(vec![Scripted::NoPacket, Scripted::NoPacket], "binq", &broker);

        let start = tokio::time::Instant::now();
        rx.run().await;
        assert!(start.elapsed() >= NO_PACKET_SLEEP * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unidentifiable_packet_dropped() {
        let broker = InMemoryBroker::new();
        let (mut rx, _tx) = receiver(
            vec![
                Scripted::Packet(1, b'2', b"short".to_vec()),
                Scripted::Packet(2, b'9', vec![0u8; 64]),
                Scripted::Packet(3, b'2', v2_record("GE", "WLF", "", "HHZ")),
            ],
            "",
            &broker,
        );

        rx.run().await;

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].routing_key, "GE.WLF..H.H.Z");
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_key_skips_identifier() {
        let broker = InMemoryBroker::new();
        let (mut rx, _tx) = receiver(
            vec![Scripted::Packet(1, b'2', b"opaque".to_vec())],
            "binq",
            &broker,
        );

        rx.run().await;

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].routing_key, "binq");
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_stops_gracefully() {
        let broker = InMemoryBroker::new();
        let (mut rx, _tx) = receiver(
            vec![
                Scripted::Packet(1, b'2', b"first".to_vec()),
                Scripted::TooLarge(4096),
                Scripted::Packet(2, b'2', b"never".to_vec()),
            ],
            "binq",
            &broker,
        );

        let exit = rx.run().await;
        assert_eq!(
            exit,
            ReceiverExit::Oversized {
                needed: 4096,
                capacity: 1024
            }
        );
        assert!(rx.publisher().is_connected());

        rx.close().await;
        assert!(!rx.publisher().is_connected());
        assert!(rx.source().closed);
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flag_terminates_source() {
        let broker = InMemoryBroker::new();
        let script = (0..100).map(|_| Scripted::NoPacket).collect();
        let (mut rx, tx) = receiver(script, "binq", &broker);
        tx.send(true).unwrap();

        assert_eq!(rx.run().await, ReceiverExit::Terminated);
        assert!(rx.source().terminated);
        assert_eq!(rx.source().collects, 1);
    }
}
