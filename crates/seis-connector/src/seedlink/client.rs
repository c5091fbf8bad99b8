//! SeedLink client over TCP.
//!
//! The link is (re)established lazily from `collect`. While it is down,
//! or while waiting out the reconnect delay, `collect` reports
//! `NoPacket` so the receive loop keeps turning.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::frame::{
    parse_frame, resume_argument, take_line, v2_station_key, FrameKind, ProtocolVersion,
};
use crate::auth::CredentialProvider;
use crate::error::SeedLinkError;
use crate::metrics;
use crate::source::{Collect, PacketInfo, PacketSource};
use crate::state::{SequenceState, ALL_STATIONS};
use crate::streams::StreamSelection;

const READ_CHUNK: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProtocolPreference {
    /// Protocol 4 when the server offers it
    Auto,
    V3,
    V4,
}

#[derive(Debug, Clone)]
pub struct SeedLinkConfig {
    /// `host:port`
    pub server: String,
    pub protocol: ProtocolPreference,
    pub selection: StreamSelection,
    /// Re-establish the link after this long without bytes; zero disables
    pub idle_timeout: Duration,
    pub reconnect_delay: Duration,
    /// Send `INFO ID` this often; `None` disables
    pub keepalive: Option<Duration>,
    pub state_file: Option<PathBuf>,
    /// Bound on connect and each command/response exchange
    pub command_timeout: Duration,
    /// Longest a single `collect` waits on the socket
    pub poll_interval: Duration,
}

impl SeedLinkConfig {
    pub fn new(server: impl Into<String>, selection: StreamSelection) -> Self {
        Self {
            server: server.into(),
            protocol: ProtocolPreference::Auto,
            selection,
            idle_timeout: Duration::from_secs(600),
            reconnect_delay: Duration::from_secs(30),
            keepalive: None,
            state_file: None,
            command_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
        }
    }
}

struct Link {
    stream: TcpStream,
    rbuf: BytesMut,
    version: ProtocolVersion,
    last_rx: Instant,
    last_tx: Instant,
    command_timeout: Duration,
}

impl Link {
    fn new(stream: TcpStream, command_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            stream,
            rbuf: BytesMut::with_capacity(READ_CHUNK),
            version: ProtocolVersion::V3,
            last_rx: now,
            last_tx: now,
            command_timeout,
        }
    }

    async fn send(&mut self, command: &str) -> Result<(), SeedLinkError> {
        debug!(command = %command, "Sending SeedLink command");
        self.stream.write_all(command.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.last_tx = Instant::now();
        Ok(())
    }

    async fn read_line(&mut self, waiting_for: &str) -> Result<String, SeedLinkError> {
        let deadline = Instant::now() + self.command_timeout;
        loop {
            if let Some((line, used)) = take_line(&self.rbuf) {
                self.rbuf.advance(used);
                return Ok(line);
            }
            self.rbuf.reserve(READ_CHUNK);
            let read = tokio::time::timeout_at(deadline, self.stream.read_buf(&mut self.rbuf))
                .await
                .map_err(|_| SeedLinkError::Timeout(waiting_for.to_string()))??;
            if read == 0 {
                return Err(SeedLinkError::ConnectionFailed(format!(
                    "server closed connection during {}",
                    waiting_for
                )));
            }
            self.last_rx = Instant::now();
        }
    }

    /// Send a command that must be answered with `OK`
    async fn expect_ok(&mut self, command: &str) -> Result<(), SeedLinkError> {
        self.send(command).await?;
        let response = self.read_line(command).await?;
        check_ok(command, response)
    }
}

fn check_ok(command: &str, response: String) -> Result<(), SeedLinkError> {
    if response == "OK" {
        Ok(())
    } else if response.starts_with("ERROR") {
        Err(SeedLinkError::Rejected {
            command: command.to_string(),
            response,
        })
    } else {
        Err(SeedLinkError::Protocol(format!(
            "unexpected response to {}: '{}'",
            command, response
        )))
    }
}

enum Step {
    Again,
    Done(Collect),
    Fail(String),
}

pub struct SeedLinkClient {
    config: SeedLinkConfig,
    credentials: Option<Arc<dyn CredentialProvider>>,
    link: Option<Link>,
    retry_at: Option<Instant>,
    sequences: SequenceState,
    terminate: bool,
}

impl SeedLinkClient {
    pub fn new(config: SeedLinkConfig, credentials: Option<Arc<dyn CredentialProvider>>) -> Self {
        let sequences = match &config.state_file {
            Some(path) => SequenceState::restore_or_default(path, &config.server),
            None => SequenceState::new(),
        };
        Self {
            config,
            credentials,
            link: None,
            retry_at: None,
            sequences,
            terminate: false,
        }
    }

    pub fn server(&self) -> &str {
        &self.config.server
    }

    pub fn sequences(&self) -> &SequenceState {
        &self.sequences
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn data_command(&self, key: &str, version: ProtocolVersion) -> String {
        match self.sequences.last(key) {
            Some(last) => format!("DATA {}", resume_argument(last, version)),
            None => "DATA".to_string(),
        }
    }

    async fn open_link(&self) -> Result<Link, SeedLinkError> {
        let server = &self.config.server;
        let stream = timeout(self.config.command_timeout, TcpStream::connect(server))
            .await
            .map_err(|_| SeedLinkError::Timeout(format!("connect to {}", server)))?
            .map_err(|e| SeedLinkError::ConnectionFailed(format!("{}: {}", server, e)))?;
        stream.set_nodelay(true)?;
        let mut link = Link::new(stream, self.config.command_timeout);

        link.send("HELLO").await?;
        let banner = link.read_line("HELLO").await?;
        let organization = link.read_line("HELLO").await?;
        let offers_v4 = banner.contains("SLPROTO:4");
        info!(server = %server, banner = %banner, organization = %organization, "SeedLink server");

        link.version = match (self.config.protocol, offers_v4) {
            (ProtocolPreference::V3, _) | (ProtocolPreference::Auto, false) => ProtocolVersion::V3,
            (_, true) => ProtocolVersion::V4,
            (ProtocolPreference::V4, false) => {
                return Err(SeedLinkError::Protocol(
                    "server does not offer protocol 4".to_string(),
                ))
            }
        };
        if link.version == ProtocolVersion::V4 {
            link.expect_ok("SLPROTO 4.0").await?;
        }

        if let Some(provider) = &self.credentials {
            if link.version != ProtocolVersion::V4 {
                return Err(SeedLinkError::Protocol(
                    "authentication requires protocol 4".to_string(),
                ));
            }
            let secret = provider.obtain(server)?;
            let written = async {
                link.stream.write_all(b"AUTH ").await?;
                link.stream.write_all(secret.as_bytes()).await?;
                link.stream.write_all(b"\r\n").await
            }
            .await;
            provider.release(secret);
            written?;
            link.last_tx = Instant::now();
            let response = link.read_line("AUTH").await?;
            check_ok("AUTH", response)?;
        }

        self.select_streams(&mut link).await?;
        Ok(link)
    }

    async fn select_streams(&self, link: &mut Link) -> Result<(), SeedLinkError> {
        let version = link.version;
        match &self.config.selection {
            StreamSelection::MultiStation(stations) => {
                for station in stations {
                    let command = match version {
                        ProtocolVersion::V3 => format!("STATION {} {}", station.sta, station.net),
                        ProtocolVersion::V4 => format!("STATION {}", station.key()),
                    };
                    link.expect_ok(&command).await?;
                    for selector in &station.selectors {
                        link.expect_ok(&format!("SELECT {}", selector)).await?;
                    }
                    link.expect_ok(&self.data_command(&station.key(), version)).await?;
                }
                link.send("END").await?;
            }
            StreamSelection::AllStation { selectors } => {
                if version == ProtocolVersion::V4 {
                    link.expect_ok("STATION *").await?;
                }
                for selector in selectors {
                    link.expect_ok(&format!("SELECT {}", selector)).await?;
                }
                let data = self.data_command(ALL_STATIONS, version);
                match version {
                    // Uni-station DATA starts the flow without a response
                    ProtocolVersion::V3 => link.send(&data).await?,
                    ProtocolVersion::V4 => {
                        link.expect_ok(&data).await?;
                        link.send("END").await?;
                    }
                }
            }
        }
        Ok(())
    }

    fn sequence_key<'a>(&self, station: Option<&'a str>) -> Option<&'a str> {
        match self.config.selection {
            StreamSelection::AllStation { .. } => Some(ALL_STATIONS),
            StreamSelection::MultiStation(_) => station,
        }
    }

    async fn step(&mut self, link: &mut Link, buf: &mut [u8]) -> Step {
        let header = match parse_frame(&link.rbuf, link.version) {
            Ok(header) => header,
            Err(e) => return Step::Fail(e.to_string()),
        };

        if let Some(header) = header {
            if header.kind == FrameKind::Info {
                debug!(bytes = header.total, "Consumed INFO packet");
                link.rbuf.advance(header.total);
                return Step::Again;
            }

            let len = header.payload_len();
            if len > buf.len() {
                return Step::Done(Collect::TooLarge {
                    needed: len,
                    capacity: buf.len(),
                });
            }
            buf[..len].copy_from_slice(&link.rbuf[header.payload.clone()]);
            let station = match header.station.clone() {
                Some(range) => Some(String::from_utf8_lossy(&link.rbuf[range]).into_owned()),
                None if header.format == b'2' => v2_station_key(&buf[..len]),
                None => None,
            };
            link.rbuf.advance(header.total);
            link.last_rx = Instant::now();

            if let Some(key) = self.sequence_key(station.as_deref()) {
                self.sequences.record(key, header.seqnum);
            }
            return Step::Done(Collect::Packet(PacketInfo {
                seqnum: header.seqnum,
                format: header.format,
                payload_len: len,
                station,
            }));
        }

        link.rbuf.reserve(READ_CHUNK);
        match timeout(self.config.poll_interval, link.stream.read_buf(&mut link.rbuf)).await {
            Ok(Ok(0)) => Step::Fail("connection closed by server".to_string()),
            Ok(Ok(_)) => {
                link.last_rx = Instant::now();
                Step::Again
            }
            Ok(Err(e)) => Step::Fail(e.to_string()),
            Err(_) => {
                let now = Instant::now();
                let idle = self.config.idle_timeout;
                if !idle.is_zero() && now.duration_since(link.last_rx) >= idle {
                    return Step::Fail(format!("no data for {}s", idle.as_secs()));
                }
                if let Some(interval) = self.config.keepalive {
                    if now.duration_since(link.last_tx) >= interval {
                        if let Err(e) = link.send("INFO ID").await {
                            return Step::Fail(e.to_string());
                        }
                        debug!("Sent keepalive");
                    }
                }
                Step::Done(Collect::NoPacket)
            }
        }
    }

    async fn shutdown_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            let _ = link.send("BYE").await;
            let _ = link.stream.shutdown().await;
            metrics::set_source_connected(false);
            info!(server = %self.config.server, "Disconnected from SeedLink server");
        }
    }
}

#[async_trait]
impl PacketSource for SeedLinkClient {
    async fn collect(&mut self, buf: &mut [u8]) -> Collect {
        loop {
            if self.terminate {
                self.shutdown_link().await;
                return Collect::Terminate;
            }

            let mut link = match self.link.take() {
                Some(link) => link,
                None => {
                    if self.retry_at.is_some_and(|at| Instant::now() < at) {
                        return Collect::NoPacket;
                    }
                    match self.open_link().await {
                        Ok(link) => {
                            info!(server = %self.config.server, version = ?link.version, "SeedLink streaming");
                            metrics::set_source_connected(true);
                            self.retry_at = None;
                            link
                        }
                        Err(e) => {
                            warn!(
                                server = %self.config.server,
                                error = %e,
                                delay_secs = self.config.reconnect_delay.as_secs(),
                                "SeedLink connect failed, will retry"
                            );
                            self.retry_at = Some(Instant::now() + self.config.reconnect_delay);
                            return Collect::NoPacket;
                        }
                    }
                }
            };

            match self.step(&mut link, buf).await {
                Step::Again => self.link = Some(link),
                Step::Done(outcome) => {
                    self.link = Some(link);
                    return outcome;
                }
                Step::Fail(reason) => {
                    warn!(
                        server = %self.config.server,
                        reason = %reason,
                        delay_secs = self.config.reconnect_delay.as_secs(),
                        "SeedLink link lost, reconnecting after delay"
                    );
                    metrics::set_source_connected(false);
                    self.retry_at = Some(Instant::now() + self.config.reconnect_delay);
                    return Collect::NoPacket;
                }
            }
        }
    }

    fn terminate(&mut self) {
        self.terminate = true;
    }

    async fn close(&mut self) {
        self.shutdown_link().await;
        if let Some(path) = &self.config.state_file {
            if let Err(e) = self.sequences.save(path, &self.config.server) {
                warn!(path = %path.display(), error = %e, "Failed to save stream state");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Secret;
    use crate::error::AuthError;
    use crate::seedlink::frame::tests::{v3_packet, v4_packet};
    use crate::streams::StationSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    const V3_BANNER: &str = "SeedLink v3.1 (2020.075) :: SLPROTO:3.1 CAP EXTREPLY";
    const V4_BANNER: &str = "SeedLink v4.0 (2023) :: SLPROTO:4.0 SLPROTO:3.1";

    /// Scripted server: answers OK to everything except HELLO, and once
    /// the data flow starts (END, or DATA in v3 uni-station) writes
    /// `packets` then idles. Returns every command line received.
    fn spawn_server(
        listener: TcpListener,
        banner: &'static str,
        uni_station_v3: bool,
        packets: Vec<u8>,
    ) -> JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            let mut seen = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim_end().to_string();
                seen.push(line.clone());
                let starts_flow = line == "END" || (uni_station_v3 && line.starts_with("DATA"));
                if line == "HELLO" {
                    write
                        .write_all(format!("{}\r\nTest Org\r\n", banner).as_bytes())
                        .await
                        .unwrap();
                } else if line == "BYE" {
                    break;
                } else if starts_flow {
                    write.write_all(&packets).await.unwrap();
                } else if !line.starts_with("INFO") {
                    write.write_all(b"OK\r\n").await.unwrap();
                }
            }
            seen
        })
    }

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    fn config(server: String, selection: StreamSelection) -> SeedLinkConfig {
        SeedLinkConfig {
            poll_interval: Duration::from_millis(20),
            command_timeout: Duration::from_secs(2),
            reconnect_delay: Duration::from_millis(50),
            ..SeedLinkConfig::new(server, selection)
        }
    }

    fn v2_record(net: &str, sta: &str) -> Vec<u8> {
        let mut rec = vec![b' '; 48];
        rec[0..6].copy_from_slice(b"000001");
        rec[6] = b'D';
        rec[8..8 + sta.len()].copy_from_slice(sta.as_bytes());
        rec[13..15].copy_from_slice(b"00");
        rec[15..18].copy_from_slice(b"BHZ");
        rec[18..20].copy_from_slice(net.as_bytes());
        rec
    }

    async fn next_packet(client: &mut SeedLinkClient, buf: &mut [u8]) -> PacketInfo {
        for _ in 0..200 {
            if let Collect::Packet(info) = client.collect(buf).await {
                return info;
            }
        }
        panic!("no packet received");
    }

    #[tokio::test]
    async fn test_v3_multi_station_session() {
        let (listener, addr) = listener().await;
        let mut packets = v3_packet(0x10, &v2_record("IU", "COLA"));
        let mut info = b"SLINFO  ".to_vec();
        info.resize(520, b' ');
        packets.extend_from_slice(&info);
        packets.extend_from_slice(&v3_packet(0x11, &v2_record("IU", "COLA")));
        let server = spawn_server(listener, V3_BANNER, false, packets);

        let selection = StreamSelection::MultiStation(vec![StationSpec {
            net: "IU".to_string(),
            sta: "COLA".to_string(),
            selectors: vec!["BHZ".to_string()],
        }]);
        let mut client = SeedLinkClient::new(config(addr, selection), None);
        let mut buf = vec![0u8; 1024];

        let first = next_packet(&mut client, &mut buf).await;
        assert_eq!(first.seqnum, 0x10);
        assert_eq!(first.format, b'2');
        assert_eq!(first.payload_len, 512);
        assert_eq!(first.station.as_deref(), Some("IU_COLA"));
        assert_eq!(&buf[18..20], b"IU");

        // INFO packet in between is swallowed
        let second = next_packet(&mut client, &mut buf).await;
        assert_eq!(second.seqnum, 0x11);
        assert_eq!(client.sequences().last("IU_COLA"), Some(0x11));

        client.close().await;
        let commands = server.await.unwrap();
        assert_eq!(
            commands,
            vec!["HELLO", "STATION COLA IU", "SELECT BHZ", "DATA", "END", "BYE"]
        );
    }

    #[tokio::test]
    async fn test_v3_resume_from_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("state.json");
        let (listener, addr) = listener().await;

        let mut saved = SequenceState::new();
        saved.record(ALL_STATIONS, 0x2A);
        saved.save(&state_path, &addr).unwrap();

        let server = spawn_server(
            listener,
            V3_BANNER,
            true,
            v3_packet(0x2B, &v2_record("GE", "WLF")),
        );

        let mut cfg = config(addr.clone(), StreamSelection::AllStation { selectors: vec![] });
        cfg.state_file = Some(state_path.clone());
        let mut client = SeedLinkClient::new(cfg, None);
        let mut buf = vec![0u8; 1024];
        assert_eq!(next_packet(&mut client, &mut buf).await.seqnum, 0x2B);

        client.close().await;
        let commands = server.await.unwrap();
        assert_eq!(commands, vec!["HELLO", "DATA 00002B", "BYE"]);

        let persisted = SequenceState::load(&state_path, &addr).unwrap();
        assert_eq!(persisted.last(ALL_STATIONS), Some(0x2B));
    }

    struct CountingProvider {
        released: AtomicUsize,
    }

    impl CredentialProvider for CountingProvider {
        fn obtain(&self, _server: &str) -> Result<Secret, AuthError> {
            Secret::from_parts(&["USERPASS", "u", "p"])
        }

        fn release(&self, secret: Secret) {
            self.released.fetch_add(1, Ordering::SeqCst);
            drop(secret);
        }
    }

    #[tokio::test]
    async fn test_v4_negotiation_with_auth() {
        let (listener, addr) = listener().await;
        let payload = vec![7u8; 100];
        let server = spawn_server(
            listener,
            V4_BANNER,
            false,
            v4_packet(b'3', b'D', 99, "XX_YYYY", &payload),
        );

        let provider = Arc::new(CountingProvider {
            released: AtomicUsize::new(0),
        });
        let selection = StreamSelection::MultiStation(vec![StationSpec {
            net: "XX".to_string(),
            sta: "YYYY".to_string(),
            selectors: vec![],
        }]);
        let mut client = SeedLinkClient::new(
            config(addr, selection),
            Some(provider.clone() as Arc<dyn CredentialProvider>),
        );
        let mut buf = vec![0u8; 1024];

        let info = next_packet(&mut client, &mut buf).await;
        assert_eq!(info.seqnum, 99);
        assert_eq!(info.format, b'3');
        assert_eq!(info.station.as_deref(), Some("XX_YYYY"));
        assert_eq!(&buf[..100], payload.as_slice());
        assert_eq!(provider.released.load(Ordering::SeqCst), 1);

        client.close().await;
        let commands = server.await.unwrap();
        assert_eq!(
            commands,
            vec![
                "HELLO",
                "SLPROTO 4.0",
                "AUTH USERPASS u p",
                "STATION XX_YYYY",
                "DATA",
                "END",
                "BYE"
            ]
        );
    }

    #[tokio::test]
    async fn test_oversized_payload_reported() {
        let (listener, addr) = listener().await;
        let _server = spawn_server(
            listener,
            V4_BANNER,
            false,
            v4_packet(b'3', b'D', 1, "XX_YYYY", &vec![0u8; 4096]),
        );

        let selection = StreamSelection::AllStation { selectors: vec![] };
        let mut client = SeedLinkClient::new(config(addr, selection), None);
        let mut buf = vec![0u8; 1024];

        let mut outcome = Collect::NoPacket;
        for _ in 0..200 {
            outcome = client.collect(&mut buf).await;
            if outcome != Collect::NoPacket {
                break;
            }
        }
        assert_eq!(
            outcome,
            Collect::TooLarge {
                needed: 4096,
                capacity: 1024
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_yields_no_packet() {
        let (listener, addr) = listener().await;
        drop(listener);

        let selection = StreamSelection::AllStation { selectors: vec![] };
        let mut client = SeedLinkClient::new(config(addr, selection), None);
        let mut buf = vec![0u8; 64];
        assert_eq!(client.collect(&mut buf).await, Collect::NoPacket);
        assert!(!client.is_connected());
        // Within the reconnect delay no new attempt is made
        assert_eq!(client.collect(&mut buf).await, Collect::NoPacket);
    }

    #[tokio::test]
    async fn test_terminate() {
        let selection = StreamSelection::AllStation { selectors: vec![] };
        let mut client = SeedLinkClient::new(config("127.0.0.1:1".to_string(), selection), None);
        client.terminate();
        let mut buf = vec![0u8; 64];
        assert_eq!(client.collect(&mut buf).await, Collect::Terminate);
    }

    #[tokio::test]
    async fn test_keepalive_sent_when_quiet() {
        let (listener, addr) = listener().await;
        let server = spawn_server(listener, V3_BANNER, true, Vec::new());

        let mut cfg = config(addr, StreamSelection::AllStation { selectors: vec![] });
        cfg.keepalive = Some(Duration::from_millis(30));
        let mut client = SeedLinkClient::new(cfg, None);
        let mut buf = vec![0u8; 64];
        for _ in 0..10 {
            assert_eq!(client.collect(&mut buf).await, Collect::NoPacket);
        }
        client.close().await;

        let commands = server.await.unwrap();
        assert!(commands.iter().any(|c| c == "INFO ID"));
    }

    #[tokio::test]
    async fn test_rejected_station_fails_link() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_server = Arc::clone(&seen);
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                seen_server.lock().unwrap().push(line.clone());
                let reply = match line.as_str() {
                    "HELLO" => format!("{}\r\nOrg\r\n", V3_BANNER),
                    _ => "ERROR\r\n".to_string(),
                };
                write.write_all(reply.as_bytes()).await.unwrap();
            }
        });

        let selection = StreamSelection::MultiStation(vec![StationSpec {
            net: "ZZ".to_string(),
            sta: "NONE".to_string(),
            selectors: vec![],
        }]);
        let mut client = SeedLinkClient::new(config(addr, selection), None);
        let mut buf = vec![0u8; 64];
        assert_eq!(client.collect(&mut buf).await, Collect::NoPacket);
        assert!(!client.is_connected());
        assert_eq!(seen.lock().unwrap().last().map(String::as_str), Some("STATION NONE ZZ"));
    }
}
