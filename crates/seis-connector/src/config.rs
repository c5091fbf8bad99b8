//! Command line parsing and the ingress configuration built from it

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};

use seis_middleware::{BrokerConfig, RetryConfig};

use crate::auth::{CredentialProvider, EnvCredentials, PromptCredentials, PromptMode};
use crate::error::ConfigError;
use crate::publisher::PublisherConfig;
use crate::receiver::{ReceiverConfig, DEFAULT_BUFFER_SIZE, NO_PACKET_SLEEP};
use crate::seedlink::{ProtocolPreference, SeedLinkConfig};
use crate::streams::build_selection;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 18000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthMode {
    None,
    /// SEEDLINK_USERNAME / SEEDLINK_PASSWORD
    Env,
    /// Prompt for user and password
    Userpass,
    /// Prompt for a token
    Token,
}

#[derive(Parser, Debug)]
#[command(name = "seis-connector")]
#[command(about = "Forward SeedLink packets to a NATS JetStream broker")]
pub struct Args {
    /// SeedLink server as [host][:port]
    #[arg(default_value = "")]
    pub server: String,

    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log every packet with its stream identifier
    #[arg(short = 'p', long)]
    pub print_packets: bool,

    /// SeedLink authentication; defaults to env when both variables are set
    #[arg(long, value_enum)]
    pub auth: Option<AuthMode>,

    /// Seconds without data before the link is re-established (0 = off)
    #[arg(long, default_value_t = 600)]
    pub idle_timeout: u64,

    /// Seconds to wait before reconnecting a failed link
    #[arg(long, default_value_t = 30)]
    pub reconnect_delay: u64,

    /// Keepalive interval in seconds (0 = off)
    #[arg(long, default_value_t = 0)]
    pub keepalive: u64,

    /// Sequence state file, read at startup and written at shutdown
    #[arg(short = 'x', long)]
    pub state_file: Option<PathBuf>,

    /// Stream list file: `NET STA [selectors...]` per line
    #[arg(short = 'l', long)]
    pub stream_list: Option<PathBuf>,

    /// Default selectors, space separated
    #[arg(short = 's', long)]
    pub selectors: Option<String>,

    /// Inline station list: `NET_STA[:sel1 sel2],...`
    #[arg(short = 'S', long)]
    pub streams: Option<String>,

    #[arg(long, value_enum, default_value_t = ProtocolPreference::Auto)]
    pub protocol: ProtocolPreference,

    /// Receive buffer size in bytes
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    #[arg(long, env = "BROKER_HOST", default_value = "127.0.0.1")]
    pub broker_host: String,

    #[arg(long, env = "BROKER_PORT", default_value_t = 4222)]
    pub broker_port: u16,

    #[arg(long, env = "BROKER_USER", default_value = "")]
    pub broker_user: String,

    #[arg(long, env = "BROKER_PASSWORD", default_value = "", hide_env_values = true)]
    pub broker_password: String,

    /// Subject namespace ("/" for none)
    #[arg(long, env = "BROKER_VHOST", default_value = "/")]
    pub broker_vhost: String,

    /// Exchange (JetStream stream) to publish into; empty publishes by key
    #[arg(long, default_value = "")]
    pub exchange: String,

    /// Static routing key; empty routes by stream identifier
    #[arg(long, default_value = "binq")]
    pub routing_key: String,

    /// Broker connect attempts before giving up (0 = unlimited)
    #[arg(long, default_value_t = seis_middleware::config::DEFAULT_MAX_ATTEMPTS)]
    pub max_connect_attempts: u32,

    /// Serve /health, /ready and /metrics on this address
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

/// Everything the ingress service needs, built once at startup
#[derive(Debug, Clone)]
pub struct IngressConfig {
    pub seedlink: SeedLinkConfig,
    pub auth: AuthMode,
    pub broker: BrokerConfig,
    pub publisher: PublisherConfig,
    pub receiver: ReceiverConfig,
    pub metrics_addr: Option<SocketAddr>,
}

/// Expand `[host][:port]` with defaults
pub fn parse_server_address(addr: &str) -> Result<String, ConfigError> {
    let addr = addr.trim();
    let (host, port) = match addr.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| ConfigError::ServerAddress(addr.to_string()))?;
            (host, port)
        }
        None => (addr, DEFAULT_PORT),
    };
    if host.contains(':') || host.contains(char::is_whitespace) {
        return Err(ConfigError::ServerAddress(addr.to_string()));
    }
    let host = if host.is_empty() { DEFAULT_HOST } else { host };
    Ok(format!("{}:{}", host, port))
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Args {
    pub fn into_config(self) -> Result<IngressConfig, ConfigError> {
        let server = parse_server_address(&self.server)?;
        let selection = build_selection(
            self.stream_list.as_deref(),
            self.streams.as_deref(),
            self.selectors.as_deref(),
        )?;

        let auth = match self.auth {
            Some(mode) => mode,
            None if EnvCredentials::default().available() => AuthMode::Env,
            None => AuthMode::None,
        };

        let seedlink = SeedLinkConfig {
            protocol: self.protocol,
            idle_timeout: Duration::from_secs(self.idle_timeout),
            reconnect_delay: Duration::from_secs(self.reconnect_delay),
            keepalive: seconds(self.keepalive),
            state_file: self.state_file,
            ..SeedLinkConfig::new(server, selection)
        };

        Ok(IngressConfig {
            seedlink,
            auth,
            broker: BrokerConfig {
                host: self.broker_host,
                port: self.broker_port,
                user: self.broker_user,
                password: self.broker_password,
                vhost: self.broker_vhost,
            },
            publisher: PublisherConfig {
                exchange: self.exchange,
                routing_key: self.routing_key,
                retry: RetryConfig::from_max_attempts(self.max_connect_attempts),
            },
            receiver: ReceiverConfig {
                buffer_size: self.buffer_size,
                print_packets: self.print_packets,
                idle_sleep: NO_PACKET_SLEEP,
            },
            metrics_addr: self.metrics_addr,
        })
    }
}

impl IngressConfig {
    pub fn credentials(&self) -> Option<Arc<dyn CredentialProvider>> {
        match self.auth {
            AuthMode::None => None,
            AuthMode::Env => Some(Arc::new(EnvCredentials::default())),
            AuthMode::Userpass => Some(Arc::new(PromptCredentials::terminal(PromptMode::UserPass))),
            AuthMode::Token => Some(Arc::new(PromptCredentials::terminal(PromptMode::Token))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::StreamSelection;

    #[test]
    fn test_server_address_defaults() {
        assert_eq!(parse_server_address("").unwrap(), "localhost:18000");
        assert_eq!(parse_server_address("rtserve.iris.edu").unwrap(), "rtserve.iris.edu:18000");
        assert_eq!(parse_server_address(":18001").unwrap(), "localhost:18001");
        assert_eq!(parse_server_address("geofon:18010").unwrap(), "geofon:18010");
    }

    #[test]
    fn test_server_address_invalid() {
        assert!(parse_server_address("host:port").is_err());
        assert!(parse_server_address("host:99999").is_err());
        assert!(parse_server_address("a:b:1").is_err());
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["seis-connector", "--auth", "none"]).unwrap();
        let config = args.into_config().unwrap();

        assert_eq!(config.seedlink.server, "localhost:18000");
        assert_eq!(config.seedlink.idle_timeout, Duration::from_secs(600));
        assert_eq!(config.seedlink.reconnect_delay, Duration::from_secs(30));
        assert_eq!(config.seedlink.keepalive, None);
        assert_eq!(config.seedlink.protocol, ProtocolPreference::Auto);
        assert_eq!(
            config.seedlink.selection,
            StreamSelection::AllStation { selectors: vec![] }
        );
        assert_eq!(config.auth, AuthMode::None);
        assert_eq!(config.publisher.routing_key, "binq");
        assert_eq!(config.publisher.exchange, "");
        assert_eq!(config.publisher.retry.max_attempts, Some(20));
        assert_eq!(config.receiver.buffer_size, 16384);
        assert!(config.credentials().is_none());
    }

    #[test]
    fn test_full_command_line() {
        let args = Args::try_parse_from([
            "seis-connector",
            "-vv",
            "-p",
            "--keepalive",
            "30",
            "-S",
            "IU_COLA:BHZ,GE_WLF",
            "-x",
            "/tmp/sl.state",
            "--routing-key",
            "",
            "--exchange",
            "seismic",
            "--max-connect-attempts",
            "0",
            "--protocol",
            "v4",
            "--auth",
            "env",
            "rtserve:18000",
        ])
        .unwrap();
        assert_eq!(args.verbose, 2);
        let config = args.into_config().unwrap();

        assert_eq!(config.seedlink.server, "rtserve:18000");
        assert_eq!(config.seedlink.keepalive, Some(Duration::from_secs(30)));
        assert_eq!(config.seedlink.protocol, ProtocolPreference::V4);
        assert!(matches!(config.seedlink.selection, StreamSelection::MultiStation(ref s) if s.len() == 2));
        assert_eq!(config.seedlink.state_file, Some(PathBuf::from("/tmp/sl.state")));
        assert!(config.receiver.print_packets);
        assert_eq!(config.publisher.routing_key, "");
        assert_eq!(config.publisher.retry.max_attempts, None);
        assert_eq!(config.auth, AuthMode::Env);
    }

    #[test]
    fn test_bad_selection_is_config_error() {
        let args = Args::try_parse_from(["seis-connector", "-S", "NOSTATION"]).unwrap();
        assert!(matches!(args.into_config(), Err(ConfigError::Selection(_))));
    }
}
