//! Command line parsing and the egress configuration built from it

use std::net::SocketAddr;
use std::time::Duration;

use clap::{ArgAction, Parser};

use seis_middleware::{BrokerConfig, QueueBinding, RetryConfig};

use crate::consumer::{ConsumerConfig, FailurePolicy};
use crate::error::ConfigError;
use crate::postgres::{validate_table, StoreConfig, DEFAULT_TABLE};

#[derive(Parser, Debug)]
#[command(name = "seis-consumer")]
#[command(about = "Load miniSEED records from a NATS JetStream broker into PostgreSQL")]
pub struct Args {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

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

    /// Exchange to bind the queue to; empty uses the queue name as subject
    #[arg(long, default_value = "")]
    pub exchange: String,

    #[arg(short = 'q', long, default_value = "binq")]
    pub queue: String,

    #[arg(long, default_value = "binq")]
    pub binding_key: String,

    /// Unacknowledged messages held at once
    #[arg(long, default_value_t = 10)]
    pub prefetch: u16,

    #[arg(long, env = "PGHOST", default_value = "localhost")]
    pub pg_host: String,

    #[arg(long, env = "PGPORT", default_value_t = 5432)]
    pub pg_port: u16,

    #[arg(long, env = "PGUSER", default_value = "admin")]
    pub pg_user: String,

    #[arg(long, env = "PGPASSWORD", default_value = "", hide_env_values = true)]
    pub pg_password: String,

    #[arg(long, env = "PGDATABASE", default_value = "seismic")]
    pub pg_db: String,

    /// Target table
    #[arg(long, default_value = DEFAULT_TABLE)]
    pub table: String,

    /// Longest wait for one message before re-checking for shutdown
    #[arg(long, default_value_t = 1000)]
    pub recv_timeout_ms: u64,

    /// Connect attempts before giving up (0 = unlimited)
    #[arg(long, default_value_t = seis_middleware::config::DEFAULT_MAX_ATTEMPTS)]
    pub max_connect_attempts: u32,

    /// Settlement of messages that could not be decoded or stored
    #[arg(long, value_enum, default_value_t = FailurePolicy::Ack)]
    pub on_failure: FailurePolicy,

    /// Serve /health, /ready and /metrics on this address
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

#[derive(Debug, Clone)]
pub struct EgressConfig {
    pub broker: BrokerConfig,
    pub consumer: ConsumerConfig,
    pub store: StoreConfig,
    /// Reconnect budget for a store lost at runtime
    pub store_retry: RetryConfig,
    pub metrics_addr: Option<SocketAddr>,
}

impl Args {
    pub fn into_config(self) -> Result<EgressConfig, ConfigError> {
        if self.queue.is_empty() {
            return Err(ConfigError::Invalid {
                field: "queue",
                reason: "must not be empty".to_string(),
            });
        }
        if self.prefetch == 0 {
            return Err(ConfigError::Invalid {
                field: "prefetch",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.recv_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "recv-timeout-ms",
                reason: "must be at least 1".to_string(),
            });
        }
        validate_table(&self.table)?;

        let retry = RetryConfig::from_max_attempts(self.max_connect_attempts);
        Ok(EgressConfig {
            broker: BrokerConfig {
                host: self.broker_host,
                port: self.broker_port,
                user: self.broker_user,
                password: self.broker_password,
                vhost: self.broker_vhost,
            },
            consumer: ConsumerConfig {
                binding: QueueBinding {
                    exchange: self.exchange,
                    queue: self.queue,
                    binding_key: self.binding_key,
                    prefetch: self.prefetch,
                },
                recv_timeout: Duration::from_millis(self.recv_timeout_ms),
                failure_policy: self.on_failure,
                retry,
            },
            store: StoreConfig {
                host: self.pg_host,
                port: self.pg_port,
                user: self.pg_user,
                password: self.pg_password,
                dbname: self.pg_db,
                table: self.table,
            },
            store_retry: retry,
            metrics_addr: self.metrics_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Args::try_parse_from(["seis-consumer"])
            .unwrap()
            .into_config()
            .unwrap();

        assert_eq!(config.consumer.binding.queue, "binq");
        assert_eq!(config.consumer.binding.binding_key, "binq");
        assert_eq!(config.consumer.binding.prefetch, 10);
        assert_eq!(config.consumer.recv_timeout, Duration::from_secs(1));
        assert_eq!(config.consumer.failure_policy, FailurePolicy::Ack);
        assert_eq!(config.consumer.retry.max_attempts, Some(20));
        assert_eq!(config.store.table, "seismic_samples");
        assert!(config.metrics_addr.is_none());
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "seis-consumer",
            "-v",
            "--exchange",
            "seismic",
            "-q",
            "archive",
            "--binding-key",
            "IU.#",
            "--prefetch",
            "50",
            "--pg-host",
            "db",
            "--pg-db",
            "waveforms",
            "--table",
            "raw.samples",
            "--on-failure",
            "nak",
            "--max-connect-attempts",
            "0",
        ])
        .unwrap();
        assert_eq!(args.verbose, 1);
        let config = args.into_config().unwrap();

        assert_eq!(config.consumer.binding.exchange, "seismic");
        assert_eq!(config.consumer.binding.queue, "archive");
        assert_eq!(config.consumer.binding.binding_key, "IU.#");
        assert_eq!(config.consumer.binding.prefetch, 50);
        assert_eq!(config.consumer.failure_policy, FailurePolicy::Nak);
        assert_eq!(config.consumer.retry.max_attempts, None);
        assert_eq!(config.store_retry.max_attempts, None);
        assert_eq!(config.store.endpoint(), "db:5432/waveforms");
        assert!(config.store.copy_statement().starts_with("COPY raw.samples("));
    }

    #[test]
    fn test_invalid_values() {
        for argv in [
            vec!["seis-consumer", "--prefetch", "0"],
            vec!["seis-consumer", "--recv-timeout-ms", "0"],
            vec!["seis-consumer", "--table", "x;y"],
            vec!["seis-consumer", "-q", ""],
        ] {
            let args = Args::try_parse_from(argv).unwrap();
            assert!(args.into_config().is_err());
        }
    }
}
