//! Broker and reconnect settings shared by both services

use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Connection parameters for the message broker.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Subject namespace; "" and "/" mean none
    #[serde(default)]
    pub vhost: String,
}

impl BrokerConfig {
    pub fn url(&self) -> String {
        format!("nats://{}:{}", self.host, self.port)
    }

    /// Leading subject namespace token, if any
    pub fn namespace(&self) -> Option<&str> {
        let ns = self.vhost.trim_matches('/');
        if ns.is_empty() {
            None
        } else {
            Some(ns)
        }
    }

    /// host:port for log lines and retry targets
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4222,
            user: String::new(),
            password: String::new(),
            vhost: "/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// None retries forever
    pub max_attempts: Option<u32>,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryConfig {
    /// CLI convention: 0 means unlimited.
    pub fn from_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: (max_attempts > 0).then_some(max_attempts),
            ..Default::default()
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        }
    }
}
