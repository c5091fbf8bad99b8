//! PostgreSQL copy target over `tokio-postgres`

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::SinkExt;
use tokio_postgres::{Client, CopyInSink, NoTls};
use tracing::{debug, error, warn};

use crate::error::{ConfigError, StoreError};
use crate::loader::{CopyTarget, StoreConnector, COLUMNS};

pub const DEFAULT_TABLE: &str = "seismic_samples";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    /// Target table, optionally schema-qualified
    pub table: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "admin".to_string(),
            password: String::new(),
            dbname: "seismic".to_string(),
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

/// Accept `name` or `schema.name` made of `[A-Za-z0-9_]`, not starting with a digit
pub fn validate_table(table: &str) -> Result<(), ConfigError> {
    let valid_part = |part: &str| {
        part.chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() <= 2 && parts.iter().all(|p| valid_part(p)) {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field: "table",
            reason: format!("'{}' is not a plain identifier", table),
        })
    }
}

impl StoreConfig {
    pub fn copy_statement(&self) -> String {
        format!("COPY {}({}) FROM STDIN WITH (FORMAT text)", self.table, COLUMNS)
    }

    /// host:port/dbname for log lines
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.dbname)
    }

    fn pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .dbname(&self.dbname)
            .application_name("seis-consumer");
        if !self.password.is_empty() {
            config.password(&self.password);
        }
        config
    }
}

pub struct PgConnector {
    config: StoreConfig,
}

impl PgConnector {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StoreConnector for PgConnector {
    type Target = PgCopyTarget;

    async fn connect(&self) -> Result<PgCopyTarget, StoreError> {
        let (client, connection) = self.config.pg_config().connect(NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        debug!(endpoint = %self.config.endpoint(), "PostgreSQL session open");
        Ok(PgCopyTarget {
            client,
            copy_sql: self.config.copy_statement(),
            sink: None,
        })
    }

    fn target(&self) -> String {
        self.config.endpoint()
    }
}

pub struct PgCopyTarget {
    client: Client,
    copy_sql: String,
    sink: Option<Pin<Box<CopyInSink<Bytes>>>>,
}

impl PgCopyTarget {
    async fn rollback(&self) {
        if let Err(e) = self.client.batch_execute("ROLLBACK").await {
            warn!(error = %e, "ROLLBACK failed");
        }
    }
}

#[async_trait]
impl CopyTarget for PgCopyTarget {
    async fn begin(&mut self) -> Result<(), StoreError> {
        self.client.batch_execute("BEGIN").await?;
        match self.client.copy_in::<_, Bytes>(self.copy_sql.as_str()).await {
            Ok(sink) => {
                self.sink = Some(Box::pin(sink));
                Ok(())
            }
            Err(e) => {
                self.rollback().await;
                Err(e.into())
            }
        }
    }

    async fn send_row(&mut self, row: Bytes) -> Result<(), StoreError> {
        let sink = self.sink.as_mut().ok_or(StoreError::NotCopying)?;
        sink.send(row).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<u64, StoreError> {
        let mut sink = self.sink.take().ok_or(StoreError::NotCopying)?;
        let copied = match sink.as_mut().finish().await {
            Ok(rows) => rows,
            Err(e) => {
                self.rollback().await;
                return Err(e.into());
            }
        };
        if let Err(e) = self.client.batch_execute("COMMIT").await {
            self.rollback().await;
            return Err(e.into());
        }
        Ok(copied)
    }

    async fn abort(&mut self, reason: &str) {
        // Dropping an unfinished sink sends CopyFail
        if self.sink.take().is_some() {
            debug!(reason = %reason, "Copy aborted");
        }
        self.rollback().await;
    }

    fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_statement() {
        let config = StoreConfig::default();
        assert_eq!(
            config.copy_statement(),
            "COPY seismic_samples(ts, net, sta, loc, chan, value, sample_rate) FROM STDIN WITH (FORMAT text)"
        );
        assert_eq!(config.endpoint(), "localhost:5432/seismic");
    }

    #[test]
    fn test_table_validation() {
        assert!(validate_table("seismic_samples").is_ok());
        assert!(validate_table("raw.samples_2024").is_ok());
        assert!(validate_table("").is_err());
        assert!(validate_table("1samples").is_err());
        assert!(validate_table("samples; DROP TABLE x").is_err());
        assert!(validate_table("a.b.c").is_err());
    }

    /// Needs a PostgreSQL with the target table:
    /// `CREATE TABLE seismic_samples (ts timestamptz, net text, sta text,
    ///  loc text, chan text, value double precision, sample_rate double precision)`
    #[tokio::test]
    #[ignore]
    async fn test_live_copy_round_trip() {
        let config = StoreConfig {
            password: std::env::var("PGPASSWORD").unwrap_or_default(),
            ..StoreConfig::default()
        };
        let mut target = PgConnector::new(config).connect().await.unwrap();

        target.begin().await.unwrap();
        target
            .send_row(Bytes::from_static(
                b"2024-01-01T00:00:00Z\tXX\tTEST\t\tBHZ\t1\t\\N\n",
            ))
            .await
            .unwrap();
        assert_eq!(target.finish().await.unwrap(), 1);

        target.begin().await.unwrap();
        target.abort("test").await;
        assert!(!target.is_closed());
    }
}
