//! Decode-then-load pipeline and the reconnecting service loop

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use seis_middleware::{RetryConfig, RetryError, RetryPolicy};

use crate::consumer::{BrokerConsumer, LoopExit, MessageHandler};
use crate::decoder::RecordDecoder;
use crate::error::{ConsumerError, ProcessError, StoreError};
use crate::loader::{BulkLoader, CopyTarget, StoreConnector};

/// Owns the store session; reopens it when found closed
pub struct Pipeline<C: StoreConnector> {
    decoder: RecordDecoder,
    connector: C,
    retry: RetryPolicy,
    loader: Option<BulkLoader<C::Target>>,
}

impl<C: StoreConnector> Pipeline<C> {
    pub fn new(connector: C, retry: &RetryConfig) -> Self {
        Self {
            decoder: RecordDecoder::new(),
            connector,
            retry: RetryPolicy::new(retry),
            loader: None,
        }
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.retry = self.retry.with_shutdown(shutdown);
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Single startup attempt; the caller treats failure as fatal
    pub async fn connect(&mut self) -> Result<(), StoreError> {
        let target = self.connector.connect().await?;
        info!(target = %self.connector.target(), "Store connected");
        self.loader = Some(BulkLoader::new(target));
        Ok(())
    }

    async fn ensure_store(&mut self) -> Result<&mut BulkLoader<C::Target>, ProcessError> {
        let loader = match self.loader.take() {
            Some(loader) if !loader.target().is_closed() => loader,
            previous => {
                if previous.is_some() {
                    warn!(target = %self.connector.target(), "Store connection lost");
                    self.retry.mark_disconnected();
                }
                let connector = &self.connector;
                let target = connector.target();
                match self
                    .retry
                    .connect_with_retry(&target, move || connector.connect())
                    .await
                {
                    Ok(session) => BulkLoader::new(session),
                    Err(e) => {
                        self.retry.reset();
                        return Err(ProcessError::StoreUnavailable(e));
                    }
                }
            }
        };
        Ok(self.loader.insert(loader))
    }
}

#[async_trait]
impl<C: StoreConnector> MessageHandler for Pipeline<C> {
    async fn handle(&mut self, body: &[u8]) -> Result<u64, ProcessError> {
        let record = self.decoder.decode(body)?;
        if record.is_empty() {
            debug!(sid = %record.sid, "Record has no samples");
            return Ok(0);
        }
        let loader = self.ensure_store().await?;
        Ok(loader.load(&record).await?)
    }
}

/// Run the consume loop, rebuilding the broker connection whenever it
/// fails. Returns once shutdown is requested; an error means the broker
/// could not be reached within the retry budget.
pub async fn run_service<H>(
    consumer: &mut BrokerConsumer,
    handler: &mut H,
    shutdown: watch::Receiver<bool>,
) -> Result<(), ConsumerError>
where
    H: MessageHandler + ?Sized,
{
    loop {
        if !consumer.is_connected() {
            consumer.disconnect().await;
            match consumer.connect().await {
                Ok(()) => {}
                Err(ConsumerError::Retry(RetryError::Cancelled(_))) => {
                    info!("Shutdown requested while connecting");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        match consumer.run(handler, &shutdown).await {
            LoopExit::Shutdown => {
                consumer.disconnect().await;
                return Ok(());
            }
            LoopExit::BrokerFailure(e) => {
                warn!(error = %e, "Broker connection lost, reconnecting");
                consumer.disconnect().await;
            }
        }
    }
}
