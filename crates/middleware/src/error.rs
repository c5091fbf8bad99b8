use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("declare failed: {0}")]
    DeclareFailed(String),
    #[error("ack failed: {0}")]
    AckFailed(String),
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Broker-level rejections (as opposed to transport/auth failures)
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            TransportError::PublishFailed(_)
                | TransportError::DeclareFailed(_)
                | TransportError::SubscribeFailed(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum RetryError {
    #[error("gave up on {target} after {attempts} attempts: {last_error}")]
    Exhausted {
        target: String,
        attempts: u32,
        last_error: String,
    },
    #[error("connect to {0} cancelled by shutdown")]
    Cancelled(String),
}
