//! Exponential-backoff reconnect policy
//!
//! A `RetryPolicy` drives connection attempts through the states
//! Disconnected -> Connecting -> Connected, passing through
//! `BackingOff` between failed attempts. The backoff sleep blocks the
//! calling loop; the only thing that can cut it short is shutdown.
//!
//! The attempt counter is reset to zero only after a successful connect.
//! Callers run `connect_with_retry` again whenever an established
//! connection drops.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::RetryConfig;
use crate::error::RetryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    BackingOff { attempt: u32, delay: Duration },
}

#[derive(Debug)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
    max_attempts: Option<u32>,
    attempt: u32,
    state: ConnectionState,
    shutdown: Option<watch::Receiver<bool>>,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base: config.base,
            cap: config.cap,
            max_attempts: config.max_attempts,
            attempt: 0,
            state: ConnectionState::Disconnected,
            shutdown: None,
        }
    }

    /// Abort retrying (before an attempt or during a backoff sleep) once
    /// the shutdown flag flips to true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Backoff before the next try: `min(2^attempt * base, cap)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// Record that an established connection went away.
    pub fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// Start a fresh retry cycle after the policy was exhausted.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.state = ConnectionState::Disconnected;
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Invoke `attempt_fn` until it succeeds, backing off between failures.
    pub async fn connect_with_retry<T, E, F, Fut>(
        &mut self,
        target: &str,
        mut attempt_fn: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        loop {
            if self.shutdown_requested() {
                self.state = ConnectionState::Disconnected;
                return Err(RetryError::Cancelled(target.to_string()));
            }

            self.state = ConnectionState::Connecting;
            info!(target = %target, attempt = self.attempt + 1, "Connecting");

            let error = match attempt_fn().await {
                Ok(conn) => {
                    self.attempt = 0;
                    self.state = ConnectionState::Connected;
                    info!(target = %target, "Connected");
                    return Ok(conn);
                }
                Err(e) => e,
            };

            let tried = self.attempt + 1;
            if self.max_attempts.is_some_and(|max| tried >= max) {
                self.attempt = tried;
                self.state = ConnectionState::Disconnected;
                warn!(target = %target, attempts = tried, error = %error, "Connect attempts exhausted");
                return Err(RetryError::Exhausted {
                    target: target.to_string(),
                    attempts: tried,
                    last_error: error.to_string(),
                });
            }

            let delay = self.delay_for(self.attempt);
            warn!(
                target = %target,
                attempt = tried,
                delay_secs = delay.as_secs_f64(),
                error = %error,
                "Connect attempt failed, retrying"
            );
            self.state = ConnectionState::BackingOff {
                attempt: self.attempt,
                delay,
            };

            if !self.backoff(delay).await {
                self.state = ConnectionState::Disconnected;
                return Err(RetryError::Cancelled(target.to_string()));
            }
            self.attempt += 1;
        }
    }

    /// Sleep for `delay`; returns false if shutdown interrupted the sleep.
    async fn backoff(&mut self, delay: Duration) -> bool {
        match self.shutdown.as_mut() {
            Some(rx) => {
                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = &mut sleep => return true,
                        changed = rx.changed() => {
                            if changed.is_err() {
                                // Sender gone: nobody can request shutdown anymore
                                (&mut sleep).await;
                                return true;
                            }
                            if *rx.borrow() {
                                return false;
                            }
                        }
                    }
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}
