//! Session lifecycle for the reader's SiLA2 endpoint.
//!
//! A [`Session`] owns the gRPC channel to one vendor server: it connects
//! with a bounded retry budget, tears the channel down on disconnect, and
//! funnels every instrument command through the lock renewal that the
//! server's locking contract demands. Once connected, command failures
//! are not retried here; whether re-issuing an instrument command is safe
//! is the caller's call.

use std::time::Duration;

use tokio::time::sleep;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tonic::Status;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ConnectionConfig;
use crate::error::{ReaderError, ReaderResult};
use crate::lock::LockRenewal;

/// Retry budget for establishing the transport.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of connection attempts.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_delay: Duration::from_secs(2),
        }
    }
}

/// One client session against one vendor server.
///
/// Created disconnected; [`connect`](Session::connect) establishes the
/// channel, [`disconnect`](Session::disconnect) drops it, and the session
/// can connect again afterwards. The lock identifier is generated once
/// per session and reused across every renewal cycle.
pub struct Session {
    config: ConnectionConfig,
    renewal: LockRenewal,
    channel: Option<Channel>,
}

impl Session {
    /// Creates a disconnected session for the given endpoint.
    pub fn new(config: ConnectionConfig) -> Self {
        let renewal = LockRenewal::new(Uuid::new_v4().to_string(), config.lock_timeout);
        Self {
            config,
            renewal,
            channel: None,
        }
    }

    /// Endpoint settings this session was built with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Lock identifier presented to the server on every renewal.
    pub fn lock_id(&self) -> &str {
        self.renewal.lock_id()
    }

    /// Whether a live channel is currently held.
    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Establishes the channel, retrying up to the policy's budget.
    ///
    /// TLS material is resolved once before the first attempt. Calling
    /// this on an already-connected session replaces the channel; the old
    /// one is dropped (and thereby closed) first.
    pub async fn connect(&mut self, policy: &RetryPolicy) -> ReaderResult<()> {
        let endpoint = self.endpoint()?;
        self.channel = None;

        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match endpoint.connect().await {
                Ok(channel) => {
                    info!(address = %self.config.address(), attempt, "connected to reader server");
                    self.channel = Some(channel);
                    return Ok(());
                }
                Err(source) => {
                    if attempt >= max_attempts {
                        return Err(ReaderError::Connection {
                            address: self.config.address(),
                            attempts: attempt,
                            source,
                        });
                    }
                    debug!(
                        attempt,
                        max_attempts,
                        error = %source,
                        "connection attempt failed, retrying"
                    );
                    sleep(policy.backoff_delay).await;
                }
            }
        }
    }

    /// Drops the channel. No-op when already disconnected.
    pub fn disconnect(&mut self) {
        if self.channel.take().is_some() {
            debug!(address = %self.config.address(), "disconnected from reader server");
        }
    }

    /// Runs one instrument command behind a fresh lock renewal.
    ///
    /// The exclusive receiver is what serializes command execution: no two
    /// renewal cycles for this session can be in flight at once.
    pub(crate) async fn execute<T, F, Fut>(
        &mut self,
        command: &'static str,
        op: F,
    ) -> ReaderResult<T>
    where
        F: FnOnce(Channel, AsciiMetadataValue) -> Fut,
        Fut: std::future::Future<Output = Result<T, Status>>,
    {
        let channel = match &self.channel {
            Some(channel) => channel.clone(),
            None => {
                return Err(ReaderError::Precondition {
                    command,
                    reason: "not connected".to_string(),
                })
            }
        };
        self.renewal
            .with_fresh_lock(channel, self.config.call_timeout, command, op)
            .await
    }

    fn endpoint(&self) -> ReaderResult<Endpoint> {
        let scheme = if self.config.insecure { "http" } else { "https" };
        let uri = format!("{}://{}", scheme, self.config.address());
        let mut endpoint = Endpoint::from_shared(uri)
            .map_err(|e| ReaderError::Configuration(format!("invalid endpoint address: {}", e)))?;

        if !self.config.insecure {
            let mut tls = ClientTlsConfig::new();
            if let Some(path) = &self.config.ca_cert {
                let pem = std::fs::read(path)?;
                tls = tls.ca_certificate(Certificate::from_pem(pem));
            }
            endpoint = endpoint
                .tls_config(tls)
                .map_err(|e| ReaderError::Configuration(format!("TLS setup failed: {}", e)))?;
        }

        Ok(endpoint)
    }
}
