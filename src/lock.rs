//! Lock renewal for the server's consume-per-command locking contract.
//!
//! The embedded SiLA2 server invalidates its lock after every command:
//! whether the lock is still held once a command returns is unspecified.
//! Every command therefore runs one unlock+lock cycle immediately before
//! it, never batched and never cached across commands. The renewal lives
//! here as one policy object instead of unlock/lock pairs scattered
//! through each command.

use std::future::Future;
use std::time::Duration;

use tonic::metadata::AsciiMetadataValue;
use tonic::transport::Channel;
use tonic::{Code, Status};
use tracing::{debug, trace};

use crate::error::{ReaderError, ReaderResult};
use crate::grpc::{LockControllerClient, LockServerRequest, UnlockServerRequest};

/// Renewal policy bound to one session's lock identifier.
///
/// Reachable only through `&mut Session`, so two renewal cycles for the
/// same identifier can never be in flight at once.
#[derive(Debug, Clone)]
pub(crate) struct LockRenewal {
    lock_id: String,
    timeout: Duration,
}

impl LockRenewal {
    pub fn new(lock_id: String, timeout: Duration) -> Self {
        Self { lock_id, timeout }
    }

    pub fn lock_id(&self) -> &str {
        &self.lock_id
    }

    /// Runs one unlock+lock cycle, then `op` with the fresh lease token.
    ///
    /// An unlock refusal of kind `FailedPrecondition` means the previous
    /// command already consumed the lock and is expected steady state; any
    /// other unlock failure aborts before the lock call. Each step is
    /// bounded by `deadline`.
    pub async fn with_fresh_lock<T, F, Fut>(
        &self,
        channel: Channel,
        deadline: Duration,
        command: &'static str,
        op: F,
    ) -> ReaderResult<T>
    where
        F: FnOnce(Channel, AsciiMetadataValue) -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        let mut locks = LockControllerClient::new(channel.clone());

        let unlock = bounded(
            deadline,
            command,
            locks.unlock_server(UnlockServerRequest {
                lock_identifier: self.lock_id.clone(),
            }),
        )
        .await?;
        match unlock {
            Ok(_) => trace!(lock_id = %self.lock_id, "released stale lock"),
            Err(status) if status.code() == Code::FailedPrecondition => {
                trace!(lock_id = %self.lock_id, "lock was not held");
            }
            Err(status) => return Err(ReaderError::Lock { phase: "unlock", status }),
        }

        let lease = bounded(
            deadline,
            command,
            locks.lock_server(LockServerRequest {
                lock_identifier: self.lock_id.clone(),
                timeout_seconds: self.timeout.as_secs() as u32,
            }),
        )
        .await?
        .map_err(|status| ReaderError::Lock {
            phase: "acquire",
            status,
        })?
        .into_inner()
        .lease_token;

        let token = AsciiMetadataValue::try_from(lease.as_str()).map_err(|_| ReaderError::Lock {
            phase: "lease",
            status: Status::internal(format!("server issued a non-ASCII lease token: {:?}", lease)),
        })?;

        debug!(lock_id = %self.lock_id, command, "lock renewed");
        bounded(deadline, command, op(channel, token))
            .await?
            .map_err(|status| ReaderError::Command { command, status })
    }
}

/// Applies the per-call deadline to one RPC future.
async fn bounded<T>(
    deadline: Duration,
    command: &'static str,
    fut: impl Future<Output = T>,
) -> ReaderResult<T> {
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| ReaderError::Timeout { command, deadline })
}
