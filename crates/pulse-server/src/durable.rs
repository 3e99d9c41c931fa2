//! Async I/O boundary in front of [`Storage`].
//!
//! Storage is synchronous. Every call made from request handling goes through
//! here: it runs on Tokio's blocking pool under a deadline, so a hung store
//! surfaces as `StorageUnavailable` instead of stalling the request.
//!
//! Transient failures (I/O, timeout) are retried with exponential backoff,
//! but only for reads and idempotent writes. Everything else is attempted
//! once. Retries are the only place in the system where a failed operation is
//! repeated.
//!
//! A timed-out blocking call keeps running after its deadline. Abandoning it
//! is harmless for reads and idempotent writes. A single-shot write (a
//! compare-and-swap, a fresh insert) may still commit, so once its deadline
//! passes it is awaited to completion and the caller gets the real outcome.

use std::time::Duration;

use pulse_core::{AuthError, env::Environment};

use crate::{
    config::RetryPolicy,
    storage::{Storage, StorageError},
};

/// Why a single attempt failed.
enum AttemptError {
    Storage(StorageError),
    /// The blocking task panicked or was cancelled
    Task(String),
}

/// What happens to a blocking call still running at its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deadline {
    /// Report a timeout and let the call finish unobserved
    Abandon,
    /// Wait for the call; its outcome decides the result
    Settle,
}

/// Deadline-bound, retrying handle to the durable store.
///
/// Clone is cheap; clones share the underlying storage.
#[derive(Clone)]
pub struct DurableStore<S: Storage, E: Environment> {
    storage: S,
    env: E,
    timeout: Duration,
    retry: RetryPolicy,
}

impl<S: Storage, E: Environment> DurableStore<S, E> {
    /// Wrap `storage`.
    pub fn new(storage: S, env: E, timeout: Duration, retry: RetryPolicy) -> Self {
        Self { storage, env, timeout, retry }
    }

    /// The wrapped storage, for callers that are already off the request path.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Read with retry on transient failure.
    pub async fn read<T, F>(&self, op: F) -> Result<T, AuthError>
    where
        T: Send + 'static,
        F: Fn(&S) -> Result<T, StorageError> + Clone + Send + 'static,
    {
        self.run(op, self.retry.max_attempts, Deadline::Abandon).await
    }

    /// Write that may be repeated safely (upsert, delete, touch).
    pub async fn write_idempotent<T, F>(&self, op: F) -> Result<T, AuthError>
    where
        T: Send + 'static,
        F: Fn(&S) -> Result<T, StorageError> + Clone + Send + 'static,
    {
        self.run(op, self.retry.max_attempts, Deadline::Abandon).await
    }

    /// Write attempted exactly once (compare-and-swap, inserts of fresh rows).
    ///
    /// Never reports `StorageUnavailable` for a call that went on to commit:
    /// past the deadline the call is awaited until it settles.
    pub async fn write<T, F>(&self, op: F) -> Result<T, AuthError>
    where
        T: Send + 'static,
        F: Fn(&S) -> Result<T, StorageError> + Clone + Send + 'static,
    {
        self.run(op, 1, Deadline::Settle).await
    }

    async fn run<T, F>(&self, op: F, max_attempts: u32, deadline: Deadline) -> Result<T, AuthError>
    where
        T: Send + 'static,
        F: Fn(&S) -> Result<T, StorageError> + Clone + Send + 'static,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.attempt(op.clone(), deadline).await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Task(reason)) => {
                    tracing::error!(%reason, "storage task failed");
                    return Err(AuthError::Internal(reason));
                },
                Err(AttemptError::Storage(err)) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay(attempt - 1);
                    tracing::warn!(attempt, ?delay, error = %err, "transient storage failure, retrying");
                    self.env.sleep(delay).await;
                },
                Err(AttemptError::Storage(err)) => {
                    if err.is_transient() {
                        tracing::error!(attempt, error = %err, "storage unavailable");
                    }
                    return Err(err.into());
                },
            }
        }
    }

    async fn attempt<T, F>(&self, op: F, deadline: Deadline) -> Result<T, AttemptError>
    where
        T: Send + 'static,
        F: Fn(&S) -> Result<T, StorageError> + Send + 'static,
    {
        let storage = self.storage.clone();
        let mut task = tokio::task::spawn_blocking(move || op(&storage));

        let timed = tokio::time::timeout(self.timeout, &mut task).await;
        let joined = match timed {
            Ok(joined) => joined,
            Err(_elapsed) if deadline == Deadline::Settle => {
                tracing::error!(timeout = ?self.timeout, "single-shot write past deadline, awaiting outcome");
                task.await
            },
            Err(_elapsed) => return Err(AttemptError::Storage(StorageError::Timeout(self.timeout))),
        };

        match joined {
            Ok(result) => result.map_err(AttemptError::Storage),
            Err(join) => Err(AttemptError::Task(join.to_string())),
        }
    }
}
