//! Per-request execution context.
//!
//! Carries the caller's deadline down to every store call. A call that outlives the
//! deadline is abandoned (its future is dropped) and reported as
//! [`StoreError::Cancelled`]; the engine never retries it.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::store::StoreError;

#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    deadline: Option<Instant>,
}

impl Context {
    /// A context without a deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail fast when the deadline has already passed.
    pub fn check(&self, op: &str) -> Result<(), StoreError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(StoreError::Cancelled(format!(
                "deadline exceeded before {op}"
            ))),
            _ => Ok(()),
        }
    }

    /// Run a store call bounded by the deadline.
    pub async fn run<T, F>(&self, op: &str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        self.check(op)?;
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| {
                    tracing::warn!(op = op, "Store call abandoned at deadline");
                    StoreError::Cancelled(format!("deadline exceeded during {op}"))
                })?,
            None => fut.await,
        }
    }
}
