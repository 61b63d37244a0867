//! Ceremony and credential lifecycle.
//!
//! [`Lifecycle`] is the stateless service behind every invocation: it owns handles to
//! the store and the table resolver, and every operation takes the caller's
//! [`Context`]. All cross-invocation coordination happens through conditional writes
//! and preconditions; nothing here holds state between calls. Consumed capacity is
//! recorded into the per-request accumulator each operation is handed.

mod ceremony;
mod credential;

pub use ceremony::InitRequest;
pub use credential::{AssertRequest, Assertion, RegisterRequest, Registration};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::error::{KeystoneError, Result};
use crate::resolver::TableResolver;
use crate::store::Store;

/// Default ceremony lifetime.
pub const DEFAULT_CEREMONY_TTL: Duration = Duration::from_secs(300);

/// Source of "now" in epoch seconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<dyn Store>,
    resolver: Arc<TableResolver>,
    ceremony_ttl: Duration,
    clock: Clock,
}

impl Lifecycle {
    pub fn new(store: Arc<dyn Store>, resolver: Arc<TableResolver>) -> Self {
        Self {
            store,
            resolver,
            ceremony_ttl: DEFAULT_CEREMONY_TTL,
            clock: Arc::new(|| chrono::Utc::now().timestamp()),
        }
    }

    pub fn with_ceremony_ttl(mut self, ttl: Duration) -> Self {
        self.ceremony_ttl = ttl;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn resolver(&self) -> &TableResolver {
        &self.resolver
    }

    pub fn ceremony_ttl(&self) -> Duration {
        self.ceremony_ttl
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("backend", &self.store.backend())
            .field("resolver", &self.resolver)
            .field("ceremony_ttl", &self.ceremony_ttl)
            .finish()
    }
}

/// Bound a verifier call by the context deadline.
async fn bounded<T, F>(ctx: &Context, op: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match ctx.deadline() {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.map_err(|_| {
            tracing::warn!(op = op, "Verifier call abandoned at deadline");
            KeystoneError::Cancelled(format!("deadline exceeded during {op}"))
        })?,
        None => fut.await,
    }
}

fn require_non_empty(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(KeystoneError::invalid_input(format!("{name} is required")));
    }
    Ok(())
}
