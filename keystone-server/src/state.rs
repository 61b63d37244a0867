//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;

use keystone_core::{
    ensure_tables, require_schema, CapacityAccumulator, Context, Lifecycle, MemoryStore,
    MockVerifier, Store, TableResolver,
};

use crate::config::Config;
use crate::error::ApiError;
use crate::identity::TokenIssuer;
use crate::webauthn::{PasskeyVerifier, WebAuthnConfig, WebAuthnVerifier};

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    /// Ceremony and credential lifecycle over the configured store
    pub lifecycle: Lifecycle,
    /// Verifier issuing options and checking browser responses
    pub verifier: Arc<dyn PasskeyVerifier>,
    /// Identity token issuer
    pub identity: Arc<TokenIssuer>,
    /// Server configuration
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        resolver: Arc<TableResolver>,
        verifier: Arc<dyn PasskeyVerifier>,
        identity: Arc<TokenIssuer>,
        config: &Config,
    ) -> Self {
        let lifecycle = Lifecycle::new(store, resolver).with_ceremony_ttl(config.ceremony_ttl());
        Self {
            lifecycle,
            verifier,
            identity,
            config: Arc::new(config.clone()),
        }
    }

    /// In-memory store and naming-convention tables, ready to serve.
    pub async fn in_memory(config: &Config) -> Result<Self, ApiError> {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let resolver = Arc::new(TableResolver::with_naming(
            &config.table_prefix,
            &config.environment,
        ));
        Self::bootstrap(store, resolver, config).await
    }

    /// Create or validate tables, then build the verifier and token issuer.
    pub async fn bootstrap(
        store: Arc<dyn Store>,
        resolver: Arc<TableResolver>,
        config: &Config,
    ) -> Result<Self, ApiError> {
        let ctx = Context::with_timeout(config.request_timeout());
        ensure_tables(&ctx, store.as_ref(), &resolver).await?;
        if config.verify_schema {
            require_schema(&ctx, store.as_ref(), &resolver).await?;
            tracing::info!("Deployed tables match entity indexes");
        }

        let verifier: Arc<dyn PasskeyVerifier> = if config.allow_mock_verifier {
            tracing::warn!("Using the mock verifier; never enable ALLOW_MOCK_VERIFIER in production");
            Arc::new(MockVerifier::default())
        } else {
            let webauthn = WebAuthnConfig::from_config(config)
                .map_err(|e| ApiError::internal(format!("Failed to create WebAuthn config: {e}")))?;
            Arc::new(WebAuthnVerifier::new(webauthn))
        };
        let identity = Arc::new(TokenIssuer::from_config(config)?);

        Ok(Self::new(store, resolver, verifier, identity, config))
    }

    /// Fresh per-request deadline.
    pub fn context(&self) -> Context {
        Context::with_timeout(self.config.request_timeout())
    }
}

/// Per-request consumed capacity, logged once the handler is done.
pub fn log_capacity(operation: &str, capacity: &CapacityAccumulator) {
    let (read, write) = capacity.totals();
    tracing::debug!(
        operation = operation,
        read_units = read,
        write_units = write,
        "Consumed capacity"
    );
}
