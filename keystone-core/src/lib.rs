//! Keystone Core - Passkey relying-party engine
//!
//! This crate provides the ceremony lifecycle of a WebAuthn relying party and the
//! optimistic-concurrency storage engine behind it.
//!
//! # Features
//!
//! - Single-use, session-bound ceremonies with application-checked expiry
//! - Atomic multi-table transactions with read-verify preconditions
//! - Monotonic signature counters with clone detection
//! - Typed update expressions rendered for native stores or evaluated in-process
//! - In-memory and PostgreSQL (`postgres` feature) stores
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use keystone_core::{
//!     ensure_tables, AssertRequest, CapacityAccumulator, Context, InitRequest, Lifecycle,
//!     MemoryStore, MockVerifier, RegisterRequest, TableResolver,
//! };
//!
//! # async fn example() -> keystone_core::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let resolver = Arc::new(TableResolver::with_naming("keystone", "dev"));
//! let ctx = Context::background();
//! ensure_tables(&ctx, store.as_ref(), &resolver).await?;
//!
//! let lifecycle = Lifecycle::new(store, resolver);
//! let capacity = CapacityAccumulator::new();
//! let verifier = MockVerifier::default_test();
//!
//! // Register
//! let ceremony = lifecycle.init_ceremony(&ctx, &capacity, InitRequest::create("s1")).await?;
//! let challenge = ceremony.challenge_id.to_string();
//! let registration = lifecycle
//!     .register(
//!         &ctx,
//!         &capacity,
//!         RegisterRequest {
//!             proof: verifier.attestation(&challenge, "cred-1"),
//!             challenge,
//!             session_id: "s1".into(),
//!         },
//!         &verifier,
//!     )
//!     .await?;
//!
//! // Authenticate
//! let ceremony = lifecycle
//!     .init_ceremony(&ctx, &capacity, InitRequest::get("s1", "cred-1"))
//!     .await?;
//! let challenge = ceremony.challenge_id.to_string();
//! let assertion = lifecycle
//!     .assert(
//!         &ctx,
//!         &capacity,
//!         AssertRequest {
//!             proof: verifier.assertion(&challenge, "cred-1", 1),
//!             challenge,
//!             session_id: "s1".into(),
//!             credential_id: "cred-1".into(),
//!         },
//!         &verifier,
//!     )
//!     .await?;
//! assert_eq!(assertion.owner_id, registration.user.user_id);
//! # Ok(())
//! # }
//! ```

pub mod attr;
pub mod capacity;
pub mod context;
pub mod entity;
pub mod error;
pub mod expr;
pub mod identity;
pub mod index;
pub mod lifecycle;
pub mod marker;
pub mod precondition;
pub mod resolver;
pub mod schema;
pub mod store;
pub mod transaction;
pub mod verifier;

// Re-export main types for convenience
pub use attr::{AttributeValue, Item};
pub use capacity::{CapacityAccumulator, ConsumedCapacity};
pub use context::Context;
pub use entity::{Ceremony, CeremonyType, ChallengeId, Credential, Indexable, User};
pub use error::{KeystoneError, Result};
pub use identity::{IdentityFederation, OpenIdToken};
pub use lifecycle::{
    AssertRequest, Assertion, InitRequest, Lifecycle, RegisterRequest, Registration,
};
pub use resolver::{LogicalTable, TableResolver};
pub use schema::{ensure_tables, require_schema, verify_schema};
pub use store::{MemoryStore, Store, StoreError};
pub use transaction::{combine, execute_all, ReadTransaction, Transaction, TransactionOutcome};
pub use verifier::{
    AssertionVerifier, AttestationVerifier, MockVerifier, VerifiedAssertion, VerifiedAttestation,
};

#[cfg(feature = "postgres")]
pub use store::PostgresStore;
