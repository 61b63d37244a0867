//! Cryptographic verification contracts.
//!
//! The lifecycle never parses attestation or assertion payloads itself. It hands the
//! caller's proof and the stored ceremony to a verifier and acts only on the verified
//! result. Implementations must fail closed: anything they cannot positively verify is
//! a [`KeystoneError::VerificationFailed`].

mod mock;

pub use mock::MockVerifier;

use async_trait::async_trait;

use crate::entity::Ceremony;
use crate::error::{KeystoneError, Result};

/// Outcome of a verified registration.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedAttestation {
    pub credential_id: String,
    /// Key material to store and hand back to [`AssertionVerifier::verify_assertion`].
    pub public_key: Vec<u8>,
    pub attestation_type: String,
}

/// Outcome of a verified assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedAssertion {
    /// Signature counter reported by the authenticator.
    pub counter: u32,
}

#[async_trait]
pub trait AttestationVerifier: Send + Sync {
    async fn verify_attestation(
        &self,
        ceremony: &Ceremony,
        proof: &serde_json::Value,
    ) -> Result<VerifiedAttestation>;
}

#[async_trait]
pub trait AssertionVerifier: Send + Sync {
    async fn verify_assertion(
        &self,
        ceremony: &Ceremony,
        proof: &serde_json::Value,
        stored_public_key: &[u8],
    ) -> Result<VerifiedAssertion>;
}

/// Shorthand for rejecting a proof.
pub fn rejected(reason: impl Into<String>) -> KeystoneError {
    KeystoneError::VerificationFailed(reason.into())
}
