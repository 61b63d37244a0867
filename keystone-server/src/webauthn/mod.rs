//! WebAuthn verification
//!
//! Binds keystone ceremonies to a verifier. A verifier issues the browser-facing options
//! for a new ceremony (and the opaque state it needs later), then checks the browser's
//! response when the ceremony is redeemed.

mod config;
mod verifier;

pub use config::{ConfigError, WebAuthnConfig};
pub use verifier::WebAuthnVerifier;

use keystone_core::{
    AssertionVerifier, AttestationVerifier, ChallengeId, Credential, KeystoneError, MockVerifier,
};

/// What a verifier contributes to a new ceremony.
#[derive(Debug, Clone)]
pub struct CeremonyOptions {
    /// Challenge the verifier already committed to; a fresh one is generated if `None`.
    pub challenge: Option<ChallengeId>,
    /// Options returned to the browser as-is.
    pub options: serde_json::Value,
    /// Opaque state stored on the ceremony until redemption.
    pub state: Option<serde_json::Value>,
}

pub trait PasskeyVerifier: AttestationVerifier + AssertionVerifier {
    /// Short name for logs and health output.
    fn name(&self) -> &'static str;

    fn creation_options(&self, session_id: &str) -> Result<CeremonyOptions, KeystoneError>;

    fn request_options(&self, credential: &Credential) -> Result<CeremonyOptions, KeystoneError>;

    fn as_attestation(&self) -> &dyn AttestationVerifier;

    fn as_assertion(&self) -> &dyn AssertionVerifier;
}

/// Deterministic verifier for tests and local development.
impl PasskeyVerifier for MockVerifier {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn creation_options(&self, session_id: &str) -> Result<CeremonyOptions, KeystoneError> {
        Ok(CeremonyOptions {
            challenge: None,
            options: serde_json::json!({ "mock": true, "session_id": session_id }),
            state: None,
        })
    }

    fn request_options(&self, credential: &Credential) -> Result<CeremonyOptions, KeystoneError> {
        Ok(CeremonyOptions {
            challenge: None,
            options: serde_json::json!({
                "mock": true,
                "allow_credentials": [credential.credential_id],
            }),
            state: None,
        })
    }

    fn as_attestation(&self) -> &dyn AttestationVerifier {
        self
    }

    fn as_assertion(&self) -> &dyn AssertionVerifier {
        self
    }
}
