//! webauthn-rs backed verifier
//!
//! Registration and authentication state produced by webauthn-rs is stored on the
//! ceremony itself, so any invocation can finish a ceremony another one started.
//! The stored "public key" of a credential is the serialized [`Passkey`].

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use keystone_core::verifier::rejected;
use keystone_core::{
    AssertionVerifier, AttestationVerifier, Ceremony, ChallengeId, Credential, KeystoneError,
    VerifiedAssertion, VerifiedAttestation,
};
use serde::de::DeserializeOwned;
use webauthn_rs::prelude::*;

use super::{CeremonyOptions, PasskeyVerifier, WebAuthnConfig};

/// Attestation conveyance is `none` for passkeys.
const PASSKEY_ATTESTATION: &str = "none";

#[derive(Debug)]
pub struct WebAuthnVerifier {
    config: WebAuthnConfig,
}

impl WebAuthnVerifier {
    pub fn new(config: WebAuthnConfig) -> Self {
        Self { config }
    }

    fn webauthn(&self) -> &Webauthn {
        self.config.webauthn()
    }
}

fn internal(context: &str, err: impl std::fmt::Debug) -> KeystoneError {
    KeystoneError::Internal(format!("{context}: {err:?}"))
}

fn challenge_of(bytes: &[u8]) -> Result<ChallengeId, KeystoneError> {
    ChallengeId::from_bytes(bytes).map_err(|e| internal("unexpected webauthn challenge", e))
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<serde_json::Value, KeystoneError> {
    serde_json::to_value(value).map_err(|e| internal(what, e))
}

/// Verifier state saved when the ceremony was issued.
fn ceremony_state<T: DeserializeOwned>(ceremony: &Ceremony) -> Result<T, KeystoneError> {
    let state = ceremony
        .verifier_state
        .as_ref()
        .ok_or_else(|| rejected("ceremony carries no verifier state"))?;
    serde_json::from_value(state.clone())
        .map_err(|e| rejected(format!("ceremony state does not match this flow: {e}")))
}

fn stored_passkey(public_key: &[u8]) -> Result<Passkey, KeystoneError> {
    serde_json::from_slice(public_key).map_err(|e| internal("stored key is not a passkey", e))
}

impl PasskeyVerifier for WebAuthnVerifier {
    fn name(&self) -> &'static str {
        "webauthn"
    }

    fn creation_options(&self, session_id: &str) -> Result<CeremonyOptions, KeystoneError> {
        let (ccr, state) = self
            .webauthn()
            .start_passkey_registration(Uuid::new_v4(), "keystone-user", "Keystone user", None)
            .map_err(|e| internal("failed to start registration", e))?;
        let challenge = challenge_of(ccr.public_key.challenge.as_ref())?;
        tracing::debug!(session_id = %session_id, "Passkey registration options issued");

        Ok(CeremonyOptions {
            challenge: Some(challenge),
            options: to_json(&ccr, "creation options")?,
            state: Some(to_json(&state, "registration state")?),
        })
    }

    fn request_options(&self, credential: &Credential) -> Result<CeremonyOptions, KeystoneError> {
        let passkey = stored_passkey(&credential.public_key)?;
        let (rcr, state) = self
            .webauthn()
            .start_passkey_authentication(&[passkey])
            .map_err(|e| internal("failed to start authentication", e))?;
        let challenge = challenge_of(rcr.public_key.challenge.as_ref())?;

        Ok(CeremonyOptions {
            challenge: Some(challenge),
            options: to_json(&rcr, "request options")?,
            state: Some(to_json(&state, "authentication state")?),
        })
    }

    fn as_attestation(&self) -> &dyn AttestationVerifier {
        self
    }

    fn as_assertion(&self) -> &dyn AssertionVerifier {
        self
    }
}

#[async_trait]
impl AttestationVerifier for WebAuthnVerifier {
    async fn verify_attestation(
        &self,
        ceremony: &Ceremony,
        proof: &serde_json::Value,
    ) -> keystone_core::Result<VerifiedAttestation> {
        let state: PasskeyRegistration = ceremony_state(ceremony)?;
        let response: RegisterPublicKeyCredential = serde_json::from_value(proof.clone())
            .map_err(|e| rejected(format!("malformed registration response: {e}")))?;

        let passkey = self
            .webauthn()
            .finish_passkey_registration(&response, &state)
            .map_err(|e| rejected(format!("registration rejected: {e:?}")))?;

        let credential_id: &[u8] = passkey.cred_id().as_ref();
        Ok(VerifiedAttestation {
            credential_id: URL_SAFE_NO_PAD.encode(credential_id),
            public_key: serde_json::to_vec(&passkey).map_err(|e| internal("passkey encoding", e))?,
            attestation_type: PASSKEY_ATTESTATION.to_string(),
        })
    }
}

#[async_trait]
impl AssertionVerifier for WebAuthnVerifier {
    async fn verify_assertion(
        &self,
        ceremony: &Ceremony,
        proof: &serde_json::Value,
        stored_public_key: &[u8],
    ) -> keystone_core::Result<VerifiedAssertion> {
        let state: PasskeyAuthentication = ceremony_state(ceremony)?;
        let response: PublicKeyCredential = serde_json::from_value(proof.clone())
            .map_err(|e| rejected(format!("malformed assertion response: {e}")))?;

        let result = self
            .webauthn()
            .finish_passkey_authentication(&response, &state)
            .map_err(|e| rejected(format!("assertion rejected: {e:?}")))?;

        let stored = stored_passkey(stored_public_key)?;
        let expected: &[u8] = stored.cred_id().as_ref();
        let used: &[u8] = result.cred_id().as_ref();
        if expected != used {
            return Err(rejected("assertion was made with a different credential"));
        }

        Ok(VerifiedAssertion {
            counter: result.counter(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use keystone_core::entity::CeremonyType;

    fn verifier() -> WebAuthnVerifier {
        WebAuthnVerifier::new(WebAuthnConfig::from_config(&Config::default()).unwrap())
    }

    #[test]
    fn test_creation_options_commit_to_challenge() {
        let options = verifier().creation_options("s1").unwrap();
        let challenge = options.challenge.unwrap();
        assert_eq!(
            options.options["publicKey"]["challenge"].as_str(),
            Some(challenge.as_str())
        );
        assert!(serde_json::from_value::<PasskeyRegistration>(options.state.unwrap()).is_ok());
    }

    #[test]
    fn test_request_options_need_a_passkey() {
        let credential = Credential::new("cred-1", "user-1", b"raw key".to_vec(), "none", 0);
        assert!(matches!(
            verifier().request_options(&credential),
            Err(KeystoneError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_fails_closed() {
        let verifier = verifier();
        let options = verifier.creation_options("s1").unwrap();
        let ceremony = Ceremony::new(
            options.challenge.unwrap(),
            "s1",
            CeremonyType::Create,
            0,
            300,
        );

        // No state stored on the ceremony.
        let err = verifier
            .verify_attestation(&ceremony, &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, KeystoneError::VerificationFailed(_)));

        // State present but the browser response is garbage.
        let ceremony = ceremony.with_verifier_state(options.state.unwrap());
        let err = verifier
            .verify_attestation(&ceremony, &serde_json::json!({ "id": "x" }))
            .await
            .unwrap_err();
        assert!(matches!(err, KeystoneError::VerificationFailed(_)));

        // Registration state cannot finish an authentication.
        let err = verifier
            .verify_assertion(&ceremony, &serde_json::json!({}), b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, KeystoneError::VerificationFailed(_)));
    }
}
