//! Mock verifier for testing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use super::{
    rejected, AssertionVerifier, AttestationVerifier, VerifiedAssertion, VerifiedAttestation,
};
use crate::entity::Ceremony;
use crate::error::Result;

/// Deterministic verifier for tests and local development.
/// WARNING: Do not use in production - anyone who knows the seed can forge proofs!
///
/// Public keys are `SHA3(seed || credential_id)`; an assertion signature is
/// `SHA3(public_key || challenge || counter)`.
#[derive(Debug, Clone)]
pub struct MockVerifier {
    seed: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct AttestationProof {
    challenge: String,
    credential_id: String,
    #[serde(default = "default_attestation_type")]
    attestation_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionProof {
    challenge: String,
    counter: u32,
    signature: String,
}

fn default_attestation_type() -> String {
    "none".to_string()
}

impl MockVerifier {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create a mock with default seed for simple tests.
    pub fn default_test() -> Self {
        Self::new(0x6B65_7973_746F_6E65)
    }

    pub fn public_key(&self, credential_id: &str) -> Vec<u8> {
        let mut hasher = Sha3_256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(credential_id.as_bytes());
        hasher.finalize().to_vec()
    }

    fn signature(public_key: &[u8], challenge: &str, counter: u32) -> String {
        let mut hasher = Sha3_256::new();
        hasher.update(public_key);
        hasher.update(challenge.as_bytes());
        hasher.update(counter.to_be_bytes());
        hex::encode(hasher.finalize())
    }

    /// Registration proof an authenticator would send for `challenge`.
    pub fn attestation(&self, challenge: &str, credential_id: &str) -> serde_json::Value {
        serde_json::json!({
            "challenge": challenge,
            "credential_id": credential_id,
            "attestation_type": "none",
        })
    }

    /// Assertion proof signed with `credential_id`'s key.
    pub fn assertion(&self, challenge: &str, credential_id: &str, counter: u32) -> serde_json::Value {
        let signature = Self::signature(&self.public_key(credential_id), challenge, counter);
        serde_json::json!({
            "challenge": challenge,
            "counter": counter,
            "signature": signature,
        })
    }
}

impl Default for MockVerifier {
    fn default() -> Self {
        Self::default_test()
    }
}

#[async_trait]
impl AttestationVerifier for MockVerifier {
    async fn verify_attestation(
        &self,
        ceremony: &Ceremony,
        proof: &serde_json::Value,
    ) -> Result<VerifiedAttestation> {
        let proof: AttestationProof = serde_json::from_value(proof.clone())
            .map_err(|e| rejected(format!("malformed attestation: {e}")))?;
        if proof.challenge != ceremony.challenge_id.as_str() {
            return Err(rejected("attestation signs a different challenge"));
        }
        if proof.credential_id.is_empty() {
            return Err(rejected("attestation has an empty credential id"));
        }
        Ok(VerifiedAttestation {
            public_key: self.public_key(&proof.credential_id),
            credential_id: proof.credential_id,
            attestation_type: proof.attestation_type,
        })
    }
}

#[async_trait]
impl AssertionVerifier for MockVerifier {
    async fn verify_assertion(
        &self,
        ceremony: &Ceremony,
        proof: &serde_json::Value,
        stored_public_key: &[u8],
    ) -> Result<VerifiedAssertion> {
        let proof: AssertionProof = serde_json::from_value(proof.clone())
            .map_err(|e| rejected(format!("malformed assertion: {e}")))?;
        if proof.challenge != ceremony.challenge_id.as_str() {
            return Err(rejected("assertion signs a different challenge"));
        }
        let expected = Self::signature(stored_public_key, &proof.challenge, proof.counter);
        if expected != proof.signature {
            return Err(rejected("assertion signature does not verify"));
        }
        Ok(VerifiedAssertion {
            counter: proof.counter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{CeremonyType, ChallengeId};
    use crate::error::KeystoneError;

    fn ceremony() -> Ceremony {
        Ceremony::new(
            ChallengeId::generate().unwrap(),
            "s1",
            CeremonyType::Get,
            0,
            60,
        )
    }

    #[tokio::test]
    async fn test_round_trip() {
        let verifier = MockVerifier::default();
        let ceremony = ceremony();
        let challenge = ceremony.challenge_id.as_str();

        let attested = verifier
            .verify_attestation(&ceremony, &verifier.attestation(challenge, "cred-1"))
            .await
            .unwrap();
        assert_eq!(attested.credential_id, "cred-1");

        let asserted = verifier
            .verify_assertion(
                &ceremony,
                &verifier.assertion(challenge, "cred-1", 3),
                &attested.public_key,
            )
            .await
            .unwrap();
        assert_eq!(asserted.counter, 3);
    }

    #[tokio::test]
    async fn test_fails_closed() {
        let verifier = MockVerifier::default();
        let ceremony = ceremony();
        let challenge = ceremony.challenge_id.as_str().to_string();

        let wrong_challenge = verifier.attestation("other", "cred-1");
        assert!(matches!(
            verifier.verify_attestation(&ceremony, &wrong_challenge).await,
            Err(KeystoneError::VerificationFailed(_))
        ));

        let other_key = MockVerifier::new(1).public_key("cred-1");
        let proof = verifier.assertion(&challenge, "cred-1", 1);
        assert!(verifier
            .verify_assertion(&ceremony, &proof, &other_key)
            .await
            .is_err());

        assert!(verifier
            .verify_assertion(&ceremony, &serde_json::json!({}), &other_key)
            .await
            .is_err());
    }
}
