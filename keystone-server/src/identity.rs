//! Identity token issuance
//!
//! Mints HS256 identity tokens for users after a successful registration or login, and
//! validates them on authenticated endpoints.

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use keystone_core::{IdentityFederation, KeystoneError, OpenIdToken};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::config::Config;

/// Claims carried by every identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Keystone user id
    pub sub: String,
    /// Federated identity the user maps to
    pub identity_id: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Developer-authenticated identity provider backed by a shared HS256 secret.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            ttl,
        }
    }

    /// Build from configuration, generating an ephemeral secret when none is set.
    pub fn from_config(config: &Config) -> Result<Self, KeystoneError> {
        let ttl = Duration::from_secs(config.identity_token_ttl_secs);
        match &config.identity_secret {
            Some(secret) => Ok(Self::new(secret.as_bytes(), &config.identity_issuer, ttl)),
            None => {
                let mut secret = [0u8; 32];
                getrandom::fill(&mut secret)
                    .map_err(|e| KeystoneError::Internal(format!("random source failed: {e}")))?;
                tracing::warn!(
                    "IDENTITY_TOKEN_SECRET not set; issued tokens will not survive a restart"
                );
                Ok(Self::new(&secret, &config.identity_issuer, ttl))
            }
        }
    }

    /// Stable federated identity for a user.
    pub fn identity_id_for(&self, user_id: &str) -> String {
        let mut hasher = Sha3_256::new();
        hasher.update(self.issuer.as_bytes());
        hasher.update([0u8]);
        hasher.update(user_id.as_bytes());
        let digest = hasher.finalize();
        format!("{}:{}", self.issuer, hex::encode(&digest[..16]))
    }

    pub fn issue(&self, user_id: &str) -> Result<OpenIdToken, KeystoneError> {
        let now = chrono::Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = IdentityClaims {
            sub: user_id.to_string(),
            identity_id: self.identity_id_for(user_id),
            iss: self.issuer.clone(),
            iat: now,
            exp: now.saturating_add(ttl),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| KeystoneError::Internal(format!("token signing failed: {e}")))?;
        Ok(OpenIdToken {
            identity_id: claims.identity_id,
            token,
            expires_at: claims.exp,
        })
    }

    pub fn validate(&self, token: &str) -> Result<IdentityClaims, KeystoneError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = decode::<IdentityClaims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    KeystoneError::VerificationFailed("identity token has expired".into())
                }
                _ => KeystoneError::VerificationFailed(format!("invalid identity token: {e}")),
            }
        })?;
        Ok(data.claims)
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IdentityFederation for TokenIssuer {
    async fn get_identity_id(&self, token: &str) -> keystone_core::Result<String> {
        Ok(self.validate(token)?.identity_id)
    }

    async fn get_developer_credentials(&self, user_id: &str) -> keystone_core::Result<OpenIdToken> {
        self.issue(user_id)
    }
}
