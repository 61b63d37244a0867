//! Identity federation contract.
//!
//! After a successful registration or assertion the caller exchanges the user id for
//! an identity token. The server crate ships a signed-token issuer; deployments may
//! plug in an external identity pool instead.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Token minted for a user, together with the federated identity it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenIdToken {
    pub identity_id: String,
    pub token: String,
    /// Expiry, epoch seconds.
    pub expires_at: i64,
}

#[async_trait]
pub trait IdentityFederation: Send + Sync {
    /// Resolve the identity a previously issued token belongs to.
    async fn get_identity_id(&self, token: &str) -> Result<String>;

    /// Mint a token for `user_id` on behalf of the developer-authenticated backend.
    async fn get_developer_credentials(&self, user_id: &str) -> Result<OpenIdToken>;
}
