//! Credential listing for the authenticated user

use axum::{extract::State, Json};
use keystone_core::{CapacityAccumulator, Credential};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::AuthenticatedUser;
use crate::error::{ApiError, ErrorResponse};
use crate::state::{log_capacity, AppState};

/// Public view of a stored credential. The key material is never returned.
#[derive(Debug, Serialize, ToSchema)]
pub struct CredentialSummary {
    pub credential_id: String,
    pub sign_count: u32,
    /// Set once a counter regression was observed; never cleared
    pub clone_warning: bool,
    pub attestation_type: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<Credential> for CredentialSummary {
    fn from(credential: Credential) -> Self {
        Self {
            credential_id: credential.credential_id,
            sign_count: credential.sign_count,
            clone_warning: credential.clone_warning,
            attestation_type: credential.attestation_type,
            created_at: credential.created_at,
            updated_at: credential.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CredentialListResponse {
    pub user_id: String,
    pub identity_id: String,
    pub credentials: Vec<CredentialSummary>,
}

/// GET /credentials
#[utoipa::path(
    get,
    path = "/credentials",
    tag = "Passkeys",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Credentials owned by the caller", body = CredentialListResponse),
        (status = 401, description = "Missing or invalid identity token", body = ErrorResponse)
    )
)]
pub async fn list_credentials_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<CredentialListResponse>, ApiError> {
    let capacity = CapacityAccumulator::new();
    let credentials = state
        .lifecycle
        .list_credentials(&state.context(), &capacity, &user.user_id)
        .await?;
    log_capacity("list_credentials", &capacity);

    Ok(Json(CredentialListResponse {
        user_id: user.user_id,
        identity_id: user.identity_id,
        credentials: credentials.into_iter().map(CredentialSummary::from).collect(),
    }))
}
