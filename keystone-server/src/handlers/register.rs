//! Registration and login handlers
//!
//! Both redeem a ceremony issued by the ceremony handlers. The browser response is
//! posted as the JSON body; the challenge and session travel in headers.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use keystone_core::{AssertRequest, CapacityAccumulator, RegisterRequest};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{ApiError, ErrorResponse};
use crate::state::{log_capacity, AppState};
use crate::validation::{
    json_body, required_header, CHALLENGE_ID_HEADER, CREDENTIAL_ID_HEADER, SESSION_ID_HEADER,
};

/// Result of a successful registration
#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterResponse {
    /// Identifier of the new credential
    pub credential_id: String,
    /// User created alongside the credential
    pub user_id: String,
    /// Federated identity of the user
    pub identity_id: String,
    /// Identity token for authenticated endpoints
    pub token: String,
    /// Token expiry (Unix seconds)
    pub expires_at: i64,
}

/// Result of a successful login
#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub credential_id: String,
    pub user_id: String,
    /// Stored signature counter after this assertion
    pub sign_count: u32,
    pub identity_id: String,
    pub token: String,
    pub expires_at: i64,
}

/// POST /register
///
/// Redeem a registration ceremony with the authenticator's attestation.
#[utoipa::path(
    post,
    path = "/register",
    tag = "Passkeys",
    params(
        ("x-challenge-id" = String, Header, description = "Challenge from /ceremonies/create"),
        ("x-session-id" = String, Header, description = "Session the ceremony was bound to")
    ),
    request_body(content_type = "application/json", description = "Registration response from the browser"),
    responses(
        (status = 201, description = "Credential and user created", body = RegisterResponse),
        (status = 400, description = "Unknown, expired or mismatched ceremony", body = ErrorResponse),
        (status = 401, description = "Attestation rejected", body = ErrorResponse),
        (status = 409, description = "Ceremony already redeemed", body = ErrorResponse)
    )
)]
pub async fn register_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let challenge = required_header(&headers, CHALLENGE_ID_HEADER)?;
    let session_id = required_header(&headers, SESSION_ID_HEADER)?;
    let proof = json_body(payload)?;

    let capacity = CapacityAccumulator::new();
    let registration = state
        .lifecycle
        .register(
            &state.context(),
            &capacity,
            RegisterRequest {
                challenge,
                session_id,
                proof,
            },
            state.verifier.as_attestation(),
        )
        .await?;
    log_capacity("register", &capacity);

    let token = state.identity.issue(&registration.user.user_id)?;
    tracing::info!(
        credential_id = %registration.credential.credential_id,
        user_id = %registration.user.user_id,
        "Passkey registered"
    );

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            credential_id: registration.credential.credential_id,
            user_id: registration.user.user_id,
            identity_id: token.identity_id,
            token: token.token,
            expires_at: token.expires_at,
        }),
    ))
}

/// POST /login
///
/// Redeem an assertion ceremony and issue an identity token for the credential's owner.
#[utoipa::path(
    post,
    path = "/login",
    tag = "Passkeys",
    params(
        ("x-challenge-id" = String, Header, description = "Challenge from /ceremonies/get"),
        ("x-session-id" = String, Header, description = "Session the ceremony was bound to"),
        ("x-credential-id" = String, Header, description = "Credential that signed the assertion")
    ),
    request_body(content_type = "application/json", description = "Assertion response from the browser"),
    responses(
        (status = 200, description = "Assertion accepted", body = LoginResponse),
        (status = 400, description = "Unknown, expired or mismatched ceremony", body = ErrorResponse),
        (status = 401, description = "Assertion rejected", body = ErrorResponse),
        (status = 409, description = "Replayed ceremony or possible cloned authenticator", body = ErrorResponse)
    )
)]
pub async fn login_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let challenge = required_header(&headers, CHALLENGE_ID_HEADER)?;
    let session_id = required_header(&headers, SESSION_ID_HEADER)?;
    let credential_id = required_header(&headers, CREDENTIAL_ID_HEADER)?;
    let proof = json_body(payload)?;

    let capacity = CapacityAccumulator::new();
    let result = state
        .lifecycle
        .assert(
            &state.context(),
            &capacity,
            AssertRequest {
                challenge,
                session_id,
                credential_id,
                proof,
            },
            state.verifier.as_assertion(),
        )
        .await;
    log_capacity("login", &capacity);
    let assertion = result?;

    let token = state.identity.issue(&assertion.owner_id)?;
    tracing::info!(
        credential_id = %assertion.credential_id,
        sign_count = assertion.sign_count,
        "Passkey assertion accepted"
    );

    Ok(Json(LoginResponse {
        credential_id: assertion.credential_id,
        user_id: assertion.owner_id,
        sign_count: assertion.sign_count,
        identity_id: token.identity_id,
        token: token.token,
        expires_at: token.expires_at,
    }))
}
