//! Ceremony issuance handlers
//!
//! A ceremony is started with `POST /ceremonies/create` (registration) or
//! `POST /ceremonies/get` (assertion). The challenge is returned in the
//! `x-challenge-id` response header and the verifier options as the JSON body.

use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use keystone_core::{CapacityAccumulator, ChallengeId, InitRequest};

use crate::error::{ApiError, ErrorResponse};
use crate::state::{log_capacity, AppState};
use crate::validation::{
    required_header, CHALLENGE_ID_HEADER, CREDENTIAL_ID_HEADER, SESSION_ID_HEADER,
};
use crate::webauthn::CeremonyOptions;

/// Attach the verifier's challenge and state to an init request.
fn with_options(mut request: InitRequest, options: &mut CeremonyOptions) -> InitRequest {
    if let Some(challenge) = options.challenge.take() {
        request = request.with_challenge(challenge);
    }
    if let Some(state) = options.state.take() {
        request = request.with_verifier_state(state);
    }
    request
}

fn ceremony_created(challenge_id: &ChallengeId, options: serde_json::Value) -> Result<Response, ApiError> {
    let value = HeaderValue::from_str(challenge_id.as_str())
        .map_err(|e| ApiError::internal(format!("Challenge is not a valid header value: {e}")))?;
    Ok((
        StatusCode::CREATED,
        [(HeaderName::from_static(CHALLENGE_ID_HEADER), value)],
        Json(options),
    )
        .into_response())
}

/// POST /ceremonies/create
///
/// Start a registration ceremony bound to the caller's session.
#[utoipa::path(
    post,
    path = "/ceremonies/create",
    tag = "Ceremonies",
    params(
        ("x-session-id" = String, Header, description = "Session the ceremony is bound to")
    ),
    responses(
        (status = 201, description = "Ceremony issued; verifier options in the body",
            headers(("x-challenge-id" = String, description = "Challenge to redeem"))),
        (status = 400, description = "Missing session header", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse)
    )
)]
pub async fn create_ceremony_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session_id = required_header(&headers, SESSION_ID_HEADER)?;
    let mut options = state.verifier.creation_options(&session_id)?;
    let request = with_options(InitRequest::create(session_id), &mut options);

    let capacity = CapacityAccumulator::new();
    let ceremony = state
        .lifecycle
        .init_ceremony(&state.context(), &capacity, request)
        .await?;
    log_capacity("create_ceremony", &capacity);

    tracing::debug!(challenge_id = %ceremony.challenge_id, "Registration challenge");
    tracing::info!("Registration ceremony issued");
    ceremony_created(&ceremony.challenge_id, options.options)
}

/// POST /ceremonies/get
///
/// Start an assertion ceremony for an existing credential.
#[utoipa::path(
    post,
    path = "/ceremonies/get",
    tag = "Ceremonies",
    params(
        ("x-session-id" = String, Header, description = "Session the ceremony is bound to"),
        ("x-credential-id" = String, Header, description = "Credential that will sign the assertion")
    ),
    responses(
        (status = 201, description = "Ceremony issued; verifier options in the body",
            headers(("x-challenge-id" = String, description = "Challenge to redeem"))),
        (status = 400, description = "Missing header or unknown credential", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse)
    )
)]
pub async fn get_ceremony_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session_id = required_header(&headers, SESSION_ID_HEADER)?;
    let credential_id = required_header(&headers, CREDENTIAL_ID_HEADER)?;

    let ctx = state.context();
    let capacity = CapacityAccumulator::new();
    let credential = state
        .lifecycle
        .get_credential(&ctx, &capacity, &credential_id)
        .await?;
    let mut options = state.verifier.request_options(&credential)?;
    let request = with_options(InitRequest::get(session_id, credential_id), &mut options);

    let ceremony = state.lifecycle.init_ceremony(&ctx, &capacity, request).await?;
    log_capacity("get_ceremony", &capacity);

    tracing::debug!(challenge_id = %ceremony.challenge_id, "Assertion challenge");
    tracing::info!(
        credential_id = ceremony.credential_id.as_deref().unwrap_or_default(),
        "Assertion ceremony issued"
    );
    ceremony_created(&ceremony.challenge_id, options.options)
}
