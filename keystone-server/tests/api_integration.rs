//! API integration tests for keystone-server.
//!
//! These tests drive full ceremonies through the REST endpoints with the in-memory
//! store and the deterministic mock verifier.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use keystone_core::MockVerifier;
use keystone_server::create_router;
use serde_json::Value;
use tower::ServiceExt;

const SESSION: &str = "session-1";
const CREDENTIAL: &str = "cred-1";

/// Build the test router using the library's create_router function
async fn create_test_app() -> Router {
    create_router().await.unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn challenge_header(response: &Response) -> String {
    response
        .headers()
        .get("x-challenge-id")
        .expect("x-challenge-id header")
        .to_str()
        .unwrap()
        .to_string()
}

fn post(uri: &str, headers: &[(&str, &str)], body: Option<&Value>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn start_registration(app: &Router) -> String {
    let response = send(app, post("/ceremonies/create", &[("x-session-id", SESSION)], None)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    challenge_header(&response)
}

async fn register(app: &Router, challenge: &str) -> Response {
    let proof = MockVerifier::default_test().attestation(challenge, CREDENTIAL);
    send(
        app,
        post(
            "/register",
            &[("x-challenge-id", challenge), ("x-session-id", SESSION)],
            Some(&proof),
        ),
    )
    .await
}

async fn start_login(app: &Router) -> String {
    let response = send(
        app,
        post(
            "/ceremonies/get",
            &[("x-session-id", SESSION), ("x-credential-id", CREDENTIAL)],
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    challenge_header(&response)
}

async fn login(app: &Router, challenge: &str, counter: u32) -> Response {
    let proof = MockVerifier::default_test().assertion(challenge, CREDENTIAL, counter);
    send(
        app,
        post(
            "/login",
            &[
                ("x-challenge-id", challenge),
                ("x-session-id", SESSION),
                ("x-credential-id", CREDENTIAL),
            ],
            Some(&proof),
        ),
    )
    .await
}

/// Register CREDENTIAL and return the identity token.
async fn registered_app() -> (Router, String) {
    let app = create_test_app().await;
    let challenge = start_registration(&app).await;
    let response = register(&app, &challenge).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    (app, json["token"].as_str().unwrap().to_string())
}

// ============================================================================
// Health & Readiness Tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app().await;
    let response = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "keystone-server");
    assert_eq!(json["backend"], "memory");
    assert_eq!(json["verifier"], "mock");
}

#[tokio::test]
async fn test_ready_endpoint() {
    let app = create_test_app().await;
    let response = send(&app, Request::get("/ready").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ready"], true);
}

#[tokio::test]
async fn test_openapi_document_served() {
    let app = create_test_app().await;
    let response = send(
        &app,
        Request::get("/api-docs/openapi.json").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["paths"]["/register"].is_object());
}

// ============================================================================
// Request Validation Tests
// ============================================================================

#[tokio::test]
async fn test_missing_session_header_rejected() {
    let app = create_test_app().await;
    let response = send(&app, post("/ceremonies/create", &[], None)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_empty_challenge_header_rejected() {
    let app = create_test_app().await;
    let response = send(
        &app,
        post(
            "/register",
            &[("x-challenge-id", ""), ("x-session-id", SESSION)],
            Some(&serde_json::json!({})),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_malformed_body_rejected() {
    let app = create_test_app().await;
    let challenge = start_registration(&app).await;
    let request = Request::post("/register")
        .header("x-challenge-id", challenge.as_str())
        .header("x-session-id", SESSION)
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_INPUT");
}

// ============================================================================
// Ceremony Flow Tests
// ============================================================================

#[tokio::test]
async fn test_register_then_login() {
    let app = create_test_app().await;

    let challenge = start_registration(&app).await;
    let response = register(&app, &challenge).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let registered = body_json(response).await;
    assert_eq!(registered["credential_id"], CREDENTIAL);
    let user_id = registered["user_id"].as_str().unwrap().to_string();
    assert!(registered["identity_id"].as_str().unwrap().starts_with("keystone:"));

    let challenge = start_login(&app).await;
    let response = login(&app, &challenge, 1).await;
    assert_eq!(response.status(), StatusCode::OK);
    let logged_in = body_json(response).await;
    assert_eq!(logged_in["user_id"], user_id.as_str());
    assert_eq!(logged_in["sign_count"], 1);
    assert_eq!(logged_in["identity_id"], registered["identity_id"]);
}

#[tokio::test]
async fn test_forged_challenge_not_found() {
    let app = create_test_app().await;
    start_registration(&app).await;

    // Well-formed but never issued
    let forged = "A".repeat(43);
    let response = register(&app, &forged).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");

    // Not a challenge at all
    let response = register(&app, "c2").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_unknown_credential_cannot_start_login() {
    let app = create_test_app().await;
    let response = send(
        &app,
        post(
            "/ceremonies/get",
            &[("x-session-id", SESSION), ("x-credential-id", "missing")],
            None,
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_registration_replay_conflicts() {
    let app = create_test_app().await;
    let challenge = start_registration(&app).await;

    assert_eq!(register(&app, &challenge).await.status(), StatusCode::CREATED);
    let response = register(&app, &challenge).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "CONFLICT");
}

#[tokio::test]
async fn test_login_replay_conflicts() {
    let (app, _) = registered_app().await;
    let challenge = start_login(&app).await;

    assert_eq!(login(&app, &challenge, 1).await.status(), StatusCode::OK);
    let response = login(&app, &challenge, 2).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "CONFLICT");
}

#[tokio::test]
async fn test_counter_regression_reports_possible_clone() {
    let (app, token) = registered_app().await;

    let challenge = start_login(&app).await;
    assert_eq!(login(&app, &challenge, 5).await.status(), StatusCode::OK);

    let challenge = start_login(&app).await;
    let response = login(&app, &challenge, 3).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "POSSIBLE_CLONE");

    let request = Request::get("/credentials")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let json = body_json(send(&app, request).await).await;
    let credential = &json["credentials"][0];
    assert_eq!(credential["sign_count"], 5);
    assert_eq!(credential["clone_warning"], true);
}

#[tokio::test]
async fn test_bad_signature_unauthorized() {
    let (app, _) = registered_app().await;
    let challenge = start_login(&app).await;
    let proof = serde_json::json!({ "challenge": challenge, "counter": 1, "signature": "00" });
    let response = send(
        &app,
        post(
            "/login",
            &[
                ("x-challenge-id", challenge.as_str()),
                ("x-session-id", SESSION),
                ("x-credential-id", CREDENTIAL),
            ],
            Some(&proof),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "VERIFICATION_FAILED");
}

// ============================================================================
// Authenticated Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_credentials_require_token() {
    let (app, _) = registered_app().await;

    let response = send(&app, Request::get("/credentials").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "UNAUTHORIZED");

    let request = Request::get("/credentials")
        .header("authorization", "Bearer not-a-token")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, request).await.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_credentials_listed_for_token_owner() {
    let (app, token) = registered_app().await;

    let request = Request::get("/credentials")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let credentials = json["credentials"].as_array().unwrap();
    assert_eq!(credentials.len(), 1);
    assert_eq!(credentials[0]["credential_id"], CREDENTIAL);
    assert_eq!(credentials[0]["clone_warning"], false);
    assert!(credentials[0].get("public_key").is_none());
}
