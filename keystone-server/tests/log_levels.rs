//! Challenge ids are single-use secrets: they may appear in debug output only.

use std::io::Write;
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use keystone_core::MockVerifier;
use keystone_server::create_router;
use tower::ServiceExt;
use tracing_subscriber::EnvFilter;

const SESSION: &str = "session-logs";
const CREDENTIAL: &str = "cred-logs";

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn subscriber(filter: &str, buffer: &LogBuffer) -> impl tracing::Subscriber + Send + Sync {
    let writer = buffer.clone();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish()
}

fn post(uri: &str, headers: &[(&str, &str)], body: Option<String>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, request: Request<Body>) -> axum::response::Response {
    app.clone().oneshot(request).await.unwrap()
}

fn challenge_of(response: &axum::response::Response) -> String {
    response.headers()["x-challenge-id"]
        .to_str()
        .unwrap()
        .to_string()
}

/// Issue a registration ceremony, redeem it, then issue an assertion ceremony.
/// Returns both challenge ids.
async fn issue_both_ceremonies() -> (String, String) {
    let app = create_router().await.unwrap();

    let response = send(&app, post("/ceremonies/create", &[("x-session-id", SESSION)], None)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let create_challenge = challenge_of(&response);

    let proof = MockVerifier::default_test().attestation(&create_challenge, CREDENTIAL);
    let response = send(
        &app,
        post(
            "/register",
            &[("x-challenge-id", create_challenge.as_str()), ("x-session-id", SESSION)],
            Some(proof.to_string()),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = send(
        &app,
        post(
            "/ceremonies/get",
            &[("x-session-id", SESSION), ("x-credential-id", CREDENTIAL)],
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    (create_challenge, challenge_of(&response))
}

#[tokio::test]
async fn test_challenge_ids_absent_at_info() {
    let buffer = LogBuffer::default();
    let _guard = tracing::subscriber::set_default(subscriber(
        "keystone_server=info,keystone_core=info",
        &buffer,
    ));

    let (create_challenge, get_challenge) = issue_both_ceremonies().await;

    let logs = buffer.contents();
    assert!(logs.contains("Registration ceremony issued"));
    assert!(logs.contains("Assertion ceremony issued"));
    assert!(!logs.contains(&create_challenge));
    assert!(!logs.contains(&get_challenge));
}

#[tokio::test]
async fn test_challenge_ids_logged_at_debug() {
    let buffer = LogBuffer::default();
    let _guard = tracing::subscriber::set_default(subscriber(
        "keystone_server=debug,keystone_core=debug",
        &buffer,
    ));

    let (create_challenge, get_challenge) = issue_both_ceremonies().await;

    let logs = buffer.contents();
    assert!(logs.contains(&create_challenge));
    assert!(logs.contains(&get_challenge));
}
