//! Keystone Server Library - REST API components for passkey ceremonies
//!
//! This library exposes the server components for use in integration tests.
//! The main binary uses these same components.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod validation;
pub mod webauthn;

pub use auth::AuthenticatedUser;
pub use config::Config;
pub use error::{ApiError, ErrorResponse};
pub use identity::{IdentityClaims, TokenIssuer};
pub use openapi::ApiDoc;
pub use routes::{create_router, create_router_with_state};
pub use state::AppState;
pub use webauthn::{PasskeyVerifier, WebAuthnConfig, WebAuthnVerifier};
