//! HTTP request handlers
//!
//! This module contains all the request handlers for the API endpoints.

pub mod ceremonies;
pub mod credentials;
pub mod health;
pub mod register;

pub use crate::state::AppState;
pub use ceremonies::{create_ceremony_handler, get_ceremony_handler};
pub use credentials::{list_credentials_handler, CredentialListResponse, CredentialSummary};
pub use health::{health, ready, HealthResponse, ReadyResponse};
pub use register::{login_handler, register_handler, LoginResponse, RegisterResponse};
