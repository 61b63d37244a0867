//! Router configuration module
//!
//! Configures all routes, middleware layers, and creates the application router.

use std::{sync::Arc, time::Duration};

use axum::{
    http::{header, HeaderName, Method, StatusCode},
    routing::{get, post},
    Router,
};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::error::ApiError;
use crate::handlers::{
    create_ceremony_handler, get_ceremony_handler, health, list_credentials_handler,
    login_handler, ready, register_handler,
};
use crate::openapi::ApiDoc;
use crate::state::AppState;
use crate::validation::{CHALLENGE_ID_HEADER, CREDENTIAL_ID_HEADER, SESSION_ID_HEADER};

/// Create the application router with default config and an in-memory store (for testing)
pub async fn create_router() -> Result<Router, ApiError> {
    let config = Config::default();
    let state = AppState::in_memory(&config).await?;
    Ok(create_router_with_state(state))
}

fn cors_layer(config: &Config) -> CorsLayer {
    let ceremony_headers = [
        HeaderName::from_static(SESSION_ID_HEADER),
        HeaderName::from_static(CHALLENGE_ID_HEADER),
        HeaderName::from_static(CREDENTIAL_ID_HEADER),
    ];

    match &config.allowed_origins {
        Some(origins) if !origins.is_empty() => {
            let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            tracing::info!("CORS: Restricting to {} origin(s)", origins.len());
            let mut allowed = vec![header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION];
            allowed.extend(ceremony_headers.iter().cloned());
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(allowed)
                .expose_headers([HeaderName::from_static(CHALLENGE_ID_HEADER)])
        }
        _ => {
            tracing::warn!("CORS: Allowing all origins (dev mode)");
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([HeaderName::from_static(CHALLENGE_ID_HEADER)])
        }
    }
}

/// Create the application router over prepared state
pub fn create_router_with_state(state: AppState) -> Router {
    let config = state.config.clone();

    let body_limit = RequestBodyLimitLayer::new(config.body_limit_kb * 1024);

    let timeout = TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        Duration::from_secs(config.timeout_secs),
    );

    let router = Router::new()
        .route("/ceremonies/create", post(create_ceremony_handler))
        .route("/ceremonies/get", post(get_ceremony_handler))
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        .route("/credentials", get(list_credentials_handler))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors_layer(&config))
        .layer(body_limit)
        .layer(timeout);

    if !config.rate_limit_enabled {
        tracing::warn!("Rate limiting: DISABLED");
        return router.layer(TraceLayer::new_for_http());
    }

    let governor_conf = GovernorConfigBuilder::default()
        .per_second(config.rate_limit_per_sec)
        .burst_size(config.rate_limit_burst)
        .finish();
    match governor_conf {
        Some(governor_conf) => {
            tracing::info!(
                "Rate limiting: {} req/s (burst: {})",
                config.rate_limit_per_sec,
                config.rate_limit_burst
            );
            router
                .layer(GovernorLayer::new(Arc::new(governor_conf)))
                .layer(TraceLayer::new_for_http())
        }
        None => {
            tracing::error!(
                per_sec = config.rate_limit_per_sec,
                burst = config.rate_limit_burst,
                "Invalid rate limit settings; rate limiting DISABLED"
            );
            router.layer(TraceLayer::new_for_http())
        }
    }
}
