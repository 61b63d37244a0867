//! OpenAPI documentation configuration
//!
//! Generates the OpenAPI 3.0 document served at `/api-docs/openapi.json`.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::error::ErrorResponse;
use crate::handlers::{
    CredentialListResponse, CredentialSummary, HealthResponse, LoginResponse, ReadyResponse,
    RegisterResponse,
};

/// Keystone passkey API - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Keystone - Passkey API",
        version = "0.1.0",
        description = r#"
## Passkey Relying Party

Keystone issues and redeems WebAuthn ceremonies:

1. **Issue** a ceremony with `POST /ceremonies/create` or `POST /ceremonies/get`
2. Pass the returned options to the browser and collect its response
3. **Redeem** it with `POST /register` or `POST /login`, sending the `x-challenge-id` header
4. Use the returned identity token as a Bearer token on `GET /credentials`

Every ceremony can be redeemed once, before it expires. Credential counters must strictly
advance; a regression is reported as a possible cloned authenticator.
"#,
        license(name = "MIT OR Apache-2.0")
    ),
    servers(
        (url = "http://localhost:3000", description = "Local development server")
    ),
    tags(
        (name = "Ceremonies", description = "Issue single-use WebAuthn challenges"),
        (name = "Passkeys", description = "Register and assert passkeys"),
        (name = "Health", description = "Service health and readiness endpoints")
    ),
    paths(
        crate::handlers::health::health,
        crate::handlers::health::ready,
        crate::handlers::ceremonies::create_ceremony_handler,
        crate::handlers::ceremonies::get_ceremony_handler,
        crate::handlers::register::register_handler,
        crate::handlers::register::login_handler,
        crate::handlers::credentials::list_credentials_handler,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            RegisterResponse,
            LoginResponse,
            CredentialSummary,
            CredentialListResponse,
            ErrorResponse,
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/ready",
            "/ceremonies/create",
            "/ceremonies/get",
            "/register",
            "/login",
            "/credentials",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let components = doc.components.unwrap();
        assert!(components.security_schemes.contains_key("bearer"));
    }
}
