//! Server configuration module
//!
//! Handles loading configuration from environment variables with sensible defaults.

use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 3000)
    pub port: u16,
    /// Server host (default: 127.0.0.1)
    pub host: [u8; 4],
    /// Allowed CORS origins, comma-separated (default: allow all in dev)
    pub allowed_origins: Option<Vec<String>>,
    /// Request body limit in KB (default: 64)
    pub body_limit_kb: usize,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// Enable rate limiting (default: false for tests, true when loaded from env)
    pub rate_limit_enabled: bool,
    /// Rate limit: requests per second (default: 10)
    pub rate_limit_per_sec: u64,
    /// Rate limit: burst size (default: 20)
    pub rate_limit_burst: u32,
    /// PostgreSQL connection string; the in-memory store is used when unset
    pub database_url: Option<String>,
    /// Database connection pool maximum connections (default: 20)
    pub database_max_connections: u32,
    /// Logical table naming prefix (default: "keystone")
    pub table_prefix: String,
    /// Deployment environment used in table names (default: "dev")
    pub environment: String,
    /// Compare deployed tables against entity indexes at startup (default: false)
    pub verify_schema: bool,
    /// Ceremony lifetime in seconds (default: 300)
    pub ceremony_ttl_secs: u64,
    /// WebAuthn Relying Party ID (default: "localhost")
    pub rp_id: String,
    /// WebAuthn Relying Party origin (default: "http://localhost:3001")
    pub rp_origin: String,
    /// WebAuthn Relying Party display name (default: "Keystone")
    pub rp_name: String,
    /// Use the deterministic mock verifier instead of WebAuthn (default: false,
    /// enable with ALLOW_MOCK_VERIFIER=true)
    pub allow_mock_verifier: bool,
    /// HS256 secret for identity tokens; a random one is generated when unset
    pub identity_secret: Option<String>,
    /// Identity token lifetime in seconds (default: 3600)
    pub identity_token_ttl_secs: u64,
    /// Identity token issuer (default: "keystone")
    pub identity_issuer: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            host: [127, 0, 0, 1],
            allowed_origins: None, // None = allow all (dev mode)
            body_limit_kb: 64,
            timeout_secs: 30,
            rate_limit_enabled: false, // Disabled by default (for tests)
            rate_limit_per_sec: 10,
            rate_limit_burst: 20,
            database_url: None,
            database_max_connections: 20,
            table_prefix: "keystone".to_string(),
            environment: "dev".to_string(),
            verify_schema: false,
            ceremony_ttl_secs: 300,
            rp_id: "localhost".to_string(),
            rp_origin: "http://localhost:3001".to_string(),
            rp_name: "Keystone".to_string(),
            allow_mock_verifier: true, // Enabled by default for tests; from_env() defaults to false
            identity_secret: Some("keystone-test-secret".to_string()),
            identity_token_ttl_secs: 3600,
            identity_issuer: "keystone".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = std::env::var("HOST")
            .ok()
            .map(|h| {
                if h == "0.0.0.0" {
                    [0, 0, 0, 0]
                } else {
                    [127, 0, 0, 1]
                }
            })
            .unwrap_or(defaults.host);

        let allowed_origins = std::env::var("ALLOWED_ORIGINS").ok().map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        // Rate limiting enabled by default in production, can be disabled with RATE_LIMIT_ENABLED=false
        let rate_limit_enabled = std::env::var("RATE_LIMIT_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let verify_schema = std::env::var("KEYSTONE_VERIFY_SCHEMA")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        let allow_mock_verifier = std::env::var("ALLOW_MOCK_VERIFIER")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Self {
            port: env_parse("PORT", defaults.port),
            host,
            allowed_origins,
            body_limit_kb: env_parse("BODY_LIMIT_KB", defaults.body_limit_kb),
            timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", defaults.timeout_secs),
            rate_limit_enabled,
            rate_limit_per_sec: env_parse("RATE_LIMIT_PER_SEC", defaults.rate_limit_per_sec),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST", defaults.rate_limit_burst),
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            database_max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            table_prefix: env_string("KEYSTONE_TABLE_PREFIX", &defaults.table_prefix),
            environment: env_string("KEYSTONE_ENVIRONMENT", &defaults.environment),
            verify_schema,
            ceremony_ttl_secs: env_parse("CEREMONY_TTL_SECS", defaults.ceremony_ttl_secs),
            rp_id: env_string("WEBAUTHN_RP_ID", &defaults.rp_id),
            rp_origin: env_string("WEBAUTHN_RP_ORIGIN", &defaults.rp_origin),
            rp_name: env_string("WEBAUTHN_RP_NAME", &defaults.rp_name),
            allow_mock_verifier,
            identity_secret: std::env::var("IDENTITY_TOKEN_SECRET")
                .ok()
                .filter(|v| !v.is_empty()),
            identity_token_ttl_secs: env_parse(
                "IDENTITY_TOKEN_TTL_SECS",
                defaults.identity_token_ttl_secs,
            ),
            identity_issuer: env_string("IDENTITY_ISSUER", &defaults.identity_issuer),
        }
    }

    /// Get socket address from config
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.host, self.port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn ceremony_ttl(&self) -> Duration {
        Duration::from_secs(self.ceremony_ttl_secs)
    }
}
