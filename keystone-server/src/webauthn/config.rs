//! WebAuthn Relying Party configuration
//!
//! Configures the WebAuthn library with Relying Party (RP) identity.

use url::Url;
use webauthn_rs::prelude::*;

use crate::config::Config;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid origin URL: {0}")]
    InvalidOrigin(String),
    #[error("WebAuthn error: {0:?}")]
    Webauthn(WebauthnError),
}

/// WebAuthn configuration wrapper
pub struct WebAuthnConfig {
    webauthn: Webauthn,
}

impl WebAuthnConfig {
    /// Create a new WebAuthn configuration
    ///
    /// # Arguments
    ///
    /// * `rp_id` - Relying Party ID (typically the domain name)
    /// * `rp_origin` - Relying Party origin URL
    /// * `rp_name` - Human-readable name for the Relying Party
    pub fn new(rp_id: &str, rp_origin: &Url, rp_name: &str) -> Result<Self, WebauthnError> {
        let builder = WebauthnBuilder::new(rp_id, rp_origin)?
            .rp_name(rp_name)
            .allow_subdomains(false);

        Ok(Self {
            webauthn: builder.build()?,
        })
    }

    /// Create configuration from the server's `WEBAUTHN_RP_*` settings
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let origin = Url::parse(&config.rp_origin)
            .map_err(|e| ConfigError::InvalidOrigin(format!("{}: {e}", config.rp_origin)))?;

        Self::new(&config.rp_id, &origin, &config.rp_name).map_err(ConfigError::Webauthn)
    }

    /// Get a reference to the Webauthn instance
    pub fn webauthn(&self) -> &Webauthn {
        &self.webauthn
    }
}

impl std::fmt::Debug for WebAuthnConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebAuthnConfig")
            .field("webauthn", &"<Webauthn instance>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let origin = Url::parse("http://localhost:3001").unwrap();
        let config = WebAuthnConfig::new("localhost", &origin, "Test").unwrap();
        assert!(config.webauthn().get_allowed_origins().contains(&origin));
    }

    #[test]
    fn test_config_from_server_defaults() {
        let config = WebAuthnConfig::from_config(&Config::default()).unwrap();
        let expected_origin = Url::parse("http://localhost:3001").unwrap();
        assert!(config
            .webauthn()
            .get_allowed_origins()
            .contains(&expected_origin));
    }

    #[test]
    fn test_invalid_origin() {
        let config = Config {
            rp_origin: "not a url".into(),
            ..Config::default()
        };
        assert!(matches!(
            WebAuthnConfig::from_config(&config),
            Err(ConfigError::InvalidOrigin(_))
        ));
    }
}
