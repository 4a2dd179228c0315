//! Logout engine configuration loaded from environment variables.
//!
//! Required variables must be present and valid, or loading fails with a
//! clear error message.

use crate::saml::SignatureAlgorithm;
use crate::session::{DEFAULT_FLOW_TTL_SECONDS, MAX_FLOW_TTL_SECONDS};
use std::env;
use thiserror::Error;
use url::Url;

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Single Logout configuration
#[derive(Debug, Clone)]
pub struct SloConfig {
    /// Entity ID the IdP uses as `Issuer` on outgoing messages
    pub idp_issuer: String,

    /// Absolute URL of this IdP's logout endpoint, compared to `Destination`
    pub logout_endpoint: String,

    /// Algorithm for outgoing signatures
    pub signature_algorithm: SignatureAlgorithm,

    /// Whether an unsigned initiator LogoutRequest is refused
    pub require_signed_messages: bool,

    /// Lifetime of a flow waiting on one participant
    pub flow_ttl_seconds: i64,

    /// Where the browser goes after an IdP-initiated logout
    pub post_logout_redirect_url: Option<String>,
}

impl SloConfig {
    /// Configuration with defaults for everything but the two identifiers.
    pub fn new(idp_issuer: impl Into<String>, logout_endpoint: impl Into<String>) -> Self {
        Self {
            idp_issuer: idp_issuer.into(),
            logout_endpoint: logout_endpoint.into(),
            signature_algorithm: SignatureAlgorithm::default(),
            require_signed_messages: true,
            flow_ttl_seconds: DEFAULT_FLOW_TTL_SECONDS,
            post_logout_redirect_url: None,
        }
    }

    #[must_use]
    pub fn with_signature_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.signature_algorithm = algorithm;
        self
    }

    #[must_use]
    pub fn with_require_signed_messages(mut self, required: bool) -> Self {
        self.require_signed_messages = required;
        self
    }

    /// Set the flow TTL, clamped to `1..=MAX_FLOW_TTL_SECONDS`.
    #[must_use]
    pub fn with_flow_ttl_seconds(mut self, ttl: i64) -> Self {
        self.flow_ttl_seconds = ttl.clamp(1, MAX_FLOW_TTL_SECONDS);
        self
    }

    #[must_use]
    pub fn with_post_logout_redirect_url(mut self, url: impl Into<String>) -> Self {
        self.post_logout_redirect_url = Some(url.into());
        self
    }

    /// Load configuration from `SLO_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingVar(name.to_string()))
        };

        let idp_issuer = required("SLO_IDP_ISSUER")?;
        let logout_endpoint = required("SLO_LOGOUT_ENDPOINT")?;
        validate_url("SLO_LOGOUT_ENDPOINT", &logout_endpoint)?;

        let signature_algorithm = match lookup("SLO_SIGNATURE_ALGORITHM") {
            Some(raw) => raw
                .parse::<SignatureAlgorithm>()
                .map_err(|e| invalid("SLO_SIGNATURE_ALGORITHM", e.to_string()))?,
            None => SignatureAlgorithm::default(),
        };

        let require_signed_messages = match lookup("SLO_REQUIRE_SIGNATURES") {
            Some(raw) => parse_bool("SLO_REQUIRE_SIGNATURES", &raw)?,
            None => true,
        };

        let flow_ttl_seconds = match lookup("SLO_FLOW_TTL_SECONDS") {
            Some(raw) => {
                let ttl = raw
                    .trim()
                    .parse::<i64>()
                    .map_err(|e| invalid("SLO_FLOW_TTL_SECONDS", e.to_string()))?;
                if ttl <= 0 {
                    return Err(invalid("SLO_FLOW_TTL_SECONDS", "must be positive"));
                }
                if ttl > MAX_FLOW_TTL_SECONDS {
                    return Err(invalid(
                        "SLO_FLOW_TTL_SECONDS",
                        format!("must not exceed {MAX_FLOW_TTL_SECONDS}"),
                    ));
                }
                ttl
            }
            None => DEFAULT_FLOW_TTL_SECONDS,
        };

        let post_logout_redirect_url = lookup("SLO_POST_LOGOUT_REDIRECT_URL")
            .filter(|v| !v.trim().is_empty())
            .map(|url| validate_url("SLO_POST_LOGOUT_REDIRECT_URL", &url).map(|()| url))
            .transpose()?;

        Ok(Self {
            idp_issuer,
            logout_endpoint,
            signature_algorithm,
            require_signed_messages,
            flow_ttl_seconds,
            post_logout_redirect_url,
        })
    }
}

fn invalid(var: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        message: message.into(),
    }
}

fn validate_url(var: &str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| invalid(var, format!("not an absolute URL: {e}")))
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(invalid(var, format!("expected a boolean, got {other}"))),
    }
}
