//! SLO-specific error types

use crate::session::SessionError;
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Plain-text body returned when a logout message carries no `Issuer`.
pub const MISSING_ISSUER_MESSAGE: &str =
    "SAML Request with no issuer. Issuer is a mandatory element.";

/// Result type for SLO operations
pub type SloResult<T> = Result<T, SloError>;

/// SLO-specific errors
#[derive(Debug, Error)]
pub enum SloError {
    /// Decoding, decompression or XML parsing failed
    #[error("Malformed SAML message: {0}")]
    MalformedMessage(String),

    /// The message has no `Issuer` element
    #[error("SAML Request with no issuer. Issuer is a mandatory element.")]
    MissingIssuer,

    /// Signature absent when required, digest mismatch, or cryptographic mismatch
    #[error("Signature validation failed: {0}")]
    SignatureInvalid(String),

    /// `Destination` does not name this IdP's logout endpoint
    #[error("Destination mismatch: expected {expected}, got {actual}")]
    DestinationMismatch { expected: String, actual: String },

    /// Local IdP session teardown failed
    #[error("Participant cleanup failed: {0}")]
    ParticipantCleanupFailed(String),

    /// Issuer does not match any active session participant
    #[error("Unknown Service Provider: {0}")]
    UnknownServiceProvider(String),

    /// `InResponseTo` does not correlate with a logout in progress
    #[error("Unknown logout flow: {0}")]
    UnknownLogoutFlow(String),

    /// No authenticated principal on the request
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Collaborator storage errors
    #[error("Session error: {0}")]
    SessionError(#[from] SessionError),

    /// Certificate parsing error
    #[error("Certificate parsing error: {0}")]
    CertificateParseError(String),

    /// Private key error
    #[error("Private key error: {0}")]
    PrivateKeyError(String),

    /// Unsupported or unknown signature algorithm URI
    #[error("Unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saml_status: Option<String>,
}

impl IntoResponse for SloError {
    fn into_response(self) -> Response {
        let (status, error_code, saml_status) = match &self {
            // Protocol-level garbage never gets a SAML status response.
            SloError::MissingIssuer => {
                return plain_text(StatusCode::BAD_REQUEST, MISSING_ISSUER_MESSAGE.to_string());
            }
            SloError::MalformedMessage(msg) => {
                tracing::warn!(error = %msg, "Rejected malformed SAML logout message");
                return plain_text(StatusCode::BAD_REQUEST, self.to_string());
            }
            SloError::SignatureInvalid(_) => (
                StatusCode::BAD_REQUEST,
                "signature_validation_failed",
                Some("urn:oasis:names:tc:SAML:2.0:status:Requester"),
            ),
            SloError::DestinationMismatch { .. } => (
                StatusCode::BAD_REQUEST,
                "destination_mismatch",
                Some("urn:oasis:names:tc:SAML:2.0:status:Requester"),
            ),
            SloError::UnknownServiceProvider(_) => (StatusCode::NOT_FOUND, "unknown_sp", None),
            SloError::NotAuthenticated => (StatusCode::UNAUTHORIZED, "not_authenticated", None),
            SloError::UnknownLogoutFlow(_) => (
                StatusCode::BAD_REQUEST,
                "unknown_logout_flow",
                Some("urn:oasis:names:tc:SAML:2.0:status:Requester"),
            ),
            SloError::UnsupportedAlgorithm(_) => (
                StatusCode::BAD_REQUEST,
                "unsupported_algorithm",
                Some("urn:oasis:names:tc:SAML:2.0:status:Requester"),
            ),
            SloError::ParticipantCleanupFailed(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "participant_cleanup_failed",
                Some("urn:oasis:names:tc:SAML:2.0:status:PartialLogout"),
            ),
            SloError::SessionError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "session_storage_error",
                Some("urn:oasis:names:tc:SAML:2.0:status:Responder"),
            ),
            SloError::CertificateParseError(_) => {
                (StatusCode::BAD_REQUEST, "certificate_parse_error", None)
            }
            SloError::PrivateKeyError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "private_key_error",
                Some("urn:oasis:names:tc:SAML:2.0:status:Responder"),
            ),
            SloError::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                Some("urn:oasis:names:tc:SAML:2.0:status:Responder"),
            ),
        };

        let message = match &self {
            SloError::SessionError(e) => {
                tracing::error!("SLO session storage error: {}", e);
                "A session storage error occurred".to_string()
            }
            SloError::InternalError(msg) => {
                tracing::error!("SLO internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            SloError::PrivateKeyError(_) => {
                tracing::error!("SLO private key error");
                "A private key error occurred".to_string()
            }
            SloError::ParticipantCleanupFailed(msg) => {
                tracing::error!("SLO participant cleanup failed: {}", msg);
                "Local session cleanup failed".to_string()
            }
            SloError::SignatureInvalid(_) => "Signature validation failed".to_string(),
            SloError::CertificateParseError(_) => "Certificate parsing error".to_string(),
            // Safe user-facing messages (contain only client-provided values)
            SloError::DestinationMismatch { .. }
            | SloError::UnknownServiceProvider(_)
            | SloError::UnknownLogoutFlow(_)
            | SloError::UnsupportedAlgorithm(_)
            | SloError::NotAuthenticated
            | SloError::MissingIssuer
            | SloError::MalformedMessage(_) => self.to_string(),
        };

        let body = ErrorResponse {
            error: error_code.to_string(),
            message,
            saml_status: saml_status.map(String::from),
        };

        (status, Json(body)).into_response()
    }
}

fn plain_text(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}
