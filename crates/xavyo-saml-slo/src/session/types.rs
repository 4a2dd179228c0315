//! Logout flow state carried between HTTP exchanges
//!
//! A flow is keyed by the ID of the LogoutRequest the IdP dispatched to the
//! participant it is currently waiting on, and expires after a TTL.

use super::sp_session::{Principal, SessionParticipant};
use crate::services::binding::Binding;
use crate::services::status::LogoutStatus;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default TTL for an in-flight logout hop (5 minutes)
pub const DEFAULT_FLOW_TTL_SECONDS: i64 = 300;

/// Grace period for clock skew (30 seconds)
pub const CLOCK_SKEW_GRACE_SECONDS: i64 = 30;

/// Longest accepted flow TTL (one day)
pub const MAX_FLOW_TTL_SECONDS: i64 = 86_400;

/// Who started the logout and where the final answer goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowOrigin {
    /// An SP sent a LogoutRequest; it gets a LogoutResponse at the end
    ServiceProvider {
        request_id: String,
        issuer: String,
        /// Registered logout URL of the initiator
        response_destination: String,
        relay_state: Option<String>,
    },
    /// The IdP itself started the logout
    IdentityProvider { relay_state: Option<String> },
}

impl FlowOrigin {
    #[must_use]
    pub fn relay_state(&self) -> Option<&str> {
        match self {
            Self::ServiceProvider { relay_state, .. } | Self::IdentityProvider { relay_state } => {
                relay_state.as_deref()
            }
        }
    }
}

/// A logout flow waiting for one participant's LogoutResponse
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutFlowState {
    /// ID of the LogoutRequest sent to `awaiting`
    pub request_id: String,
    pub principal: Principal,
    pub awaiting: SessionParticipant,
    pub status: LogoutStatus,
    pub origin: FlowOrigin,
    pub binding: Binding,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LogoutFlowState {
    pub fn new(
        request_id: String,
        principal: Principal,
        awaiting: SessionParticipant,
        status: LogoutStatus,
        origin: FlowOrigin,
        binding: Binding,
        ttl_seconds: i64,
    ) -> Result<Self, SessionError> {
        let now = Utc::now();
        let expires_at = Duration::try_seconds(ttl_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or(SessionError::InvalidTtl(ttl_seconds))?;
        Ok(Self {
            request_id,
            principal,
            awaiting,
            status,
            origin,
            binding,
            created_at: now,
            expires_at,
        })
    }

    /// Check if this flow has expired (with grace period for clock skew)
    pub fn is_expired(&self) -> bool {
        let grace_period = Duration::seconds(CLOCK_SKEW_GRACE_SECONDS);
        self.expires_at
            .checked_add_signed(grace_period)
            .map_or(false, |deadline| Utc::now() > deadline)
    }
}

/// Session-related errors
#[derive(Debug, Error, Clone)]
pub enum SessionError {
    /// No logout flow is waiting on this request ID
    #[error("Logout flow not found: {0}")]
    NotFound(String),

    /// Flow outlived its TTL (plus grace period)
    #[error("Logout flow expired: {request_id} (expired at {expired_at})")]
    Expired {
        request_id: String,
        expired_at: DateTime<Utc>,
    },

    /// A flow with this request ID is already stored
    #[error("Duplicate logout request ID: {0}")]
    DuplicateRequestId(String),

    /// TTL does not yield a representable expiry time
    #[error("Invalid logout flow TTL: {0} seconds")]
    InvalidTtl(i64),

    /// Storage error
    #[error("Session storage error: {0}")]
    StorageError(String),
}
