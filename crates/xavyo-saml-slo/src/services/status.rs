//! Aggregation of per-participant outcomes into one SAML status

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
pub const STATUS_REQUESTER: &str = "urn:oasis:names:tc:SAML:2.0:status:Requester";
pub const STATUS_RESPONDER: &str = "urn:oasis:names:tc:SAML:2.0:status:Responder";
pub const STATUS_PARTIAL_LOGOUT: &str = "urn:oasis:names:tc:SAML:2.0:status:PartialLogout";

/// Accumulated status of a logout flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogoutStatus {
    #[default]
    Success,
    PartialLogout,
}

impl LogoutStatus {
    /// `StatusCode` value sent back to the initiator
    #[must_use]
    pub fn status_code(self) -> &'static str {
        match self {
            Self::Success => STATUS_SUCCESS,
            Self::PartialLogout => STATUS_PARTIAL_LOGOUT,
        }
    }

    /// Fold one more outcome in. Once partial, always partial.
    #[must_use]
    pub fn record(self, outcome: ParticipantOutcome) -> Self {
        match (self, outcome) {
            (Self::Success, ParticipantOutcome::Success) => Self::Success,
            _ => Self::PartialLogout,
        }
    }
}

/// Result of asking one participant to log out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticipantOutcome {
    Success,
    Failure,
}

impl ParticipantOutcome {
    /// Only a top-level `Success` counts; every other status code is a failure.
    #[must_use]
    pub fn from_status_code(status_code: &str) -> Self {
        if status_code == STATUS_SUCCESS {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

/// The accumulated status of earlier hops, folded in as one outcome.
impl From<LogoutStatus> for ParticipantOutcome {
    fn from(status: LogoutStatus) -> Self {
        match status {
            LogoutStatus::Success => Self::Success,
            LogoutStatus::PartialLogout => Self::Failure,
        }
    }
}

/// `Success` iff every participant confirmed and local cleanup succeeded.
#[must_use]
pub fn aggregate(outcomes: &[ParticipantOutcome], local_cleanup_ok: bool) -> LogoutStatus {
    let status = outcomes
        .iter()
        .fold(LogoutStatus::Success, |status, outcome| status.record(*outcome));
    if local_cleanup_ok {
        status
    } else {
        LogoutStatus::PartialLogout
    }
}
