//! Logout route definitions

use crate::config::SloConfig;
use crate::handlers::{slo_post, slo_redirect, SloState};
use crate::saml::SigningCredentials;
use crate::services::orchestrator::LogoutOrchestrator;
use crate::session::{IdpSessionHandler, LogoutFlowStore, ParticipantStore};
use axum::{routing::get, Router};
use std::sync::Arc;

/// Create the logout router
///
/// The principal is expected as an `Extension<Principal>` set by the
/// authentication layer in front of this router.
pub fn slo_router(state: SloState) -> Router {
    Router::new()
        .route("/logout", get(slo_redirect).post(slo_post))
        .with_state(state)
}

/// Wire the orchestrator and its collaborators into handler state.
pub fn create_slo_state(
    config: SloConfig,
    credentials: SigningCredentials,
    participants: Arc<dyn ParticipantStore>,
    idp_sessions: Arc<dyn IdpSessionHandler>,
    flows: Arc<dyn LogoutFlowStore>,
) -> SloState {
    SloState {
        orchestrator: Arc::new(LogoutOrchestrator::new(
            config,
            credentials,
            participants,
            idp_sessions,
            flows,
        )),
    }
}
