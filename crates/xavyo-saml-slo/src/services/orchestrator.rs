//! SAML Single Logout orchestration
//!
//! Each inbound message advances the flow by one hop:
//! - an initiator LogoutRequest removes the initiator and dispatches to the
//!   first remaining participant
//! - a participant LogoutResponse records its outcome and dispatches to the
//!   next one
//! - when no participant is left the IdP session is cleared and the
//!   initiator gets the final LogoutResponse
//!
//! Nothing survives between hops except the flow store entry keyed by the
//! dispatched request ID and the participant store itself.

use crate::config::SloConfig;
use crate::error::{SloError, SloResult};
use crate::saml::SigningCredentials;
use crate::services::binding::{
    Binding, DecodedMessage, MessageKind, OutboundMessage, SignatureCheck,
};
use crate::services::logout_parser::{parse_message, LogoutRequest, LogoutResponse, SamlMessage};
use crate::services::slo_builder::SloBuilder;
use crate::services::status::{aggregate, LogoutStatus, ParticipantOutcome, STATUS_REQUESTER};
use crate::services::validator;
use crate::session::{
    FlowOrigin, IdpSessionHandler, LogoutFlowState, LogoutFlowStore, ParticipantStore, Principal,
    SessionError, SessionParticipant,
};
use std::sync::Arc;

/// What the HTTP layer should do next
#[derive(Debug, Clone)]
pub enum LogoutAction {
    /// Send a LogoutRequest to the next participant
    SendRequest(OutboundMessage),
    /// Answer the initiating SP with its LogoutResponse
    SendResponse(OutboundMessage),
    /// An IdP-initiated logout has finished
    Completed {
        status: LogoutStatus,
        relay_state: Option<String>,
    },
}

/// Logout propagation state machine
pub struct LogoutOrchestrator {
    config: SloConfig,
    builder: SloBuilder,
    participants: Arc<dyn ParticipantStore>,
    idp_sessions: Arc<dyn IdpSessionHandler>,
    flows: Arc<dyn LogoutFlowStore>,
}

impl LogoutOrchestrator {
    #[must_use]
    pub fn new(
        config: SloConfig,
        credentials: SigningCredentials,
        participants: Arc<dyn ParticipantStore>,
        idp_sessions: Arc<dyn IdpSessionHandler>,
        flows: Arc<dyn LogoutFlowStore>,
    ) -> Self {
        let builder = SloBuilder::new(
            config.idp_issuer.clone(),
            credentials,
            config.signature_algorithm,
        );
        Self {
            config,
            builder,
            participants,
            idp_sessions,
            flows,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SloConfig {
        &self.config
    }

    /// Process one decoded inbound message.
    ///
    /// `principal` is the authenticated end user, if any. Participant
    /// responses are resumed from the stored flow and do not need it.
    pub async fn handle(
        &self,
        principal: Option<&Principal>,
        inbound: DecodedMessage,
    ) -> SloResult<LogoutAction> {
        let message = parse_message(&inbound.xml)?;
        match (&message, inbound.kind) {
            (SamlMessage::Request(_), MessageKind::Request)
            | (SamlMessage::Response(_), MessageKind::Response) => {}
            _ => {
                return Err(SloError::MalformedMessage(format!(
                    "{} does not carry a matching message",
                    inbound.kind.param_name()
                )))
            }
        }

        match validator::validate(&message, &self.config.logout_endpoint) {
            Ok(()) => {}
            Err(SloError::DestinationMismatch { expected, actual }) => {
                tracing::warn!(
                    message_id = %message.id(),
                    expected = %expected,
                    actual = %actual,
                    "Logout message Destination does not match this endpoint"
                );
            }
            Err(e) => return Err(e),
        }

        match message {
            SamlMessage::Request(request) => {
                let principal = principal.ok_or(SloError::NotAuthenticated)?;
                self.handle_logout_request(principal, request, inbound).await
            }
            SamlMessage::Response(response) => {
                self.handle_logout_response(principal, response, inbound).await
            }
        }
    }

    /// Start a logout with no initiating SP.
    pub async fn initiate_idp_logout(
        &self,
        principal: &Principal,
        binding: Binding,
        relay_state: Option<String>,
    ) -> SloResult<LogoutAction> {
        tracing::info!(principal = %principal, "IdP-initiated logout started");
        self.continue_flow(
            principal,
            FlowOrigin::IdentityProvider { relay_state },
            binding,
            LogoutStatus::Success,
        )
        .await
    }

    /// Purge flows whose participant never answered.
    pub async fn cleanup_expired_flows(&self) -> SloResult<u64> {
        Ok(self.flows.cleanup_expired().await?)
    }

    async fn handle_logout_request(
        &self,
        principal: &Principal,
        request: LogoutRequest,
        inbound: DecodedMessage,
    ) -> SloResult<LogoutAction> {
        // Presence checked by the validator.
        let issuer = request.issuer.clone().unwrap_or_default();

        let initiator = self
            .participants
            .get_active_sessions(principal)
            .await?
            .into_iter()
            .find(|p| p.service_provider_id == issuer)
            .ok_or_else(|| {
                tracing::warn!(
                    issuer = %issuer,
                    request_id = %request.id,
                    "LogoutRequest from an SP without an active session"
                );
                SloError::UnknownServiceProvider(issuer.clone())
            })?;

        if let Err(reason) = self.check_peer_signature(&inbound, &initiator) {
            tracing::warn!(
                issuer = %issuer,
                request_id = %request.id,
                reason = %reason,
                "Initiator LogoutRequest rejected"
            );
            let response = self.builder.build_logout_response(
                &request.id,
                &initiator.service_provider_logout_url,
                STATUS_REQUESTER,
                inbound.binding,
                inbound.relay_state.as_deref(),
            )?;
            return Ok(LogoutAction::SendResponse(response));
        }

        let taken = self
            .participants
            .take_participant(principal, &initiator.service_provider_id)
            .await?;

        tracing::info!(
            principal = %principal,
            issuer = %issuer,
            request_id = %request.id,
            session_indexes = ?request.session_indexes,
            "SP-initiated logout started"
        );

        let origin = FlowOrigin::ServiceProvider {
            request_id: request.id,
            issuer,
            response_destination: initiator.service_provider_logout_url,
            relay_state: inbound.relay_state,
        };
        let result = self
            .continue_flow(principal, origin, inbound.binding, LogoutStatus::Success)
            .await;
        if let (Err(_), Some(initiator)) = (&result, taken) {
            self.restore_participant(principal, initiator).await;
        }
        result
    }

    async fn handle_logout_response(
        &self,
        principal: Option<&Principal>,
        response: LogoutResponse,
        inbound: DecodedMessage,
    ) -> SloResult<LogoutAction> {
        let in_response_to = response.in_response_to.clone().ok_or_else(|| {
            SloError::UnknownLogoutFlow(format!(
                "LogoutResponse {} has no InResponseTo",
                response.id
            ))
        })?;

        let flow = self
            .flows
            .consume(&in_response_to)
            .await
            .map_err(|e| match e {
                SessionError::NotFound(id) | SessionError::Expired { request_id: id, .. } => {
                    SloError::UnknownLogoutFlow(id)
                }
                other => SloError::SessionError(other),
            })?;

        if let Some(p) = principal {
            if *p != flow.principal {
                tracing::warn!(
                    request_id = %in_response_to,
                    "LogoutResponse arrived in another principal's context"
                );
            }
        }

        let participant = &flow.awaiting;
        let issuer = response.issuer.as_deref().unwrap_or_default();
        let outcome = if issuer != participant.service_provider_id {
            tracing::warn!(
                request_id = %in_response_to,
                expected = %participant.service_provider_id,
                issuer = %issuer,
                "LogoutResponse issuer does not match the awaited participant"
            );
            ParticipantOutcome::Failure
        } else if let Err(reason) = self.check_peer_signature(&inbound, participant) {
            tracing::warn!(
                request_id = %in_response_to,
                issuer = %issuer,
                reason = %reason,
                "Participant LogoutResponse signature rejected"
            );
            ParticipantOutcome::Failure
        } else {
            ParticipantOutcome::from_status_code(&response.status_code)
        };

        if outcome == ParticipantOutcome::Failure {
            tracing::warn!(
                principal = %flow.principal,
                issuer = %participant.service_provider_id,
                status_code = %response.status_code,
                "Participant did not confirm logout"
            );
        } else {
            tracing::info!(
                principal = %flow.principal,
                issuer = %participant.service_provider_id,
                "Participant confirmed logout"
            );
        }

        let status = flow.status.record(outcome);
        let consumed = flow.clone();
        let result = self
            .continue_flow(&flow.principal, flow.origin, flow.binding, status)
            .await;
        if result.is_err() {
            // Put the flow back so the participant's response can be redelivered.
            if let Err(e) = self.flows.store(consumed).await {
                tracing::error!(
                    request_id = %in_response_to,
                    error = %e,
                    "Failed to restore logout flow"
                );
            }
        }
        result
    }

    /// Dispatch to the next reachable participant, or finalize.
    async fn continue_flow(
        &self,
        principal: &Principal,
        origin: FlowOrigin,
        binding: Binding,
        mut status: LogoutStatus,
    ) -> SloResult<LogoutAction> {
        loop {
            let Some(participant) = self.participants.pop_next(principal).await? else {
                return self.finalize(principal, origin, binding, status).await;
            };

            if !is_reachable_logout_url(&participant.service_provider_logout_url) {
                tracing::warn!(
                    principal = %principal,
                    issuer = %participant.service_provider_id,
                    logout_url = %participant.service_provider_logout_url,
                    "Participant logout URL is not an absolute URL, skipping"
                );
                status = status.record(ParticipantOutcome::Failure);
                continue;
            }

            return match self
                .dispatch(principal, &participant, origin, binding, status)
                .await
            {
                Ok(message) => Ok(LogoutAction::SendRequest(message)),
                Err(e) => {
                    self.restore_participant(principal, participant).await;
                    Err(e)
                }
            };
        }
    }

    /// Sign a LogoutRequest for `participant` and record the flow waiting on it.
    async fn dispatch(
        &self,
        principal: &Principal,
        participant: &SessionParticipant,
        origin: FlowOrigin,
        binding: Binding,
        status: LogoutStatus,
    ) -> SloResult<OutboundMessage> {
        let (request_id, message) = self.builder.build_logout_request(
            participant.into(),
            binding,
            origin.relay_state(),
        )?;

        let state = LogoutFlowState::new(
            request_id.clone(),
            principal.clone(),
            participant.clone(),
            status,
            origin,
            binding,
            self.config.flow_ttl_seconds,
        )
        .map_err(|e| SloError::InternalError(e.to_string()))?;
        self.flows.store(state).await?;

        tracing::info!(
            principal = %principal,
            issuer = %participant.service_provider_id,
            request_id = %request_id,
            "LogoutRequest dispatched to participant"
        );
        Ok(message)
    }

    /// Return a participant to the store after a hop that did not reach it.
    async fn restore_participant(&self, principal: &Principal, participant: SessionParticipant) {
        let issuer = participant.service_provider_id.clone();
        if let Err(e) = self.participants.record(principal, participant).await {
            tracing::error!(
                principal = %principal,
                issuer = %issuer,
                error = %e,
                "Failed to restore session participant"
            );
        }
    }

    async fn finalize(
        &self,
        principal: &Principal,
        origin: FlowOrigin,
        binding: Binding,
        status: LogoutStatus,
    ) -> SloResult<LogoutAction> {
        let mut local_cleanup_ok = match self.idp_sessions.clear_idp_session(principal).await {
            Ok(()) => true,
            Err(e) => {
                let e = SloError::ParticipantCleanupFailed(e.to_string());
                tracing::error!(principal = %principal, error = %e, "IdP session cleanup failed");
                self.idp_sessions.set_logout_status_failed(principal).await;
                false
            }
        };
        if self.idp_sessions.is_logout_failed(principal).await {
            local_cleanup_ok = false;
        }

        let status = aggregate(&[ParticipantOutcome::from(status)], local_cleanup_ok);

        match origin {
            FlowOrigin::ServiceProvider {
                request_id,
                issuer,
                response_destination,
                relay_state,
            } => {
                tracing::info!(
                    principal = %principal,
                    issuer = %issuer,
                    in_response_to = %request_id,
                    status = ?status,
                    "Logout completed, answering initiator"
                );
                let response = self.builder.build_logout_response(
                    &request_id,
                    &response_destination,
                    status.status_code(),
                    binding,
                    relay_state.as_deref(),
                )?;
                Ok(LogoutAction::SendResponse(response))
            }
            FlowOrigin::IdentityProvider { relay_state } => {
                tracing::info!(
                    principal = %principal,
                    status = ?status,
                    "IdP-initiated logout completed"
                );
                Ok(LogoutAction::Completed {
                    status,
                    relay_state,
                })
            }
        }
    }

    /// Signature check against a peer's registered certificate, applying
    /// the configured policy for unsigned messages.
    fn check_peer_signature(
        &self,
        inbound: &DecodedMessage,
        peer: &SessionParticipant,
    ) -> Result<(), SloError> {
        match inbound.check_signature(&peer.certificate)? {
            SignatureCheck::Verified => {
                tracing::debug!(issuer = %peer.service_provider_id, "Signature verified");
                Ok(())
            }
            SignatureCheck::Unsigned if self.config.require_signed_messages => Err(
                SloError::SignatureInvalid("Message is not signed".to_string()),
            ),
            SignatureCheck::Unsigned => {
                tracing::warn!(
                    issuer = %peer.service_provider_id,
                    "Accepting unsigned logout message"
                );
                Ok(())
            }
        }
    }
}

/// Participant logout URLs must be absolute http(s) URLs.
fn is_reachable_logout_url(url: &str) -> bool {
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
}
