//! Session participants: the Service Providers sharing a principal's IdP session
//!
//! The store hands entries out with atomic take/pop operations so a
//! participant is dispatched at most once per logout.

use super::types::SessionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The end user whose IdP session is being logged out
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal(String);

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One SP holding a live session for the principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParticipant {
    /// SP entity ID, matched against the `Issuer` of its messages
    pub service_provider_id: String,
    pub name_id: String,
    pub name_id_format: Option<String>,
    pub session_index: Option<String>,
    pub service_provider_logout_url: String,
    /// SP signing certificate (PEM, armour optional)
    pub certificate: String,
}

/// Storage of session participants per principal
#[async_trait]
pub trait ParticipantStore: Send + Sync {
    /// All participants still holding a session, in store order
    async fn get_active_sessions(
        &self,
        principal: &Principal,
    ) -> Result<Vec<SessionParticipant>, SessionError>;

    /// Remove and return the participant for `service_provider_id`
    async fn take_participant(
        &self,
        principal: &Principal,
        service_provider_id: &str,
    ) -> Result<Option<SessionParticipant>, SessionError>;

    /// Remove and return the first remaining participant
    async fn pop_next(
        &self,
        principal: &Principal,
    ) -> Result<Option<SessionParticipant>, SessionError>;

    /// Record a participant after assertion issuance (upsert by SP)
    async fn record(
        &self,
        principal: &Principal,
        participant: SessionParticipant,
    ) -> Result<(), SessionError>;
}

/// In-memory participant store
#[derive(Debug, Default, Clone)]
pub struct InMemoryParticipantStore {
    sessions: Arc<RwLock<HashMap<Principal, Vec<SessionParticipant>>>>,
}

impl InMemoryParticipantStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ParticipantStore for InMemoryParticipantStore {
    async fn get_active_sessions(
        &self,
        principal: &Principal,
    ) -> Result<Vec<SessionParticipant>, SessionError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(principal).cloned().unwrap_or_default())
    }

    async fn take_participant(
        &self,
        principal: &Principal,
        service_provider_id: &str,
    ) -> Result<Option<SessionParticipant>, SessionError> {
        let mut sessions = self.sessions.write().await;
        let Some(list) = sessions.get_mut(principal) else {
            return Ok(None);
        };
        let taken = list
            .iter()
            .position(|p| p.service_provider_id == service_provider_id)
            .map(|idx| list.remove(idx));
        if list.is_empty() {
            sessions.remove(principal);
        }
        Ok(taken)
    }

    async fn pop_next(
        &self,
        principal: &Principal,
    ) -> Result<Option<SessionParticipant>, SessionError> {
        let mut sessions = self.sessions.write().await;
        let Some(list) = sessions.get_mut(principal) else {
            return Ok(None);
        };
        let next = if list.is_empty() {
            None
        } else {
            Some(list.remove(0))
        };
        if list.is_empty() {
            sessions.remove(principal);
        }
        Ok(next)
    }

    async fn record(
        &self,
        principal: &Principal,
        participant: SessionParticipant,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let list = sessions.entry(principal.clone()).or_default();
        match list
            .iter_mut()
            .find(|p| p.service_provider_id == participant.service_provider_id)
        {
            Some(existing) => *existing = participant,
            None => list.push(participant),
        }
        Ok(())
    }
}
