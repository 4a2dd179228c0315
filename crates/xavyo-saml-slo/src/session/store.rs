//! Storage for in-flight logout flows

use super::types::{LogoutFlowState, SessionError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Logout flow store
#[async_trait]
pub trait LogoutFlowStore: Send + Sync {
    /// Store a flow under its dispatched request ID
    async fn store(&self, state: LogoutFlowState) -> Result<(), SessionError>;

    /// Remove and return the flow waiting on `request_id`
    ///
    /// A flow can be consumed once; expired flows are removed and reported
    /// as [`SessionError::Expired`].
    async fn consume(&self, request_id: &str) -> Result<LogoutFlowState, SessionError>;

    /// Clean up expired flows
    ///
    /// Returns the number of flows deleted
    async fn cleanup_expired(&self) -> Result<u64, SessionError>;
}

/// In-memory logout flow store
#[derive(Debug, Default, Clone)]
pub struct InMemoryLogoutFlowStore {
    flows: Arc<RwLock<HashMap<String, LogoutFlowState>>>,
}

impl InMemoryLogoutFlowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored flows, expired ones included
    pub async fn len(&self) -> usize {
        self.flows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.flows.read().await.is_empty()
    }
}

#[async_trait]
impl LogoutFlowStore for InMemoryLogoutFlowStore {
    async fn store(&self, state: LogoutFlowState) -> Result<(), SessionError> {
        let mut flows = self.flows.write().await;
        if flows.contains_key(&state.request_id) {
            return Err(SessionError::DuplicateRequestId(state.request_id));
        }
        flows.insert(state.request_id.clone(), state);
        Ok(())
    }

    async fn consume(&self, request_id: &str) -> Result<LogoutFlowState, SessionError> {
        let state = self
            .flows
            .write()
            .await
            .remove(request_id)
            .ok_or_else(|| SessionError::NotFound(request_id.to_string()))?;

        if state.is_expired() {
            return Err(SessionError::Expired {
                request_id: state.request_id,
                expired_at: state.expires_at,
            });
        }

        tracing::debug!(request_id = %request_id, "Logout flow consumed");
        Ok(state)
    }

    async fn cleanup_expired(&self) -> Result<u64, SessionError> {
        let mut flows = self.flows.write().await;
        let before_count = flows.len();

        flows.retain(|_, state| !state.is_expired());

        let deleted = (before_count - flows.len()) as u64;
        if deleted > 0 {
            tracing::debug!(deleted = deleted, "Cleaned up expired logout flows");
        }
        Ok(deleted)
    }
}
