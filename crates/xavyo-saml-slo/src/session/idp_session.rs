//! The IdP's own session for a principal

use super::sp_session::Principal;
use super::types::SessionError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Local IdP session teardown
#[async_trait]
pub trait IdpSessionHandler: Send + Sync {
    /// Destroy the IdP session of `principal`
    async fn clear_idp_session(&self, principal: &Principal) -> Result<(), SessionError>;

    /// Remember that logout of `principal` did not fully succeed
    async fn set_logout_status_failed(&self, principal: &Principal);

    async fn is_logout_failed(&self, principal: &Principal) -> bool;
}

/// In-memory IdP sessions
#[derive(Debug, Default, Clone)]
pub struct InMemoryIdpSessionHandler {
    active: Arc<RwLock<HashSet<Principal>>>,
    failed: Arc<RwLock<HashSet<Principal>>>,
}

impl InMemoryIdpSessionHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an IdP session, as the login flow would.
    pub async fn open(&self, principal: &Principal) {
        self.active.write().await.insert(principal.clone());
        self.failed.write().await.remove(principal);
    }

    pub async fn is_active(&self, principal: &Principal) -> bool {
        self.active.read().await.contains(principal)
    }
}

#[async_trait]
impl IdpSessionHandler for InMemoryIdpSessionHandler {
    async fn clear_idp_session(&self, principal: &Principal) -> Result<(), SessionError> {
        if self.active.write().await.remove(principal) {
            tracing::info!(principal = %principal, "IdP session cleared");
        }
        Ok(())
    }

    async fn set_logout_status_failed(&self, principal: &Principal) {
        self.failed.write().await.insert(principal.clone());
    }

    async fn is_logout_failed(&self, principal: &Principal) -> bool {
        self.failed.read().await.contains(principal)
    }
}
