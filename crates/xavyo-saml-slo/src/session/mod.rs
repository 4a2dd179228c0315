//! Session collaborators of the logout engine
//!
//! - [`ParticipantStore`]: which SPs share the principal's session
//! - [`IdpSessionHandler`]: the IdP's own session
//! - [`LogoutFlowStore`]: logout flows waiting on a participant response

pub mod idp_session;
pub mod sp_session;
pub mod store;
pub mod types;

pub use idp_session::{IdpSessionHandler, InMemoryIdpSessionHandler};
pub use sp_session::{InMemoryParticipantStore, ParticipantStore, Principal, SessionParticipant};
pub use store::{InMemoryLogoutFlowStore, LogoutFlowStore};
pub use types::{
    FlowOrigin, LogoutFlowState, SessionError, CLOCK_SKEW_GRACE_SECONDS, DEFAULT_FLOW_TTL_SECONDS,
    MAX_FLOW_TTL_SECONDS,
};
