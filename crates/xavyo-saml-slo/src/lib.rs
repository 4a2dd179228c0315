//! SAML 2.0 Identity Provider Single Logout for xavyo
//!
//! This crate provides the `IdP` side of SAML Single Logout:
//! - SP-initiated logout (`LogoutRequest` from a participant)
//! - IdP-initiated logout of every participant in the session
//! - HTTP-Redirect and HTTP-POST bindings with signing and verification
//! - Server-side tracking of logout flows awaiting participant responses

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod saml;
pub mod services;
pub mod session;

pub use config::{ConfigError, SloConfig};
pub use error::{SloError, SloResult};
pub use handlers::SloState;
pub use router::{create_slo_state, slo_router};
pub use saml::{SignatureAlgorithm, SigningCredentials};
pub use services::binding::{Binding, DecodedMessage, OutboundMessage};
pub use services::orchestrator::{LogoutAction, LogoutOrchestrator};
pub use services::slo_builder::SloBuilder;
pub use services::status::LogoutStatus;
pub use session::{
    IdpSessionHandler, InMemoryIdpSessionHandler, InMemoryLogoutFlowStore,
    InMemoryParticipantStore, LogoutFlowStore, ParticipantStore, Principal, SessionParticipant,
};
