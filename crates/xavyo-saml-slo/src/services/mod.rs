//! Logout message processing and orchestration

pub mod binding;
pub mod logout_parser;
pub mod orchestrator;
pub mod slo_builder;
pub mod status;
pub mod validator;
pub mod xml_signature;

pub use logout_parser::{parse_message, LogoutRequest, LogoutResponse, SamlMessage};
pub use orchestrator::LogoutOrchestrator;
pub use slo_builder::SloBuilder;
