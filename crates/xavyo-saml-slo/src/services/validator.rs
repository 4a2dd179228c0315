//! Structural checks on a decoded logout message

use crate::error::{SloError, SloResult};
use crate::services::logout_parser::SamlMessage;

/// Check Issuer, NameID and Destination of `message`.
///
/// Checks run in that order, so a message without an Issuer is always
/// reported as [`SloError::MissingIssuer`] whatever else is wrong with it.
pub fn validate(message: &SamlMessage, expected_destination: &str) -> SloResult<()> {
    match message.issuer() {
        Some(issuer) if !issuer.trim().is_empty() => {}
        _ => return Err(SloError::MissingIssuer),
    }

    if let SamlMessage::Request(request) = message {
        if request
            .name_id
            .as_deref()
            .map_or(true, |name_id| name_id.trim().is_empty())
        {
            return Err(SloError::MalformedMessage(
                "LogoutRequest has no NameID".to_string(),
            ));
        }
    }

    if let Some(destination) = message.destination() {
        if destination != expected_destination {
            return Err(SloError::DestinationMismatch {
                expected: expected_destination.to_string(),
                actual: destination.to_string(),
            });
        }
    }

    Ok(())
}
