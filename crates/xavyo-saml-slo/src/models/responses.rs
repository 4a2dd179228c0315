//! Request and response types for the logout endpoint

use crate::services::status::LogoutStatus;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Redirect-binding query parameters
///
/// Documentation only: the handler reads the raw query string so the
/// signed octets can be rebuilt exactly as sent.
#[derive(Debug, Deserialize, IntoParams)]
pub struct SloRedirectQuery {
    #[serde(rename = "SAMLRequest")]
    pub saml_request: Option<String>,
    #[serde(rename = "SAMLResponse")]
    pub saml_response: Option<String>,
    #[serde(rename = "RelayState")]
    pub relay_state: Option<String>,
    #[serde(rename = "SigAlg")]
    pub sig_alg: Option<String>,
    #[serde(rename = "Signature")]
    pub signature: Option<String>,
}

/// Summary returned when an IdP-initiated logout ends without a redirect target
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogoutCompletion {
    pub status: LogoutStatus,
    /// SAML `StatusCode` URN equivalent of `status`
    pub status_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_state: Option<String>,
}

impl LogoutCompletion {
    #[must_use]
    pub fn new(status: LogoutStatus, relay_state: Option<String>) -> Self {
        Self {
            status,
            status_code: status.status_code().to_string(),
            relay_state,
        }
    }
}

/// Auto-submitting HTML form carrying a POST-binding message
#[must_use]
pub fn generate_auto_submit_form(
    action: &str,
    field_name: &str,
    saml_value: &str,
    relay_state: Option<&str>,
) -> String {
    let relay_input = relay_state
        .map(|rs| {
            format!(
                r#"<input type="hidden" name="RelayState" value="{}"/>"#,
                html_escape(rs)
            )
        })
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>SAML Logout</title>
</head>
<body onload="document.forms[0].submit()">
    <noscript>
        <p>JavaScript is disabled. Click the button below to continue.</p>
    </noscript>
    <form method="POST" action="{}">
        <input type="hidden" name="{}" value="{}"/>
        {}
        <noscript>
            <input type="submit" value="Continue"/>
        </noscript>
    </form>
</body>
</html>"#,
        html_escape(action),
        html_escape(field_name),
        html_escape(saml_value),
        relay_input
    )
}

/// HTML escape for XSS prevention
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
