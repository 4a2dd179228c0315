//! SAML LogoutRequest and LogoutResponse builder

use crate::error::SloResult;
use crate::saml::{
    xml_escape, SignatureAlgorithm, SigningCredentials, ASSERTION_NS, CONSENT_UNSPECIFIED,
    PROTOCOL_NS,
};
use crate::services::binding::{self, Binding, MessageKind, OutboundMessage};
use crate::session::SessionParticipant;
use uuid::Uuid;

/// Who a LogoutRequest is addressed to and which session it ends
#[derive(Debug, Clone, Copy)]
pub struct LogoutTarget<'a> {
    pub destination: &'a str,
    pub name_id: &'a str,
    pub name_id_format: Option<&'a str>,
    pub session_index: Option<&'a str>,
}

impl<'a> From<&'a SessionParticipant> for LogoutTarget<'a> {
    fn from(participant: &'a SessionParticipant) -> Self {
        Self {
            destination: &participant.service_provider_logout_url,
            name_id: &participant.name_id,
            name_id_format: participant.name_id_format.as_deref(),
            session_index: participant.session_index.as_deref(),
        }
    }
}

/// Builder for signed LogoutRequest and LogoutResponse messages
#[derive(Debug, Clone)]
pub struct SloBuilder {
    issuer: String,
    credentials: SigningCredentials,
    algorithm: SignatureAlgorithm,
}

impl SloBuilder {
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        credentials: SigningCredentials,
        algorithm: SignatureAlgorithm,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            credentials,
            algorithm,
        }
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Build, sign and encode a LogoutRequest. Returns the new request ID
    /// together with the encoded message.
    pub fn build_logout_request(
        &self,
        target: LogoutTarget<'_>,
        binding: Binding,
        relay_state: Option<&str>,
    ) -> SloResult<(String, OutboundMessage)> {
        let request_id = format!("_lr_{}", Uuid::new_v4());
        let xml = self.render_logout_request(&request_id, &target);
        let message = binding::encode(
            binding,
            MessageKind::Request,
            target.destination,
            &xml,
            relay_state,
            &self.credentials,
            self.algorithm,
        )?;
        Ok((request_id, message))
    }

    /// Build, sign and encode a LogoutResponse carrying `status_code`.
    pub fn build_logout_response(
        &self,
        in_response_to: &str,
        destination: &str,
        status_code: &str,
        binding: Binding,
        relay_state: Option<&str>,
    ) -> SloResult<OutboundMessage> {
        let response_id = format!("_lresp_{}", Uuid::new_v4());
        let xml =
            self.render_logout_response(&response_id, in_response_to, destination, status_code);
        binding::encode(
            binding,
            MessageKind::Response,
            destination,
            &xml,
            relay_state,
            &self.credentials,
            self.algorithm,
        )
    }

    fn render_logout_request(&self, request_id: &str, target: &LogoutTarget<'_>) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<samlp:LogoutRequest xmlns:samlp=\"");
        xml.push_str(PROTOCOL_NS);
        xml.push_str("\"\n    xmlns:saml=\"");
        xml.push_str(ASSERTION_NS);
        xml.push_str("\"\n    ID=\"");
        xml.push_str(&xml_escape(request_id));
        xml.push_str("\"\n    Version=\"2.0\"\n    IssueInstant=\"");
        xml.push_str(&issue_instant());
        xml.push_str("\"\n    Destination=\"");
        xml.push_str(&xml_escape(target.destination));
        xml.push_str("\"\n    Consent=\"");
        xml.push_str(CONSENT_UNSPECIFIED);
        xml.push_str("\">\n    <saml:Issuer>");
        xml.push_str(&xml_escape(&self.issuer));
        xml.push_str("</saml:Issuer>\n    <saml:NameID");
        if let Some(format) = target.name_id_format {
            xml.push_str(" Format=\"");
            xml.push_str(&xml_escape(format));
            xml.push('"');
        }
        xml.push('>');
        xml.push_str(&xml_escape(target.name_id));
        xml.push_str("</saml:NameID>");
        if let Some(index) = target.session_index {
            xml.push_str("\n    <samlp:SessionIndex>");
            xml.push_str(&xml_escape(index));
            xml.push_str("</samlp:SessionIndex>");
        }
        xml.push_str("\n</samlp:LogoutRequest>");
        xml
    }

    fn render_logout_response(
        &self,
        response_id: &str,
        in_response_to: &str,
        destination: &str,
        status_code: &str,
    ) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<samlp:LogoutResponse xmlns:samlp=\"");
        xml.push_str(PROTOCOL_NS);
        xml.push_str("\"\n    xmlns:saml=\"");
        xml.push_str(ASSERTION_NS);
        xml.push_str("\"\n    ID=\"");
        xml.push_str(&xml_escape(response_id));
        xml.push_str("\"\n    Version=\"2.0\"\n    IssueInstant=\"");
        xml.push_str(&issue_instant());
        xml.push_str("\"\n    Destination=\"");
        xml.push_str(&xml_escape(destination));
        xml.push_str("\"\n    InResponseTo=\"");
        xml.push_str(&xml_escape(in_response_to));
        xml.push_str("\">\n    <saml:Issuer>");
        xml.push_str(&xml_escape(&self.issuer));
        xml.push_str("</saml:Issuer>\n    <samlp:Status>\n        <samlp:StatusCode Value=\"");
        xml.push_str(&xml_escape(status_code));
        xml.push_str("\"/>\n    </samlp:Status>\n</samlp:LogoutResponse>");
        xml
    }
}

fn issue_instant() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
