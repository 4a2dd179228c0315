//! SAML-specific utilities

pub mod signing;

pub use signing::{parse_certificate, SignatureAlgorithm, SigningCredentials};

/// SAML 2.0 protocol namespace
pub const PROTOCOL_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";

/// SAML 2.0 assertion namespace
pub const ASSERTION_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";

/// XML-DSig namespace
pub const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

/// Consent value carried on IdP-issued LogoutRequests
pub const CONSENT_UNSPECIFIED: &str = "urn:oasis:names:tc:SAML:2.0:consent:unspecified";

pub const NAMEID_FORMAT_UNSPECIFIED: &str =
    "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";

/// Escape text for use in XML element content or attribute values.
pub(crate) fn xml_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&apos;"),
            _ => result.push(c),
        }
    }
    result
}
