//! HTTP-Redirect and HTTP-POST binding codecs for logout messages
//!
//! Redirect: `xml -> raw deflate -> base64 -> URL-encode`, with an optional
//! detached signature over the query octets.
//! POST: `xml (enveloped-signed) -> base64`, delivered by an auto-submit form.

use crate::error::{SloError, SloResult};
use crate::saml::{parse_certificate, SignatureAlgorithm, SigningCredentials};
use crate::services::xml_signature;
use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use utoipa::ToSchema;

/// Maximum decompressed size for deflate decoding (64 KB)
const MAX_DECOMPRESSED_SIZE: u64 = 64 * 1024;

/// Maximum encoded size of a Redirect-binding message parameter (128 KB)
const MAX_ENCODED_SIZE_REDIRECT: usize = 128 * 1024;

/// Maximum encoded size of a POST-binding message field (512 KB)
const MAX_ENCODED_SIZE_POST: usize = 512 * 1024;

/// Maximum RelayState length in bytes
pub const MAX_RELAY_STATE_LENGTH: usize = 1024;

/// SAML transport binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Binding {
    Redirect,
    Post,
}

/// Whether a message travels as `SAMLRequest` or `SAMLResponse`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Request,
    Response,
}

impl MessageKind {
    #[must_use]
    pub fn param_name(self) -> &'static str {
        match self {
            Self::Request => "SAMLRequest",
            Self::Response => "SAMLResponse",
        }
    }
}

/// Form or JSON body of an HTTP-POST binding message
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
pub struct PostParams {
    #[serde(rename = "SAMLRequest", default)]
    pub saml_request: Option<String>,
    #[serde(rename = "SAMLResponse", default)]
    pub saml_response: Option<String>,
    #[serde(rename = "RelayState", default)]
    pub relay_state: Option<String>,
}

/// A logout message decoded from either binding, signature not yet checked
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    pub binding: Binding,
    pub kind: MessageKind,
    pub xml: String,
    pub relay_state: Option<String>,
    /// Query-string signature, Redirect binding only
    pub detached_signature: Option<DetachedSignature>,
}

/// Outcome of a successful signature check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    Verified,
    Unsigned,
}

impl DecodedMessage {
    /// Verify the sender's signature once its certificate is known.
    ///
    /// Returns `Unsigned` when the message carries no signature at all; an
    /// invalid signature is an error.
    pub fn check_signature(&self, certificate_pem: &str) -> SloResult<SignatureCheck> {
        let signed = match self.binding {
            Binding::Redirect => self.detached_signature.is_some(),
            Binding::Post => xml_signature::has_enveloped_signature(&self.xml),
        };
        if !signed {
            return Ok(SignatureCheck::Unsigned);
        }

        let certificate = parse_certificate(certificate_pem)
            .map_err(|e| SloError::SignatureInvalid(e.to_string()))?;
        match (&self.binding, &self.detached_signature) {
            (Binding::Redirect, Some(signature)) => signature.verify(&certificate)?,
            _ => xml_signature::verify_enveloped(&self.xml, &certificate)?,
        }
        Ok(SignatureCheck::Verified)
    }
}

/// Detached Redirect-binding signature with the octets it covers
#[derive(Debug, Clone)]
pub struct DetachedSignature {
    signed_octets: String,
    algorithm_uri: String,
    signature: Vec<u8>,
}

impl DetachedSignature {
    /// Exact octets the sender signed, rebuilt from the raw query values.
    #[must_use]
    pub fn signed_octets(&self) -> &str {
        &self.signed_octets
    }

    pub fn algorithm(&self) -> SloResult<SignatureAlgorithm> {
        SignatureAlgorithm::from_uri(&self.algorithm_uri)
    }

    pub fn verify(&self, certificate: &openssl::x509::X509) -> SloResult<()> {
        let algorithm = self
            .algorithm()
            .map_err(|e| SloError::SignatureInvalid(e.to_string()))?;
        xml_signature::verify_detached(
            self.signed_octets.as_bytes(),
            &self.signature,
            certificate,
            algorithm,
        )
    }
}

/// Message encoded for one binding, ready for the HTTP layer
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub binding: Binding,
    pub kind: MessageKind,
    pub destination: String,
    /// Signed (POST) or unsigned (Redirect) XML as sent
    pub xml: String,
    pub relay_state: Option<String>,
    pub encoded: EncodedMessage,
}

#[derive(Debug, Clone)]
pub enum EncodedMessage {
    /// Full redirect target including the query string
    Redirect { location: String },
    /// Base64 value of the hidden form field
    Post { saml_value: String },
}

/// Sign and encode `xml` for `binding`.
pub fn encode(
    binding: Binding,
    kind: MessageKind,
    destination: &str,
    xml: &str,
    relay_state: Option<&str>,
    credentials: &SigningCredentials,
    algorithm: SignatureAlgorithm,
) -> SloResult<OutboundMessage> {
    let (xml, encoded) = match binding {
        Binding::Redirect => {
            let query = encode_redirect(kind, xml, relay_state, Some((credentials, algorithm)))?;
            let separator = if destination.contains('?') { '&' } else { '?' };
            (
                xml.to_string(),
                EncodedMessage::Redirect {
                    location: format!("{destination}{separator}{query}"),
                },
            )
        }
        Binding::Post => {
            let signed = xml_signature::sign_enveloped(xml, credentials, algorithm)?;
            let saml_value = encode_post(&signed);
            (signed, EncodedMessage::Post { saml_value })
        }
    };

    Ok(OutboundMessage {
        binding,
        kind,
        destination: destination.to_string(),
        xml,
        relay_state: relay_state.map(String::from),
        encoded,
    })
}

/// Redirect-binding query string (without the leading `?`).
///
/// When `signing` is given, `SigAlg` and `Signature` are appended and the
/// signature covers `<param>=..&RelayState=..&SigAlg=..` in that order.
pub fn encode_redirect(
    kind: MessageKind,
    xml: &str,
    relay_state: Option<&str>,
    signing: Option<(&SigningCredentials, SignatureAlgorithm)>,
) -> SloResult<String> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(xml.as_bytes())
        .map_err(|e| SloError::InternalError(format!("Deflate encode failed: {e}")))?;
    let deflated = encoder
        .finish()
        .map_err(|e| SloError::InternalError(format!("Deflate encode failed: {e}")))?;

    let mut query = format!(
        "{}={}",
        kind.param_name(),
        urlencoding::encode(&STANDARD.encode(deflated))
    );
    if let Some(rs) = relay_state {
        query.push_str("&RelayState=");
        query.push_str(&urlencoding::encode(rs));
    }

    if let Some((credentials, algorithm)) = signing {
        query.push_str("&SigAlg=");
        query.push_str(&urlencoding::encode(algorithm.uri()));
        let signature = xml_signature::sign_detached(query.as_bytes(), credentials, algorithm)?;
        query.push_str("&Signature=");
        query.push_str(&urlencoding::encode(&STANDARD.encode(signature)));
    }

    Ok(query)
}

/// Decode a Redirect-binding message from the raw (still encoded) query string.
pub fn decode_redirect(raw_query: &str) -> SloResult<DecodedMessage> {
    let mut saml_request = None;
    let mut saml_response = None;
    let mut relay_state = None;
    let mut sig_alg = None;
    let mut signature = None;

    for pair in raw_query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let slot = match key {
            "SAMLRequest" => &mut saml_request,
            "SAMLResponse" => &mut saml_response,
            "RelayState" => &mut relay_state,
            "SigAlg" => &mut sig_alg,
            "Signature" => &mut signature,
            _ => continue,
        };
        if slot.replace(value).is_some() {
            return Err(SloError::MalformedMessage(format!(
                "Duplicate query parameter: {key}"
            )));
        }
    }

    let (kind, raw_message) = match (saml_request, saml_response) {
        (Some(req), None) => (MessageKind::Request, req),
        (None, Some(resp)) => (MessageKind::Response, resp),
        (Some(_), Some(_)) => {
            return Err(SloError::MalformedMessage(
                "Both SAMLRequest and SAMLResponse present".to_string(),
            ))
        }
        (None, None) => {
            return Err(SloError::MalformedMessage(
                "No SAMLRequest or SAMLResponse parameter".to_string(),
            ))
        }
    };

    if raw_message.len() > MAX_ENCODED_SIZE_REDIRECT {
        return Err(SloError::MalformedMessage(format!(
            "Encoded {} exceeds maximum size ({} > {} bytes)",
            kind.param_name(),
            raw_message.len(),
            MAX_ENCODED_SIZE_REDIRECT
        )));
    }

    let message_b64 = url_decode(raw_message, kind.param_name())?;
    let deflated = STANDARD
        .decode(message_b64.as_bytes())
        .map_err(|e| SloError::MalformedMessage(format!("Base64 decode failed: {e}")))?;
    let xml = inflate(&deflated)?;

    let decoded_relay_state = relay_state
        .map(|rs| url_decode(rs, "RelayState"))
        .transpose()?;
    check_relay_state(decoded_relay_state.as_deref())?;

    let detached_signature = match (sig_alg, signature) {
        (Some(alg), Some(sig)) => {
            let mut signed_octets = format!("{}={}", kind.param_name(), raw_message);
            if let Some(rs) = relay_state {
                signed_octets.push_str("&RelayState=");
                signed_octets.push_str(rs);
            }
            signed_octets.push_str("&SigAlg=");
            signed_octets.push_str(alg);

            let signature_b64 = url_decode(sig, "Signature")?;
            let signature = STANDARD
                .decode(signature_b64.as_bytes())
                .map_err(|e| {
                    SloError::MalformedMessage(format!("Invalid signature encoding: {e}"))
                })?;

            Some(DetachedSignature {
                signed_octets,
                algorithm_uri: url_decode(alg, "SigAlg")?,
                signature,
            })
        }
        (None, None) => None,
        _ => {
            return Err(SloError::MalformedMessage(
                "SigAlg and Signature must be sent together".to_string(),
            ))
        }
    };

    Ok(DecodedMessage {
        binding: Binding::Redirect,
        kind,
        xml,
        relay_state: decoded_relay_state,
        detached_signature,
    })
}

/// POST-binding field value: plain base64, no compression.
#[must_use]
pub fn encode_post(xml: &str) -> String {
    STANDARD.encode(xml.as_bytes())
}

/// Decode a POST-binding message from its form fields.
pub fn decode_post(params: &PostParams) -> SloResult<DecodedMessage> {
    let (kind, encoded) = match (&params.saml_request, &params.saml_response) {
        (Some(req), None) => (MessageKind::Request, req),
        (None, Some(resp)) => (MessageKind::Response, resp),
        (Some(_), Some(_)) => {
            return Err(SloError::MalformedMessage(
                "Both SAMLRequest and SAMLResponse present".to_string(),
            ))
        }
        (None, None) => {
            return Err(SloError::MalformedMessage(
                "No SAMLRequest or SAMLResponse field".to_string(),
            ))
        }
    };

    if encoded.len() > MAX_ENCODED_SIZE_POST {
        return Err(SloError::MalformedMessage(format!(
            "Encoded {} exceeds maximum size ({} > {} bytes)",
            kind.param_name(),
            encoded.len(),
            MAX_ENCODED_SIZE_POST
        )));
    }

    // Form encoders sometimes wrap long base64 values.
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let decoded = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| SloError::MalformedMessage(format!("Base64 decode failed: {e}")))?;
    let xml = String::from_utf8(decoded)
        .map_err(|e| SloError::MalformedMessage(format!("Invalid UTF-8: {e}")))?;

    check_relay_state(params.relay_state.as_deref())?;

    Ok(DecodedMessage {
        binding: Binding::Post,
        kind,
        xml,
        relay_state: params.relay_state.clone(),
        detached_signature: None,
    })
}

/// `RelayState` from a raw query string that carries no SAML message,
/// decoded the same way as in [`decode_redirect`].
pub fn relay_state_from_query(raw_query: &str) -> SloResult<Option<String>> {
    let mut values = raw_query
        .split('&')
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .filter(|(key, _)| *key == "RelayState");
    let Some((_, raw)) = values.next() else {
        return Ok(None);
    };
    if values.next().is_some() {
        return Err(SloError::MalformedMessage(
            "Duplicate query parameter: RelayState".to_string(),
        ));
    }
    let relay_state = url_decode(raw, "RelayState")?;
    check_relay_state(Some(&relay_state))?;
    Ok(Some(relay_state))
}

/// Percent-decoding only: `+` stays literal so base64 payloads survive.
fn url_decode(raw: &str, param: &str) -> SloResult<String> {
    urlencoding::decode(raw)
        .map(|v| v.into_owned())
        .map_err(|e| SloError::MalformedMessage(format!("Invalid URL encoding in {param}: {e}")))
}

fn inflate(deflated: &[u8]) -> SloResult<String> {
    let decoder = DeflateDecoder::new(deflated);
    let mut xml = String::new();
    decoder
        .take(MAX_DECOMPRESSED_SIZE + 1)
        .read_to_string(&mut xml)
        .map_err(|e| SloError::MalformedMessage(format!("Deflate decode failed: {e}")))?;

    if xml.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(SloError::MalformedMessage(
            "Decompressed message exceeds maximum size limit (64 KB)".to_string(),
        ));
    }
    Ok(xml)
}

fn check_relay_state(relay_state: Option<&str>) -> SloResult<()> {
    match relay_state {
        Some(rs) if rs.len() > MAX_RELAY_STATE_LENGTH => Err(SloError::MalformedMessage(format!(
            "RelayState exceeds maximum length ({} > {MAX_RELAY_STATE_LENGTH})",
            rs.len()
        ))),
        _ => Ok(()),
    }
}
