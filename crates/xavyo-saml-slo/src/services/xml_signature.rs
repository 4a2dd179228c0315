//! XML digital signatures for logout messages
//!
//! Two independent paths:
//! - enveloped signatures embedded in the message root (HTTP-POST binding)
//! - detached signatures over raw octets (HTTP-Redirect query string)
//!
//! They share nothing except the RSA primitive in [`crate::saml::signing`].

use crate::error::{SloError, SloResult};
use crate::saml::signing::verify_with_certificate;
use crate::saml::{xml_escape, SignatureAlgorithm, SigningCredentials, XMLDSIG_NS};
use base64::{engine::general_purpose::STANDARD, Engine};
use openssl::hash::{hash, MessageDigest};
use openssl::x509::X509;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use xml_canonicalization::Canonicalizer;

const EXC_C14N_URI: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const ENVELOPED_SIGNATURE_URI: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

/// Sign `xml` with an enveloped signature over its root element.
///
/// The `ds:Signature` is inserted directly after the root's `Issuer` child,
/// where the SAML schema expects it.
pub fn sign_enveloped(
    xml: &str,
    credentials: &SigningCredentials,
    algorithm: SignatureAlgorithm,
) -> SloResult<String> {
    let layout = scan_layout(xml)?;
    let root_id = layout
        .root_id
        .as_deref()
        .ok_or_else(|| SloError::InternalError("Root element has no ID attribute".to_string()))?;
    let issuer_end = layout
        .issuer_end
        .ok_or_else(|| SloError::InternalError("Cannot find Issuer in message".to_string()))?;
    if layout.signature.is_some() {
        return Err(SloError::InternalError(
            "Message is already signed".to_string(),
        ));
    }

    let canonical_root = canonicalize_xml(&xml[layout.root_start..layout.root_end])
        .map_err(SloError::InternalError)?;
    let digest = hash(algorithm.message_digest(), canonical_root.as_bytes())
        .map_err(|e| SloError::InternalError(format!("Digest failed: {e}")))?;

    let signed_info = build_signed_info(root_id, algorithm, &STANDARD.encode(digest));
    let canonical_signed_info =
        canonicalize_xml(&signed_info).map_err(SloError::InternalError)?;
    let signature = credentials.sign(canonical_signed_info.as_bytes(), algorithm)?;

    let mut sig_xml = String::with_capacity(signed_info.len() + 512);
    sig_xml.push_str("<ds:Signature xmlns:ds=\"");
    sig_xml.push_str(XMLDSIG_NS);
    sig_xml.push_str("\">");
    sig_xml.push_str(&signed_info);
    sig_xml.push_str("<ds:SignatureValue>");
    sig_xml.push_str(&STANDARD.encode(&signature));
    sig_xml.push_str("</ds:SignatureValue><ds:KeyInfo><ds:X509Data/></ds:KeyInfo></ds:Signature>");

    let mut result = String::with_capacity(xml.len() + sig_xml.len());
    result.push_str(&xml[..issuer_end]);
    result.push_str(&sig_xml);
    result.push_str(&xml[issuer_end..]);
    Ok(result)
}

/// Verify the enveloped signature of `xml` against `certificate`.
///
/// Only a `Signature` that is a direct child of the root is considered, and
/// its reference must cover the root (`#<root ID>` or the empty URI).
pub fn verify_enveloped(xml: &str, certificate: &X509) -> SloResult<()> {
    let layout = scan_layout(xml).map_err(|e| SloError::SignatureInvalid(e.to_string()))?;
    let signature = layout
        .signature
        .as_ref()
        .ok_or_else(|| SloError::SignatureInvalid("No Signature element found".to_string()))?;
    let (signed_info_start, signed_info_end) = signature
        .signed_info
        .ok_or_else(|| SloError::SignatureInvalid("No SignedInfo element found".to_string()))?;

    if signature.reference_count != 1 {
        return Err(SloError::SignatureInvalid(format!(
            "Expected exactly one Reference, found {}",
            signature.reference_count
        )));
    }
    let reference_uri = signature.reference_uri.as_deref().unwrap_or("");
    if !reference_uri.is_empty() {
        let expected = format!("#{}", layout.root_id.as_deref().unwrap_or(""));
        if layout.root_id.is_none() || reference_uri != expected {
            return Err(SloError::SignatureInvalid(format!(
                "Reference URI {reference_uri} does not point at the signed message"
            )));
        }
    }

    check_canonicalization(signature)?;

    let digest_method = signature
        .digest_method
        .as_deref()
        .ok_or_else(|| SloError::SignatureInvalid("No DigestMethod found".to_string()))?;
    let digest_algorithm = SignatureAlgorithm::digest_from_uri(digest_method)
        .map_err(|e| SloError::SignatureInvalid(e.to_string()))?;
    verify_reference_digest(xml, &layout, signature, digest_algorithm)?;

    let signature_method = signature
        .signature_method
        .as_deref()
        .ok_or_else(|| SloError::SignatureInvalid("No SignatureMethod found".to_string()))?;
    let algorithm = SignatureAlgorithm::from_uri(signature_method)
        .map_err(|e| SloError::SignatureInvalid(e.to_string()))?;

    let signed_info = standalone_signed_info(
        &xml[signed_info_start..signed_info_end],
        signature.signed_info_qname.as_deref().unwrap_or("SignedInfo"),
    );
    let canonical_signed_info =
        canonicalize_xml(&signed_info).map_err(SloError::SignatureInvalid)?;

    let signature_bytes = decode_base64_text(&signature.signature_value)
        .map_err(|e| SloError::SignatureInvalid(format!("Invalid signature encoding: {e}")))?;

    tracing::debug!(algorithm = %algorithm, "Verifying enveloped signature");
    verify_with_certificate(
        certificate,
        canonical_signed_info.as_bytes(),
        &signature_bytes,
        algorithm,
    )
}

/// Whether the root element carries a direct-child `Signature`.
#[must_use]
pub fn has_enveloped_signature(xml: &str) -> bool {
    scan_layout(xml)
        .map(|layout| layout.signature.is_some())
        .unwrap_or(false)
}

/// Detached signature over raw octets (Redirect binding).
pub fn sign_detached(
    payload: &[u8],
    credentials: &SigningCredentials,
    algorithm: SignatureAlgorithm,
) -> SloResult<Vec<u8>> {
    credentials.sign(payload, algorithm)
}

/// Verify a detached signature over raw octets (Redirect binding).
pub fn verify_detached(
    payload: &[u8],
    signature: &[u8],
    certificate: &X509,
    algorithm: SignatureAlgorithm,
) -> SloResult<()> {
    tracing::debug!(algorithm = %algorithm, "Verifying detached signature");
    verify_with_certificate(certificate, payload, signature, algorithm)
}

fn build_signed_info(root_id: &str, algorithm: SignatureAlgorithm, digest_b64: &str) -> String {
    let mut signed_info = String::with_capacity(768);
    signed_info.push_str("<ds:SignedInfo xmlns:ds=\"");
    signed_info.push_str(XMLDSIG_NS);
    signed_info.push_str("\">");
    signed_info.push_str("<ds:CanonicalizationMethod Algorithm=\"");
    signed_info.push_str(EXC_C14N_URI);
    signed_info.push_str("\"/>");
    signed_info.push_str("<ds:SignatureMethod Algorithm=\"");
    signed_info.push_str(algorithm.uri());
    signed_info.push_str("\"/>");
    signed_info.push_str("<ds:Reference URI=\"#");
    signed_info.push_str(&xml_escape(root_id));
    signed_info.push_str("\">");
    signed_info.push_str("<ds:Transforms>");
    signed_info.push_str("<ds:Transform Algorithm=\"");
    signed_info.push_str(ENVELOPED_SIGNATURE_URI);
    signed_info.push_str("\"/>");
    signed_info.push_str("<ds:Transform Algorithm=\"");
    signed_info.push_str(EXC_C14N_URI);
    signed_info.push_str("\"/>");
    signed_info.push_str("</ds:Transforms>");
    signed_info.push_str("<ds:DigestMethod Algorithm=\"");
    signed_info.push_str(algorithm.digest_uri());
    signed_info.push_str("\"/>");
    signed_info.push_str("<ds:DigestValue>");
    signed_info.push_str(digest_b64);
    signed_info.push_str("</ds:DigestValue>");
    signed_info.push_str("</ds:Reference>");
    signed_info.push_str("</ds:SignedInfo>");
    signed_info
}

/// Only exclusive C14N is implemented, for `SignedInfo` and the reference.
fn check_canonicalization(signature: &SignatureLayout) -> SloResult<()> {
    match signature.canonicalization_method.as_deref() {
        Some(EXC_C14N_URI) => {}
        Some(other) => return Err(SloError::UnsupportedAlgorithm(other.to_string())),
        None => {
            return Err(SloError::SignatureInvalid(
                "No CanonicalizationMethod found".to_string(),
            ))
        }
    }
    match signature
        .transforms
        .iter()
        .find(|t| t.as_str() != ENVELOPED_SIGNATURE_URI && t.as_str() != EXC_C14N_URI)
    {
        Some(other) => Err(SloError::UnsupportedAlgorithm(format!("transform {other}"))),
        None => Ok(()),
    }
}

/// Recompute the digest of the root with the signature element removed.
fn verify_reference_digest(
    xml: &str,
    layout: &RootLayout,
    signature: &SignatureLayout,
    digest_algorithm: MessageDigest,
) -> SloResult<()> {
    let mut content = String::with_capacity(layout.root_end - layout.root_start);
    content.push_str(&xml[layout.root_start..signature.start]);
    content.push_str(&xml[signature.end..layout.root_end]);

    let canonicalized = canonicalize_xml(&content).map_err(SloError::SignatureInvalid)?;
    let computed = hash(digest_algorithm, canonicalized.as_bytes())
        .map_err(|e| SloError::SignatureInvalid(format!("Hash failed: {e}")))?;
    let expected = decode_base64_text(&signature.digest_value)
        .map_err(|e| SloError::SignatureInvalid(format!("Invalid digest encoding: {e}")))?;

    if expected.len() != computed.len() || !openssl::memcmp::eq(&expected, &computed) {
        return Err(SloError::SignatureInvalid("Digest mismatch".to_string()));
    }
    Ok(())
}

/// `SignedInfo` as a standalone document, with the signature namespace
/// declared on it when the sender only declared it on an ancestor.
fn standalone_signed_info(fragment: &str, qname: &str) -> String {
    let declaration = match qname.split_once(':') {
        Some((prefix, _)) => format!("xmlns:{prefix}="),
        None => "xmlns=".to_string(),
    };
    let start_tag_end = fragment.find('>').unwrap_or(fragment.len());
    if fragment[..start_tag_end].contains(&declaration) {
        return fragment.to_string();
    }

    let name_end = (1 + qname.len()).min(fragment.len());
    let mut result = String::with_capacity(fragment.len() + 64);
    result.push_str(&fragment[..name_end]);
    result.push(' ');
    result.push_str(&declaration);
    result.push('"');
    result.push_str(XMLDSIG_NS);
    result.push('"');
    result.push_str(&fragment[name_end..]);
    result
}

/// Exclusive C14N without comments.
fn canonicalize_xml(xml: &str) -> Result<String, String> {
    let mut output = Vec::new();
    Canonicalizer::read_from_str(xml)
        .write_to_writer(&mut output)
        .canonicalize(false)
        .map_err(|e| format!("Canonicalization failed: {e}"))?;

    String::from_utf8(output).map_err(|e| format!("Invalid UTF-8: {e}"))
}

fn decode_base64_text(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(compact)
}

/// Byte offsets of the parts of a message that signing cares about.
#[derive(Debug, Default)]
struct RootLayout {
    root_start: usize,
    root_end: usize,
    root_id: Option<String>,
    /// Offset just past the root's `Issuer` child
    issuer_end: Option<usize>,
    signature: Option<SignatureLayout>,
}

#[derive(Debug, Default)]
struct SignatureLayout {
    start: usize,
    end: usize,
    signed_info: Option<(usize, usize)>,
    signed_info_qname: Option<String>,
    signature_method: Option<String>,
    canonicalization_method: Option<String>,
    transforms: Vec<String>,
    reference_uri: Option<String>,
    reference_count: usize,
    digest_method: Option<String>,
    digest_value: String,
    signature_value: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TextTarget {
    DigestValue,
    SignatureValue,
}

fn local_name_of(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes().flatten().find_map(|attr| {
        if attr.key.local_name().as_ref() == name.as_bytes() {
            attr.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

fn scan_layout(xml: &str) -> SloResult<RootLayout> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut layout = RootLayout::default();
    let mut depth = 0usize;
    let mut in_signature = false;
    let mut signed_info_depth: Option<usize> = None;
    let mut text_target: Option<TextTarget> = None;
    let mut root_seen = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| SloError::MalformedMessage(format!("XML parse error: {e}")))?;
        let pos = reader.buffer_position() as usize;

        match event {
            Event::Start(e) => {
                depth += 1;
                let tag_start = xml[..pos].rfind('<').unwrap_or(0);
                let local = local_name_of(&e);

                if depth == 1 && !root_seen {
                    root_seen = true;
                    layout.root_start = tag_start;
                    layout.root_id = attribute(&e, "ID");
                } else if depth == 2 && local == "Signature" && layout.signature.is_none() {
                    in_signature = true;
                    layout.signature = Some(SignatureLayout {
                        start: tag_start,
                        ..SignatureLayout::default()
                    });
                } else if in_signature {
                    if let Some(sig) = layout.signature.as_mut() {
                        match local.as_str() {
                            "SignedInfo" if signed_info_depth.is_none() => {
                                signed_info_depth = Some(depth);
                                sig.signed_info = Some((tag_start, tag_start));
                                sig.signed_info_qname =
                                    Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                            }
                            "Reference" if signed_info_depth.is_some() => {
                                sig.reference_count += 1;
                                sig.reference_uri = attribute(&e, "URI");
                            }
                            "SignatureMethod" => sig.signature_method = attribute(&e, "Algorithm"),
                            "CanonicalizationMethod" => {
                                sig.canonicalization_method = attribute(&e, "Algorithm");
                            }
                            "Transform" => {
                                sig.transforms.push(attribute(&e, "Algorithm").unwrap_or_default());
                            }
                            "DigestMethod" => sig.digest_method = attribute(&e, "Algorithm"),
                            "DigestValue" => text_target = Some(TextTarget::DigestValue),
                            "SignatureValue" => text_target = Some(TextTarget::SignatureValue),
                            _ => {}
                        }
                    }
                }
            }
            Event::Empty(e) => {
                let element_depth = depth + 1;
                let local = local_name_of(&e);

                if element_depth == 1 && !root_seen {
                    root_seen = true;
                    layout.root_start = xml[..pos].rfind('<').unwrap_or(0);
                    layout.root_end = pos;
                    layout.root_id = attribute(&e, "ID");
                    break;
                } else if element_depth == 2 && local == "Issuer" && layout.issuer_end.is_none() {
                    layout.issuer_end = Some(pos);
                } else if in_signature {
                    if let Some(sig) = layout.signature.as_mut() {
                        match local.as_str() {
                            "SignatureMethod" => sig.signature_method = attribute(&e, "Algorithm"),
                            "CanonicalizationMethod" => {
                                sig.canonicalization_method = attribute(&e, "Algorithm");
                            }
                            "Transform" => {
                                sig.transforms.push(attribute(&e, "Algorithm").unwrap_or_default());
                            }
                            "DigestMethod" => sig.digest_method = attribute(&e, "Algorithm"),
                            "Reference" if signed_info_depth.is_some() => {
                                sig.reference_count += 1;
                                sig.reference_uri = attribute(&e, "URI");
                            }
                            _ => {}
                        }
                    }
                }
            }
            Event::End(e) => {
                let element_depth = depth;
                depth = depth.saturating_sub(1);
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();

                if element_depth == 1 {
                    layout.root_end = pos;
                    break;
                }
                if element_depth == 2 && local == "Issuer" && layout.issuer_end.is_none() {
                    layout.issuer_end = Some(pos);
                }
                if in_signature {
                    if let Some(sig) = layout.signature.as_mut() {
                        if element_depth == 2 && local == "Signature" {
                            sig.end = pos;
                            in_signature = false;
                        } else if signed_info_depth == Some(element_depth) {
                            if let Some((start, _)) = sig.signed_info {
                                sig.signed_info = Some((start, pos));
                            }
                            signed_info_depth = None;
                        }
                    }
                    text_target = None;
                }
            }
            Event::Text(t) => {
                if let (Some(target), Some(sig)) = (text_target, layout.signature.as_mut()) {
                    let text = t
                        .unescape()
                        .map_err(|e| SloError::MalformedMessage(format!("XML parse error: {e}")))?;
                    match target {
                        TextTarget::DigestValue => sig.digest_value.push_str(&text),
                        TextTarget::SignatureValue => sig.signature_value.push_str(&text),
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !root_seen || layout.root_end <= layout.root_start {
        return Err(SloError::MalformedMessage(
            "Message has no complete root element".to_string(),
        ));
    }
    if let Some(sig) = &layout.signature {
        if sig.end <= sig.start {
            return Err(SloError::MalformedMessage(
                "Unterminated Signature element".to_string(),
            ));
        }
    }

    Ok(layout)
}
