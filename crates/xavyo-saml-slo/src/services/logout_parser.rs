//! Parse incoming SAML `LogoutRequest` / `LogoutResponse` XML

use crate::error::{SloError, SloResult};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

const MAX_ID_LENGTH: usize = 256;
const MAX_ISSUER_LENGTH: usize = 1024;
const MAX_NAME_ID_LENGTH: usize = 4096;
const MAX_SESSION_INDEX_LENGTH: usize = 256;

/// Parsed `LogoutRequest`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutRequest {
    pub id: String,
    pub issuer: Option<String>,
    pub name_id: Option<String>,
    pub name_id_format: Option<String>,
    pub session_indexes: Vec<String>,
    pub destination: Option<String>,
    pub consent: Option<String>,
    pub issue_instant: Option<DateTime<Utc>>,
}

/// Parsed `LogoutResponse`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutResponse {
    pub id: String,
    pub in_response_to: Option<String>,
    pub issuer: Option<String>,
    pub destination: Option<String>,
    /// Top-level `StatusCode` value
    pub status_code: String,
    /// Nested second-level `StatusCode`, if any
    pub sub_status_code: Option<String>,
    pub issue_instant: Option<DateTime<Utc>>,
}

/// A logout protocol message, discriminated by its root element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamlMessage {
    Request(LogoutRequest),
    Response(LogoutResponse),
}

impl SamlMessage {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Request(r) => &r.id,
            Self::Response(r) => &r.id,
        }
    }

    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        match self {
            Self::Request(r) => r.issuer.as_deref(),
            Self::Response(r) => r.issuer.as_deref(),
        }
    }

    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        match self {
            Self::Request(r) => r.destination.as_deref(),
            Self::Response(r) => r.destination.as_deref(),
        }
    }
}

#[derive(Default)]
struct Fields {
    root: Option<String>,
    id: Option<String>,
    in_response_to: Option<String>,
    destination: Option<String>,
    consent: Option<String>,
    issue_instant: Option<String>,
    issuer: Option<String>,
    name_id: Option<String>,
    name_id_format: Option<String>,
    session_indexes: Vec<String>,
    status_codes: Vec<String>,
}

/// Parse a logout message from raw XML.
pub fn parse_message(xml: &str) -> SloResult<SamlMessage> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fields = Fields::default();
    // Local names of the currently open elements, root first
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = local_name(&e);
                handle_element(&mut fields, &path, &local, &e)?;
                path.push(local);
            }
            Ok(Event::Empty(e)) => {
                let local = local_name(&e);
                handle_element(&mut fields, &path, &local, &e)?;
                if path.is_empty() {
                    break;
                }
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| SloError::MalformedMessage(format!("XML parse error: {e}")))?
                    .to_string();
                match path_str(&path).as_slice() {
                    [_, "Issuer"] => fields.issuer = Some(text),
                    ["LogoutRequest", "NameID"] => fields.name_id = Some(text),
                    ["LogoutRequest", "SessionIndex"] => fields.session_indexes.push(text),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                path.pop();
                if path.is_empty() {
                    break;
                }
            }
            Ok(Event::DocType(_)) => {
                return Err(SloError::MalformedMessage(
                    "DOCTYPE declarations are not allowed".to_string(),
                ));
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SloError::MalformedMessage(format!("XML parse error: {e}")));
            }
            _ => {}
        }
    }

    build_message(fields)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn path_str(path: &[String]) -> Vec<&str> {
    path.iter().map(String::as_str).collect()
}

fn handle_element(
    fields: &mut Fields,
    path: &[String],
    local: &str,
    e: &BytesStart<'_>,
) -> SloResult<()> {
    if path.is_empty() {
        if fields.root.is_some() {
            return Err(SloError::MalformedMessage(
                "Multiple root elements".to_string(),
            ));
        }
        fields.root = Some(local.to_string());
        for attr in e.attributes().flatten() {
            let value = attr
                .unescape_value()
                .map_err(|e| SloError::MalformedMessage(format!("XML parse error: {e}")))?
                .to_string();
            match attr.key.local_name().as_ref() {
                b"ID" => fields.id = Some(value),
                b"InResponseTo" => fields.in_response_to = Some(value),
                b"Destination" => fields.destination = Some(value),
                b"Consent" => fields.consent = Some(value),
                b"IssueInstant" => fields.issue_instant = Some(value),
                _ => {}
            }
        }
        return Ok(());
    }

    match (path_str(path).as_slice(), local) {
        (["LogoutRequest"], "NameID") => {
            for attr in e.attributes().flatten() {
                if attr.key.local_name().as_ref() == b"Format" {
                    fields.name_id_format = attr.unescape_value().ok().map(|v| v.to_string());
                }
            }
        }
        (["LogoutResponse", "Status"], "StatusCode")
        | (["LogoutResponse", "Status", "StatusCode"], "StatusCode") => {
            for attr in e.attributes().flatten() {
                if attr.key.local_name().as_ref() == b"Value" {
                    if let Ok(value) = attr.unescape_value() {
                        fields.status_codes.push(value.to_string());
                    }
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn build_message(fields: Fields) -> SloResult<SamlMessage> {
    let root = fields
        .root
        .ok_or_else(|| SloError::MalformedMessage("Empty document".to_string()))?;
    if root != "LogoutRequest" && root != "LogoutResponse" {
        return Err(SloError::MalformedMessage(format!(
            "Unexpected root element: {root}"
        )));
    }
    // A missing Issuer outranks every other defect of a logout message.
    if fields
        .issuer
        .as_deref()
        .map_or(true, |issuer| issuer.trim().is_empty())
    {
        return Err(SloError::MissingIssuer);
    }

    let id = fields
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| SloError::MalformedMessage(format!("Missing {root} ID")))?;

    check_length("ID", Some(&id), MAX_ID_LENGTH)?;
    check_length("Issuer", fields.issuer.as_deref(), MAX_ISSUER_LENGTH)?;
    check_length("NameID", fields.name_id.as_deref(), MAX_NAME_ID_LENGTH)?;
    for index in &fields.session_indexes {
        check_length("SessionIndex", Some(index), MAX_SESSION_INDEX_LENGTH)?;
    }

    let issue_instant = fields
        .issue_instant
        .as_deref()
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| SloError::MalformedMessage(format!("Invalid IssueInstant: {e}")))
        })
        .transpose()?;

    if root == "LogoutRequest" {
        Ok(SamlMessage::Request(LogoutRequest {
            id,
            issuer: fields.issuer,
            name_id: fields.name_id,
            name_id_format: fields.name_id_format,
            session_indexes: fields.session_indexes,
            destination: fields.destination,
            consent: fields.consent,
            issue_instant,
        }))
    } else {
        let mut codes = fields.status_codes.into_iter();
        let status_code = codes.next().ok_or_else(|| {
            SloError::MalformedMessage("LogoutResponse has no StatusCode".to_string())
        })?;
        Ok(SamlMessage::Response(LogoutResponse {
            id,
            in_response_to: fields.in_response_to,
            issuer: fields.issuer,
            destination: fields.destination,
            status_code,
            sub_status_code: codes.next(),
            issue_instant,
        }))
    }
}

fn check_length(field: &str, value: Option<&str>, max: usize) -> SloResult<()> {
    match value {
        Some(v) if v.len() > max => Err(SloError::MalformedMessage(format!(
            "{field} too long (max {max})"
        ))),
        _ => Ok(()),
    }
}
