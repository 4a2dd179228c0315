//! SAML Single Logout handlers

use crate::error::{SloError, SloResult};
use crate::models::{generate_auto_submit_form, LogoutCompletion, SloRedirectQuery};
use crate::services::binding::{
    decode_post, decode_redirect, relay_state_from_query, Binding, EncodedMessage,
    OutboundMessage, PostParams,
};
use crate::services::orchestrator::{LogoutAction, LogoutOrchestrator};
use crate::session::Principal;
use axum::{
    body::Bytes,
    extract::{RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;

/// Application state for logout handlers
#[derive(Clone)]
pub struct SloState {
    pub orchestrator: Arc<LogoutOrchestrator>,
}

/// Logout over HTTP-Redirect, or IdP-initiated logout when no message is sent
///
/// GET /logout
#[utoipa::path(
    get,
    path = "/logout",
    params(SloRedirectQuery),
    responses(
        (status = 302, description = "Redirect carrying the next LogoutRequest or the final LogoutResponse"),
        (status = 200, description = "IdP-initiated logout summary", body = LogoutCompletion),
        (status = 400, description = "Malformed message or missing Issuer"),
        (status = 401, description = "Not authenticated"),
    ),
    tag = "SAML SLO"
)]
pub async fn slo_redirect(
    State(state): State<SloState>,
    principal: Option<Extension<Principal>>,
    RawQuery(query): RawQuery,
) -> Response {
    let principal = principal.map(|Extension(p)| p);
    match handle_slo_redirect(&state, principal, query.unwrap_or_default()).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "SLO redirect failed");
            e.into_response()
        }
    }
}

async fn handle_slo_redirect(
    state: &SloState,
    principal: Option<Principal>,
    query: String,
) -> SloResult<Response> {
    if !carries_saml_message(&query) {
        let principal = principal.ok_or(SloError::NotAuthenticated)?;
        let relay_state = relay_state_from_query(&query)?;
        let action = state
            .orchestrator
            .initiate_idp_logout(&principal, Binding::Redirect, relay_state)
            .await?;
        return Ok(action_response(state, action));
    }

    let inbound = decode_redirect(&query)?;
    let action = state.orchestrator.handle(principal.as_ref(), inbound).await?;
    Ok(action_response(state, action))
}

/// Logout over HTTP-POST (form-urlencoded or JSON body)
///
/// POST /logout
#[utoipa::path(
    post,
    path = "/logout",
    request_body(content = PostParams, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Auto-submit form carrying the next LogoutRequest or the final LogoutResponse"),
        (status = 400, description = "Malformed message or missing Issuer"),
        (status = 401, description = "Not authenticated"),
    ),
    tag = "SAML SLO"
)]
pub async fn slo_post(
    State(state): State<SloState>,
    principal: Option<Extension<Principal>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let principal = principal.map(|Extension(p)| p);
    match handle_slo_post(&state, principal, &headers, &body).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "SLO POST failed");
            e.into_response()
        }
    }
}

async fn handle_slo_post(
    state: &SloState,
    principal: Option<Principal>,
    headers: &HeaderMap,
    body: &[u8],
) -> SloResult<Response> {
    let params = parse_post_body(headers, body)?;
    let inbound = decode_post(&params)?;
    let action = state.orchestrator.handle(principal.as_ref(), inbound).await?;
    Ok(action_response(state, action))
}

fn parse_post_body(headers: &HeaderMap, body: &[u8]) -> SloResult<PostParams> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));

    if is_json {
        return serde_json::from_slice(body)
            .map_err(|e| SloError::MalformedMessage(format!("Invalid JSON body: {e}")));
    }

    let mut params = PostParams::default();
    for (key, value) in url::form_urlencoded::parse(body) {
        match &*key {
            "SAMLRequest" => params.saml_request = Some(value.into_owned()),
            "SAMLResponse" => params.saml_response = Some(value.into_owned()),
            "RelayState" => params.relay_state = Some(value.into_owned()),
            _ => {}
        }
    }
    Ok(params)
}

fn carries_saml_message(query: &str) -> bool {
    query.split('&').any(|pair| {
        let key = pair.split_once('=').map_or(pair, |(k, _)| k);
        key == "SAMLRequest" || key == "SAMLResponse"
    })
}

fn action_response(state: &SloState, action: LogoutAction) -> Response {
    match action {
        LogoutAction::SendRequest(message) | LogoutAction::SendResponse(message) => {
            outbound_response(message)
        }
        LogoutAction::Completed {
            status,
            relay_state,
        } => match &state.orchestrator.config().post_logout_redirect_url {
            Some(url) => found(url),
            None => {
                (StatusCode::OK, Json(LogoutCompletion::new(status, relay_state))).into_response()
            }
        },
    }
}

fn outbound_response(message: OutboundMessage) -> Response {
    match message.encoded {
        EncodedMessage::Redirect { location } => found(&location),
        EncodedMessage::Post { saml_value } => Html(generate_auto_submit_form(
            &message.destination,
            message.kind.param_name(),
            &saml_value,
            message.relay_state.as_deref(),
        ))
        .into_response(),
    }
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}
