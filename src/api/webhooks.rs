//! Integration webhook endpoints.
//!
//! Each source verifies its own HMAC signature over the raw request body,
//! replies 2xx promptly, and hands the derived event to the inbox router
//! on a spawned task. A source with no configured secret is disabled and
//! answers 503.

use axum::{body::Bytes, extract::State, http::HeaderMap, response::Json};
use ring::hmac;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::models::{IncomingEvent, TaskSource};
use crate::router::InboxRouter;
use crate::SwarmError;

use super::AppState;

/// `POST /webhooks/slack` — Slack Events API (v0 signature scheme).
pub async fn slack(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, SwarmError> {
    let secret = state
        .config
        .slack_signing_secret
        .as_ref()
        .ok_or_else(|| SwarmError::ServiceUnavailable("slack integration disabled".into()))?;

    let timestamp = header_str(&headers, "x-slack-request-timestamp")?;
    let signature = header_str(&headers, "x-slack-signature")?;

    let base = format!("v0:{timestamp}:{}", String::from_utf8_lossy(&body));
    let expected = format!("v0={}", hmac_hex(secret, base.as_bytes()));
    verify_signature(&expected, &signature)?;

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| SwarmError::Validation(format!("invalid slack payload: {e}")))?;

    // Slack's endpoint ownership handshake.
    if payload["type"] == "url_verification" {
        return Ok(Json(serde_json::json!({ "challenge": payload["challenge"] })));
    }

    if let Some(event) = slack_event(&payload) {
        process_async(state.router.clone(), event);
    } else {
        debug!("slack callback carried no routable event");
    }

    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `POST /webhooks/github` — issue and comment events.
pub async fn github(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, SwarmError> {
    let secret = state
        .config
        .github_webhook_secret
        .as_ref()
        .ok_or_else(|| SwarmError::ServiceUnavailable("github integration disabled".into()))?;

    let signature = header_str(&headers, "x-hub-signature-256")?;
    let expected = format!("sha256={}", hmac_hex(secret, &body));
    verify_signature(&expected, &signature)?;

    let kind = header_str(&headers, "x-github-event")?;
    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| SwarmError::Validation(format!("invalid github payload: {e}")))?;

    if let Some(event) = github_event(&kind, &payload) {
        process_async(state.router.clone(), event);
    } else {
        debug!(kind = %kind, "ignored github event");
    }

    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `POST /webhooks/agentmail` — inbound mail.
pub async fn agentmail(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, SwarmError> {
    let secret = state
        .config
        .agentmail_webhook_secret
        .as_ref()
        .ok_or_else(|| SwarmError::ServiceUnavailable("agentmail integration disabled".into()))?;

    let signature = header_str(&headers, "x-agentmail-signature")?;
    let expected = hmac_hex(secret, &body);
    verify_signature(&expected, &signature)?;

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| SwarmError::Validation(format!("invalid agentmail payload: {e}")))?;

    let text = format!(
        "{}\n\n{}",
        payload["subject"].as_str().unwrap_or_default(),
        payload["text"].as_str().unwrap_or_default()
    )
    .trim()
    .to_string();

    let event = IncomingEvent {
        source: TaskSource::Agentmail,
        author: payload["from"].as_str().unwrap_or("unknown").to_string(),
        text,
        slack_channel_id: None,
        slack_thread_ts: None,
        slack_user_id: None,
        mentions_bot: false,
        target_agent_id: None,
        raw_context: Some(payload),
    };
    process_async(state.router.clone(), event);

    Ok(Json(serde_json::json!({ "ok": true })))
}

// ── event derivation ─────────────────────────────────────────────────

fn slack_event(payload: &serde_json::Value) -> Option<IncomingEvent> {
    let event = payload.get("event")?;
    let kind = event["type"].as_str()?;

    // Bot echoes and edits would loop back into the router.
    if event.get("bot_id").is_some() || event.get("subtype").is_some() {
        return None;
    }

    let mentions_bot = match kind {
        "app_mention" => true,
        "message" => false,
        _ => return None,
    };

    let text = event["text"].as_str().unwrap_or_default().to_string();
    let channel = event["channel"].as_str().map(str::to_string);
    let thread_ts = event["thread_ts"]
        .as_str()
        .or_else(|| event["ts"].as_str())
        .map(str::to_string);
    let user = event["user"].as_str().map(str::to_string);

    Some(IncomingEvent {
        source: TaskSource::Slack,
        author: user.clone().unwrap_or_else(|| "unknown".to_string()),
        text,
        slack_channel_id: channel,
        slack_thread_ts: thread_ts,
        slack_user_id: user,
        mentions_bot,
        target_agent_id: None,
        raw_context: Some(payload.clone()),
    })
}

fn github_event(kind: &str, payload: &serde_json::Value) -> Option<IncomingEvent> {
    let (text, author) = match kind {
        "issue_comment" if payload["action"] == "created" => (
            payload["comment"]["body"].as_str()?.to_string(),
            payload["comment"]["user"]["login"].as_str(),
        ),
        "issues" if payload["action"] == "opened" => (
            format!(
                "{}\n\n{}",
                payload["issue"]["title"].as_str().unwrap_or_default(),
                payload["issue"]["body"].as_str().unwrap_or_default()
            )
            .trim()
            .to_string(),
            payload["issue"]["user"]["login"].as_str(),
        ),
        _ => return None,
    };

    Some(IncomingEvent {
        source: TaskSource::Github,
        author: author.unwrap_or("unknown").to_string(),
        text,
        slack_channel_id: None,
        slack_thread_ts: None,
        slack_user_id: None,
        mentions_bot: false,
        target_agent_id: None,
        raw_context: Some(payload.clone()),
    })
}

/// Route the event off the request path so the webhook can 2xx promptly.
fn process_async(router: InboxRouter, event: IncomingEvent) {
    tokio::spawn(async move {
        if let Err(e) = router.route(event).await {
            warn!(error = %e, "failed to route webhook event");
        }
    });
}

// ── signature helpers ────────────────────────────────────────────────

fn header_str(headers: &HeaderMap, name: &str) -> Result<String, SwarmError> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| SwarmError::Validation(format!("missing {name} header")))
}

pub(super) fn hmac_hex(secret: &str, data: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes());
    let tag = hmac::sign(&key, data);
    hex_encode(tag.as_ref())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn verify_signature(expected: &str, provided: &str) -> Result<(), SwarmError> {
    if bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
        Ok(())
    } else {
        warn!("webhook signature mismatch");
        Err(SwarmError::Unauthorized)
    }
}
