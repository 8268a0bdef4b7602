//! Audit logging for signing requests.
//!
//! Every event is emitted via `tracing` with the serialized event in the
//! `audit` field, so the trail is queryable by any log aggregator. Emitting
//! never fails and never changes the response.
//!
//! # Events
//!
//! | Event | Level | When |
//! |-------|-------|------|
//! | `auth.missing` | warn | no usable `Authorization: Bearer` header |
//! | `auth.denied` | warn | unknown or inactive token, or principal not allowed |
//! | `cert.rejected` | warn | malformed body or TTL outside policy |
//! | `cert.issued` | info | certificate signed and returned |
//! | `cert.failed` | error | signing program failed or timed out |
//! | `request.error` | error | anything unexpected |

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// How far a request got before it was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Request arrived, nothing checked yet.
    #[default]
    Received,
    /// Bearer token resolved to an active entry.
    Authenticated,
    /// Principal and TTL passed policy.
    PolicyChecked,
    /// Signing program invoked.
    Signing,
    /// Success response produced.
    Responded,
}

/// What is known about the request so far. Filled in by the handler as the
/// request advances through its stages.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Route that was called.
    pub endpoint: &'static str,
    /// Client address.
    pub client_ip: Option<IpAddr>,
    /// Name of the authenticated token.
    pub token_name: Option<String>,
    /// Requested principal.
    pub principal: Option<String>,
    /// Requested TTL (seconds).
    pub ttl: Option<i64>,
    /// Furthest stage reached.
    pub stage: Stage,
}

impl RequestContext {
    /// Context for a request that just arrived.
    #[must_use]
    pub fn new(endpoint: &'static str, client_ip: Option<IpAddr>) -> Self {
        Self {
            endpoint,
            client_ip,
            ..Self::default()
        }
    }
}

/// Structured audit event.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"cert.issued"`).
    pub event: &'static str,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Route that was called.
    pub endpoint: &'static str,
    /// Stage the request had reached.
    pub stage: Stage,
    /// Name of the token used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_name: Option<String>,
    /// Requested principal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    /// Requested TTL (seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    /// Identity embedded in an issued certificate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Client address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,
    /// Reason for a rejection or failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn from_context(event: &'static str, ctx: &RequestContext, reason: Option<String>) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
            endpoint: ctx.endpoint,
            stage: ctx.stage,
            token_name: ctx.token_name.clone(),
            principal: ctx.principal.clone(),
            ttl: ctx.ttl,
            key_id: None,
            client_ip: ctx.client_ip,
            reason,
        }
    }

    /// `auth.missing`
    #[must_use]
    pub fn unauthenticated(ctx: &RequestContext, reason: impl Into<String>) -> Self {
        Self::from_context("auth.missing", ctx, Some(reason.into()))
    }

    /// `auth.denied`
    #[must_use]
    pub fn denied(ctx: &RequestContext, reason: impl Into<String>) -> Self {
        Self::from_context("auth.denied", ctx, Some(reason.into()))
    }

    /// `cert.rejected`
    #[must_use]
    pub fn rejected(ctx: &RequestContext, reason: impl Into<String>) -> Self {
        Self::from_context("cert.rejected", ctx, Some(reason.into()))
    }

    /// `cert.issued`
    #[must_use]
    pub fn issued(ctx: &RequestContext, key_id: impl Into<String>) -> Self {
        let mut event = Self::from_context("cert.issued", ctx, None);
        event.key_id = Some(key_id.into());
        event
    }

    /// `cert.failed`
    #[must_use]
    pub fn signing_failed(ctx: &RequestContext, detail: impl Into<String>) -> Self {
        Self::from_context("cert.failed", ctx, Some(detail.into()))
    }

    /// `request.error`
    #[must_use]
    pub fn internal(ctx: &RequestContext, detail: impl Into<String>) -> Self {
        Self::from_context("request.error", ctx, Some(detail.into()))
    }
}

/// Emit an audit event at the level matching its type.
///
/// ```text
/// INFO cert_signer::issuer::audit audit={"event":"cert.issued","principal":"alice",...}
/// ```
pub fn emit(event: &AuditEvent) {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(ref e) => {
            tracing::warn!(error = %e, event = event.event, "Failed to serialize audit event");
            return;
        }
    };

    match event.event {
        "cert.issued" => tracing::info!(audit = %json, "audit"),
        "cert.failed" | "request.error" => tracing::error!(audit = %json, "audit"),
        _ => tracing::warn!(audit = %json, "audit"),
    }
}
