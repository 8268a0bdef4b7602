//! HTTP handlers for the issuer endpoints.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/whoami` | Name and tunnel port of the presented token |
//! | `POST` | `/sign-cert` | Sign a public key for an allowed principal |
//!
//! Both require `Authorization: Bearer <token>`.
//!
//! ## Signing request
//!
//! ```json
//! { "pubkey": "ssh-ed25519 AAAA... user@host", "principal": "alice", "ttl": 3600 }
//! ```
//!
//! `ttl` is optional and defaults to `policy.default_ttl`. Unknown fields are
//! rejected.
//!
//! ## Status codes
//!
//! | Status | Meaning |
//! |--------|---------|
//! | `401` | missing or malformed bearer header |
//! | `403` | unknown/inactive token, or principal not allowed |
//! | `400` | malformed body, ttl not positive or over a cap |
//! | `500` | signing failed (`detail` included) or internal error (opaque) |
//!
//! A `/sign-cert` request that outlives `server.request_timeout` is abandoned
//! (killing any running signer) and answered as an internal error.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use cert_policy::{SignRequest, TokenEntry};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{
    Issuer,
    audit::{self, AuditEvent, RequestContext, Stage},
    signer::IssuedCertificate,
};
use crate::{Error, Result};

// ── Request / Response types ───────────────────────────────────────────────

/// `POST /sign-cert` body.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignCertBody {
    /// Public key to certify.
    #[serde(default)]
    pub pubkey: Option<String>,
    /// Principal to certify for.
    #[serde(default)]
    pub principal: Option<String>,
    /// Requested validity in seconds. Any JSON integer is accepted here;
    /// range checks belong to the policy.
    #[serde(default)]
    pub ttl: Option<serde_json::Number>,
}

impl SignCertBody {
    /// Parse and normalise a raw body into a [`SignRequest`].
    ///
    /// `pubkey` and `principal` are trimmed; empty counts as missing.
    pub fn parse(bytes: &[u8], default_ttl: u64) -> Result<SignRequest> {
        let body: Self = serde_json::from_slice(bytes)
            .map_err(|e| Error::Validation(format!("invalid request body: {e}")))?;

        let pubkey = body.pubkey.as_deref().map(str::trim).unwrap_or_default();
        let principal = body.principal.as_deref().map(str::trim).unwrap_or_default();
        if pubkey.is_empty() || principal.is_empty() {
            return Err(Error::Validation("pubkey and principal required".into()));
        }
        if pubkey.contains(['\n', '\r']) {
            return Err(Error::Validation("pubkey must be a single line".into()));
        }

        let ttl = match body.ttl {
            Some(ref ttl) => ttl_seconds(ttl)?,
            None => i64::try_from(default_ttl).unwrap_or(i64::MAX),
        };

        Ok(SignRequest::new(pubkey, principal, ttl))
    }
}

/// Integer TTL from the body. Values above `i64::MAX` saturate so they are
/// refused by the TTL caps like any other oversized request.
fn ttl_seconds(ttl: &serde_json::Number) -> Result<i64> {
    if let Some(secs) = ttl.as_i64() {
        return Ok(secs);
    }
    if ttl.is_u64() {
        return Ok(i64::MAX);
    }
    Err(Error::Validation("ttl must be an integer".into()))
}

/// `POST /sign-cert` success response.
#[derive(Debug, Serialize)]
pub struct SignCertResponse {
    /// The signed certificate.
    pub cert: String,
}

/// `GET /whoami` response. Both values come verbatim from the token entry.
#[derive(Debug, Serialize)]
pub struct WhoamiResponse {
    /// Token name.
    pub name: Option<String>,
    /// Allocated tunnel port.
    pub port: Option<serde_json::Value>,
}

// ── Route builder ─────────────────────────────────────────────────────────

/// Build the issuer routes.
pub fn issuer_routes(issuer: Arc<Issuer>) -> Router {
    Router::new()
        .route("/whoami", get(whoami))
        .route("/sign-cert", post(sign_cert))
        .with_state(issuer)
}

// ── Handlers ──────────────────────────────────────────────────────────────

/// `GET /whoami` — Report the name and port of the presented token.
async fn whoami(
    State(issuer): State<Arc<Issuer>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let mut ctx = RequestContext::new("/whoami", client_ip(&issuer, &headers, peer));

    match authenticate(&issuer, &mut ctx, &headers).await {
        Ok(entry) => {
            ctx.stage = Stage::Responded;
            debug!(token_name = %entry.display_name(), "whoami");
            (
                StatusCode::OK,
                Json(WhoamiResponse {
                    name: entry.name,
                    port: entry.port,
                }),
            )
                .into_response()
        }
        Err(err) => fail(&ctx, err),
    }
}

/// `POST /sign-cert` — Sign a public key.
async fn sign_cert(
    State(issuer): State<Arc<Issuer>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut ctx = RequestContext::new("/sign-cert", client_ip(&issuer, &headers, peer));

    let outcome = tokio::time::timeout(
        issuer.request_timeout,
        process_sign_request(&issuer, &mut ctx, &headers, &body),
    )
    .await
    .unwrap_or_else(|_| {
        Err(Error::Internal(format!(
            "request timed out after {:?}",
            issuer.request_timeout
        )))
    });

    match outcome {
        Ok(issued) => {
            ctx.stage = Stage::Responded;
            audit::emit(&AuditEvent::issued(&ctx, &issued.key_id));
            (StatusCode::OK, Json(SignCertResponse { cert: issued.cert })).into_response()
        }
        Err(err) => fail(&ctx, err),
    }
}

/// Authenticate, validate and sign, advancing `ctx` as each stage passes.
async fn process_sign_request(
    issuer: &Issuer,
    ctx: &mut RequestContext,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<IssuedCertificate> {
    let entry = authenticate(issuer, ctx, headers).await?;

    let request = SignCertBody::parse(body, issuer.limits.default_ttl)?;
    ctx.principal = Some(request.principal.clone());
    ctx.ttl = Some(request.ttl);

    let validated = issuer.validate(&entry, request)?;
    ctx.stage = Stage::PolicyChecked;
    debug!(
        token_name = %entry.display_name(),
        principal = validated.principal(),
        ttl = validated.ttl(),
        "Request passed policy"
    );

    ctx.stage = Stage::Signing;
    issuer.sign(&validated).await
}

// ── Helpers ───────────────────────────────────────────────────────────────

/// Resolve the bearer token to an active entry.
async fn authenticate(
    issuer: &Issuer,
    ctx: &mut RequestContext,
    headers: &HeaderMap,
) -> Result<TokenEntry> {
    let bearer = bearer_token(headers)?;
    let entry = issuer
        .authorize(bearer)
        .await
        .ok_or_else(|| Error::Authorization("invalid or inactive token".into()))?;

    ctx.token_name = Some(entry.display_name().to_string());
    ctx.stage = Stage::Authenticated;
    Ok(entry)
}

/// Extract the token from `Authorization: Bearer <token>`.
fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Authentication("missing bearer token".into()))?;

    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Authentication("malformed bearer token".into()))?;

    Ok(token)
}

/// Client address for audit: the peer, or the forwarding headers when trusted.
fn client_ip(issuer: &Issuer, headers: &HeaderMap, peer: SocketAddr) -> Option<IpAddr> {
    if issuer.trust_forwarded_for {
        if let Some(ip) = forwarded_ip(headers) {
            return Some(ip);
        }
    }
    Some(peer.ip())
}

/// Extract client IP from `X-Forwarded-For` or `X-Real-IP` headers.
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|s| s.trim().parse().ok())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
        })
}

/// Record the failure and turn it into a response.
fn fail(ctx: &RequestContext, err: Error) -> Response {
    debug!(kind = err.kind(), status = %err.status_code(), endpoint = ctx.endpoint, "Request refused");
    let event = match &err {
        Error::Authentication(msg) => AuditEvent::unauthenticated(ctx, msg.as_str()),
        Error::Authorization(msg) => AuditEvent::denied(ctx, msg.as_str()),
        Error::Validation(msg) => AuditEvent::rejected(ctx, msg.as_str()),
        Error::Signing(detail) => AuditEvent::signing_failed(ctx, detail.as_str()),
        other => {
            error!(error = %other, endpoint = ctx.endpoint, stage = ?ctx.stage, "Unexpected error");
            AuditEvent::internal(ctx, other.to_string())
        }
    };
    audit::emit(&event);
    err.into_response()
}
