//! Issuance policy — decides whether a token may get the certificate it asked for.
//!
//! # Checks
//!
//! Evaluated in this order; the first failure wins:
//!
//! | # | Check | Rejection |
//! |---|-------|-----------|
//! | 1 | principal is on the token's allow-list | [`PolicyRejection::PrincipalNotAllowed`] |
//! | 2 | ttl is positive | [`PolicyRejection::NonPositiveTtl`] |
//! | 3 | ttl ≤ token `max_ttl` (or the default TTL) | [`PolicyRejection::ExceedsTokenMax`] |
//! | 4 | ttl ≤ global ceiling | [`PolicyRejection::ExceedsGlobalMax`] |
//!
//! The token cap is checked before the global cap so the caller sees the
//! limit they can actually act on. A TTL over a cap is rejected, never
//! silently reduced.

use thiserror::Error;

use crate::entry::TokenEntry;

/// TTL used when the caller omits one, and the cap for tokens without `max_ttl`.
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Hard ceiling on any certificate's validity: one year.
pub const GLOBAL_MAX_TTL_SECS: u64 = 31_536_000;

/// Service-wide TTL limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyLimits {
    /// Fallback cap for tokens that do not set `max_ttl`.
    pub default_ttl: u64,
    /// Ceiling applied after the token cap.
    pub global_max_ttl: u64,
}

impl Default for PolicyLimits {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL_SECS,
            global_max_ttl: GLOBAL_MAX_TTL_SECS,
        }
    }
}

/// A signing request as received from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    /// Public key to certify (untrusted text).
    pub pubkey: String,
    /// Principal to embed in the certificate.
    pub principal: String,
    /// Requested validity in seconds. May be zero or negative.
    pub ttl: i64,
}

impl SignRequest {
    /// Build a request.
    pub fn new(pubkey: impl Into<String>, principal: impl Into<String>, ttl: i64) -> Self {
        Self {
            pubkey: pubkey.into(),
            principal: principal.into(),
            ttl,
        }
    }
}

/// A request that passed every policy check.
///
/// Only [`validate`] constructs this, so `0 < ttl <= min(token cap, global cap)`
/// always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pubkey: String,
    principal: String,
    ttl: u64,
}

impl ValidatedRequest {
    /// Public key to certify.
    #[must_use]
    pub fn pubkey(&self) -> &str {
        &self.pubkey
    }

    /// Principal allowed for the token.
    #[must_use]
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Validity in seconds.
    #[must_use]
    pub fn ttl(&self) -> u64 {
        self.ttl
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyRejection {
    /// The principal is not on the token's allow-list.
    #[error("principal not allowed for this token")]
    PrincipalNotAllowed,

    /// TTL was zero or negative.
    #[error("ttl must be positive")]
    NonPositiveTtl,

    /// TTL is above the token's own cap.
    #[error("ttl exceeds token max ({cap} seconds)")]
    ExceedsTokenMax {
        /// The token cap that was exceeded.
        cap: u64,
    },

    /// TTL is above the service-wide ceiling.
    #[error("ttl exceeds global max ({cap} seconds)")]
    ExceedsGlobalMax {
        /// The global cap that was exceeded.
        cap: u64,
    },
}

impl PolicyRejection {
    /// `true` for rejections about *who* may be certified (HTTP 403) rather
    /// than about the shape of the request (HTTP 400).
    #[must_use]
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::PrincipalNotAllowed)
    }
}

/// Check `req` against `entry` and the service `limits`.
pub fn validate(
    entry: &TokenEntry,
    req: SignRequest,
    limits: PolicyLimits,
) -> Result<ValidatedRequest, PolicyRejection> {
    if !entry.allows_principal(&req.principal) {
        return Err(PolicyRejection::PrincipalNotAllowed);
    }

    let Ok(ttl) = u64::try_from(req.ttl) else {
        return Err(PolicyRejection::NonPositiveTtl);
    };
    if ttl == 0 {
        return Err(PolicyRejection::NonPositiveTtl);
    }

    let token_cap = entry.max_ttl.unwrap_or(limits.default_ttl);
    if ttl > token_cap {
        return Err(PolicyRejection::ExceedsTokenMax { cap: token_cap });
    }

    if ttl > limits.global_max_ttl {
        return Err(PolicyRejection::ExceedsGlobalMax {
            cap: limits.global_max_ttl,
        });
    }

    Ok(ValidatedRequest {
        pubkey: req.pubkey,
        principal: req.principal,
        ttl,
    })
}
