//! Core types for the certificate signer.
//!
//! This crate holds everything that can be decided without touching the
//! filesystem or spawning a process:
//!
//! - [`TokenEntry`] / [`TokenMap`]: the per-token policy records read from
//!   the token store
//! - [`SignRequest`] / [`ValidatedRequest`]: a signing request before and
//!   after policy checks
//! - [`validate`]: the issuance policy (principal allow-list, TTL bounds)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod entry;
pub mod policy;

pub use entry::{TokenEntry, TokenMap};
pub use policy::{
    DEFAULT_TTL_SECS, GLOBAL_MAX_TTL_SECS, PolicyLimits, PolicyRejection, SignRequest,
    ValidatedRequest, validate,
};
