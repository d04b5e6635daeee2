//! HS256 credential verification.
//!
//! Every rejection collapses into the single opaque [`VerificationFailure`].
//! The concrete cause is only ever written to the debug log.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{AuthClaims, Role};

/// Opaque verification failure. Deliberately carries no cause.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid credential")]
pub struct VerificationFailure;

/// Internal-only classification, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RejectReason {
    EmptyToken,
    EmptySecret,
    Malformed,
    BadSignature,
    MissingClaim(&'static str),
    InvalidTimeWindow,
    NotYetValid,
    Expired,
}

impl RejectReason {
    fn as_str(&self) -> &'static str {
        match self {
            RejectReason::EmptyToken => "empty token",
            RejectReason::EmptySecret => "empty secret",
            RejectReason::Malformed => "malformed token",
            RejectReason::BadSignature => "signature mismatch",
            RejectReason::MissingClaim(_) => "missing required claim",
            RejectReason::InvalidTimeWindow => "exp <= iat",
            RejectReason::NotYetValid => "not yet valid",
            RejectReason::Expired => "expired",
        }
    }
}

/// Wire shape of the token payload. Everything optional so that a missing
/// claim is reported as a rejection instead of a decode error variant.
#[derive(Debug, Deserialize)]
struct WireClaims {
    sub: Option<String>,
    role: Option<String>,
    iat: Option<i64>,
    exp: Option<i64>,
    nbf: Option<i64>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Verify `token` against `secret` using the current time.
pub fn verify(token: &str, secret: &[u8]) -> Result<AuthClaims, VerificationFailure> {
    verify_at(token, secret, Utc::now())
}

/// Verify `token` against `secret` as of `now`.
///
/// Fails when the token is empty or malformed, the secret is empty, the
/// signature does not match, `sub`/`role`/`iat`/`exp` are missing, or `now`
/// falls outside `[max(iat, nbf), exp)`. `iat` and `nbf` may lead the local
/// clock by up to 30 seconds.
pub fn verify_at(
    token: &str,
    secret: &[u8],
    now: DateTime<Utc>,
) -> Result<AuthClaims, VerificationFailure> {
    check(token, secret, now).map_err(|reason| {
        match reason {
            RejectReason::MissingClaim(claim) => {
                debug!(reason = reason.as_str(), claim, "credential rejected")
            }
            _ => debug!(reason = reason.as_str(), "credential rejected"),
        }
        VerificationFailure
    })
}

/// Tolerated issuer clock drift for `iat` and `nbf`. Expiry gets none.
const CLOCK_SKEW_SECS: i64 = 30;

fn check(token: &str, secret: &[u8], now: DateTime<Utc>) -> Result<AuthClaims, RejectReason> {
    let token = token.trim();
    if token.is_empty() {
        return Err(RejectReason::EmptyToken);
    }
    if secret.is_empty() {
        return Err(RejectReason::EmptySecret);
    }

    // Time checks are done below against the caller's clock.
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation.leeway = 0;

    let data = decode::<WireClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => RejectReason::BadSignature,
            _ => RejectReason::Malformed,
        })?;
    let wire = data.claims;

    let subject = wire
        .sub
        .filter(|s| !s.trim().is_empty())
        .ok_or(RejectReason::MissingClaim("sub"))?;
    let role = wire
        .role
        .filter(|r| !r.trim().is_empty())
        .ok_or(RejectReason::MissingClaim("role"))?;
    let issued_at = wire
        .iat
        .and_then(timestamp)
        .ok_or(RejectReason::MissingClaim("iat"))?;
    let expires_at = wire
        .exp
        .and_then(timestamp)
        .ok_or(RejectReason::MissingClaim("exp"))?;

    if expires_at <= issued_at {
        return Err(RejectReason::InvalidTimeWindow);
    }
    let skewed_now = now + chrono::Duration::seconds(CLOCK_SKEW_SECS);
    if skewed_now < issued_at {
        return Err(RejectReason::NotYetValid);
    }
    if let Some(nbf) = wire.nbf {
        let not_before = timestamp(nbf).ok_or(RejectReason::Malformed)?;
        if skewed_now < not_before {
            return Err(RejectReason::NotYetValid);
        }
    }
    if now >= expires_at {
        return Err(RejectReason::Expired);
    }

    Ok(AuthClaims::from_verified(
        subject,
        Role::new(role),
        issued_at,
        expires_at,
        wire.extra,
    ))
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}
