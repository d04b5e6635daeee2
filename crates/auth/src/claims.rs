use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::Role;

/// Claims extracted from a verified credential.
///
/// There is no public constructor: the only way to obtain a value is through
/// [`crate::token::verify`], so holding one means the signature and time
/// window were checked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthClaims {
    subject: String,
    role: Role,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    extra: serde_json::Map<String, serde_json::Value>,
}

impl AuthClaims {
    pub(crate) fn from_verified(
        subject: String,
        role: Role,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            subject,
            role,
            issued_at,
            expires_at,
            extra,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Additional, non-standard claims carried by the token.
    pub fn extra(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.extra
    }

    pub fn claim(&self, name: &str) -> Option<&serde_json::Value> {
        self.extra.get(name)
    }
}
