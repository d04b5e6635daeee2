//! Admin authorization gate.
//!
//! Transport-agnostic: the HTTP layer copies the relevant headers into a
//! [`RequestContext`] and asks the gate for a yes/no decision.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{AuthClaims, Role, token};

/// Name of the cookie that may carry the admin credential.
pub const SESSION_COOKIE: &str = "session";

/// Credential-bearing parts of an inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    authorization: Option<String>,
    cookie: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value of the `Authorization` header.
    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    /// Raw value of the `Cookie` header.
    pub fn with_cookie(mut self, value: impl Into<String>) -> Self {
        self.cookie = Some(value.into());
        self
    }

    /// The presented credential: a bearer token first, then the session cookie.
    pub fn credential(&self) -> Option<&str> {
        self.bearer().or_else(|| self.session_cookie())
    }

    fn bearer(&self) -> Option<&str> {
        let header = self.authorization.as_deref()?.trim();
        let (scheme, token) = header.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = token.trim();
        (!token.is_empty()).then_some(token)
    }

    fn session_cookie(&self) -> Option<&str> {
        self.cookie
            .as_deref()?
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }
}

/// Allow/deny decision for privileged operations.
#[derive(Clone)]
pub struct AuthorizationGate {
    secret: Arc<[u8]>,
    admin_role: Role,
}

impl std::fmt::Debug for AuthorizationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationGate")
            .field("secret", &"<redacted>")
            .field("admin_role", &self.admin_role)
            .finish()
    }
}

impl AuthorizationGate {
    pub fn new(secret: impl Into<Vec<u8>>, admin_role: Role) -> Self {
        Self {
            secret: secret.into().into(),
            admin_role,
        }
    }

    /// `true` only for a valid, unexpired, correctly signed admin credential.
    pub fn authorize(&self, ctx: &RequestContext) -> bool {
        self.admit(ctx).is_some()
    }

    /// Like [`authorize`](Self::authorize), but hands back the verified claims.
    pub fn admit(&self, ctx: &RequestContext) -> Option<AuthClaims> {
        self.admit_at(ctx, Utc::now())
    }

    pub fn admit_at(&self, ctx: &RequestContext, now: DateTime<Utc>) -> Option<AuthClaims> {
        let Some(credential) = ctx.credential() else {
            debug!("authorization denied: no credential presented");
            return None;
        };

        let claims = token::verify_at(credential, &self.secret, now).ok()?;

        if claims.role() != &self.admin_role {
            debug!(
                subject = claims.subject(),
                role = %claims.role(),
                "authorization denied: role is not administrative"
            );
            return None;
        }

        Some(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use serde_json::json;

    const SECRET: &str = "gate-secret";

    fn mint(secret: &str, role: &str, iat: DateTime<Utc>, ttl: Duration) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &json!({
                "sub": "ops",
                "role": role,
                "iat": iat.timestamp(),
                "exp": (iat + ttl).timestamp(),
            }),
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn gate() -> AuthorizationGate {
        AuthorizationGate::new(SECRET, Role::ADMIN)
    }

    fn bearer(token: &str) -> RequestContext {
        RequestContext::new().with_authorization(format!("Bearer {token}"))
    }

    #[test]
    fn no_credential_is_denied() {
        assert!(!gate().authorize(&RequestContext::new()));
        assert!(!gate().authorize(&RequestContext::new().with_authorization("Bearer   ")));
        assert!(!gate().authorize(&RequestContext::new().with_cookie("theme=dark")));
    }

    #[test]
    fn valid_admin_credential_is_allowed() {
        let token = mint(SECRET, "admin", Utc::now(), Duration::minutes(5));
        assert!(gate().authorize(&bearer(&token)));
    }

    #[test]
    fn session_cookie_is_accepted() {
        let token = mint(SECRET, "admin", Utc::now(), Duration::minutes(5));
        let ctx = RequestContext::new().with_cookie(format!("theme=dark; session={token}"));
        assert!(gate().authorize(&ctx));
    }

    #[test]
    fn bearer_scheme_is_case_insensitive_but_required() {
        let token = mint(SECRET, "admin", Utc::now(), Duration::minutes(5));
        let lower = RequestContext::new().with_authorization(format!("bearer {token}"));
        assert!(gate().authorize(&lower));

        let basic = RequestContext::new().with_authorization(format!("Basic {token}"));
        assert!(!gate().authorize(&basic));
    }

    #[test]
    fn expired_credential_is_denied() {
        let issued = Utc::now() - Duration::minutes(30);
        let token = mint(SECRET, "admin", issued, Duration::minutes(5));
        assert!(!gate().authorize(&bearer(&token)));
    }

    #[test]
    fn tampered_signature_is_denied() {
        let token = mint("someone-else", "admin", Utc::now(), Duration::minutes(5));
        assert!(!gate().authorize(&bearer(&token)));
    }

    #[test]
    fn non_admin_role_is_denied() {
        let token = mint(SECRET, "viewer", Utc::now(), Duration::minutes(5));
        assert!(!gate().authorize(&bearer(&token)));
    }

    #[test]
    fn custom_admin_role_is_honoured() {
        let gate = AuthorizationGate::new(SECRET, Role::new("queue-operator"));
        let operator = mint(SECRET, "queue-operator", Utc::now(), Duration::minutes(5));
        let admin = mint(SECRET, "admin", Utc::now(), Duration::minutes(5));
        assert!(gate.authorize(&bearer(&operator)));
        assert!(!gate.authorize(&bearer(&admin)));
    }

    #[test]
    fn empty_secret_denies_everything() {
        let gate = AuthorizationGate::new(Vec::new(), Role::ADMIN);
        let token = mint("", "admin", Utc::now(), Duration::minutes(5));
        assert!(!gate.authorize(&bearer(&token)));
    }

    #[test]
    fn debug_output_redacts_secret() {
        let rendered = format!("{:?}", gate());
        assert!(!rendered.contains(SECRET));
        assert!(rendered.contains("<redacted>"));
    }
}
