use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};

use linkdesk_auth::{AuthorizationGate, RequestContext};

use crate::app::errors;

#[derive(Clone)]
pub struct AuthState {
    pub gate: Arc<AuthorizationGate>,
}

/// Admit only admin credentials. Every denial looks the same to the caller,
/// whatever the cause and whether or not the path exists.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let ctx = request_context(req.headers());

    let Some(claims) = state.gate.admit(&ctx) else {
        return errors::unauthorized();
    };

    req.extensions_mut().insert(claims);
    next.run(req).await
}

fn request_context(headers: &HeaderMap) -> RequestContext {
    let mut ctx = RequestContext::new();

    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        ctx = ctx.with_authorization(value);
    }

    let cookies = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>();
    if !cookies.is_empty() {
        ctx = ctx.with_cookie(cookies.join("; "));
    }

    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn copies_credential_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark"));
        headers.append(header::COOKIE, HeaderValue::from_static("session=xyz"));

        let ctx = request_context(&headers);
        assert_eq!(ctx.credential(), Some("abc"));

        headers.remove(header::AUTHORIZATION);
        let ctx = request_context(&headers);
        assert_eq!(ctx.credential(), Some("xyz"));
    }

    #[test]
    fn no_headers_means_no_credential() {
        assert_eq!(request_context(&HeaderMap::new()).credential(), None);
    }
}
