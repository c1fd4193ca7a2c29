//! HTTP Basic auth middleware.
//!
//! Every route except `/health` requires a configured `user:password`
//! credential. The authenticated username is stashed in request extensions
//! so handlers can enforce per-user ownership.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;

/// The authenticated username, available via `Extension<AuthUser>`.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

pub async fn auth_middleware(
    State(users): State<Arc<HashMap<String, String>>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    // /health is always unauthenticated
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }

    let Some(user) = authenticate(&req, &users) else {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic")],
            "Unauthorized",
        )
            .into_response();
    };

    req.extensions_mut().insert(AuthUser(user));
    next.run(req).await
}

fn authenticate(req: &Request<Body>, users: &HashMap<String, String>) -> Option<String> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    (users.get(user)? == password).then(|| user.to_string())
}
