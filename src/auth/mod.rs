//! PSK-based authentication and actor resolution.
//!
//! Implements constant-time comparison to mitigate timing attacks. Every
//! request that passes gets the acting [`Identity`] as a request extension.

use axum::{
    extract::Request,
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::errors::AppError;
use crate::models::{Identity, Role};

/// Header name for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Username of the operator making the request.
pub const ACTOR_HEADER: &str = "x-actor";
/// Role of the operator making the request.
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

const DEFAULT_ACTOR: &str = "operator";

/// PSK authentication layer function that takes the expected PSK as a parameter.
pub async fn psk_auth_layer(
    expected_psk: Option<String>,
    mut request: Request,
    next: Next,
) -> Response {
    // If no PSK is configured, allow all requests (dev mode)
    if let Some(expected) = expected_psk {
        if !has_valid_key(request.headers(), &expected) {
            return AppError::Unauthorized("Missing or invalid API key".to_string())
                .into_response();
        }
    }

    match resolve_actor(request.headers()) {
        Ok(actor) => {
            request.extensions_mut().insert(actor);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

fn has_valid_key(headers: &HeaderMap, expected: &str) -> bool {
    let api_key = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());

    // Also accept the Authorization header as a bearer token
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));

    api_key
        .or(bearer)
        .is_some_and(|provided| constant_time_compare(provided, expected))
}

/// Identity declared by the caller. The system role belongs to the scheduler
/// and cannot be claimed over HTTP.
fn resolve_actor(headers: &HeaderMap) -> Result<Identity, AppError> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    let username = header_value(ACTOR_HEADER).unwrap_or(DEFAULT_ACTOR);
    let role = match header_value(ACTOR_ROLE_HEADER) {
        None => Role::Operator,
        Some(raw) => match Role::parse(raw) {
            Some(Role::System) | None => {
                return Err(AppError::Unauthorized(format!("Role {:?} is not allowed", raw)))
            }
            Some(role) => role,
        },
    };

    Ok(Identity::new(username, role))
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    // Constant-time comparison
    a_bytes.ct_eq(b_bytes).into()
}
