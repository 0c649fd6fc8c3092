//! # Authentication
//!
//! Bearer token middleware that binds every `/v1` request to a caller.
//!
//! ## Token Format
//!
//! ```text
//! Bearer {role}:{user_id}:{secret}   owner / guest / system caller
//! Bearer {secret}                    system caller
//! ```
//!
//! `owner` and `guest` tokens must carry a user id; `system` tokens may
//! leave it empty. The secret is compared in constant time against
//! `AUTH_TOKEN`.
//!
//! When `AUTH_TOKEN` is unset (local development) the secret is not
//! checked: a `{role}:{user_id}` prefix still selects the caller, and a
//! request without one acts as the system.

use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use stayguard_core::{ActorRole, UserId};

use crate::error::{AppError, ErrorBody, ErrorDetail};

// ── CallerIdentity ──────────────────────────────────────────────────────────

/// Identity of the authenticated caller, injected by [`auth_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub role: ActorRole,
    /// Account id. `None` only for system callers.
    pub user_id: Option<UserId>,
}

impl CallerIdentity {
    pub fn system() -> Self {
        Self {
            role: ActorRole::System,
            user_id: None,
        }
    }
}

#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("no caller identity in request context".into()))
    }
}

/// Check that the caller holds `role`. Returns 403 otherwise.
pub fn require_role(caller: &CallerIdentity, role: ActorRole) -> Result<(), AppError> {
    if caller.role == role {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "role '{role}' required, caller has '{}'",
            caller.role
        )))
    }
}

// ── Auth Configuration ──────────────────────────────────────────────────────

/// Auth configuration injected into request extensions.
///
/// Custom `Debug` redacts the token value.
#[derive(Clone)]
pub struct AuthConfig {
    pub token: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ── Token Validation ────────────────────────────────────────────────────────

/// Constant-time comparison of bearer secrets. A length mismatch still
/// performs a comparison so timing does not reveal the expected length.
fn constant_time_token_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

fn parse_identity(role_str: &str, user_str: &str) -> Result<CallerIdentity, String> {
    let role = match role_str {
        "owner" => ActorRole::Owner,
        "guest" => ActorRole::Guest,
        "system" => ActorRole::System,
        other => return Err(format!("unknown role: {other}")),
    };
    let user_id = if user_str.is_empty() {
        None
    } else {
        Some(UserId::from_uuid(
            user_str
                .parse::<Uuid>()
                .map_err(|e| format!("invalid user_id: {e}"))?,
        ))
    };
    if role != ActorRole::System && user_id.is_none() {
        return Err(format!("role '{role}' requires a user_id"));
    }
    Ok(CallerIdentity { role, user_id })
}

/// Parse a bearer token in `{role}:{user_id}:{secret}` or `{secret}` form.
pub fn parse_bearer_token(provided: &str, expected_secret: &str) -> Result<CallerIdentity, String> {
    let parts: Vec<&str> = provided.splitn(3, ':').collect();

    match parts.as_slice() {
        [secret] => {
            if constant_time_token_eq(secret, expected_secret) {
                Ok(CallerIdentity::system())
            } else {
                Err("invalid bearer token".into())
            }
        }
        [role, user, secret] => {
            if !constant_time_token_eq(secret, expected_secret) {
                return Err("invalid bearer token".into());
            }
            parse_identity(role, user)
        }
        _ => Err("invalid token format, expected {role}:{user_id}:{secret} or {secret}".into()),
    }
}

/// Identity claimed by a token when no secret is configured.
fn unverified_identity(provided: &str) -> Option<CallerIdentity> {
    let mut parts = provided.splitn(3, ':');
    let role = parts.next()?;
    let user = parts.next()?;
    parse_identity(role, user).ok()
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Validate the `Authorization` header and inject a [`CallerIdentity`].
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let expected_token = request.extensions().get::<AuthConfig>().cloned();
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    match expected_token {
        Some(AuthConfig {
            token: Some(ref expected),
        }) => match auth_header.as_deref() {
            Some(header_value) if header_value.starts_with("Bearer ") => {
                match parse_bearer_token(&header_value[7..], expected) {
                    Ok(identity) => {
                        request.extensions_mut().insert(identity);
                        next.run(request).await
                    }
                    Err(msg) => {
                        tracing::warn!(reason = %msg, "authentication failed: invalid bearer token");
                        unauthorized_response(&msg)
                    }
                }
            }
            Some(_) => {
                tracing::warn!("authentication failed: non-Bearer authorization scheme");
                unauthorized_response("authorization header must use Bearer scheme")
            }
            None => {
                tracing::warn!("authentication failed: missing authorization header");
                unauthorized_response("missing authorization header")
            }
        },
        _ => {
            let identity = auth_header
                .as_deref()
                .and_then(|h| h.strip_prefix("Bearer "))
                .and_then(unverified_identity)
                .unwrap_or_else(CallerIdentity::system);
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
    }
}

fn unauthorized_response(message: &str) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            code: "UNAUTHORIZED".to_string(),
            message: message.to_string(),
            details: None,
        },
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
