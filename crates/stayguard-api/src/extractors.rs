//! # Custom Extractors & Validation
//!
//! The [`Validate`] trait for request DTOs, helpers to extract and validate
//! JSON bodies, and [`RequestActor`], which turns the authenticated caller
//! plus request headers into the [`Actor`] recorded in the audit ledger.

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::Json;

use stayguard_core::Actor;

use crate::auth::CallerIdentity;
use crate::error::AppError;

/// Request types that check business rules serde cannot express.
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

/// Extract a JSON body, mapping deserialization errors to [`AppError::BadRequest`].
///
/// ```ignore
/// async fn handler(body: Result<Json<T>, JsonRejection>) -> Result<..., AppError> {
///     let req = extract_json(body)?;
/// }
/// ```
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract a JSON body and validate it using the [`Validate`] trait.
pub fn extract_validated_json<T: Validate>(
    result: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    let value = extract_json(result)?;
    value.validate().map_err(AppError::Validation)?;
    Ok(value)
}

/// The caller as an audit [`Actor`], with request context attached.
#[derive(Debug, Clone)]
pub struct RequestActor(pub Actor);

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Client address: first hop of `x-forwarded-for`, else `x-real-ip`.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header_str(headers, "x-real-ip"))
        .map(str::to_owned)
}

pub(crate) fn actor_from(caller: &CallerIdentity, headers: &HeaderMap) -> Actor {
    let mut actor = Actor {
        role: caller.role,
        user_id: caller.user_id,
        email: None,
        ip_address: None,
        user_agent: None,
    };
    if let Some(email) = header_str(headers, "x-user-email") {
        actor = actor.with_email(email);
    }
    actor.with_request_context(
        client_ip(headers),
        header_str(headers, "user-agent").map(str::to_owned),
    )
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestActor {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let caller = CallerIdentity::from_request_parts(parts, state).await?;
        Ok(Self(actor_from(&caller, &parts.headers)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde::Deserialize;
    use stayguard_core::{ActorRole, UserId};

    #[derive(Debug, Deserialize)]
    struct Named {
        name: String,
    }

    impl Validate for Named {
        fn validate(&self) -> Result<(), String> {
            if self.name.trim().is_empty() {
                return Err("name must not be empty".into());
            }
            Ok(())
        }
    }

    #[test]
    fn validated_json_rejects_rule_violation() {
        let err = extract_validated_json(Ok(Json(Named { name: "  ".into() }))).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m.contains("empty")));
        let ok = extract_validated_json(Ok(Json(Named { name: "Maple".into() }))).unwrap();
        assert_eq!(ok.name, "Maple");
    }

    #[test]
    fn actor_carries_request_context() {
        let user = UserId::new();
        let caller = CallerIdentity {
            role: ActorRole::Guest,
            user_id: Some(user),
        };
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.1"));
        headers.insert("user-agent", HeaderValue::from_static("curl/8.5"));
        headers.insert("x-user-email", HeaderValue::from_static("guest@example.com"));

        let actor = actor_from(&caller, &headers);
        assert_eq!(actor.role, ActorRole::Guest);
        assert_eq!(actor.user_id, Some(user));
        assert_eq!(actor.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(actor.user_agent.as_deref(), Some("curl/8.5"));
        assert_eq!(actor.email.as_deref(), Some("guest@example.com"));
    }

    #[test]
    fn real_ip_is_the_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        let actor = actor_from(&CallerIdentity::system(), &headers);
        assert_eq!(actor.ip_address.as_deref(), Some("198.51.100.4"));
        assert!(actor.user_agent.is_none());
        assert!(actor.email.is_none());
    }
}
