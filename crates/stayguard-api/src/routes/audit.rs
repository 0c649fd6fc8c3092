//! # Audit Ledger API
//!
//! Read-only views of the hash-chained ledger. Owners see entries filed
//! under their own properties; system callers see everything; guests have
//! no access.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use stayguard_agentic::{AuditCategory, AuditEntry, AuditQuery, ChainVerification};
use stayguard_core::{PropertyId, StayId, Timestamp};

use crate::error::AppError;
use crate::extractors::RequestActor;
use crate::state::AppState;

const MAX_LIMIT: usize = 1000;

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditEntryResponse {
    pub id: Uuid,
    pub sequence: i64,
    /// `status_change`, `guest_signature`, `failed_attempt`, `shield_mode`
    /// or `dead_mans_switch`.
    pub category: String,
    pub title: String,
    pub message: String,
    pub property_id: Option<Uuid>,
    pub stay_id: Option<Uuid>,
    pub invitation_id: Option<Uuid>,
    pub actor_role: String,
    pub actor_user_id: Option<Uuid>,
    pub actor_email: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub meta: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub previous_hash: String,
    pub entry_hash: String,
}

impl From<AuditEntry> for AuditEntryResponse {
    fn from(e: AuditEntry) -> Self {
        Self {
            id: *e.id.as_uuid(),
            sequence: e.sequence,
            category: e.category.as_str().to_string(),
            title: e.title,
            message: e.message,
            property_id: e.property_id.map(|id| *id.as_uuid()),
            stay_id: e.stay_id.map(|id| *id.as_uuid()),
            invitation_id: e.invitation_id.map(|id| *id.as_uuid()),
            actor_role: e.actor_role.as_str().to_string(),
            actor_user_id: e.actor_user_id.map(|id| *id.as_uuid()),
            actor_email: e.actor_email,
            ip_address: e.ip_address,
            user_agent: e.user_agent,
            meta: e.meta,
            created_at: *e.created_at.as_datetime(),
            previous_hash: e.previous_hash,
            entry_hash: e.entry_hash,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChainVerificationResponse {
    pub total_entries: usize,
    pub broken_links: usize,
    pub first_broken_sequence: Option<i64>,
    pub chain_valid: bool,
}

impl From<ChainVerification> for ChainVerificationResponse {
    fn from(v: ChainVerification) -> Self {
        Self {
            total_entries: v.total_entries,
            broken_links: v.broken_links,
            first_broken_sequence: v.first_broken_sequence,
            chain_valid: v.chain_valid,
        }
    }
}

/// Ledger filters. All are optional and conjunctive.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct AuditQueryParams {
    /// Inclusive lower bound (RFC 3339).
    pub from_ts: Option<DateTime<Utc>>,
    /// Inclusive upper bound (RFC 3339).
    pub to_ts: Option<DateTime<Utc>>,
    pub category: Option<String>,
    pub property_id: Option<Uuid>,
    pub stay_id: Option<Uuid>,
    /// Case-insensitive substring of title or message.
    pub search: Option<String>,
    /// At most 1000; defaults to 100.
    pub limit: Option<usize>,
}

impl AuditQueryParams {
    fn into_query(self) -> Result<AuditQuery, AppError> {
        let category = self
            .category
            .as_deref()
            .map(|c| {
                AuditCategory::parse(c)
                    .ok_or_else(|| AppError::Validation(format!("unknown audit category: {c}")))
            })
            .transpose()?;
        if let (Some(from), Some(to)) = (self.from_ts, self.to_ts) {
            if from > to {
                return Err(AppError::Validation("from_ts must not be after to_ts".into()));
            }
        }
        Ok(AuditQuery {
            from_ts: self.from_ts.map(Timestamp::from_utc),
            to_ts: self.to_ts.map(Timestamp::from_utc),
            category,
            property_id: self.property_id.map(PropertyId::from_uuid),
            stay_id: self.stay_id.map(StayId::from_uuid),
            search: self.search.filter(|s| !s.trim().is_empty()),
            scope: None,
            limit: Some(self.limit.unwrap_or(100).min(MAX_LIMIT)),
        })
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/audit", get(query_audit_log))
        .route("/v1/audit/verify", get(verify_audit_chain))
}

/// GET /v1/audit: Ledger entries, newest first.
#[utoipa::path(
    get,
    path = "/v1/audit",
    params(AuditQueryParams),
    responses(
        (status = 200, description = "Matching entries, newest first", body = Vec<AuditEntryResponse>),
        (status = 403, description = "Guests have no ledger access", body = crate::error::ErrorBody),
    ),
    tag = "audit"
)]
pub(crate) async fn query_audit_log(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<Vec<AuditEntryResponse>>, AppError> {
    let query = params.into_query()?;
    let entries = state.service.query_audit_log(&actor, query).await?;
    Ok(Json(entries.into_iter().map(Into::into).collect()))
}

/// GET /v1/audit/verify: Re-check every link of the hash chain.
#[utoipa::path(
    get,
    path = "/v1/audit/verify",
    responses(
        (status = 200, description = "Verification result", body = ChainVerificationResponse),
    ),
    tag = "audit"
)]
pub(crate) async fn verify_audit_chain(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
) -> Result<Json<ChainVerificationResponse>, AppError> {
    let verification = state.service.verify_audit_chain(&actor).await?;
    Ok(Json(verification.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_validate_category_and_range() {
        let bad = AuditQueryParams {
            category: Some("gossip".into()),
            ..AuditQueryParams::default()
        };
        assert!(matches!(bad.into_query(), Err(AppError::Validation(_))));

        let now = Utc::now();
        let inverted = AuditQueryParams {
            from_ts: Some(now),
            to_ts: Some(now - chrono::Duration::hours(1)),
            ..AuditQueryParams::default()
        };
        assert!(inverted.into_query().is_err());
    }

    #[test]
    fn limit_is_capped() {
        let q = AuditQueryParams {
            category: Some("failed_attempt".into()),
            limit: Some(50_000),
            search: Some("   ".into()),
            ..AuditQueryParams::default()
        }
        .into_query()
        .unwrap();
        assert_eq!(q.category, Some(AuditCategory::FailedAttempt));
        assert_eq!(q.limit, Some(MAX_LIMIT));
        assert!(q.search.is_none());
    }
}
