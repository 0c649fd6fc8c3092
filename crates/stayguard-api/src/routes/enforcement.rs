//! # Enforcement API
//!
//! Manual trigger for a Dead Man's Switch pass, for operators and external
//! schedulers. System callers only. Repeating a pass is harmless.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use stayguard_core::{ActorRole, Timestamp};

use crate::auth::{require_role, CallerIdentity};
use crate::error::AppError;
use crate::extractors::{extract_json, RequestActor};
use crate::routes::wire_name;
use crate::service::{EnforcementReport, FiredThreshold};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RunEnforcementRequest {
    /// Evaluate as of this instant. Defaults to now.
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FiredThresholdResponse {
    pub stay_id: Uuid,
    pub property_id: Uuid,
    /// e.g. `final_day`, `post_end_enforcement`.
    pub threshold: String,
    /// Ledger sequence of the entry recording it.
    pub sequence: i64,
}

impl From<FiredThreshold> for FiredThresholdResponse {
    fn from(f: FiredThreshold) -> Self {
        Self {
            stay_id: *f.stay_id.as_uuid(),
            property_id: *f.property_id.as_uuid(),
            threshold: wire_name(&f.threshold),
            sequence: f.sequence,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EnforcementReportResponse {
    pub as_of: DateTime<Utc>,
    pub stays_scanned: usize,
    pub fired: Vec<FiredThresholdResponse>,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    pub errors: usize,
}

impl From<EnforcementReport> for EnforcementReportResponse {
    fn from(r: EnforcementReport) -> Self {
        Self {
            as_of: *r.as_of.as_datetime(),
            stays_scanned: r.stays_scanned,
            fired: r.fired.into_iter().map(Into::into).collect(),
            notifications_sent: r.notifications_sent,
            notifications_failed: r.notifications_failed,
            errors: r.errors,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/enforcement/run", post(run_enforcement))
}

/// POST /v1/enforcement/run: Evaluate every open stay now.
#[utoipa::path(
    post,
    path = "/v1/enforcement/run",
    request_body = RunEnforcementRequest,
    responses(
        (status = 200, description = "Pass complete", body = EnforcementReportResponse),
        (status = 403, description = "System role required", body = crate::error::ErrorBody),
    ),
    tag = "enforcement"
)]
pub(crate) async fn run_enforcement(
    State(state): State<AppState>,
    caller: CallerIdentity,
    RequestActor(actor): RequestActor,
    body: Result<Json<RunEnforcementRequest>, JsonRejection>,
) -> Result<Json<EnforcementReportResponse>, AppError> {
    require_role(&caller, ActorRole::System)?;
    // An empty body means "now".
    let req = match body {
        Err(JsonRejection::MissingJsonContentType(_)) => RunEnforcementRequest::default(),
        other => extract_json(other)?,
    };
    let as_of = req.as_of.map(Timestamp::from_utc).unwrap_or_else(|| state.service.now());
    tracing::info!(actor = %actor.label(), %as_of, "manual enforcement pass requested");
    let report = state.service.run_enforcement(as_of).await?;
    Ok(Json(report.into()))
}
