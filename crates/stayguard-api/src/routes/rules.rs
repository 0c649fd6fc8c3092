//! # Jurisdiction Rules & Classification API
//!
//! Read-only access to the seeded jurisdiction table and the stateless risk
//! classifier. Any authenticated caller may use both.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use stayguard_compliance::{Classification, RiskFactor, StayAttributes};
use stayguard_core::{JurisdictionRule, RegionCode};

use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::routes::wire_name;
use crate::state::AppState;

/// One jurisdiction's occupancy limits.
#[derive(Debug, Serialize, ToSchema)]
pub struct JurisdictionRuleResponse {
    pub region_code: String,
    pub max_safe_stay_days: u32,
    pub tenancy_threshold_days: u32,
    pub warning_days: u32,
    pub statute_reference: String,
    pub plain_english_explanation: String,
    pub payment_creates_tenancy: bool,
    /// Owner-occupied homes get the lodger cap.
    pub allow_extended_if_owner_occupied: bool,
}

impl From<JurisdictionRule> for JurisdictionRuleResponse {
    fn from(r: JurisdictionRule) -> Self {
        Self {
            region_code: r.region_code.to_string(),
            max_safe_stay_days: r.max_safe_stay_days,
            tenancy_threshold_days: r.tenancy_threshold_days,
            warning_days: r.warning_days,
            statute_reference: r.statute_reference,
            plain_english_explanation: r.plain_english_explanation,
            payment_creates_tenancy: r.payment_creates_tenancy,
            allow_extended_if_owner_occupied: r.allow_extended_if_owner_occupied,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RiskFactorResponse {
    /// e.g. `DURATION_EXCEEDS_LIMIT`.
    pub code: String,
    pub severity: String,
    pub description: String,
}

impl From<RiskFactor> for RiskFactorResponse {
    fn from(f: RiskFactor) -> Self {
        Self {
            code: wire_name(&f.code),
            severity: f.severity.as_str().to_string(),
            description: f.description,
        }
    }
}

/// Classifier verdict for a proposed or recorded stay.
#[derive(Debug, Serialize, ToSchema)]
pub struct ClassificationResponse {
    pub region_code: String,
    /// `GUEST`, `LODGER`, `TEMPORARY_OCCUPANT` or `TENANT_RISK`.
    pub stay_type: String,
    /// `LOW`, `MEDIUM`, `HIGH` or `CRITICAL`.
    pub risk_level: String,
    pub risk_score: u32,
    pub risk_factors: Vec<RiskFactorResponse>,
    pub can_proceed: bool,
    pub duration_days: i64,
    pub max_safe_stay_days: u32,
    pub applicable_statutes: Vec<String>,
    pub message: Option<String>,
}

impl From<Classification> for ClassificationResponse {
    fn from(c: Classification) -> Self {
        Self {
            region_code: c.region_code.to_string(),
            stay_type: wire_name(&c.stay_type),
            risk_level: c.risk_level.as_str().to_string(),
            risk_score: c.risk_score,
            risk_factors: c.risk_factors.into_iter().map(Into::into).collect(),
            can_proceed: c.can_proceed,
            duration_days: c.duration_days,
            max_safe_stay_days: c.max_safe_stay_days,
            applicable_statutes: c.applicable_statutes,
            message: c.message,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ClassifyRequest {
    pub region_code: String,
    pub stay_start_date: NaiveDate,
    pub stay_end_date: NaiveDate,
    #[serde(default)]
    pub payment_involved: bool,
    #[serde(default)]
    pub exclusive_possession: bool,
    #[serde(default = "default_true")]
    pub guest_has_permanent_address: bool,
    #[serde(default)]
    pub owner_occupied: bool,
}

fn default_true() -> bool {
    true
}

impl Validate for ClassifyRequest {
    fn validate(&self) -> Result<(), String> {
        if self.stay_end_date <= self.stay_start_date {
            return Err("stay_end_date must be after stay_start_date".into());
        }
        Ok(())
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/rules", get(list_rules))
        .route("/v1/classify", post(classify_stay))
}

/// GET /v1/rules: The jurisdiction rule table.
#[utoipa::path(
    get,
    path = "/v1/rules",
    responses(
        (status = 200, description = "Seeded jurisdiction rules", body = Vec<JurisdictionRuleResponse>),
    ),
    tag = "rules"
)]
pub(crate) async fn list_rules(State(state): State<AppState>) -> Json<Vec<JurisdictionRuleResponse>> {
    Json(state.service.list_rules().into_iter().map(Into::into).collect())
}

/// POST /v1/classify: Classify a proposed stay without recording anything.
#[utoipa::path(
    post,
    path = "/v1/classify",
    request_body = ClassifyRequest,
    responses(
        (status = 200, description = "Classification", body = ClassificationResponse),
        (status = 404, description = "No rule for region", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid date range", body = crate::error::ErrorBody),
    ),
    tag = "rules"
)]
pub(crate) async fn classify_stay(
    State(state): State<AppState>,
    body: Result<Json<ClassifyRequest>, JsonRejection>,
) -> Result<Json<ClassificationResponse>, AppError> {
    let req = extract_validated_json(body)?;
    let region = RegionCode::new(&req.region_code)?;
    let attrs = StayAttributes {
        stay_start_date: req.stay_start_date,
        stay_end_date: req.stay_end_date,
        payment_involved: req.payment_involved,
        exclusive_possession: req.exclusive_possession,
        guest_has_permanent_address: req.guest_has_permanent_address,
        owner_occupied: req.owner_occupied,
    };
    let classification = state.service.classify(&region, &attrs)?;
    Ok(Json(classification.into()))
}
