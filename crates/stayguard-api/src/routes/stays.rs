//! # Stays API
//!
//! Stay lifecycle endpoints. Guests end or cancel their own stays; owners
//! revoke stays on their properties and release the utility access token.
//! Every refused transition is answered with its typed error and recorded in
//! the audit ledger as a failed attempt.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use stayguard_core::{PropertyId, StayId, UserId};
use stayguard_state::Stay;

use crate::error::AppError;
use crate::extractors::{extract_validated_json, RequestActor, Validate};
use crate::routes::rules::ClassificationResponse;
use crate::routes::wire_name;
use crate::service::{StayRequest, StayView};
use crate::state::AppState;

/// A stay with its derived projections.
#[derive(Debug, Serialize, ToSchema)]
pub struct StayResponse {
    pub id: Uuid,
    pub property_id: Uuid,
    pub owner_id: Uuid,
    pub guest_id: Uuid,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub invitation_id: Option<Uuid>,
    pub stay_start_date: NaiveDate,
    pub stay_end_date: NaiveDate,
    pub region_code: String,
    /// `OPEN`, `COMPLETED`, `CANCELLED` or `REVOKED`.
    pub state: String,
    /// `UPCOMING`, `ACTIVE`, `OVERSTAYED` or the terminal state. Present on reads.
    pub phase: Option<String>,
    pub dead_mans_switch_enabled: bool,
    pub checked_out_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub vacated_at: Option<DateTime<Utc>>,
    /// Deadline to leave a revoked stay.
    pub vacate_by: Option<DateTime<Utc>>,
    pub usat_token_released_at: Option<DateTime<Utc>>,
    pub days_until_end: Option<i64>,
    pub classification: Option<ClassificationResponse>,
    pub created_at: DateTime<Utc>,
}

impl StayResponse {
    /// A bare stay, without read-time projections.
    pub fn from_stay(stay: Stay) -> Self {
        let status = stay.status();
        Self {
            id: *stay.id.as_uuid(),
            property_id: *stay.property_id.as_uuid(),
            owner_id: *stay.owner_id.as_uuid(),
            guest_id: *stay.guest_id.as_uuid(),
            guest_name: stay.guest_name,
            guest_email: stay.guest_email,
            invitation_id: stay.invitation_id.map(|i| *i.as_uuid()),
            stay_start_date: stay.stay_start_date,
            stay_end_date: stay.stay_end_date,
            region_code: stay.region_code.to_string(),
            state: status.name().to_string(),
            phase: None,
            dead_mans_switch_enabled: stay.dead_mans_switch_enabled,
            checked_out_at: status.checked_out_at().map(|t| *t.as_datetime()),
            cancelled_at: status.cancelled_at().map(|t| *t.as_datetime()),
            revoked_at: status.revoked_at().map(|t| *t.as_datetime()),
            vacated_at: status.vacated_at().map(|t| *t.as_datetime()),
            vacate_by: status.vacate_by().map(|t| *t.as_datetime()),
            usat_token_released_at: stay.usat_token_released_at.map(|t| *t.as_datetime()),
            days_until_end: None,
            classification: None,
            created_at: *stay.created_at.as_datetime(),
        }
    }
}

impl From<StayView> for StayResponse {
    fn from(view: StayView) -> Self {
        let mut resp = Self::from_stay(view.stay);
        resp.phase = Some(wire_name(&view.phase));
        resp.vacate_by = view.vacate_by.map(|t| *t.as_datetime());
        resp.days_until_end = Some(view.days_until_end);
        resp.classification = view.classification.map(Into::into);
        resp
    }
}

/// Direct stay creation, for imports and system callers.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateStayRequest {
    pub property_id: Uuid,
    pub guest_id: Uuid,
    #[serde(default)]
    pub guest_name: Option<String>,
    #[serde(default)]
    pub guest_email: Option<String>,
    pub stay_start_date: NaiveDate,
    pub stay_end_date: NaiveDate,
    #[serde(default = "default_true")]
    pub dead_mans_switch_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Validate for CreateStayRequest {
    fn validate(&self) -> Result<(), String> {
        if self.stay_end_date <= self.stay_start_date {
            return Err("stay_end_date must be after stay_start_date".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct StayListParams {
    pub property_id: Option<Uuid>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/stays", get(list_stays).post(create_stay))
        .route("/v1/stays/:id", get(get_stay))
        .route("/v1/stays/:id/end", post(end_stay))
        .route("/v1/stays/:id/cancel", post(cancel_stay))
        .route("/v1/stays/:id/revoke", post(revoke_stay))
        .route("/v1/stays/:id/vacate", post(vacate_stay))
        .route("/v1/stays/:id/release-usat", post(release_usat_token))
}

/// POST /v1/stays: Create an open stay without an invitation.
#[utoipa::path(
    post,
    path = "/v1/stays",
    request_body = CreateStayRequest,
    responses(
        (status = 201, description = "Stay created", body = StayResponse),
        (status = 404, description = "Property not found", body = crate::error::ErrorBody),
        (status = 422, description = "Overlapping stay or bad dates", body = crate::error::ErrorBody),
    ),
    tag = "stays"
)]
pub(crate) async fn create_stay(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    body: Result<Json<CreateStayRequest>, JsonRejection>,
) -> Result<(axum::http::StatusCode, Json<StayResponse>), AppError> {
    let req = extract_validated_json(body)?;
    let request = StayRequest {
        property_id: PropertyId::from_uuid(req.property_id),
        guest_id: UserId::from_uuid(req.guest_id),
        guest_name: req.guest_name,
        guest_email: req.guest_email,
        stay_start_date: req.stay_start_date,
        stay_end_date: req.stay_end_date,
        dead_mans_switch_enabled: req.dead_mans_switch_enabled,
    };
    let stay = state.service.create_stay(&actor, request).await?;
    Ok((axum::http::StatusCode::CREATED, Json(StayResponse::from_stay(stay))))
}

/// GET /v1/stays: Stays visible to the caller.
#[utoipa::path(
    get,
    path = "/v1/stays",
    params(StayListParams),
    responses(
        (status = 200, description = "Stays with derived phase and classification", body = Vec<StayResponse>),
    ),
    tag = "stays"
)]
pub(crate) async fn list_stays(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Query(params): Query<StayListParams>,
) -> Result<Json<Vec<StayResponse>>, AppError> {
    let views = state
        .service
        .list_stays(&actor, params.property_id.map(PropertyId::from_uuid))
        .await?;
    Ok(Json(views.into_iter().map(Into::into).collect()))
}

/// GET /v1/stays/:id: One stay.
#[utoipa::path(
    get,
    path = "/v1/stays/{id}",
    params(("id" = Uuid, Path, description = "Stay ID")),
    responses(
        (status = 200, description = "Stay", body = StayResponse),
        (status = 404, description = "Stay not found", body = crate::error::ErrorBody),
    ),
    tag = "stays"
)]
pub(crate) async fn get_stay(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<Uuid>,
) -> Result<Json<StayResponse>, AppError> {
    let view = state.service.get_stay(&actor, StayId::from_uuid(id)).await?;
    Ok(Json(view.into()))
}

/// POST /v1/stays/:id/end: Guest checks out.
#[utoipa::path(
    post,
    path = "/v1/stays/{id}/end",
    params(("id" = Uuid, Path, description = "Stay ID")),
    responses(
        (status = 200, description = "Stay ended", body = StayResponse),
        (status = 409, description = "Already resolved or not started", body = crate::error::ErrorBody),
    ),
    tag = "stays"
)]
pub(crate) async fn end_stay(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<Uuid>,
) -> Result<Json<StayResponse>, AppError> {
    let stay = state.service.end_stay(&actor, StayId::from_uuid(id)).await?;
    Ok(Json(StayResponse::from_stay(stay)))
}

/// POST /v1/stays/:id/cancel: Guest cancels a stay that has not started.
#[utoipa::path(
    post,
    path = "/v1/stays/{id}/cancel",
    params(("id" = Uuid, Path, description = "Stay ID")),
    responses(
        (status = 200, description = "Stay cancelled", body = StayResponse),
        (status = 409, description = "Already resolved or already started", body = crate::error::ErrorBody),
    ),
    tag = "stays"
)]
pub(crate) async fn cancel_stay(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<Uuid>,
) -> Result<Json<StayResponse>, AppError> {
    let stay = state.service.cancel_stay(&actor, StayId::from_uuid(id)).await?;
    Ok(Json(StayResponse::from_stay(stay)))
}

/// POST /v1/stays/:id/revoke: Owner kill switch; the guest has 12 hours to vacate.
#[utoipa::path(
    post,
    path = "/v1/stays/{id}/revoke",
    params(("id" = Uuid, Path, description = "Stay ID")),
    responses(
        (status = 200, description = "Stay revoked", body = StayResponse),
        (status = 409, description = "Already resolved", body = crate::error::ErrorBody),
    ),
    tag = "stays"
)]
pub(crate) async fn revoke_stay(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<Uuid>,
) -> Result<Json<StayResponse>, AppError> {
    let stay = state.service.revoke_stay(&actor, StayId::from_uuid(id)).await?;
    Ok(Json(StayResponse::from_stay(stay)))
}

/// POST /v1/stays/:id/vacate: Guest confirms leaving a revoked stay.
#[utoipa::path(
    post,
    path = "/v1/stays/{id}/vacate",
    params(("id" = Uuid, Path, description = "Stay ID")),
    responses(
        (status = 200, description = "Departure recorded", body = StayResponse),
        (status = 409, description = "Not revoked or already vacated", body = crate::error::ErrorBody),
    ),
    tag = "stays"
)]
pub(crate) async fn vacate_stay(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<Uuid>,
) -> Result<Json<StayResponse>, AppError> {
    let stay = state.service.vacate_stay(&actor, StayId::from_uuid(id)).await?;
    Ok(Json(StayResponse::from_stay(stay)))
}

/// POST /v1/stays/:id/release-usat: Owner releases the utility access token.
#[utoipa::path(
    post,
    path = "/v1/stays/{id}/release-usat",
    params(("id" = Uuid, Path, description = "Stay ID")),
    responses(
        (status = 200, description = "Token released", body = StayResponse),
        (status = 409, description = "Already released or stay resolved", body = crate::error::ErrorBody),
    ),
    tag = "stays"
)]
pub(crate) async fn release_usat_token(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<Uuid>,
) -> Result<Json<StayResponse>, AppError> {
    let stay = state.service.release_usat_token(&actor, StayId::from_uuid(id)).await?;
    Ok(Json(StayResponse::from_stay(stay)))
}
