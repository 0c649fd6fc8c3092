//! # Properties & Shield Mode API
//!
//! Owners register properties and read or disable Shield Mode. Shield Mode
//! is only ever turned on by enforcement, so there is no enable endpoint:
//! an owner asking for it is refused and recorded.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use stayguard_core::{PropertyId, RegionCode};
use stayguard_state::{Property, ShieldStatus};

use crate::error::AppError;
use crate::extractors::{extract_validated_json, RequestActor, Validate};
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterPropertyRequest {
    pub name: String,
    pub region_code: String,
    /// Where owner notifications go. Defaults to the caller's email.
    #[serde(default)]
    pub owner_email: Option<String>,
    /// The owner lives at the property.
    #[serde(default)]
    pub owner_occupied: bool,
}

impl Validate for RegisterPropertyRequest {
    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        if self.name.len() > 255 {
            return Err("name must be at most 255 characters".into());
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PropertyResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub owner_email: Option<String>,
    pub name: String,
    pub region_code: String,
    pub owner_occupied: bool,
    pub shield_mode_enabled: bool,
    pub utility_lock_engaged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Property> for PropertyResponse {
    fn from(p: Property) -> Self {
        Self {
            id: *p.id.as_uuid(),
            owner_id: *p.owner_id.as_uuid(),
            owner_email: p.owner_email,
            name: p.name,
            region_code: p.region_code.to_string(),
            owner_occupied: p.owner_occupied,
            shield_mode_enabled: p.shield_mode_enabled,
            utility_lock_engaged_at: p.utility_lock_engaged_at.map(|t| *t.as_datetime()),
            created_at: *p.created_at.as_datetime(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ShieldStatusResponse {
    pub property_id: Uuid,
    pub enabled: bool,
    /// `PASSIVE_GUARD`, `ACTIVE_ENFORCEMENT` or `INACTIVE`.
    pub mode: String,
    pub occupied: bool,
    pub utility_lock_engaged_at: Option<DateTime<Utc>>,
}

impl From<ShieldStatus> for ShieldStatusResponse {
    fn from(s: ShieldStatus) -> Self {
        Self {
            property_id: *s.property_id.as_uuid(),
            enabled: s.enabled,
            mode: s.mode.as_str().to_string(),
            occupied: s.occupied,
            utility_lock_engaged_at: s.utility_lock_engaged_at.map(|t| *t.as_datetime()),
        }
    }
}

/// Owner request to change Shield Mode.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ShieldModeRequest {
    pub enabled: bool,
}

impl Validate for ShieldModeRequest {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/properties", get(list_properties).post(register_property))
        .route("/v1/properties/:id/shield", get(get_shield_status).put(set_shield_mode))
        .route("/v1/properties/:id/shield/disable", post(disable_shield_mode))
}

/// POST /v1/properties: Register a property in a supported region.
#[utoipa::path(
    post,
    path = "/v1/properties",
    request_body = RegisterPropertyRequest,
    responses(
        (status = 201, description = "Property registered", body = PropertyResponse),
        (status = 422, description = "Unsupported region", body = crate::error::ErrorBody),
    ),
    tag = "properties"
)]
pub(crate) async fn register_property(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    body: Result<Json<RegisterPropertyRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PropertyResponse>), AppError> {
    let req = extract_validated_json(body)?;
    let region = RegionCode::new(&req.region_code)?;
    let property = state
        .service
        .register_property(&actor, req.name.trim().to_string(), region, req.owner_email, req.owner_occupied)
        .await?;
    Ok((StatusCode::CREATED, Json(property.into())))
}

/// GET /v1/properties: The caller's properties.
#[utoipa::path(
    get,
    path = "/v1/properties",
    responses(
        (status = 200, description = "Properties", body = Vec<PropertyResponse>),
    ),
    tag = "properties"
)]
pub(crate) async fn list_properties(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
) -> Result<Json<Vec<PropertyResponse>>, AppError> {
    let properties = state.service.list_properties(&actor).await?;
    Ok(Json(properties.into_iter().map(Into::into).collect()))
}

/// GET /v1/properties/:id/shield: Derived Shield Mode status.
#[utoipa::path(
    get,
    path = "/v1/properties/{id}/shield",
    params(("id" = Uuid, Path, description = "Property ID")),
    responses(
        (status = 200, description = "Shield status", body = ShieldStatusResponse),
        (status = 404, description = "Property not found", body = crate::error::ErrorBody),
    ),
    tag = "properties"
)]
pub(crate) async fn get_shield_status(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<Uuid>,
) -> Result<Json<ShieldStatusResponse>, AppError> {
    let status = state.service.shield_status(&actor, PropertyId::from_uuid(id)).await?;
    Ok(Json(status.into()))
}

/// PUT /v1/properties/:id/shield: Request a Shield Mode change. Turning it on is refused.
#[utoipa::path(
    put,
    path = "/v1/properties/{id}/shield",
    params(("id" = Uuid, Path, description = "Property ID")),
    request_body = ShieldModeRequest,
    responses(
        (status = 200, description = "Shield Mode turned off", body = ShieldStatusResponse),
        (status = 409, description = "Shield Mode cannot be turned on manually, or is already off", body = crate::error::ErrorBody),
    ),
    tag = "properties"
)]
pub(crate) async fn set_shield_mode(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<Uuid>,
    body: Result<Json<ShieldModeRequest>, JsonRejection>,
) -> Result<Json<ShieldStatusResponse>, AppError> {
    let req = extract_validated_json(body)?;
    let status = state
        .service
        .set_shield_mode(&actor, PropertyId::from_uuid(id), req.enabled)
        .await?;
    Ok(Json(status.into()))
}

/// POST /v1/properties/:id/shield/disable: Turn Shield Mode off.
#[utoipa::path(
    post,
    path = "/v1/properties/{id}/shield/disable",
    params(("id" = Uuid, Path, description = "Property ID")),
    responses(
        (status = 200, description = "Shield Mode turned off", body = ShieldStatusResponse),
        (status = 409, description = "Shield Mode already off", body = crate::error::ErrorBody),
    ),
    tag = "properties"
)]
pub(crate) async fn disable_shield_mode(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<Uuid>,
) -> Result<Json<ShieldStatusResponse>, AppError> {
    let status = state
        .service
        .disable_shield_mode(&actor, PropertyId::from_uuid(id))
        .await?;
    Ok(Json(status.into()))
}
