//! # Invitations API
//!
//! Owners create invitations for a date range and get the classifier's
//! verdict back with them. Guests sign the stay agreement and accept with
//! the invitation code within 12 hours of creation; acceptance creates the
//! stay. Expiry is derived on read and never written back.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use stayguard_core::{InvitationCode, PropertyId};
use stayguard_state::Invitation;

use crate::error::AppError;
use crate::extractors::{extract_validated_json, RequestActor, Validate};
use crate::routes::audit::AuditEntryResponse;
use crate::routes::rules::ClassificationResponse;
use crate::routes::stays::StayResponse;
use crate::routes::wire_name;
use crate::service::{AcceptanceRequest, InvitationListing, InvitationRequest};
use crate::state::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct InvitationResponse {
    pub id: Uuid,
    /// `INV-` followed by eight hex digits.
    pub code: String,
    pub property_id: Uuid,
    pub owner_id: Uuid,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub stay_start_date: NaiveDate,
    pub stay_end_date: NaiveDate,
    pub region_code: String,
    /// `pending`, `accepted`, `cancelled` or, derived on read, `expired`.
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub dead_mans_switch_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl InvitationResponse {
    fn with_status(inv: Invitation, status: String) -> Self {
        Self {
            id: *inv.id.as_uuid(),
            code: inv.code.to_string(),
            property_id: *inv.property_id.as_uuid(),
            owner_id: *inv.owner_id.as_uuid(),
            guest_name: inv.guest_name.clone(),
            guest_email: inv.guest_email.clone(),
            stay_start_date: inv.stay_start_date,
            stay_end_date: inv.stay_end_date,
            region_code: inv.region_code.to_string(),
            status,
            expires_at: *inv.expires_at().as_datetime(),
            dead_mans_switch_enabled: inv.dead_mans_switch_enabled,
            created_at: *inv.created_at.as_datetime(),
            resolved_at: inv.resolved_at.map(|t| *t.as_datetime()),
        }
    }

    /// The stored status, for responses to writes.
    fn stored(inv: Invitation) -> Self {
        let status = inv.status().as_str().to_string();
        Self::with_status(inv, status)
    }
}

impl From<InvitationListing> for InvitationResponse {
    fn from(l: InvitationListing) -> Self {
        Self::with_status(l.invitation, wire_name(&l.status))
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateInvitationRequest {
    pub property_id: Uuid,
    #[serde(default)]
    pub guest_name: Option<String>,
    #[serde(default)]
    pub guest_email: Option<String>,
    pub stay_start_date: NaiveDate,
    pub stay_end_date: NaiveDate,
}

impl Validate for CreateInvitationRequest {
    fn validate(&self) -> Result<(), String> {
        if self.stay_end_date <= self.stay_start_date {
            return Err("stay_end_date must be after stay_start_date".into());
        }
        if let Some(email) = &self.guest_email {
            if !email.contains('@') {
                return Err("guest_email must be an email address".into());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedInvitationResponse {
    pub invitation: InvitationResponse,
    pub classification: ClassificationResponse,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SignInvitationRequest {
    /// Completion token from the e-signature provider.
    pub signature_id: String,
}

impl Validate for SignInvitationRequest {
    fn validate(&self) -> Result<(), String> {
        if self.signature_id.trim().is_empty() {
            return Err("signature_id must not be empty".into());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AcceptInvitationRequest {
    /// Completion token from the e-signature provider.
    pub signature_id: String,
    #[serde(default)]
    pub guest_name: Option<String>,
    #[serde(default)]
    pub guest_email: Option<String>,
}

impl Validate for AcceptInvitationRequest {
    fn validate(&self) -> Result<(), String> {
        if self.signature_id.trim().is_empty() {
            return Err("signature_id must not be empty".into());
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AcceptedInvitationResponse {
    pub invitation: InvitationResponse,
    pub stay: StayResponse,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct InvitationListParams {
    pub property_id: Option<Uuid>,
}

fn parse_code(code: &str) -> Result<InvitationCode, AppError> {
    Ok(InvitationCode::new(code)?)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/invitations", get(list_invitations).post(create_invitation))
        .route("/v1/invitations/:code/sign", post(sign_invitation))
        .route("/v1/invitations/:code/accept", post(accept_invitation))
        .route("/v1/invitations/:code/cancel", post(cancel_invitation))
}

/// POST /v1/invitations: Invite a guest to a property for a date range.
#[utoipa::path(
    post,
    path = "/v1/invitations",
    request_body = CreateInvitationRequest,
    responses(
        (status = 201, description = "Invitation created", body = CreatedInvitationResponse),
        (status = 404, description = "Property not found", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid dates or blocked by risk", body = crate::error::ErrorBody),
    ),
    tag = "invitations"
)]
pub(crate) async fn create_invitation(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    body: Result<Json<CreateInvitationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedInvitationResponse>), AppError> {
    let req = extract_validated_json(body)?;
    let created = state
        .service
        .create_invitation(
            &actor,
            InvitationRequest {
                property_id: PropertyId::from_uuid(req.property_id),
                guest_name: req.guest_name,
                guest_email: req.guest_email,
                stay_start_date: req.stay_start_date,
                stay_end_date: req.stay_end_date,
            },
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedInvitationResponse {
            invitation: InvitationResponse::stored(created.invitation),
            classification: created.classification.into(),
        }),
    ))
}

/// GET /v1/invitations: The owner's invitations with derived status and expiry.
#[utoipa::path(
    get,
    path = "/v1/invitations",
    params(InvitationListParams),
    responses(
        (status = 200, description = "Invitations, newest first", body = Vec<InvitationResponse>),
        (status = 403, description = "Guests cannot list invitations", body = crate::error::ErrorBody),
    ),
    tag = "invitations"
)]
pub(crate) async fn list_invitations(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Query(params): Query<InvitationListParams>,
) -> Result<Json<Vec<InvitationResponse>>, AppError> {
    let listings = state
        .service
        .list_invitations(&actor, params.property_id.map(PropertyId::from_uuid))
        .await?;
    Ok(Json(listings.into_iter().map(Into::into).collect()))
}

/// POST /v1/invitations/:code/sign: Record the guest's completed e-signature.
#[utoipa::path(
    post,
    path = "/v1/invitations/{code}/sign",
    params(("code" = String, Path, description = "Invitation code")),
    request_body = SignInvitationRequest,
    responses(
        (status = 200, description = "Signature recorded", body = AuditEntryResponse),
        (status = 410, description = "Invitation expired", body = crate::error::ErrorBody),
    ),
    tag = "invitations"
)]
pub(crate) async fn sign_invitation(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(code): Path<String>,
    body: Result<Json<SignInvitationRequest>, JsonRejection>,
) -> Result<Json<AuditEntryResponse>, AppError> {
    let req = extract_validated_json(body)?;
    let code = parse_code(&code)?;
    let entry = state
        .service
        .record_guest_signature(&actor, &code, req.signature_id)
        .await?;
    Ok(Json(entry.into()))
}

/// POST /v1/invitations/:code/accept: Guest accepts and the stay is created.
#[utoipa::path(
    post,
    path = "/v1/invitations/{code}/accept",
    params(("code" = String, Path, description = "Invitation code")),
    request_body = AcceptInvitationRequest,
    responses(
        (status = 201, description = "Invitation accepted", body = AcceptedInvitationResponse),
        (status = 409, description = "Already accepted or cancelled", body = crate::error::ErrorBody),
        (status = 410, description = "Invitation expired", body = crate::error::ErrorBody),
        (status = 422, description = "Overlaps an open stay", body = crate::error::ErrorBody),
    ),
    tag = "invitations"
)]
pub(crate) async fn accept_invitation(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(code): Path<String>,
    body: Result<Json<AcceptInvitationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AcceptedInvitationResponse>), AppError> {
    let req = extract_validated_json(body)?;
    let code = parse_code(&code)?;
    let (invitation, stay) = state
        .service
        .accept_invitation(
            &actor,
            &code,
            AcceptanceRequest {
                guest_name: req.guest_name,
                guest_email: req.guest_email,
                signature_id: req.signature_id,
            },
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(AcceptedInvitationResponse {
            invitation: InvitationResponse::stored(invitation),
            stay: StayResponse::from_stay(stay),
        }),
    ))
}

/// POST /v1/invitations/:code/cancel: Owner withdraws a pending invitation.
#[utoipa::path(
    post,
    path = "/v1/invitations/{code}/cancel",
    params(("code" = String, Path, description = "Invitation code")),
    responses(
        (status = 200, description = "Invitation cancelled", body = InvitationResponse),
        (status = 409, description = "Already resolved", body = crate::error::ErrorBody),
    ),
    tag = "invitations"
)]
pub(crate) async fn cancel_invitation(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(code): Path<String>,
) -> Result<Json<InvitationResponse>, AppError> {
    let code = parse_code(&code)?;
    let invitation = state.service.cancel_invitation(&actor, &code).await?;
    Ok(Json(InvitationResponse::stored(invitation)))
}
