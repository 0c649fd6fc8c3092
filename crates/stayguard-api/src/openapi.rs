//! # OpenAPI Specification Assembly
//!
//! Assembles all utoipa-documented routes into a single OpenAPI spec,
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::state::AppState;

/// Adds the Bearer token security scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some(
                            "`{role}:{user_id}:{secret}`, or `{secret}` for system callers. Secret set via AUTH_TOKEN.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "StayGuard API",
        version = "0.3.0",
        description = "Stay and occupancy lifecycle service.\n\nProvides:\n- **Invitations** with a 12 hour acceptance window\n- **Stays** with guest checkout, cancellation and owner revocation\n- **Risk classification** against per-jurisdiction tenancy thresholds\n- **Dead Man's Switch** enforcement and Shield Mode\n- **Audit ledger** with a verifiable hash chain\n\nAll `/v1/*` endpoints require `Authorization: Bearer <token>`. Health probes (`/health/*`) are unauthenticated.",
        license(name = "BUSL-1.1")
    ),
    security(
        ("bearer_auth" = [])
    ),
    paths(
        // ── Properties ───────────────────────────────────────────────────
        crate::routes::properties::register_property,
        crate::routes::properties::list_properties,
        crate::routes::properties::get_shield_status,
        crate::routes::properties::set_shield_mode,
        crate::routes::properties::disable_shield_mode,
        // ── Invitations ──────────────────────────────────────────────────
        crate::routes::invitations::create_invitation,
        crate::routes::invitations::list_invitations,
        crate::routes::invitations::sign_invitation,
        crate::routes::invitations::accept_invitation,
        crate::routes::invitations::cancel_invitation,
        // ── Stays ────────────────────────────────────────────────────────
        crate::routes::stays::create_stay,
        crate::routes::stays::list_stays,
        crate::routes::stays::get_stay,
        crate::routes::stays::end_stay,
        crate::routes::stays::cancel_stay,
        crate::routes::stays::revoke_stay,
        crate::routes::stays::vacate_stay,
        crate::routes::stays::release_usat_token,
        // ── Audit ────────────────────────────────────────────────────────
        crate::routes::audit::query_audit_log,
        crate::routes::audit::verify_audit_chain,
        // ── Enforcement ──────────────────────────────────────────────────
        crate::routes::enforcement::run_enforcement,
        // ── Rules ────────────────────────────────────────────────────────
        crate::routes::rules::list_rules,
        crate::routes::rules::classify_stay,
    ),
    components(
        schemas(
            crate::error::ErrorBody,
            crate::error::ErrorDetail,
            crate::routes::properties::RegisterPropertyRequest,
            crate::routes::properties::PropertyResponse,
            crate::routes::properties::ShieldStatusResponse,
            crate::routes::properties::ShieldModeRequest,
            crate::routes::invitations::CreateInvitationRequest,
            crate::routes::invitations::CreatedInvitationResponse,
            crate::routes::invitations::InvitationResponse,
            crate::routes::invitations::SignInvitationRequest,
            crate::routes::invitations::AcceptInvitationRequest,
            crate::routes::invitations::AcceptedInvitationResponse,
            crate::routes::stays::CreateStayRequest,
            crate::routes::stays::StayResponse,
            crate::routes::audit::AuditEntryResponse,
            crate::routes::audit::ChainVerificationResponse,
            crate::routes::enforcement::RunEnforcementRequest,
            crate::routes::enforcement::EnforcementReportResponse,
            crate::routes::enforcement::FiredThresholdResponse,
            crate::routes::rules::JurisdictionRuleResponse,
            crate::routes::rules::ClassifyRequest,
            crate::routes::rules::ClassificationResponse,
            crate::routes::rules::RiskFactorResponse,
        ),
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "properties", description = "Property registration and Shield Mode"),
        (name = "invitations", description = "Invitation lifecycle: create, sign, accept, cancel"),
        (name = "stays", description = "Stay lifecycle: checkout, cancellation, revocation, USAT release"),
        (name = "audit", description = "Hash-chained audit ledger queries and verification"),
        (name = "enforcement", description = "Dead Man's Switch enforcement passes"),
        (name = "rules", description = "Jurisdiction rules and stay risk classification"),
    )
)]
pub struct ApiDoc;

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json: Return the generated OpenAPI specification.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_generates() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "StayGuard API");
        assert!(!spec.paths.paths.is_empty());
    }

    #[test]
    fn spec_has_lifecycle_paths() {
        let spec = ApiDoc::openapi();
        for path in [
            "/v1/invitations",
            "/v1/invitations/{code}/accept",
            "/v1/stays/{id}/revoke",
            "/v1/stays/{id}/vacate",
            "/v1/audit/verify",
            "/v1/enforcement/run",
            "/v1/classify",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn spec_serializes() {
        let json = serde_json::to_string(&ApiDoc::openapi()).unwrap();
        assert!(json.contains("bearer_auth"));
    }
}
