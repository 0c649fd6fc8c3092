//! # Integration Tests for stayguard-api
//!
//! Drives the full router with `tower::ServiceExt::oneshot`: health probes,
//! authentication, the invitation to stay flow, refused transitions and
//! their ledger entries, enforcement and OpenAPI generation.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use stayguard_api::config::AppConfig;
use stayguard_api::AppState;

fn test_app() -> axum::Router {
    stayguard_api::app(AppState::in_memory())
}

fn test_app_with_auth(token: &str) -> axum::Router {
    let base = AppState::in_memory();
    let config = AppConfig {
        auth_token: Some(token.to_string()),
        ..AppConfig::default()
    };
    stayguard_api::app(AppState::new(base.service, config))
}

async fn body_json(response: axum::http::Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Caller claim accepted while `AUTH_TOKEN` is unset.
fn bearer(role: &str, user: Uuid) -> String {
    format!("Bearer {role}:{user}")
}

async fn call(app: &axum::Router, method: &str, uri: &str, auth: Option<&str>, body: Option<Value>) -> axum::http::Response<Body> {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        req = req.header("authorization", auth);
    }
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };
    app.clone().oneshot(req.body(body).unwrap()).await.unwrap()
}

fn days_from_today(days: i64) -> String {
    (Utc::now().date_naive() + Duration::days(days)).to_string()
}

/// Registers a NYC property and returns its id.
async fn register_property(app: &axum::Router, owner: &str) -> String {
    let resp = call(
        app,
        "POST",
        "/v1/properties",
        Some(owner),
        Some(json!({ "name": "Maple St", "region_code": "nyc" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await;
    assert_eq!(body["region_code"], "NYC");
    body["id"].as_str().unwrap().to_string()
}

// -- Health Probes ------------------------------------------------------------

#[tokio::test]
async fn test_liveness_probe() {
    let resp = call(&test_app(), "GET", "/health/liveness", None, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "ok");
}

#[tokio::test]
async fn test_readiness_probe() {
    let resp = call(&test_app(), "GET", "/health/readiness", None, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "ready");
}

// -- Authentication -----------------------------------------------------------

#[tokio::test]
async fn test_missing_token_is_rejected_when_auth_enabled() {
    let app = test_app_with_auth("s3cret");
    let resp = call(&app, "GET", "/v1/rules", None, None).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_health_is_open_when_auth_enabled() {
    let app = test_app_with_auth("s3cret");
    let resp = call(&app, "GET", "/health/liveness", None, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_role_token_with_secret_is_accepted() {
    let app = test_app_with_auth("s3cret");
    let owner = format!("Bearer owner:{}:s3cret", Uuid::new_v4());
    let resp = call(&app, "GET", "/v1/properties", Some(&owner), None).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let forged = format!("Bearer owner:{}:guess", Uuid::new_v4());
    let resp = call(&app, "GET", "/v1/properties", Some(&forged), None).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// -- Rules & Classification ---------------------------------------------------

#[tokio::test]
async fn test_rules_are_seeded() {
    let resp = call(&test_app(), "GET", "/v1/rules", None, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    let codes: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["region_code"].as_str().unwrap())
        .collect();
    assert!(codes.contains(&"NYC"));
    assert!(codes.contains(&"CA"));
}

#[tokio::test]
async fn test_classify_thirty_days_in_nyc_is_critical() {
    let resp = call(
        &test_app(),
        "POST",
        "/v1/classify",
        None,
        Some(json!({
            "region_code": "NYC",
            "stay_start_date": "2026-06-01",
            "stay_end_date": "2026-07-01"
        })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["stay_type"], "TENANT_RISK");
    assert_eq!(body["risk_level"], "CRITICAL");
    assert_eq!(body["can_proceed"], false);
}

#[tokio::test]
async fn test_classify_owner_occupied_california_stay_is_lodger() {
    let resp = call(
        &test_app(),
        "POST",
        "/v1/classify",
        None,
        Some(json!({
            "region_code": "CA",
            "stay_start_date": "2026-06-01",
            "stay_end_date": "2026-07-31",
            "owner_occupied": true
        })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["stay_type"], "LODGER");
    assert_eq!(body["max_safe_stay_days"], 90);
    assert_eq!(body["can_proceed"], true);
}

#[tokio::test]
async fn test_classify_unknown_region_is_404() {
    let resp = call(
        &test_app(),
        "POST",
        "/v1/classify",
        None,
        Some(json!({
            "region_code": "ZZ",
            "stay_start_date": "2026-06-01",
            "stay_end_date": "2026-06-05"
        })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_classify_inverted_dates_is_422() {
    let resp = call(
        &test_app(),
        "POST",
        "/v1/classify",
        None,
        Some(json!({
            "region_code": "NYC",
            "stay_start_date": "2026-06-05",
            "stay_end_date": "2026-06-01"
        })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

// -- Invitation → Stay flow ---------------------------------------------------

#[tokio::test]
async fn test_invitation_accept_revoke_flow() {
    let app = test_app();
    let owner_id = Uuid::new_v4();
    let guest_id = Uuid::new_v4();
    let owner = bearer("owner", owner_id);
    let guest = bearer("guest", guest_id);
    let property_id = register_property(&app, &owner).await;

    let resp = call(
        &app,
        "POST",
        "/v1/invitations",
        Some(&owner),
        Some(json!({
            "property_id": property_id,
            "guest_name": "Ada",
            "stay_start_date": days_from_today(1),
            "stay_end_date": days_from_today(6)
        })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    assert_eq!(created["invitation"]["status"], "pending");
    assert_eq!(created["classification"]["stay_type"], "GUEST");
    let code = created["invitation"]["code"].as_str().unwrap().to_string();
    assert!(code.starts_with("INV-"));

    let resp = call(
        &app,
        "POST",
        &format!("/v1/invitations/{code}/sign"),
        Some(&guest),
        Some(json!({ "signature_id": "sig-123" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["category"], "guest_signature");

    let resp = call(
        &app,
        "POST",
        &format!("/v1/invitations/{code}/accept"),
        Some(&guest),
        Some(json!({ "signature_id": "sig-123" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let accepted = body_json(resp).await;
    assert_eq!(accepted["invitation"]["status"], "accepted");
    assert_eq!(accepted["stay"]["state"], "OPEN");
    assert_eq!(accepted["stay"]["guest_id"], guest_id.to_string());
    let stay_id = accepted["stay"]["id"].as_str().unwrap().to_string();

    // A second acceptance is refused.
    let resp = call(
        &app,
        "POST",
        &format!("/v1/invitations/{code}/accept"),
        Some(&guest),
        Some(json!({ "signature_id": "sig-123" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(resp).await["error"]["code"], "ALREADY_RESOLVED");

    let resp = call(&app, "GET", &format!("/v1/stays/{stay_id}"), Some(&guest), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["phase"], "UPCOMING");

    let resp = call(&app, "POST", &format!("/v1/stays/{stay_id}/revoke"), Some(&owner), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let revoked = body_json(resp).await;
    assert_eq!(revoked["state"], "REVOKED");
    assert!(revoked["vacate_by"].is_string());

    let resp = call(&app, "POST", &format!("/v1/stays/{stay_id}/revoke"), Some(&owner), None).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(resp).await["error"]["code"], "ALREADY_RESOLVED");

    let resp = call(&app, "POST", &format!("/v1/stays/{stay_id}/vacate"), Some(&guest), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let vacated = body_json(resp).await;
    assert_eq!(vacated["state"], "REVOKED");
    assert!(vacated["vacated_at"].is_string());

    // The refused attempts are in the owner's ledger view.
    let resp = call(&app, "GET", "/v1/audit?category=failed_attempt", Some(&owner), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let failed = body_json(resp).await;
    assert_eq!(failed.as_array().unwrap().len(), 2);

    let resp = call(&app, "GET", "/v1/audit/verify", None, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["chain_valid"], true);
}

#[tokio::test]
async fn test_guest_cannot_revoke() {
    let app = test_app();
    let owner_id = Uuid::new_v4();
    let guest_id = Uuid::new_v4();
    let owner = bearer("owner", owner_id);
    let property_id = register_property(&app, &owner).await;

    let resp = call(
        &app,
        "POST",
        "/v1/stays",
        Some(&owner),
        Some(json!({
            "property_id": property_id,
            "guest_id": guest_id,
            "stay_start_date": days_from_today(2),
            "stay_end_date": days_from_today(4)
        })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let stay_id = body_json(resp).await["id"].as_str().unwrap().to_string();

    let guest = bearer("guest", guest_id);
    let resp = call(&app, "POST", &format!("/v1/stays/{stay_id}/revoke"), Some(&guest), None).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // Not started yet, so the guest may cancel.
    let resp = call(&app, "POST", &format!("/v1/stays/{stay_id}/cancel"), Some(&guest), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["state"], "CANCELLED");
}

#[tokio::test]
async fn test_ending_unstarted_stay_is_invalid_transition() {
    let app = test_app();
    let owner = bearer("owner", Uuid::new_v4());
    let guest_id = Uuid::new_v4();
    let property_id = register_property(&app, &owner).await;

    let resp = call(
        &app,
        "POST",
        "/v1/stays",
        Some(&owner),
        Some(json!({
            "property_id": property_id,
            "guest_id": guest_id,
            "stay_start_date": days_from_today(3),
            "stay_end_date": days_from_today(5)
        })),
    )
    .await;
    let stay_id = body_json(resp).await["id"].as_str().unwrap().to_string();

    let guest = bearer("guest", guest_id);
    let resp = call(&app, "POST", &format!("/v1/stays/{stay_id}/end"), Some(&guest), None).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(resp).await["error"]["code"], "INVALID_TRANSITION");
}

#[tokio::test]
async fn test_overlapping_stay_is_refused() {
    let app = test_app();
    let owner = bearer("owner", Uuid::new_v4());
    let property_id = register_property(&app, &owner).await;
    let stay = |start: i64, end: i64| {
        json!({
            "property_id": property_id,
            "guest_id": Uuid::new_v4(),
            "stay_start_date": days_from_today(start),
            "stay_end_date": days_from_today(end)
        })
    };

    let resp = call(&app, "POST", "/v1/stays", Some(&owner), Some(stay(1, 5))).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = call(&app, "POST", "/v1/stays", Some(&owner), Some(stay(4, 8))).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(resp).await["error"]["code"], "PRECONDITION_FAILED");
}

#[tokio::test]
async fn test_cancel_invitation_then_list() {
    let app = test_app();
    let owner = bearer("owner", Uuid::new_v4());
    let property_id = register_property(&app, &owner).await;

    let resp = call(
        &app,
        "POST",
        "/v1/invitations",
        Some(&owner),
        Some(json!({
            "property_id": property_id,
            "stay_start_date": days_from_today(1),
            "stay_end_date": days_from_today(3)
        })),
    )
    .await;
    let code = body_json(resp).await["invitation"]["code"].as_str().unwrap().to_string();

    let resp = call(&app, "POST", &format!("/v1/invitations/{code}/cancel"), Some(&owner), None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["status"], "cancelled");

    let resp = call(&app, "GET", "/v1/invitations", Some(&owner), None).await;
    let listed = body_json(resp).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["status"], "cancelled");
}

#[tokio::test]
async fn test_malformed_invitation_code_is_422() {
    let app = test_app();
    let guest = bearer("guest", Uuid::new_v4());
    let resp = call(
        &app,
        "POST",
        "/v1/invitations/not-a-code/accept",
        Some(&guest),
        Some(json!({ "signature_id": "sig" })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

// -- Shield Mode --------------------------------------------------------------

#[tokio::test]
async fn test_manual_shield_enable_is_refused() {
    let app = test_app();
    let owner = bearer("owner", Uuid::new_v4());
    let property_id = register_property(&app, &owner).await;

    let resp = call(
        &app,
        "PUT",
        &format!("/v1/properties/{property_id}/shield"),
        Some(&owner),
        Some(json!({ "enabled": true })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = call(&app, "GET", &format!("/v1/properties/{property_id}/shield"), Some(&owner), None).await;
    let status = body_json(resp).await;
    assert_eq!(status["enabled"], false);
    assert_eq!(status["mode"], "INACTIVE");
}

// -- Enforcement --------------------------------------------------------------

#[tokio::test]
async fn test_enforcement_requires_system_role() {
    let app = test_app();
    let owner = bearer("owner", Uuid::new_v4());
    let resp = call(&app, "POST", "/v1/enforcement/run", Some(&owner), Some(json!({}))).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_enforcement_fires_final_day_and_shield() {
    let app = test_app();
    let owner = bearer("owner", Uuid::new_v4());
    let property_id = register_property(&app, &owner).await;
    let resp = call(
        &app,
        "POST",
        "/v1/stays",
        Some(&owner),
        Some(json!({
            "property_id": property_id,
            "guest_id": Uuid::new_v4(),
            "stay_start_date": days_from_today(1),
            "stay_end_date": days_from_today(4)
        })),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let final_day = format!("{}T12:00:00Z", days_from_today(4));
    let resp = call(&app, "POST", "/v1/enforcement/run", None, Some(json!({ "as_of": final_day }))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let report = body_json(resp).await;
    let fired: Vec<&str> = report["fired"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["threshold"].as_str().unwrap())
        .collect();
    assert!(fired.contains(&"final_day"));
    assert!(fired.contains(&"last_day_shield"));

    // Same instant again: nothing new.
    let resp = call(&app, "POST", "/v1/enforcement/run", None, Some(json!({ "as_of": final_day }))).await;
    assert!(body_json(resp).await["fired"].as_array().unwrap().is_empty());

    let resp = call(&app, "GET", &format!("/v1/properties/{property_id}/shield"), Some(&owner), None).await;
    assert_eq!(body_json(resp).await["enabled"], true);
}

#[tokio::test]
async fn test_enforcement_without_body_uses_now() {
    let resp = call(&test_app(), "POST", "/v1/enforcement/run", None, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["stays_scanned"], 0);
}

// -- Audit --------------------------------------------------------------------

#[tokio::test]
async fn test_guest_cannot_read_audit_log() {
    let guest = bearer("guest", Uuid::new_v4());
    let resp = call(&test_app(), "GET", "/v1/audit", Some(&guest), None).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_audit_category_is_422() {
    let resp = call(&test_app(), "GET", "/v1/audit?category=gossip", None, None).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

// -- OpenAPI ------------------------------------------------------------------

#[tokio::test]
async fn test_openapi_spec_served() {
    let resp = call(&test_app(), "GET", "/openapi.json", None, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let spec = body_json(resp).await;
    assert_eq!(spec["info"]["title"], "StayGuard API");
    assert!(spec["paths"]["/v1/stays/{id}/revoke"].is_object());
}
