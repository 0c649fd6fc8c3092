//! # stayguard-api: Axum API Services for StayGuard
//!
//! HTTP transport, persistence and the periodic enforcement runner around
//! the lifecycle domain crates. Handlers are thin: every operation goes
//! through [`service::LifecycleService`], which owns authorization, ledger
//! recording and notifications.
//!
//! ## API Surface
//!
//! | Prefix                | Module                     | Domain                  |
//! |-----------------------|----------------------------|-------------------------|
//! | `/v1/properties/*`    | [`routes::properties`]     | Properties, Shield Mode |
//! | `/v1/invitations/*`   | [`routes::invitations`]    | Invitations             |
//! | `/v1/stays/*`         | [`routes::stays`]          | Stays                   |
//! | `/v1/audit/*`         | [`routes::audit`]          | Audit ledger            |
//! | `/v1/enforcement/*`   | [`routes::enforcement`]    | Dead Man's Switch       |
//! | `/v1/rules`, `/v1/classify` | [`routes::rules`]    | Jurisdiction rules      |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → AuthMiddleware → Handler
//! ```
//!
//! ## OpenAPI
//!
//! Generated via utoipa derive macros, served at `/openapi.json`.

pub mod auth;
pub mod config;
pub mod enforcement;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod service;
pub mod state;
pub mod store;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;
use crate::middleware::metrics::ApiMetrics;

pub use error::AppError;
pub use service::LifecycleService;
pub use state::AppState;

/// Assemble the full application router with all routes and middleware.
///
/// Health probes (`/health/*`) are mounted outside the auth middleware.
pub fn app(state: AppState) -> Router {
    let auth_config = AuthConfig {
        token: state.config.auth_token.clone(),
    };
    let metrics = ApiMetrics::new();

    let api = Router::new()
        .merge(routes::properties::router())
        .merge(routes::invitations::router())
        .merge(routes::stays::router())
        .merge(routes::audit::router())
        .merge(routes::enforcement::router())
        .merge(routes::rules::router())
        .merge(openapi::router())
        .layer(DefaultBodyLimit::max(256 * 1024))
        .layer(from_fn(auth::auth_middleware))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(axum::Extension(auth_config))
        .layer(axum::Extension(metrics))
        .with_state(state.clone());

    let unauthenticated = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness))
        .with_state(state);

    Router::new().merge(unauthenticated).merge(api)
}

/// Liveness probe: the process is up.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: the store answers.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if let Err(e) = state.service.store().ping().await {
        tracing::warn!("store health check failed: {e}");
        return (StatusCode::SERVICE_UNAVAILABLE, "store unreachable").into_response();
    }
    (StatusCode::OK, "ready").into_response()
}
