//! # stayguard-api: Binary Entry Point
//!
//! Starts the HTTP server and the periodic enforcement runner. Uses
//! Postgres when `DATABASE_URL` is set, otherwise an in-memory store.

use std::sync::Arc;
use std::time::Duration;

use stayguard_agentic::{LogNotifier, Notifier, RetryPolicy, WebhookNotifier};
use stayguard_api::config::{AppConfig, LogFormat};
use stayguard_api::enforcement::EnforcementRunner;
use stayguard_api::store::{postgres, LifecycleStore, MemoryStore, PgStore};
use stayguard_api::{AppState, LifecycleService};
use stayguard_core::JurisdictionRuleTable;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(?config, "configuration loaded");

    let store: Arc<dyn LifecycleStore> = match &config.database_url {
        Some(url) => {
            let pool = postgres::connect(url).await.map_err(|e| {
                tracing::error!("database initialization failed: {e}");
                e
            })?;
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store, nothing will persist");
            Arc::new(MemoryStore::new())
        }
    };

    let rules = JurisdictionRuleTable::seeded();
    store.upsert_rules(&rules).await?;

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), WEBHOOK_TIMEOUT)?),
        None => Arc::new(LogNotifier),
    };
    let retry = RetryPolicy {
        max_attempts: config.notify_max_attempts,
        ..RetryPolicy::default()
    };

    let service = LifecycleService::new(store, Arc::new(rules))
        .with_notifier(notifier)
        .with_retry(retry)
        .block_critical_invitations(config.block_critical_invitations);

    let (stop_runner, runner_stopped) = tokio::sync::oneshot::channel::<()>();
    let runner = match config.enforcement_schedule() {
        Some(schedule) => {
            let runner = EnforcementRunner::new(service.clone(), schedule, config.enforcement_tick);
            Some(tokio::spawn(runner.run(async {
                runner_stopped.await.ok();
            })))
        }
        None => {
            tracing::info!("ENFORCEMENT_SCHEDULE=off; enforcement runs only on demand");
            None
        }
    };

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = stayguard_api::app(AppState::new(service, config));

    tracing::info!("StayGuard API listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = stop_runner.send(());
    if let Some(handle) = runner {
        handle.await?;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("ctrl_c signal received"),
        _ = terminate => tracing::info!("terminate signal received"),
    }
}
