//! # Notifications and Enforcement Events
//!
//! Outbound side effects of the lifecycle: messages to owners and guests,
//! and the utility-lock event consumed by external integrations.
//!
//! Delivery is best-effort and at-most-once per fired threshold. Callers
//! record the state change first and notify afterwards; a delivery failure
//! is retried with exponential backoff, then logged and dropped. It never
//! reaches the caller of the transition.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use stayguard_core::{ActorRole, PropertyId, StayId, Timestamp, UserId};
use stayguard_state::Stay;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("HTTP error delivering {kind}: {source}")]
    Http {
        kind: NotificationKind,
        source: reqwest::Error,
    },
    #[error("notification endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("notification client setup failed: {0}")]
    Setup(String),
}

// -- Notifications ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    RenewalReminder,
    FinalDayAlert,
    ShieldModeActivated,
    OverstayAlert,
    EnforcementExecuted,
    StayRevoked,
    StayEnded,
    InvitationAccepted,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RenewalReminder => "renewal_reminder",
            Self::FinalDayAlert => "final_day_alert",
            Self::ShieldModeActivated => "shield_mode_activated",
            Self::OverstayAlert => "overstay_alert",
            Self::EnforcementExecuted => "enforcement_executed",
            Self::StayRevoked => "stay_revoked",
            Self::StayEnded => "stay_ended",
            Self::InvitationAccepted => "invitation_accepted",
        }
    }

    fn subject(&self) -> &'static str {
        match self {
            Self::RenewalReminder => "Your stay ends in 48 hours: renew or check out",
            Self::FinalDayAlert => "Urgent: your stay ends today",
            Self::ShieldModeActivated => "Shield Mode is now active",
            Self::OverstayAlert => "Stay end date has passed",
            Self::EnforcementExecuted => "Dead Man's Switch executed",
            Self::StayRevoked => "Stay authorization revoked",
            Self::StayEnded => "Guest checked out",
            Self::InvitationAccepted => "Invitation accepted",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub recipient_role: ActorRole,
    pub recipient_id: UserId,
    pub recipient_email: Option<String>,
    pub property_id: PropertyId,
    pub stay_id: Option<StayId>,
    pub subject: String,
    pub body: String,
}

impl Notification {
    /// The owner and guest copies of a stay-scoped message.
    pub fn for_stay(kind: NotificationKind, stay: &Stay, owner_email: Option<String>) -> Vec<Self> {
        let body = format!(
            "Stay {} at property {} ({} to {}).",
            stay.id, stay.property_id, stay.stay_start_date, stay.stay_end_date
        );
        let make = |role, id, email| Self {
            kind,
            recipient_role: role,
            recipient_id: id,
            recipient_email: email,
            property_id: stay.property_id,
            stay_id: Some(stay.id),
            subject: kind.subject().to_string(),
            body: body.clone(),
        };
        vec![
            make(ActorRole::Owner, stay.owner_id, owner_email),
            make(ActorRole::Guest, stay.guest_id, stay.guest_email.clone()),
        ]
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log. Used when no webhook is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            kind = %n.kind,
            recipient_role = %n.recipient_role,
            recipient_id = %n.recipient_id,
            stay_id = ?n.stay_id,
            "notification: {}", n.subject
        );
        Ok(())
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.sent.lock().iter().filter(|n| n.kind == kind).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().push(n.clone());
        Ok(())
    }
}

/// POSTs each notification as JSON to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    endpoint: url::Url,
}

impl WebhookNotifier {
    pub fn new(endpoint: url::Url, timeout: Duration) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Setup(e.to_string()))?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, n: &Notification) -> Result<(), NotifyError> {
        let resp = self
            .http
            .post(self.endpoint.clone())
            .json(n)
            .send()
            .await
            .map_err(|source| NotifyError::Http { kind: n.kind, source })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected { status, body });
        }
        Ok(())
    }
}

// -- Retry ----------------------------------------------------------------------

/// Bounded exponential backoff: `base_delay`, `2 * base_delay`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Deliver `n`, retrying failures. Returns whether delivery succeeded.
    /// Never fails: the final error is logged.
    pub async fn send_with_retry(&self, notifier: &dyn Notifier, n: &Notification) -> bool {
        let attempts = self.max_attempts.max(1);
        for attempt in 0..attempts {
            match notifier.send(n).await {
                Ok(()) => return true,
                Err(e) if attempt + 1 < attempts => {
                    let delay = self.base_delay * 2u32.pow(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        kind = %n.kind,
                        "notification delivery failed, retrying in {delay:?}: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        kind = %n.kind,
                        recipient_id = %n.recipient_id,
                        stay_id = ?n.stay_id,
                        "notification dropped after {attempts} attempts: {e}"
                    );
                }
            }
        }
        false
    }
}

// -- Enforcement events ---------------------------------------------------------

/// Authoritative signal to external integrations (e.g. smart-lock or
/// utility-control adapters).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnforcementEvent {
    /// The property entered vacant-equivalent enforcement.
    UtilityLock {
        property_id: PropertyId,
        stay_id: StayId,
        at: Timestamp,
    },
}

#[async_trait]
pub trait EnforcementSink: Send + Sync {
    async fn emit(&self, event: &EnforcementEvent) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Default)]
pub struct LoggingEnforcementSink;

#[async_trait]
impl EnforcementSink for LoggingEnforcementSink {
    async fn emit(&self, event: &EnforcementEvent) -> Result<(), NotifyError> {
        match event {
            EnforcementEvent::UtilityLock { property_id, stay_id, at } => {
                tracing::warn!(%property_id, %stay_id, %at, "utility lock engaged");
            }
        }
        Ok(())
    }
}
