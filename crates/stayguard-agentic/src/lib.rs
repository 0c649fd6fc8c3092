//! # stayguard-agentic: Autonomous Enforcement
//!
//! Everything that acts without a human in the loop, plus the record of
//! what was done.
//!
//! ## Capabilities
//!
//! - **Audit ledger** ([`audit`]): categorized, hash-chained, append-only
//!   entries. The [`audit::AuditLedger`] trait exposes `append`, `query` and
//!   `verify_chain` and nothing else, so no caller can rewrite history.
//!
//! - **Dead Man's Switch** ([`scheduler`]): the threshold rules evaluated
//!   against every open stay, and the recurring cadence that drives them.
//!
//! - **Notifications** ([`notify`]): best-effort delivery to owners and
//!   guests with bounded retry. Delivery failures are logged and never
//!   reported back to the transition that triggered them.
//!
//! - **Enforcement events** ([`notify::EnforcementSink`]): the authoritative
//!   utility-lock signal consumed by external integrations.

pub mod audit;
pub mod notify;
pub mod scheduler;

pub use audit::{
    verify_entries, AuditCategory, AuditChain, AuditEntry, AuditLedger, AuditQuery,
    ChainVerification, InMemoryLedger, LedgerError, NewAuditEntry, GENESIS_HASH,
};
pub use notify::{
    EnforcementEvent, EnforcementSink, LogNotifier, LoggingEnforcementSink, Notification,
    NotificationKind, Notifier, NotifyError, RecordingNotifier, RetryPolicy, WebhookNotifier,
};
pub use scheduler::{
    due_thresholds, CronSchedule, EnforcementThreshold, PropertyEffect, SchedulePattern,
};
