//! # Audit Ledger
//!
//! Records every lifecycle transition and every refused attempt, for use as
//! legal evidence of what happened and when.
//!
//! ## Security Invariant
//!
//! Entries are write-once. The [`AuditLedger`] trait has no update or delete
//! operation, and each entry carries a SHA-256 hash chained to its
//! predecessor so that any out-of-band edit is detectable by
//! [`AuditLedger::verify_chain`].
//!
//! String fields are truncated to fixed column limits and blank titles or
//! messages are replaced with `—` before sealing, so an append never fails
//! on malformed input.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

use stayguard_core::{
    Actor, ActorRole, AuditEntryId, InvitationId, LifecycleError, PropertyId, StayId, Timestamp,
    UserId,
};
use stayguard_state::{InvitationTransition, ShieldTransition, StayEvent, StayTransition};

pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_MESSAGE_LEN: usize = 100_000;
pub const MAX_EMAIL_LEN: usize = 255;
pub const MAX_IP_LEN: usize = 64;
pub const MAX_USER_AGENT_LEN: usize = 500;

/// Previous-hash value of the first entry in a chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

const PLACEHOLDER: &str = "—";

// ---------------------------------------------------------------------------
// AuditCategory
// ---------------------------------------------------------------------------

/// Ledger entry category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    /// A successful lifecycle transition.
    StatusChange,
    /// A guest completed an e-signature for an invitation.
    GuestSignature,
    /// A refused state-changing call.
    FailedAttempt,
    /// A Shield Mode change.
    ShieldMode,
    /// An enforcement threshold fired.
    DeadMansSwitch,
}

impl AuditCategory {
    pub const ALL: [AuditCategory; 5] = [
        Self::StatusChange,
        Self::GuestSignature,
        Self::FailedAttempt,
        Self::ShieldMode,
        Self::DeadMansSwitch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatusChange => "status_change",
            Self::GuestSignature => "guest_signature",
            Self::FailedAttempt => "failed_attempt",
            Self::ShieldMode => "shield_mode",
            Self::DeadMansSwitch => "dead_mans_switch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// NewAuditEntry
// ---------------------------------------------------------------------------

/// An entry that has not been sealed into the chain yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditEntry {
    pub category: AuditCategory,
    pub title: String,
    pub message: String,
    pub property_id: Option<PropertyId>,
    pub stay_id: Option<StayId>,
    pub invitation_id: Option<InvitationId>,
    pub actor: Actor,
    pub meta: Option<serde_json::Value>,
    pub occurred_at: Timestamp,
}

impl NewAuditEntry {
    pub fn new(
        category: AuditCategory,
        title: impl Into<String>,
        message: impl Into<String>,
        actor: Actor,
        occurred_at: Timestamp,
    ) -> Self {
        Self {
            category,
            title: title.into(),
            message: message.into(),
            property_id: None,
            stay_id: None,
            invitation_id: None,
            actor,
            meta: None,
            occurred_at,
        }
    }

    pub fn with_property(mut self, id: PropertyId) -> Self {
        self.property_id = Some(id);
        self
    }

    pub fn with_stay(mut self, id: StayId) -> Self {
        self.stay_id = Some(id);
        self
    }

    pub fn with_invitation(mut self, id: InvitationId) -> Self {
        self.invitation_id = Some(id);
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Ledger entry for a stay transition.
    pub fn stay_transition(t: &StayTransition) -> Self {
        let who = t.actor.label();
        let (title, message) = match t.event {
            StayEvent::CheckedOut => (
                "Guest checked out",
                format!("{who} ended stay {}; checked out at {}.", t.stay_id, t.at),
            ),
            StayEvent::Cancelled => (
                "Stay cancelled by guest",
                format!("{who} cancelled upcoming stay {} before its start date.", t.stay_id),
            ),
            StayEvent::Revoked { vacate_by } => (
                "Stay revoked",
                format!(
                    "{who} revoked stay {}. Guest must vacate by {vacate_by}.",
                    t.stay_id
                ),
            ),
            StayEvent::Vacated => (
                "Guest vacated after revocation",
                format!("{who} confirmed leaving revoked stay {} at {}.", t.stay_id, t.at),
            ),
            StayEvent::UsatTokenReleased => (
                "Utility access token released",
                format!("{who} released the utility access token to stay {}.", t.stay_id),
            ),
        };
        Self::new(AuditCategory::StatusChange, title, message, t.actor.clone(), t.at)
            .with_property(t.property_id)
            .with_stay(t.stay_id)
            .with_meta(serde_json::json!({
                "from": t.from_state,
                "to": t.to_state,
                "event": t.event,
            }))
    }

    /// Ledger entry for an invitation transition.
    pub fn invitation_transition(t: &InvitationTransition, stay_id: Option<StayId>) -> Self {
        let who = t.actor.label();
        let (title, message) = match stay_id {
            Some(stay_id) => (
                "Invitation accepted (stay created)".to_string(),
                format!(
                    "{who} accepted invitation {}; stay {stay_id} created for property {}.",
                    t.code, t.property_id
                ),
            ),
            None => (
                format!("Invitation {}", t.to_state),
                format!("{who} moved invitation {} from {} to {}.", t.code, t.from_state, t.to_state),
            ),
        };
        let mut entry = Self::new(AuditCategory::StatusChange, title, message, t.actor.clone(), t.at)
            .with_property(t.property_id)
            .with_invitation(t.invitation_id)
            .with_meta(serde_json::json!({
                "code": t.code.as_str(),
                "from": t.from_state,
                "to": t.to_state,
            }));
        entry.stay_id = stay_id;
        entry
    }

    /// Ledger entry for an owner Shield Mode change.
    pub fn shield_transition(t: &ShieldTransition) -> Self {
        let mut message = format!("{} turned off Shield Mode for property {}.", t.actor.label(), t.property_id);
        if t.utility_lock_released {
            message.push_str(" Utility lock released.");
        }
        Self::new(AuditCategory::ShieldMode, "Shield Mode turned off", message, t.actor.clone(), t.at)
            .with_property(t.property_id)
    }

    /// Ledger entry for a call the domain refused.
    pub fn failed_attempt(
        operation: &str,
        error: &LifecycleError,
        actor: Actor,
        occurred_at: Timestamp,
    ) -> Self {
        Self::refused(operation, error.kind().as_str(), error, actor, occurred_at)
    }

    /// Ledger entry for any refused call. `error_kind` is the stable code
    /// clients see (`FORBIDDEN` for authorization refusals).
    pub fn refused(
        operation: &str,
        error_kind: &str,
        reason: &dyn std::fmt::Display,
        actor: Actor,
        occurred_at: Timestamp,
    ) -> Self {
        Self::new(
            AuditCategory::FailedAttempt,
            format!("{operation}: {error_kind}"),
            format!("{} attempted {operation} and was refused: {reason}", actor.label()),
            actor,
            occurred_at,
        )
        .with_meta(serde_json::json!({
            "operation": operation,
            "error_kind": error_kind,
        }))
    }

    /// Apply column limits and placeholder rules.
    pub fn sanitized(mut self) -> Self {
        self.title = clean(&self.title, MAX_TITLE_LEN);
        self.message = clean(&self.message, MAX_MESSAGE_LEN);
        self.actor.email = clip_opt(self.actor.email.take(), MAX_EMAIL_LEN);
        self.actor.ip_address = clip_opt(self.actor.ip_address.take(), MAX_IP_LEN);
        self.actor.user_agent = clip_opt(self.actor.user_agent.take(), MAX_USER_AGENT_LEN);
        self
    }
}

fn clip(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn clean(s: &str, max_chars: usize) -> String {
    let trimmed = clip(s, max_chars).trim();
    if trimmed.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        trimmed.to_string()
    }
}

fn clip_opt(s: Option<String>, max_chars: usize) -> Option<String> {
    s.map(|v| clip(&v, max_chars).to_string())
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// AuditEntry
// ---------------------------------------------------------------------------

/// A sealed, immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    /// Position in the chain, starting at 1.
    pub sequence: i64,
    pub category: AuditCategory,
    pub title: String,
    pub message: String,
    pub property_id: Option<PropertyId>,
    pub stay_id: Option<StayId>,
    pub invitation_id: Option<InvitationId>,
    pub actor_role: ActorRole,
    pub actor_user_id: Option<UserId>,
    pub actor_email: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub meta: Option<serde_json::Value>,
    pub created_at: Timestamp,
    pub previous_hash: String,
    pub entry_hash: String,
}

impl AuditEntry {
    /// Seal `entry` into the chain after `previous_hash`.
    pub fn seal(entry: NewAuditEntry, sequence: i64, previous_hash: &str) -> Self {
        let entry = entry.sanitized();
        let mut sealed = Self {
            id: AuditEntryId::new(),
            sequence,
            category: entry.category,
            title: entry.title,
            message: entry.message,
            property_id: entry.property_id,
            stay_id: entry.stay_id,
            invitation_id: entry.invitation_id,
            actor_role: entry.actor.role,
            actor_user_id: entry.actor.user_id,
            actor_email: entry.actor.email,
            ip_address: entry.actor.ip_address,
            user_agent: entry.actor.user_agent,
            meta: entry.meta,
            created_at: entry.occurred_at,
            previous_hash: previous_hash.to_string(),
            entry_hash: String::new(),
        };
        sealed.entry_hash = sealed.compute_hash();
        sealed
    }

    /// SHA-256 over the previous hash and every recorded field, encoded as
    /// one JSON array so no field can bleed into its neighbour.
    pub fn compute_hash(&self) -> String {
        let input = serde_json::json!([
            self.previous_hash,
            self.sequence,
            self.category.as_str(),
            self.title,
            self.message,
            self.property_id.map(|v| v.to_string()),
            self.stay_id.map(|v| v.to_string()),
            self.invitation_id.map(|v| v.to_string()),
            self.actor_role.as_str(),
            self.actor_user_id.map(|v| v.to_string()),
            self.actor_email,
            self.ip_address,
            self.user_agent,
            self.meta,
            self.created_at.to_string(),
        ]);
        sha256_hex(&input.to_string())
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// AuditQuery
// ---------------------------------------------------------------------------

/// Filters for reading the ledger. All filters are conjunctive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditQuery {
    pub from_ts: Option<Timestamp>,
    pub to_ts: Option<Timestamp>,
    pub category: Option<AuditCategory>,
    pub property_id: Option<PropertyId>,
    pub stay_id: Option<StayId>,
    /// Case-insensitive substring match over title and message.
    pub search: Option<String>,
    /// Restrict to these properties (owner scoping). Entries without a
    /// property are excluded when set.
    pub scope: Option<Vec<PropertyId>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn matches(&self, e: &AuditEntry) -> bool {
        if self.from_ts.is_some_and(|from| e.created_at < from) {
            return false;
        }
        if self.to_ts.is_some_and(|to| e.created_at > to) {
            return false;
        }
        if self.category.is_some_and(|c| c != e.category) {
            return false;
        }
        if self.property_id.is_some() && self.property_id != e.property_id {
            return false;
        }
        if self.stay_id.is_some() && self.stay_id != e.stay_id {
            return false;
        }
        if let Some(scope) = &self.scope {
            match e.property_id {
                Some(p) if scope.contains(&p) => {}
                _ => return false,
            }
        }
        if let Some(needle) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = needle.to_lowercase();
            if !e.title.to_lowercase().contains(&needle)
                && !e.message.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Chain verification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub total_entries: usize,
    pub broken_links: usize,
    /// Sequence number of the first entry that fails verification.
    pub first_broken_sequence: Option<i64>,
    pub chain_valid: bool,
}

/// Verify a chain given in ascending sequence order.
pub fn verify_entries(entries: &[AuditEntry]) -> ChainVerification {
    let mut broken_links = 0;
    let mut first_broken_sequence = None;
    let mut expected_prev = GENESIS_HASH.to_string();
    for entry in entries {
        if entry.previous_hash != expected_prev || entry.compute_hash() != entry.entry_hash {
            broken_links += 1;
            first_broken_sequence.get_or_insert(entry.sequence);
        }
        expected_prev = entry.entry_hash.clone();
    }
    ChainVerification {
        total_entries: entries.len(),
        broken_links,
        first_broken_sequence,
        chain_valid: broken_links == 0,
    }
}

// ---------------------------------------------------------------------------
// AuditLedger
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger storage error: {0}")]
    Storage(String),
}

/// The complete ledger interface. There is no way to modify or
/// remove an entry.
#[async_trait]
pub trait AuditLedger: Send + Sync {
    /// Seal and durably record one entry.
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry, LedgerError>;

    /// Matching entries, newest first.
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, LedgerError>;

    /// Re-check every link of the hash chain.
    async fn verify_chain(&self) -> Result<ChainVerification, LedgerError>;
}

/// Append-only chain state, with no locking of its own.
///
/// Stores that must write ledger entries atomically with other state embed
/// this under their own lock.
#[derive(Debug, Default)]
pub struct AuditChain {
    entries: Vec<AuditEntry>,
}

impl AuditChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: NewAuditEntry) -> AuditEntry {
        let sequence = self.entries.len() as i64 + 1;
        let previous = self
            .entries
            .last()
            .map(|e| e.entry_hash.as_str())
            .unwrap_or(GENESIS_HASH);
        let sealed = AuditEntry::seal(entry, sequence, previous);
        self.entries.push(sealed.clone());
        sealed
    }

    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEntry> {
        let mut out: Vec<AuditEntry> = self
            .entries
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.sequence.cmp(&a.sequence))
        });
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        out
    }

    pub fn verify(&self) -> ChainVerification {
        verify_entries(&self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Process-local ledger.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    chain: Arc<RwLock<AuditChain>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chain.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.read().is_empty()
    }
}

#[async_trait]
impl AuditLedger for InMemoryLedger {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry, LedgerError> {
        Ok(self.chain.write().push(entry))
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, LedgerError> {
        Ok(self.chain.read().query(query))
    }

    async fn verify_chain(&self) -> Result<ChainVerification, LedgerError> {
        Ok(self.chain.read().verify())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stayguard_core::ErrorKind;

    fn at(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    fn entry(category: AuditCategory, title: &str, when: &str) -> NewAuditEntry {
        NewAuditEntry::new(category, title, "message body", Actor::system(), at(when))
    }

    #[test]
    fn categories_round_trip() {
        for c in AuditCategory::ALL {
            assert_eq!(AuditCategory::parse(c.as_str()), Some(c));
        }
        assert_eq!(AuditCategory::parse("other"), None);
        assert!(AuditCategory::ALL.iter().all(|c| c.as_str().len() <= 32));
    }

    #[test]
    fn sanitizing_truncates_and_fills_blanks() {
        let mut actor = Actor::system();
        actor.ip_address = Some("1".repeat(100));
        actor.email = Some(String::new());
        let e = NewAuditEntry::new(
            AuditCategory::StatusChange,
            "x".repeat(400),
            "   ",
            actor,
            at("2026-01-01T00:00:00Z"),
        )
        .sanitized();
        assert_eq!(e.title.chars().count(), MAX_TITLE_LEN);
        assert_eq!(e.message, "—");
        assert_eq!(e.actor.ip_address.unwrap().len(), MAX_IP_LEN);
        assert!(e.actor.email.is_none());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let e = NewAuditEntry::new(
            AuditCategory::StatusChange,
            "§".repeat(300),
            "m",
            Actor::system(),
            at("2026-01-01T00:00:00Z"),
        )
        .sanitized();
        assert_eq!(e.title.chars().count(), MAX_TITLE_LEN);
    }

    #[test]
    fn chain_links_and_verifies() {
        let mut chain = AuditChain::new();
        let first = chain.push(entry(AuditCategory::StatusChange, "a", "2026-01-01T00:00:00Z"));
        let second = chain.push(entry(AuditCategory::ShieldMode, "b", "2026-01-01T00:00:01Z"));
        assert_eq!(first.previous_hash, GENESIS_HASH);
        assert_eq!(second.previous_hash, first.entry_hash);
        assert_eq!(second.sequence, 2);
        assert!(chain.verify().chain_valid);
    }

    #[test]
    fn every_recorded_field_is_sealed() {
        let mut actor = Actor::owner(UserId::new());
        actor.email = Some("owner@example.com".into());
        actor.ip_address = Some("203.0.113.7".into());
        actor.user_agent = Some("curl/8".into());
        let sealed = AuditEntry::seal(
            NewAuditEntry::new(AuditCategory::FailedAttempt, "t", "m", actor, at("2026-01-01T00:00:00Z"))
                .with_meta(serde_json::json!({ "operation": "revoke_stay" })),
            1,
            GENESIS_HASH,
        );
        assert_eq!(sealed.compute_hash(), sealed.entry_hash);

        let edits: [fn(&mut AuditEntry); 5] = [
            |e| e.meta = Some(serde_json::json!({ "operation": "end_stay" })),
            |e| e.meta = None,
            |e| e.actor_email = Some("someone@example.com".into()),
            |e| e.ip_address = None,
            |e| e.user_agent = Some("other".into()),
        ];
        for edit in edits {
            let mut forged = sealed.clone();
            edit(&mut forged);
            assert_ne!(forged.compute_hash(), sealed.entry_hash);
            assert!(!verify_entries(&[forged]).chain_valid);
        }
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        let seal = |title: &str, message: &str| {
            AuditEntry::seal(
                NewAuditEntry::new(AuditCategory::StatusChange, title, message, Actor::system(), at("2026-01-01T00:00:00Z")),
                1,
                GENESIS_HASH,
            )
        };
        assert_ne!(seal("a|b", "c").entry_hash, seal("a", "b|c").entry_hash);
    }

    #[test]
    fn tampering_is_detected() {
        let mut chain = AuditChain::new();
        chain.push(entry(AuditCategory::StatusChange, "a", "2026-01-01T00:00:00Z"));
        chain.push(entry(AuditCategory::StatusChange, "b", "2026-01-01T00:00:01Z"));
        let mut entries = chain.entries.clone();
        entries[0].title = "rewritten".into();
        let result = verify_entries(&entries);
        assert!(!result.chain_valid);
        assert_eq!(result.first_broken_sequence, Some(1));
    }

    #[test]
    fn query_filters_and_orders_newest_first() {
        let mut chain = AuditChain::new();
        let property = PropertyId::new();
        chain.push(entry(AuditCategory::StatusChange, "Stay revoked", "2026-01-01T00:00:00Z").with_property(property));
        chain.push(entry(AuditCategory::FailedAttempt, "Revoke: ALREADY_RESOLVED", "2026-01-02T00:00:00Z").with_property(property));
        chain.push(entry(AuditCategory::StatusChange, "Guest checked out", "2026-01-03T00:00:00Z"));

        let all = chain.query(&AuditQuery::default());
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].title, "Guest checked out");

        let scoped = chain.query(&AuditQuery {
            scope: Some(vec![property]),
            ..Default::default()
        });
        assert_eq!(scoped.len(), 2);

        let searched = chain.query(&AuditQuery {
            search: Some("REVOK".into()),
            category: Some(AuditCategory::StatusChange),
            ..Default::default()
        });
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].title, "Stay revoked");

        let window = chain.query(&AuditQuery {
            from_ts: Some(at("2026-01-02T00:00:00Z")),
            to_ts: Some(at("2026-01-02T23:59:59Z")),
            ..Default::default()
        });
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn same_instant_orders_by_sequence() {
        let mut chain = AuditChain::new();
        chain.push(entry(AuditCategory::StatusChange, "first", "2026-01-01T00:00:00Z"));
        chain.push(entry(AuditCategory::StatusChange, "second", "2026-01-01T00:00:00Z"));
        let all = chain.query(&AuditQuery::default());
        assert_eq!(all[0].title, "second");
    }

    #[test]
    fn failed_attempt_entry_records_kind() {
        let err = LifecycleError::precondition("bad dates");
        let e = NewAuditEntry::failed_attempt("create_invitation", &err, Actor::system(), at("2026-01-01T00:00:00Z"));
        assert_eq!(e.category, AuditCategory::FailedAttempt);
        assert!(e.title.contains(ErrorKind::PreconditionFailed.as_str()));
    }

    #[tokio::test]
    async fn in_memory_ledger_appends() {
        let ledger = InMemoryLedger::new();
        ledger
            .append(entry(AuditCategory::DeadMansSwitch, "x", "2026-01-01T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(ledger.verify_chain().await.unwrap().chain_valid);
    }
}
