//! # Lifecycle Persistence
//!
//! The [`LifecycleStore`] trait is the single durable boundary of the
//! lifecycle. Every write method commits the state change and its audit
//! entry together (both or neither), and every guarded transition is a
//! conditional write: of two concurrent callers acting on the same open
//! stay, exactly one mutation applies and the other sees the terminal state
//! the winner left behind.
//!
//! Two implementations:
//!
//! - [`memory::MemoryStore`]: one `parking_lot` write lock held across
//!   check, write and ledger append. Used when `DATABASE_URL` is unset and
//!   in tests.
//! - [`postgres::PgStore`]: transactions with `SELECT … FOR UPDATE`,
//!   guarded `UPDATE`s, and an advisory lock serializing the audit hash
//!   chain.
//!
//! The store is also the [`AuditLedger`]: the ledger shares the store's
//! transactional scope, and still exposes no way to modify an entry.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use stayguard_agentic::{AuditEntry, AuditLedger, EnforcementThreshold, LedgerError, NewAuditEntry};
use stayguard_core::{
    Actor, InvitationCode, JurisdictionRuleTable, LifecycleError, PropertyId, StayId, Timestamp,
    UserId,
};
use stayguard_state::{Acceptance, Invitation, Property, Stay};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors from the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The domain refused the change. Nothing was written.
    #[error(transparent)]
    Rejected(#[from] LifecycleError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be rebuilt into a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A guarded in-place change. Runs against the current committed value
/// under the store's lock and returns the audit entry describing it; an
/// `Err` aborts without writing anything.
pub type Mutation<T> = Box<dyn FnOnce(&mut T) -> Result<NewAuditEntry, LifecycleError> + Send>;

/// Stay listing filter. All fields are conjunctive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StayFilter {
    pub property_id: Option<PropertyId>,
    pub owner_id: Option<UserId>,
    pub guest_id: Option<UserId>,
    pub open_only: bool,
}

impl StayFilter {
    pub fn open() -> Self {
        Self {
            open_only: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, s: &Stay) -> bool {
        self.property_id.map_or(true, |p| p == s.property_id)
            && self.owner_id.map_or(true, |o| o == s.owner_id)
            && self.guest_id.map_or(true, |g| g == s.guest_id)
            && (!self.open_only || s.is_open())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvitationFilter {
    pub owner_id: Option<UserId>,
    pub property_id: Option<PropertyId>,
}

impl InvitationFilter {
    pub fn matches(&self, i: &Invitation) -> bool {
        self.owner_id.map_or(true, |o| o == i.owner_id)
            && self.property_id.map_or(true, |p| p == i.property_id)
    }
}

#[async_trait]
pub trait LifecycleStore: AuditLedger {
    // ── Properties ─────────────────────────────────────────────────

    async fn insert_property(&self, property: &Property, audit: NewAuditEntry) -> StoreResult<AuditEntry>;

    async fn property(&self, id: PropertyId) -> StoreResult<Option<Property>>;

    /// All properties, or those of one owner.
    async fn properties(&self, owner_id: Option<UserId>) -> StoreResult<Vec<Property>>;

    async fn transition_property(
        &self,
        id: PropertyId,
        mutation: Mutation<Property>,
    ) -> StoreResult<(Property, AuditEntry)>;

    // ── Invitations ────────────────────────────────────────────────

    async fn insert_invitation(&self, invitation: &Invitation, audit: NewAuditEntry) -> StoreResult<AuditEntry>;

    async fn invitation_by_code(&self, code: &InvitationCode) -> StoreResult<Option<Invitation>>;

    async fn invitations(&self, filter: &InvitationFilter) -> StoreResult<Vec<Invitation>>;

    async fn transition_invitation(
        &self,
        code: &InvitationCode,
        mutation: Mutation<Invitation>,
    ) -> StoreResult<(Invitation, AuditEntry)>;

    /// Accept a pending invitation and create its stay in one unit.
    ///
    /// The overlap check against the property's open stays runs under the
    /// same lock as the insert.
    async fn accept_invitation(
        &self,
        code: &InvitationCode,
        acceptance: Acceptance,
        actor: Actor,
        now: Timestamp,
    ) -> StoreResult<(Invitation, Stay, AuditEntry)>;

    // ── Stays ──────────────────────────────────────────────────────

    /// Insert an open stay, refusing one that overlaps another open stay
    /// of the same property.
    async fn insert_stay(&self, stay: &Stay, audit: NewAuditEntry) -> StoreResult<AuditEntry>;

    async fn stay(&self, id: StayId) -> StoreResult<Option<Stay>>;

    async fn stays(&self, filter: &StayFilter) -> StoreResult<Vec<Stay>>;

    async fn transition_stay(&self, id: StayId, mutation: Mutation<Stay>) -> StoreResult<(Stay, AuditEntry)>;

    // ── Enforcement ────────────────────────────────────────────────

    /// Record that `threshold` fired for `stay_id`, apply its property
    /// effect and append `audit`, atomically. Returns `None` without
    /// writing anything when the threshold already fired or the stay is no
    /// longer open.
    async fn fire_threshold(
        &self,
        stay_id: StayId,
        threshold: EnforcementThreshold,
        audit: NewAuditEntry,
        at: Timestamp,
    ) -> StoreResult<Option<AuditEntry>>;

    async fn fired_thresholds(&self, stay_id: StayId) -> StoreResult<Vec<EnforcementThreshold>>;

    // ── Reference data & health ────────────────────────────────────

    /// Idempotently upsert the jurisdiction seed table.
    async fn upsert_rules(&self, rules: &JurisdictionRuleTable) -> StoreResult<()>;

    async fn ping(&self) -> StoreResult<()>;
}
