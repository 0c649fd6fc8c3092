//! Postgres [`LifecycleStore`].
//!
//! Each write runs in one transaction: the affected row is read with
//! `SELECT … FOR UPDATE`, the domain mutation runs in Rust, the row is
//! written back with an `UPDATE` guarded on the state that was read, and
//! the audit entry is inserted before commit. Stay inserts lock the
//! property row so that two acceptances for the same property cannot both
//! pass the overlap check.
//!
//! The audit chain is serialized with a transaction-scoped advisory lock:
//! sequence numbers and `previous_hash` values are assigned in commit order.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use stayguard_agentic::{
    verify_entries, AuditCategory, AuditEntry, AuditLedger, AuditQuery, ChainVerification,
    EnforcementThreshold, LedgerError, NewAuditEntry, PropertyEffect, GENESIS_HASH,
};
use stayguard_core::{
    Actor, ActorRole, AuditEntryId, InvitationCode, InvitationId, JurisdictionRuleTable,
    LifecycleError, PropertyId, RegionCode, StayId, Timestamp, UserId,
};
use stayguard_state::{
    Acceptance, Invitation, InvitationStatus, NewInvitation, NewStay, Property, Stay, StayStatus,
};

use super::{InvitationFilter, LifecycleStore, Mutation, StayFilter, StoreError, StoreResult};

/// Advisory lock key serializing audit chain appends ("stayaudt").
const AUDIT_CHAIN_LOCK: i64 = 0x7374_6179_6175_6474;

/// Connect to Postgres and apply the embedded migrations.
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(database_url)
        .await?;
    tracing::info!("connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("database migrations applied");
    Ok(pool)
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ── Rows ──────────────────────────────────────────────────────────────

const PROPERTY_COLUMNS: &str = "id, owner_id, owner_email, name, region_code, \
     shield_mode_enabled, utility_lock_engaged_at, created_at, owner_occupied";

const INVITATION_COLUMNS: &str = "id, code, property_id, owner_id, guest_name, guest_email, \
     stay_start_date, stay_end_date, region_code, status, dead_mans_switch_enabled, \
     signature_id, created_at, resolved_at";

const STAY_COLUMNS: &str = "id, property_id, owner_id, guest_id, guest_name, guest_email, \
     invitation_id, stay_start_date, stay_end_date, region_code, checked_out_at, cancelled_at, \
     revoked_at, vacated_at, dead_mans_switch_enabled, usat_token_released_at, created_at";

const AUDIT_COLUMNS: &str = "id, sequence, category, title, message, property_id, stay_id, \
     invitation_id, actor_role, actor_user_id, actor_email, ip_address, user_agent, meta, \
     created_at, previous_hash, entry_hash";

#[derive(FromRow)]
struct PropertyRow {
    id: Uuid,
    owner_id: Uuid,
    owner_email: Option<String>,
    name: String,
    region_code: String,
    shield_mode_enabled: bool,
    utility_lock_engaged_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    owner_occupied: bool,
}

impl TryFrom<PropertyRow> for Property {
    type Error = StoreError;

    fn try_from(r: PropertyRow) -> Result<Self, Self::Error> {
        Ok(Property {
            id: PropertyId::from_uuid(r.id),
            owner_id: UserId::from_uuid(r.owner_id),
            owner_email: r.owner_email,
            name: r.name,
            region_code: region(&r.region_code)?,
            owner_occupied: r.owner_occupied,
            shield_mode_enabled: r.shield_mode_enabled,
            utility_lock_engaged_at: r.utility_lock_engaged_at.map(Timestamp::from_utc),
            created_at: Timestamp::from_utc(r.created_at),
        })
    }
}

#[derive(FromRow)]
struct InvitationRow {
    id: Uuid,
    code: String,
    property_id: Uuid,
    owner_id: Uuid,
    guest_name: Option<String>,
    guest_email: Option<String>,
    stay_start_date: NaiveDate,
    stay_end_date: NaiveDate,
    region_code: String,
    status: String,
    dead_mans_switch_enabled: bool,
    signature_id: Option<String>,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<InvitationRow> for Invitation {
    type Error = StoreError;

    fn try_from(r: InvitationRow) -> Result<Self, Self::Error> {
        let code = InvitationCode::new(&r.code).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let status = InvitationStatus::parse(&r.status)
            .ok_or_else(|| StoreError::Corrupt(format!("invitation {}: status {:?}", r.id, r.status)))?;
        let draft = NewInvitation {
            property_id: PropertyId::from_uuid(r.property_id),
            owner_id: UserId::from_uuid(r.owner_id),
            guest_name: r.guest_name,
            guest_email: r.guest_email,
            stay_start_date: r.stay_start_date,
            stay_end_date: r.stay_end_date,
            region_code: region(&r.region_code)?,
        };
        Ok(Invitation::restore(
            InvitationId::from_uuid(r.id),
            code,
            draft,
            status,
            r.dead_mans_switch_enabled,
            r.signature_id,
            Timestamp::from_utc(r.created_at),
            r.resolved_at.map(Timestamp::from_utc),
        ))
    }
}

#[derive(FromRow)]
struct StayRow {
    id: Uuid,
    property_id: Uuid,
    owner_id: Uuid,
    guest_id: Uuid,
    guest_name: Option<String>,
    guest_email: Option<String>,
    invitation_id: Option<Uuid>,
    stay_start_date: NaiveDate,
    stay_end_date: NaiveDate,
    region_code: String,
    checked_out_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
    vacated_at: Option<DateTime<Utc>>,
    dead_mans_switch_enabled: bool,
    usat_token_released_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<StayRow> for Stay {
    type Error = StoreError;

    fn try_from(r: StayRow) -> Result<Self, Self::Error> {
        let ts = |v: Option<DateTime<Utc>>| v.map(Timestamp::from_utc);
        let status = StayStatus::from_markers(
            ts(r.checked_out_at),
            ts(r.cancelled_at),
            ts(r.revoked_at),
            ts(r.vacated_at),
        )
        .ok_or_else(|| StoreError::Corrupt(format!("stay {}: conflicting terminal markers", r.id)))?;
        let draft = NewStay {
            property_id: PropertyId::from_uuid(r.property_id),
            owner_id: UserId::from_uuid(r.owner_id),
            guest_id: UserId::from_uuid(r.guest_id),
            guest_name: r.guest_name,
            guest_email: r.guest_email,
            invitation_id: r.invitation_id.map(InvitationId::from_uuid),
            stay_start_date: r.stay_start_date,
            stay_end_date: r.stay_end_date,
            region_code: region(&r.region_code)?,
            dead_mans_switch_enabled: r.dead_mans_switch_enabled,
        };
        Ok(Stay::restore(
            StayId::from_uuid(r.id),
            draft,
            status,
            ts(r.usat_token_released_at),
            Timestamp::from_utc(r.created_at),
        ))
    }
}

#[derive(FromRow)]
struct AuditRow {
    id: Uuid,
    sequence: i64,
    category: String,
    title: String,
    message: String,
    property_id: Option<Uuid>,
    stay_id: Option<Uuid>,
    invitation_id: Option<Uuid>,
    actor_role: String,
    actor_user_id: Option<Uuid>,
    actor_email: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    meta: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    previous_hash: String,
    entry_hash: String,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = StoreError;

    fn try_from(r: AuditRow) -> Result<Self, Self::Error> {
        let category = AuditCategory::parse(&r.category)
            .ok_or_else(|| StoreError::Corrupt(format!("audit {}: category {:?}", r.sequence, r.category)))?;
        let actor_role = match r.actor_role.as_str() {
            "owner" => ActorRole::Owner,
            "guest" => ActorRole::Guest,
            "system" => ActorRole::System,
            other => return Err(StoreError::Corrupt(format!("audit {}: actor role {other:?}", r.sequence))),
        };
        Ok(AuditEntry {
            id: AuditEntryId::from_uuid(r.id),
            sequence: r.sequence,
            category,
            title: r.title,
            message: r.message,
            property_id: r.property_id.map(PropertyId::from_uuid),
            stay_id: r.stay_id.map(StayId::from_uuid),
            invitation_id: r.invitation_id.map(InvitationId::from_uuid),
            actor_role,
            actor_user_id: r.actor_user_id.map(UserId::from_uuid),
            actor_email: r.actor_email,
            ip_address: r.ip_address,
            user_agent: r.user_agent,
            meta: r.meta,
            created_at: Timestamp::from_utc(r.created_at),
            previous_hash: r.previous_hash,
            entry_hash: r.entry_hash,
        })
    }
}

fn region(s: &str) -> Result<RegionCode, StoreError> {
    RegionCode::new(s).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn dt(t: Option<Timestamp>) -> Option<DateTime<Utc>> {
    t.map(|t| *t.as_datetime())
}

fn uuid<T>(id: Option<T>, f: impl Fn(&T) -> &Uuid) -> Option<Uuid> {
    id.as_ref().map(|v| *f(v))
}

fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

// ── Transaction helpers ───────────────────────────────────────────────

type Tx = Transaction<'static, Postgres>;

async fn append_in(tx: &mut Tx, entry: NewAuditEntry) -> Result<AuditEntry, sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(AUDIT_CHAIN_LOCK)
        .execute(&mut **tx)
        .await?;

    let last: Option<(i64, String)> =
        sqlx::query_as("SELECT sequence, entry_hash FROM audit_logs ORDER BY sequence DESC LIMIT 1")
            .fetch_optional(&mut **tx)
            .await?;
    let (sequence, previous) = match last {
        Some((seq, hash)) => (seq + 1, hash),
        None => (1, GENESIS_HASH.to_string()),
    };
    let sealed = AuditEntry::seal(entry, sequence, &previous);

    sqlx::query(&format!(
        "INSERT INTO audit_logs ({AUDIT_COLUMNS}) VALUES \
         ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
    ))
    .bind(*sealed.id.as_uuid())
    .bind(sealed.sequence)
    .bind(sealed.category.as_str())
    .bind(&sealed.title)
    .bind(&sealed.message)
    .bind(uuid(sealed.property_id, PropertyId::as_uuid))
    .bind(uuid(sealed.stay_id, StayId::as_uuid))
    .bind(uuid(sealed.invitation_id, InvitationId::as_uuid))
    .bind(sealed.actor_role.as_str())
    .bind(uuid(sealed.actor_user_id, UserId::as_uuid))
    .bind(&sealed.actor_email)
    .bind(&sealed.ip_address)
    .bind(&sealed.user_agent)
    .bind(&sealed.meta)
    .bind(*sealed.created_at.as_datetime())
    .bind(&sealed.previous_hash)
    .bind(&sealed.entry_hash)
    .execute(&mut **tx)
    .await?;

    Ok(sealed)
}

async fn lock_property(tx: &mut Tx, id: PropertyId) -> StoreResult<Property> {
    let row = sqlx::query_as::<_, PropertyRow>(&format!(
        "SELECT {PROPERTY_COLUMNS} FROM properties WHERE id = $1 FOR UPDATE"
    ))
    .bind(*id.as_uuid())
    .fetch_optional(&mut **tx)
    .await?;
    row.ok_or_else(|| LifecycleError::not_found("property", id))?
        .try_into()
}

async fn write_property(tx: &mut Tx, p: &Property) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE properties SET shield_mode_enabled = $2, utility_lock_engaged_at = $3 WHERE id = $1",
    )
    .bind(*p.id.as_uuid())
    .bind(p.shield_mode_enabled)
    .bind(dt(p.utility_lock_engaged_at))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn open_stays_for(tx: &mut Tx, property_id: PropertyId) -> StoreResult<Vec<Stay>> {
    let rows = sqlx::query_as::<_, StayRow>(&format!(
        "SELECT {STAY_COLUMNS} FROM stays WHERE property_id = $1 \
         AND checked_out_at IS NULL AND cancelled_at IS NULL AND revoked_at IS NULL"
    ))
    .bind(*property_id.as_uuid())
    .fetch_all(&mut **tx)
    .await?;
    rows.into_iter().map(Stay::try_from).collect()
}

async fn insert_stay_row(tx: &mut Tx, s: &Stay) -> Result<(), sqlx::Error> {
    let status = s.status();
    sqlx::query(&format!(
        "INSERT INTO stays ({STAY_COLUMNS}, vacate_by) VALUES \
         ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
    ))
    .bind(*s.id.as_uuid())
    .bind(*s.property_id.as_uuid())
    .bind(*s.owner_id.as_uuid())
    .bind(*s.guest_id.as_uuid())
    .bind(&s.guest_name)
    .bind(&s.guest_email)
    .bind(uuid(s.invitation_id, InvitationId::as_uuid))
    .bind(s.stay_start_date)
    .bind(s.stay_end_date)
    .bind(s.region_code.as_str())
    .bind(dt(status.checked_out_at()))
    .bind(dt(status.cancelled_at()))
    .bind(dt(status.revoked_at()))
    .bind(dt(status.vacated_at()))
    .bind(s.dead_mans_switch_enabled)
    .bind(dt(s.usat_token_released_at))
    .bind(*s.created_at.as_datetime())
    .bind(dt(status.vacate_by()))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Write `next` over `prev`, guarded on `prev`'s markers still being in place.
async fn write_stay(tx: &mut Tx, prev: &Stay, next: &Stay) -> StoreResult<()> {
    let (p, n) = (prev.status(), next.status());
    let result = sqlx::query(
        "UPDATE stays SET checked_out_at = $2, cancelled_at = $3, revoked_at = $4, vacate_by = $5, \
         vacated_at = $6, usat_token_released_at = $7 \
         WHERE id = $1 AND checked_out_at IS NULL AND cancelled_at IS NULL \
         AND revoked_at IS NOT DISTINCT FROM $8 AND vacated_at IS NOT DISTINCT FROM $9 \
         AND usat_token_released_at IS NOT DISTINCT FROM $10",
    )
    .bind(*next.id.as_uuid())
    .bind(dt(n.checked_out_at()))
    .bind(dt(n.cancelled_at()))
    .bind(dt(n.revoked_at()))
    .bind(dt(n.vacate_by()))
    .bind(dt(n.vacated_at()))
    .bind(dt(next.usat_token_released_at))
    .bind(dt(p.revoked_at()))
    .bind(dt(p.vacated_at()))
    .bind(dt(prev.usat_token_released_at))
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(LifecycleError::AlreadyResolved {
            entity: "stay",
            id: prev.id.to_string(),
            state: p.name().to_string(),
        }
        .into());
    }
    Ok(())
}

/// Write `next` over a pending invitation row.
async fn write_invitation(tx: &mut Tx, next: &Invitation) -> StoreResult<()> {
    let result = sqlx::query(
        "UPDATE invitations SET status = $2, guest_name = $3, guest_email = $4, signature_id = $5, \
         resolved_at = $6 WHERE id = $1 AND status = 'pending'",
    )
    .bind(*next.id.as_uuid())
    .bind(next.status().as_str())
    .bind(&next.guest_name)
    .bind(&next.guest_email)
    .bind(&next.signature_id)
    .bind(dt(next.resolved_at))
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(LifecycleError::AlreadyResolved {
            entity: "invitation",
            id: next.code.to_string(),
            state: "RESOLVED".to_string(),
        }
        .into());
    }
    Ok(())
}

fn storage(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

// ── Ledger ────────────────────────────────────────────────────────────

#[async_trait]
impl AuditLedger for PgStore {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        let sealed = append_in(&mut tx, entry).await.map_err(storage)?;
        tx.commit().await.map_err(storage)?;
        Ok(sealed)
    }

    async fn query(&self, q: &AuditQuery) -> Result<Vec<AuditEntry>, LedgerError> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_logs WHERE TRUE"
        ));
        if let Some(from) = q.from_ts {
            qb.push(" AND created_at >= ").push_bind(*from.as_datetime());
        }
        if let Some(to) = q.to_ts {
            qb.push(" AND created_at <= ").push_bind(*to.as_datetime());
        }
        if let Some(category) = q.category {
            qb.push(" AND category = ").push_bind(category.as_str());
        }
        if let Some(p) = q.property_id {
            qb.push(" AND property_id = ").push_bind(*p.as_uuid());
        }
        if let Some(s) = q.stay_id {
            qb.push(" AND stay_id = ").push_bind(*s.as_uuid());
        }
        if let Some(scope) = &q.scope {
            let ids: Vec<Uuid> = scope.iter().map(|p| *p.as_uuid()).collect();
            qb.push(" AND property_id = ANY(").push_bind(ids).push(")");
        }
        if let Some(needle) = q.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = like_pattern(needle);
            qb.push(" AND (title ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR message ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        qb.push(" ORDER BY created_at DESC, sequence DESC");
        if let Some(limit) = q.limit {
            qb.push(" LIMIT ").push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = qb
            .build_query_as::<AuditRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.into_iter()
            .map(|r| AuditEntry::try_from(r).map_err(storage))
            .collect()
    }

    async fn verify_chain(&self) -> Result<ChainVerification, LedgerError> {
        let rows = sqlx::query_as::<_, AuditRow>(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_logs ORDER BY sequence ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        let entries = rows
            .into_iter()
            .map(|r| AuditEntry::try_from(r).map_err(storage))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(verify_entries(&entries))
    }
}

// ── Lifecycle store ───────────────────────────────────────────────────

#[async_trait]
impl LifecycleStore for PgStore {
    async fn insert_property(&self, p: &Property, audit: NewAuditEntry) -> StoreResult<AuditEntry> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO properties ({PROPERTY_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(*p.id.as_uuid())
        .bind(*p.owner_id.as_uuid())
        .bind(&p.owner_email)
        .bind(&p.name)
        .bind(p.region_code.as_str())
        .bind(p.shield_mode_enabled)
        .bind(dt(p.utility_lock_engaged_at))
        .bind(*p.created_at.as_datetime())
        .bind(p.owner_occupied)
        .execute(&mut *tx)
        .await?;
        let sealed = append_in(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(sealed)
    }

    async fn property(&self, id: PropertyId) -> StoreResult<Option<Property>> {
        sqlx::query_as::<_, PropertyRow>(&format!(
            "SELECT {PROPERTY_COLUMNS} FROM properties WHERE id = $1"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Property::try_from)
        .transpose()
    }

    async fn properties(&self, owner_id: Option<UserId>) -> StoreResult<Vec<Property>> {
        let rows = sqlx::query_as::<_, PropertyRow>(&format!(
            "SELECT {PROPERTY_COLUMNS} FROM properties \
             WHERE ($1::uuid IS NULL OR owner_id = $1) ORDER BY created_at, id"
        ))
        .bind(uuid(owner_id, UserId::as_uuid))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Property::try_from).collect()
    }

    async fn transition_property(
        &self,
        id: PropertyId,
        mutation: Mutation<Property>,
    ) -> StoreResult<(Property, AuditEntry)> {
        let mut tx = self.pool.begin().await?;
        let mut property = lock_property(&mut tx, id).await?;
        let entry = mutation(&mut property)?;
        write_property(&mut tx, &property).await?;
        let sealed = append_in(&mut tx, entry).await?;
        tx.commit().await?;
        Ok((property, sealed))
    }

    async fn insert_invitation(&self, i: &Invitation, audit: NewAuditEntry) -> StoreResult<AuditEntry> {
        let mut tx = self.pool.begin().await?;
        lock_property(&mut tx, i.property_id).await?;
        sqlx::query(&format!(
            "INSERT INTO invitations ({INVITATION_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(*i.id.as_uuid())
        .bind(i.code.as_str())
        .bind(*i.property_id.as_uuid())
        .bind(*i.owner_id.as_uuid())
        .bind(&i.guest_name)
        .bind(&i.guest_email)
        .bind(i.stay_start_date)
        .bind(i.stay_end_date)
        .bind(i.region_code.as_str())
        .bind(i.status().as_str())
        .bind(i.dead_mans_switch_enabled)
        .bind(&i.signature_id)
        .bind(*i.created_at.as_datetime())
        .bind(dt(i.resolved_at))
        .execute(&mut *tx)
        .await?;
        let sealed = append_in(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(sealed)
    }

    async fn invitation_by_code(&self, code: &InvitationCode) -> StoreResult<Option<Invitation>> {
        sqlx::query_as::<_, InvitationRow>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE code = $1"
        ))
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(Invitation::try_from)
        .transpose()
    }

    async fn invitations(&self, filter: &InvitationFilter) -> StoreResult<Vec<Invitation>> {
        let rows = sqlx::query_as::<_, InvitationRow>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations \
             WHERE ($1::uuid IS NULL OR owner_id = $1) AND ($2::uuid IS NULL OR property_id = $2) \
             ORDER BY created_at DESC"
        ))
        .bind(uuid(filter.owner_id, UserId::as_uuid))
        .bind(uuid(filter.property_id, PropertyId::as_uuid))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Invitation::try_from).collect()
    }

    async fn transition_invitation(
        &self,
        code: &InvitationCode,
        mutation: Mutation<Invitation>,
    ) -> StoreResult<(Invitation, AuditEntry)> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, InvitationRow>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE code = $1 FOR UPDATE"
        ))
        .bind(code.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let mut invitation: Invitation = row
            .ok_or_else(|| LifecycleError::not_found("invitation", code))?
            .try_into()?;
        let entry = mutation(&mut invitation)?;
        write_invitation(&mut tx, &invitation).await?;
        let sealed = append_in(&mut tx, entry).await?;
        tx.commit().await?;
        Ok((invitation, sealed))
    }

    async fn accept_invitation(
        &self,
        code: &InvitationCode,
        acceptance: Acceptance,
        actor: Actor,
        now: Timestamp,
    ) -> StoreResult<(Invitation, Stay, AuditEntry)> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, InvitationRow>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE code = $1 FOR UPDATE"
        ))
        .bind(code.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let mut invitation: Invitation = row
            .ok_or_else(|| LifecycleError::not_found("invitation", code))?
            .try_into()?;

        lock_property(&mut tx, invitation.property_id).await?;
        let open = open_stays_for(&mut tx, invitation.property_id).await?;
        let (transition, draft) = invitation.accept(acceptance, &open, &actor, now)?;
        let stay = Stay::create(draft, now)?;

        write_invitation(&mut tx, &invitation).await?;
        insert_stay_row(&mut tx, &stay).await?;
        let sealed = append_in(
            &mut tx,
            NewAuditEntry::invitation_transition(&transition, Some(stay.id)),
        )
        .await?;
        tx.commit().await?;
        Ok((invitation, stay, sealed))
    }

    async fn insert_stay(&self, stay: &Stay, audit: NewAuditEntry) -> StoreResult<AuditEntry> {
        let mut tx = self.pool.begin().await?;
        lock_property(&mut tx, stay.property_id).await?;
        let open = open_stays_for(&mut tx, stay.property_id).await?;
        if let Some(conflict) = open
            .iter()
            .find(|s| s.overlaps(stay.stay_start_date, stay.stay_end_date))
        {
            return Err(LifecycleError::precondition(format!(
                "property already has an open stay ({}) overlapping {} to {}",
                conflict.id, stay.stay_start_date, stay.stay_end_date
            ))
            .into());
        }
        insert_stay_row(&mut tx, stay).await?;
        let sealed = append_in(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(sealed)
    }

    async fn stay(&self, id: StayId) -> StoreResult<Option<Stay>> {
        sqlx::query_as::<_, StayRow>(&format!("SELECT {STAY_COLUMNS} FROM stays WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(Stay::try_from)
            .transpose()
    }

    async fn stays(&self, filter: &StayFilter) -> StoreResult<Vec<Stay>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {STAY_COLUMNS} FROM stays WHERE TRUE"));
        if let Some(p) = filter.property_id {
            qb.push(" AND property_id = ").push_bind(*p.as_uuid());
        }
        if let Some(o) = filter.owner_id {
            qb.push(" AND owner_id = ").push_bind(*o.as_uuid());
        }
        if let Some(g) = filter.guest_id {
            qb.push(" AND guest_id = ").push_bind(*g.as_uuid());
        }
        if filter.open_only {
            qb.push(" AND checked_out_at IS NULL AND cancelled_at IS NULL AND revoked_at IS NULL");
        }
        qb.push(" ORDER BY stay_start_date, created_at");
        let rows = qb.build_query_as::<StayRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(Stay::try_from).collect()
    }

    async fn transition_stay(&self, id: StayId, mutation: Mutation<Stay>) -> StoreResult<(Stay, AuditEntry)> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, StayRow>(&format!(
            "SELECT {STAY_COLUMNS} FROM stays WHERE id = $1 FOR UPDATE"
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        let current: Stay = row.ok_or_else(|| LifecycleError::not_found("stay", id))?.try_into()?;
        let mut next = current.clone();
        let entry = mutation(&mut next)?;
        write_stay(&mut tx, &current, &next).await?;
        let sealed = append_in(&mut tx, entry).await?;
        tx.commit().await?;
        Ok((next, sealed))
    }

    async fn fire_threshold(
        &self,
        stay_id: StayId,
        threshold: EnforcementThreshold,
        audit: NewAuditEntry,
        at: Timestamp,
    ) -> StoreResult<Option<AuditEntry>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, StayRow>(&format!(
            "SELECT {STAY_COLUMNS} FROM stays WHERE id = $1 FOR UPDATE"
        ))
        .bind(*stay_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        let stay: Stay = row.ok_or_else(|| LifecycleError::not_found("stay", stay_id))?.try_into()?;
        if !stay.is_open() {
            tx.rollback().await?;
            return Ok(None);
        }

        let inserted = sqlx::query(
            "INSERT INTO enforcement_marks (stay_id, threshold, fired_at) VALUES ($1, $2, $3) \
             ON CONFLICT (stay_id, threshold) DO NOTHING",
        )
        .bind(*stay_id.as_uuid())
        .bind(threshold.as_str())
        .bind(*at.as_datetime())
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        if let Some(effect) = threshold.property_effect() {
            let mut property = lock_property(&mut tx, stay.property_id).await?;
            match effect {
                PropertyEffect::EnableShield => {
                    property.auto_enable_shield();
                }
                PropertyEffect::EngageUtilityLock => {
                    property.engage_utility_lock(at);
                }
            }
            write_property(&mut tx, &property).await?;
        }

        let sealed = append_in(&mut tx, audit).await?;
        tx.commit().await?;
        Ok(Some(sealed))
    }

    async fn fired_thresholds(&self, stay_id: StayId) -> StoreResult<Vec<EnforcementThreshold>> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT threshold FROM enforcement_marks WHERE stay_id = $1")
                .bind(*stay_id.as_uuid())
                .fetch_all(&self.pool)
                .await?;
        let mut out = names
            .iter()
            .map(|n| {
                EnforcementThreshold::parse(n)
                    .ok_or_else(|| StoreError::Corrupt(format!("enforcement mark {n:?}")))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        out.sort();
        Ok(out)
    }

    async fn upsert_rules(&self, rules: &JurisdictionRuleTable) -> StoreResult<()> {
        let int = |v: u32| i32::try_from(v).map_err(|_| StoreError::Corrupt(format!("rule value {v} out of range")));
        let mut tx = self.pool.begin().await?;
        for rule in rules.iter() {
            sqlx::query(
                "INSERT INTO jurisdiction_rules (region_code, max_safe_stay_days, tenancy_threshold_days, \
                 warning_days, statute_reference, plain_english_explanation, payment_creates_tenancy, \
                 allow_extended_if_owner_occupied) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (region_code) DO UPDATE SET \
                 max_safe_stay_days = EXCLUDED.max_safe_stay_days, \
                 tenancy_threshold_days = EXCLUDED.tenancy_threshold_days, \
                 warning_days = EXCLUDED.warning_days, \
                 statute_reference = EXCLUDED.statute_reference, \
                 plain_english_explanation = EXCLUDED.plain_english_explanation, \
                 payment_creates_tenancy = EXCLUDED.payment_creates_tenancy, \
                 allow_extended_if_owner_occupied = EXCLUDED.allow_extended_if_owner_occupied",
            )
            .bind(rule.region_code.as_str())
            .bind(int(rule.max_safe_stay_days)?)
            .bind(int(rule.tenancy_threshold_days)?)
            .bind(int(rule.warning_days)?)
            .bind(&rule.statute_reference)
            .bind(&rule.plain_english_explanation)
            .bind(rule.payment_creates_tenancy)
            .bind(rule.allow_extended_if_owner_occupied)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        tracing::info!(rules = rules.len(), "jurisdiction rules upserted");
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
