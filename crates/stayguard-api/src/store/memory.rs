//! In-memory [`LifecycleStore`].
//!
//! All tables and the audit chain live behind one `parking_lot::RwLock`.
//! The lock is never held across an `.await`, and every write holds it
//! for the whole check-mutate-append sequence, which is what makes each
//! transition a conditional write.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use stayguard_agentic::{
    AuditChain, AuditEntry, AuditLedger, AuditQuery, ChainVerification, EnforcementThreshold,
    LedgerError, NewAuditEntry, PropertyEffect,
};
use stayguard_core::{
    Actor, InvitationCode, JurisdictionRuleTable, LifecycleError, PropertyId, StayId, Timestamp,
    UserId,
};
use stayguard_state::{Acceptance, Invitation, Property, Stay};

use super::{InvitationFilter, LifecycleStore, Mutation, StayFilter, StoreResult};

#[derive(Debug, Default)]
struct Tables {
    properties: HashMap<PropertyId, Property>,
    invitations: HashMap<InvitationCode, Invitation>,
    stays: HashMap<StayId, Stay>,
    marks: HashMap<(StayId, EnforcementThreshold), Timestamp>,
    audit: AuditChain,
}

impl Tables {
    fn overlapping_open_stay(&self, candidate: &Stay) -> Option<&Stay> {
        self.stays.values().find(|s| {
            s.property_id == candidate.property_id
                && s.overlaps(candidate.stay_start_date, candidate.stay_end_date)
        })
    }

    fn property_stays(&self, property_id: PropertyId) -> Vec<Stay> {
        self.stays
            .values()
            .filter(|s| s.property_id == property_id)
            .cloned()
            .collect()
    }
}

/// Process-local store. Cloning shares the underlying tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledger entries.
    pub fn audit_len(&self) -> usize {
        self.tables.read().audit.len()
    }
}

/// Apply `mutation` to a copy of `current` and return the copy and its
/// audit entry, leaving `current` untouched on refusal.
fn apply<T: Clone>(current: &T, mutation: Mutation<T>) -> Result<(T, NewAuditEntry), LifecycleError> {
    let mut next = current.clone();
    let entry = mutation(&mut next)?;
    Ok((next, entry))
}

#[async_trait]
impl AuditLedger for MemoryStore {
    async fn append(&self, entry: NewAuditEntry) -> Result<AuditEntry, LedgerError> {
        Ok(self.tables.write().audit.push(entry))
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, LedgerError> {
        Ok(self.tables.read().audit.query(query))
    }

    async fn verify_chain(&self) -> Result<ChainVerification, LedgerError> {
        Ok(self.tables.read().audit.verify())
    }
}

#[async_trait]
impl LifecycleStore for MemoryStore {
    async fn insert_property(&self, property: &Property, audit: NewAuditEntry) -> StoreResult<AuditEntry> {
        let mut t = self.tables.write();
        t.properties.insert(property.id, property.clone());
        Ok(t.audit.push(audit))
    }

    async fn property(&self, id: PropertyId) -> StoreResult<Option<Property>> {
        Ok(self.tables.read().properties.get(&id).cloned())
    }

    async fn properties(&self, owner_id: Option<UserId>) -> StoreResult<Vec<Property>> {
        let t = self.tables.read();
        let mut out: Vec<Property> = t
            .properties
            .values()
            .filter(|p| owner_id.map_or(true, |o| o == p.owner_id))
            .cloned()
            .collect();
        out.sort_by_key(|p| (p.created_at, p.id));
        Ok(out)
    }

    async fn transition_property(
        &self,
        id: PropertyId,
        mutation: Mutation<Property>,
    ) -> StoreResult<(Property, AuditEntry)> {
        let mut t = self.tables.write();
        let current = t
            .properties
            .get(&id)
            .ok_or_else(|| LifecycleError::not_found("property", id))?;
        let (next, entry) = apply(current, mutation)?;
        t.properties.insert(id, next.clone());
        Ok((next, t.audit.push(entry)))
    }

    async fn insert_invitation(&self, invitation: &Invitation, audit: NewAuditEntry) -> StoreResult<AuditEntry> {
        let mut t = self.tables.write();
        if !t.properties.contains_key(&invitation.property_id) {
            return Err(LifecycleError::not_found("property", invitation.property_id).into());
        }
        t.invitations.insert(invitation.code.clone(), invitation.clone());
        Ok(t.audit.push(audit))
    }

    async fn invitation_by_code(&self, code: &InvitationCode) -> StoreResult<Option<Invitation>> {
        Ok(self.tables.read().invitations.get(code).cloned())
    }

    async fn invitations(&self, filter: &InvitationFilter) -> StoreResult<Vec<Invitation>> {
        let t = self.tables.read();
        let mut out: Vec<Invitation> = t
            .invitations
            .values()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn transition_invitation(
        &self,
        code: &InvitationCode,
        mutation: Mutation<Invitation>,
    ) -> StoreResult<(Invitation, AuditEntry)> {
        let mut t = self.tables.write();
        let current = t
            .invitations
            .get(code)
            .ok_or_else(|| LifecycleError::not_found("invitation", code))?;
        let (next, entry) = apply(current, mutation)?;
        t.invitations.insert(code.clone(), next.clone());
        Ok((next, t.audit.push(entry)))
    }

    async fn accept_invitation(
        &self,
        code: &InvitationCode,
        acceptance: Acceptance,
        actor: Actor,
        now: Timestamp,
    ) -> StoreResult<(Invitation, Stay, AuditEntry)> {
        let mut t = self.tables.write();
        let mut invitation = t
            .invitations
            .get(code)
            .cloned()
            .ok_or_else(|| LifecycleError::not_found("invitation", code))?;
        let property_stays = t.property_stays(invitation.property_id);
        let (transition, draft) = invitation.accept(acceptance, &property_stays, &actor, now)?;
        let stay = Stay::create(draft, now)?;
        let entry = NewAuditEntry::invitation_transition(&transition, Some(stay.id));

        t.invitations.insert(code.clone(), invitation.clone());
        t.stays.insert(stay.id, stay.clone());
        let sealed = t.audit.push(entry);
        Ok((invitation, stay, sealed))
    }

    async fn insert_stay(&self, stay: &Stay, audit: NewAuditEntry) -> StoreResult<AuditEntry> {
        let mut t = self.tables.write();
        if !t.properties.contains_key(&stay.property_id) {
            return Err(LifecycleError::not_found("property", stay.property_id).into());
        }
        if let Some(conflict) = t.overlapping_open_stay(stay) {
            return Err(LifecycleError::precondition(format!(
                "property already has an open stay ({}) overlapping {} to {}",
                conflict.id, stay.stay_start_date, stay.stay_end_date
            ))
            .into());
        }
        t.stays.insert(stay.id, stay.clone());
        Ok(t.audit.push(audit))
    }

    async fn stay(&self, id: StayId) -> StoreResult<Option<Stay>> {
        Ok(self.tables.read().stays.get(&id).cloned())
    }

    async fn stays(&self, filter: &StayFilter) -> StoreResult<Vec<Stay>> {
        let t = self.tables.read();
        let mut out: Vec<Stay> = t.stays.values().filter(|s| filter.matches(s)).cloned().collect();
        out.sort_by(|a, b| {
            a.stay_start_date
                .cmp(&b.stay_start_date)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(out)
    }

    async fn transition_stay(&self, id: StayId, mutation: Mutation<Stay>) -> StoreResult<(Stay, AuditEntry)> {
        let mut t = self.tables.write();
        let current = t
            .stays
            .get(&id)
            .ok_or_else(|| LifecycleError::not_found("stay", id))?;
        let (next, entry) = apply(current, mutation)?;
        t.stays.insert(id, next.clone());
        Ok((next, t.audit.push(entry)))
    }

    async fn fire_threshold(
        &self,
        stay_id: StayId,
        threshold: EnforcementThreshold,
        audit: NewAuditEntry,
        at: Timestamp,
    ) -> StoreResult<Option<AuditEntry>> {
        let mut t = self.tables.write();
        if t.marks.contains_key(&(stay_id, threshold)) {
            return Ok(None);
        }
        let stay = t
            .stays
            .get(&stay_id)
            .ok_or_else(|| LifecycleError::not_found("stay", stay_id))?;
        if !stay.is_open() {
            return Ok(None);
        }
        let property_id = stay.property_id;
        if let Some(effect) = threshold.property_effect() {
            let property = t
                .properties
                .get_mut(&property_id)
                .ok_or_else(|| LifecycleError::not_found("property", property_id))?;
            match effect {
                PropertyEffect::EnableShield => {
                    property.auto_enable_shield();
                }
                PropertyEffect::EngageUtilityLock => {
                    property.engage_utility_lock(at);
                }
            }
        }
        t.marks.insert((stay_id, threshold), at);
        Ok(Some(t.audit.push(audit)))
    }

    async fn fired_thresholds(&self, stay_id: StayId) -> StoreResult<Vec<EnforcementThreshold>> {
        let t = self.tables.read();
        let mut out: Vec<EnforcementThreshold> = t
            .marks
            .keys()
            .filter(|(s, _)| *s == stay_id)
            .map(|(_, th)| *th)
            .collect();
        out.sort();
        Ok(out)
    }

    /// Rules are served from the process-wide table; nothing to persist.
    async fn upsert_rules(&self, _rules: &JurisdictionRuleTable) -> StoreResult<()> {
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
