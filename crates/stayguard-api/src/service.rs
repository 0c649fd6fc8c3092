//! # Lifecycle Service
//!
//! Transport-agnostic orchestration of every lifecycle operation. Routes,
//! the periodic runner and the CLI all call into [`LifecycleService`].
//!
//! Each state-changing call ends in exactly one ledger entry: the entry
//! committed with the change on success, or one `failed_attempt` entry when
//! the domain refuses it. Authorization failures on those calls are recorded
//! the same way under error kind `FORBIDDEN`. If the refusal itself cannot
//! be written, the caller gets the store error instead.
//!
//! Notifications go out only after the change is committed. Delivery
//! failures are retried and logged but never undo the change.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use stayguard_agentic::{
    due_thresholds, AuditCategory, AuditEntry, AuditQuery, ChainVerification, EnforcementEvent,
    EnforcementSink, EnforcementThreshold, LedgerError, LogNotifier, LoggingEnforcementSink,
    NewAuditEntry, Notification, NotificationKind, Notifier, RetryPolicy,
};
use stayguard_compliance::{classify_in_region, Classification, ClassifyError, StayAttributes};
use stayguard_core::{
    Actor, ActorRole, Clock, InvitationCode, InvitationId, JurisdictionRule, JurisdictionRuleTable,
    LifecycleError, PropertyId, RegionCode, StayId, SystemClock, Timestamp, UserId,
};
use stayguard_state::{
    Acceptance, Invitation, InvitationStatus, InvitationView, NewInvitation, NewProperty, NewStay,
    Property, ShieldStatus, Stay, StayPhase, StayTransition,
};

use crate::store::{InvitationFilter, LifecycleStore, StayFilter, StoreError};

// ── Errors ────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ServiceError {
    /// The domain refused the operation. Already recorded in the ledger.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The caller may not act on this resource. Recorded when the call
    /// would have changed state.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Malformed input that never reached the domain.
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(e) => Self::Lifecycle(e),
            other => Self::Store(other),
        }
    }
}

impl From<LedgerError> for ServiceError {
    fn from(err: LedgerError) -> Self {
        Self::Store(StoreError::Ledger(err))
    }
}

impl ServiceError {
    /// Stable code recorded for a refusal.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Lifecycle(e) => e.kind().as_str(),
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Invalid(_) => "INVALID_REQUEST",
            Self::Store(_) => "STORE_FAILURE",
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

// ── Inputs and views ──────────────────────────────────────────────────

/// Owner input for `create_invitation`.
#[derive(Debug, Clone)]
pub struct InvitationRequest {
    pub property_id: PropertyId,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub stay_start_date: chrono::NaiveDate,
    pub stay_end_date: chrono::NaiveDate,
}

/// Input for `create_stay`. Owner and region come from the property.
#[derive(Debug, Clone)]
pub struct StayRequest {
    pub property_id: PropertyId,
    pub guest_id: UserId,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub stay_start_date: chrono::NaiveDate,
    pub stay_end_date: chrono::NaiveDate,
    pub dead_mans_switch_enabled: bool,
}

/// Guest input for `accept_invitation`.
#[derive(Debug, Clone, Default)]
pub struct AcceptanceRequest {
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    /// Completion token from the e-signature provider.
    pub signature_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedInvitation {
    pub invitation: Invitation,
    pub classification: Classification,
}

/// An invitation as the owner sees it, with the derived expiry.
#[derive(Debug, Clone, Serialize)]
pub struct InvitationListing {
    pub invitation: Invitation,
    pub status: InvitationView,
    pub expires_at: Timestamp,
}

/// A stay with its read-time projections.
#[derive(Debug, Clone, Serialize)]
pub struct StayView {
    pub stay: Stay,
    pub phase: StayPhase,
    pub vacate_by: Option<Timestamp>,
    pub days_until_end: i64,
    pub classification: Option<Classification>,
}

impl StayView {
    fn new(
        stay: Stay,
        owner_occupied: bool,
        today: chrono::NaiveDate,
        rules: &JurisdictionRuleTable,
    ) -> Self {
        let attrs = StayAttributes::from(&stay).with_owner_occupied(owner_occupied);
        let classification = classify_in_region(rules, &stay.region_code, &attrs).ok();
        Self {
            phase: stay.phase(today),
            vacate_by: stay.status().vacate_by(),
            days_until_end: stay.days_until_end(today),
            classification,
            stay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FiredThreshold {
    pub stay_id: StayId,
    pub property_id: PropertyId,
    pub threshold: EnforcementThreshold,
    pub sequence: i64,
}

/// Outcome of one enforcement pass.
#[derive(Debug, Clone, Serialize)]
pub struct EnforcementReport {
    pub as_of: Timestamp,
    pub stays_scanned: usize,
    pub fired: Vec<FiredThreshold>,
    pub notifications_sent: usize,
    pub notifications_failed: usize,
    /// Stays or thresholds skipped because of a store failure.
    pub errors: usize,
}

impl EnforcementReport {
    fn new(as_of: Timestamp) -> Self {
        Self {
            as_of,
            stays_scanned: 0,
            fired: Vec::new(),
            notifications_sent: 0,
            notifications_failed: 0,
            errors: 0,
        }
    }

    fn absorb(&mut self, other: EnforcementReport) {
        self.stays_scanned += other.stays_scanned;
        self.fired.extend(other.fired);
        self.notifications_sent += other.notifications_sent;
        self.notifications_failed += other.notifications_failed;
        self.errors += other.errors;
    }
}

// ── Ledger subjects, parties, audiences ───────────────────────────────

/// Entities a `failed_attempt` entry is filed under.
#[derive(Debug, Clone, Copy, Default)]
struct Subject {
    property_id: Option<PropertyId>,
    stay_id: Option<StayId>,
    invitation_id: Option<InvitationId>,
}

impl Subject {
    fn property(id: PropertyId) -> Self {
        Self {
            property_id: Some(id),
            ..Self::default()
        }
    }

    fn stay(stay: &Stay) -> Self {
        Self {
            property_id: Some(stay.property_id),
            stay_id: Some(stay.id),
            invitation_id: stay.invitation_id,
        }
    }

    fn invitation(inv: &Invitation) -> Self {
        Self {
            property_id: Some(inv.property_id),
            invitation_id: Some(inv.id),
            ..Self::default()
        }
    }

    fn file(self, mut entry: NewAuditEntry) -> NewAuditEntry {
        entry.property_id = self.property_id;
        entry.stay_id = self.stay_id;
        entry.invitation_id = self.invitation_id;
        entry
    }
}

/// Which side of a stay may perform an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Party {
    Owner,
    Guest,
}

impl Party {
    fn authorize(self, actor: &Actor, stay: &Stay) -> ServiceResult<()> {
        match self {
            Self::Owner => authorize_owner(actor, stay.owner_id),
            Self::Guest => authorize_user(actor, ActorRole::Guest, stay.guest_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Audience {
    Owner,
    Guest,
    Both,
}

impl Audience {
    fn includes(self, role: ActorRole) -> bool {
        match self {
            Self::Both => true,
            Self::Owner => role == ActorRole::Owner,
            Self::Guest => role == ActorRole::Guest,
        }
    }
}

fn forbidden(actor: &Actor, what: impl std::fmt::Display) -> ServiceError {
    ServiceError::Forbidden(format!("{} may not {what}", actor.label()))
}

/// The caller's user id, provided they hold `role`.
fn require_user(actor: &Actor, role: ActorRole) -> ServiceResult<UserId> {
    match actor.user_id {
        Some(id) if actor.role == role => Ok(id),
        _ => Err(ServiceError::Forbidden(format!(
            "role '{role}' required, caller is '{}'",
            actor.label()
        ))),
    }
}

/// System actors act on anything; users only on what they hold.
fn authorize_user(actor: &Actor, role: ActorRole, holder: UserId) -> ServiceResult<()> {
    match actor.role {
        ActorRole::System => Ok(()),
        r if r == role && actor.user_id == Some(holder) => Ok(()),
        _ => Err(forbidden(actor, format!("act on a resource held by {role} {holder}"))),
    }
}

fn authorize_owner(actor: &Actor, owner_id: UserId) -> ServiceResult<()> {
    authorize_user(actor, ActorRole::Owner, owner_id)
}

fn classify_refusal(err: ClassifyError) -> LifecycleError {
    match err {
        ClassifyError::UnknownRegion(region) => LifecycleError::not_found("jurisdiction rule", region),
        other => LifecycleError::precondition(other.to_string()),
    }
}

// ── Service ───────────────────────────────────────────────────────────

/// Shared lifecycle orchestration. Cloning shares the store and collaborators.
#[derive(Clone)]
pub struct LifecycleService {
    store: Arc<dyn LifecycleStore>,
    rules: Arc<JurisdictionRuleTable>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    sink: Arc<dyn EnforcementSink>,
    retry: RetryPolicy,
    block_critical: bool,
}

impl std::fmt::Debug for LifecycleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleService")
            .field("rules", &self.rules.len())
            .field("clock", &self.clock)
            .field("retry", &self.retry)
            .field("block_critical", &self.block_critical)
            .finish_non_exhaustive()
    }
}

impl LifecycleService {
    /// A service over `store` with the wall clock, log-only notifications
    /// and the logging enforcement sink.
    pub fn new(store: Arc<dyn LifecycleStore>, rules: Arc<JurisdictionRuleTable>) -> Self {
        Self {
            store,
            rules,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(LogNotifier),
            sink: Arc::new(LoggingEnforcementSink),
            retry: RetryPolicy::default(),
            block_critical: false,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EnforcementSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Make `CRITICAL` classifications block invitation creation.
    pub fn block_critical_invitations(mut self, block: bool) -> Self {
        self.block_critical = block;
        self
    }

    pub fn store(&self) -> &Arc<dyn LifecycleStore> {
        &self.store
    }

    pub fn rules(&self) -> &JurisdictionRuleTable {
        &self.rules
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    // ── Refusals ──────────────────────────────────────────────────

    /// Record a refused attempt and hand back the refusal. A refusal that
    /// cannot be recorded comes back as the store error.
    async fn refuse(
        &self,
        operation: &'static str,
        err: impl Into<ServiceError>,
        actor: &Actor,
        subject: Subject,
    ) -> ServiceError {
        let err = err.into();
        let kind = err.code();
        tracing::warn!(operation, actor = %actor.label(), kind, "operation refused: {err}");
        let entry = subject.file(NewAuditEntry::refused(
            operation,
            kind,
            &err,
            actor.clone(),
            self.clock.now(),
        ));
        match self.store.append(entry).await {
            Ok(_) => err,
            Err(e) => {
                tracing::error!(operation, kind, "failed to record refused attempt: {e}");
                ServiceError::from(e)
            }
        }
    }

    /// Pass an authorization check through, recording it if it failed.
    async fn permit<T>(
        &self,
        operation: &'static str,
        check: ServiceResult<T>,
        actor: &Actor,
        subject: Subject,
    ) -> ServiceResult<T> {
        match check {
            Err(err @ ServiceError::Forbidden(_)) => Err(self.refuse(operation, err, actor, subject).await),
            other => other,
        }
    }

    /// Turn a store result into a service result, recording domain refusals.
    async fn settle<T>(
        &self,
        operation: &'static str,
        result: Result<T, StoreError>,
        actor: &Actor,
        subject: Subject,
    ) -> ServiceResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(StoreError::Rejected(e)) => Err(self.refuse(operation, e, actor, subject).await),
            Err(e) => {
                tracing::error!(operation, "store failure: {e}");
                Err(ServiceError::Store(e))
            }
        }
    }

    // ── Properties ────────────────────────────────────────────────

    pub async fn register_property(
        &self,
        actor: &Actor,
        name: String,
        region_code: RegionCode,
        owner_email: Option<String>,
        owner_occupied: bool,
    ) -> ServiceResult<Property> {
        const OP: &str = "register_property";
        let owner_id = self
            .permit(OP, require_user(actor, ActorRole::Owner), actor, Subject::default())
            .await?;
        let now = self.clock.now();

        if self.rules.get(&region_code).is_none() {
            let err = LifecycleError::precondition(format!("no jurisdiction rule for region {region_code}"));
            return Err(self.refuse(OP, err, actor, Subject::default()).await);
        }
        let draft = NewProperty {
            owner_id,
            owner_email: owner_email.or_else(|| actor.email.clone()),
            name,
            region_code,
            owner_occupied,
        };
        let property = match Property::create(draft, now) {
            Ok(p) => p,
            Err(e) => return Err(self.refuse(OP, e, actor, Subject::default()).await),
        };

        let audit = NewAuditEntry::new(
            AuditCategory::StatusChange,
            "Property registered",
            format!(
                "{} registered property {} ({}) in {}.",
                actor.label(),
                property.id,
                property.name,
                property.region_code
            ),
            actor.clone(),
            now,
        )
        .with_property(property.id);
        let result = self.store.insert_property(&property, audit).await;
        self.settle(OP, result, actor, Subject::property(property.id)).await?;

        tracing::info!(property_id = %property.id, region = %property.region_code, "property registered");
        Ok(property)
    }

    /// A property the caller owns. Read path: not recorded.
    async fn owned_property(&self, actor: &Actor, id: PropertyId) -> ServiceResult<Property> {
        let property = self
            .store
            .property(id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("property", id))?;
        authorize_owner(actor, property.owner_id)?;
        Ok(property)
    }

    pub async fn list_properties(&self, actor: &Actor) -> ServiceResult<Vec<Property>> {
        let owner = match actor.role {
            ActorRole::System => None,
            ActorRole::Owner => Some(require_user(actor, ActorRole::Owner)?),
            ActorRole::Guest => return Err(forbidden(actor, "list properties")),
        };
        Ok(self.store.properties(owner).await?)
    }

    pub async fn shield_status(&self, actor: &Actor, id: PropertyId) -> ServiceResult<ShieldStatus> {
        let property = self.owned_property(actor, id).await?;
        self.derive_shield(&property).await
    }

    async fn derive_shield(&self, property: &Property) -> ServiceResult<ShieldStatus> {
        let stays = self
            .store
            .stays(&StayFilter {
                property_id: Some(property.id),
                ..StayFilter::default()
            })
            .await?;
        Ok(ShieldStatus::derive(property, &stays, self.clock.today()))
    }

    /// Owner request to change Shield Mode. Only turning it off can succeed.
    pub async fn set_shield_mode(
        &self,
        actor: &Actor,
        id: PropertyId,
        enabled: bool,
    ) -> ServiceResult<ShieldStatus> {
        const OP: &str = "set_shield_mode";
        let Some(current) = self.store.property(id).await? else {
            let err = LifecycleError::not_found("property", id);
            return Err(self.refuse(OP, err, actor, Subject::property(id)).await);
        };
        self.permit(OP, authorize_owner(actor, current.owner_id), actor, Subject::property(id))
            .await?;

        let now = self.clock.now();
        let by = actor.clone();
        let result = self
            .store
            .transition_property(
                id,
                Box::new(move |p: &mut Property| {
                    let t = p.request_shield_mode(enabled, &by, now)?;
                    Ok(NewAuditEntry::shield_transition(&t))
                }),
            )
            .await;
        let (property, _) = self.settle(OP, result, actor, Subject::property(id)).await?;

        tracing::info!(property_id = %id, actor = %actor.label(), "shield mode turned off");
        self.derive_shield(&property).await
    }

    pub async fn disable_shield_mode(&self, actor: &Actor, id: PropertyId) -> ServiceResult<ShieldStatus> {
        self.set_shield_mode(actor, id, false).await
    }

    // ── Invitations ───────────────────────────────────────────────

    pub async fn create_invitation(
        &self,
        actor: &Actor,
        req: InvitationRequest,
    ) -> ServiceResult<CreatedInvitation> {
        const OP: &str = "create_invitation";
        let subject = Subject::property(req.property_id);
        let owner_id = self
            .permit(OP, require_user(actor, ActorRole::Owner), actor, subject)
            .await?;

        // Someone else's property reads as missing.
        let property = match self.store.property(req.property_id).await? {
            Some(p) if p.owner_id == owner_id => p,
            _ => {
                let err = LifecycleError::not_found("property", req.property_id);
                return Err(self.refuse(OP, err, actor, subject).await);
            }
        };

        let now = self.clock.now();
        let draft = NewInvitation {
            property_id: property.id,
            owner_id,
            guest_name: req.guest_name,
            guest_email: req.guest_email,
            stay_start_date: req.stay_start_date,
            stay_end_date: req.stay_end_date,
            region_code: property.region_code.clone(),
        };
        let invitation = match Invitation::create(draft, now) {
            Ok(i) => i,
            Err(e) => return Err(self.refuse(OP, e, actor, subject).await),
        };

        let classification = match classify_in_region(
            &self.rules,
            &invitation.region_code,
            &StayAttributes::from(&invitation).with_owner_occupied(property.owner_occupied),
        ) {
            Ok(c) => c,
            Err(e) => return Err(self.refuse(OP, classify_refusal(e), actor, subject).await),
        };
        if self.block_critical && !classification.can_proceed {
            let err = LifecycleError::precondition(format!(
                "a {}-day stay exceeds the {}-day limit for {}",
                classification.duration_days, classification.max_safe_stay_days, invitation.region_code
            ));
            return Err(self.refuse(OP, err, actor, subject).await);
        }

        let audit = NewAuditEntry::new(
            AuditCategory::StatusChange,
            "Invitation created",
            format!(
                "{} created invitation {} for property {} ({} to {}); risk {}.",
                actor.label(),
                invitation.code,
                property.id,
                invitation.stay_start_date,
                invitation.stay_end_date,
                classification.risk_level
            ),
            actor.clone(),
            now,
        )
        .with_property(property.id)
        .with_invitation(invitation.id)
        .with_meta(serde_json::json!({
            "code": invitation.code.as_str(),
            "to": InvitationStatus::Pending.as_str(),
            "risk_level": classification.risk_level.as_str(),
            "can_proceed": classification.can_proceed,
        }));
        let result = self.store.insert_invitation(&invitation, audit).await;
        self.settle(OP, result, actor, Subject::invitation(&invitation)).await?;

        if !classification.can_proceed {
            tracing::warn!(
                code = %invitation.code,
                duration_days = classification.duration_days,
                "invitation created with CRITICAL tenancy risk"
            );
        }
        tracing::info!(code = %invitation.code, property_id = %property.id, "invitation created");
        Ok(CreatedInvitation {
            invitation,
            classification,
        })
    }

    /// Look up an invitation, recording a miss as a refused `operation`.
    async fn invitation_for(
        &self,
        operation: &'static str,
        actor: &Actor,
        code: &InvitationCode,
    ) -> ServiceResult<Invitation> {
        match self.store.invitation_by_code(code).await? {
            Some(inv) => Ok(inv),
            None => {
                let err = LifecycleError::not_found("invitation", code);
                Err(self.refuse(operation, err, actor, Subject::default()).await)
            }
        }
    }

    /// Record the guest's completed e-signature for an acceptable invitation.
    pub async fn record_guest_signature(
        &self,
        actor: &Actor,
        code: &InvitationCode,
        signature_id: String,
    ) -> ServiceResult<AuditEntry> {
        const OP: &str = "record_guest_signature";
        let invitation = self.invitation_for(OP, actor, code).await?;
        let subject = Subject::invitation(&invitation);
        self.permit(OP, require_user(actor, ActorRole::Guest), actor, subject)
            .await?;
        let now = self.clock.now();

        let check = match invitation.view_status(now) {
            InvitationView::Pending if signature_id.trim().is_empty() => {
                Err(LifecycleError::precondition("signature id must not be blank"))
            }
            InvitationView::Pending => Ok(()),
            InvitationView::Expired => Err(LifecycleError::Expired {
                code: code.to_string(),
                expired_at: invitation.expires_at(),
            }),
            InvitationView::Accepted | InvitationView::Cancelled => Err(LifecycleError::AlreadyResolved {
                entity: "invitation",
                id: code.to_string(),
                state: invitation.status().as_str().to_uppercase(),
            }),
        };
        if let Err(e) = check {
            return Err(self.refuse(OP, e, actor, subject).await);
        }

        let entry = subject.file(
            NewAuditEntry::new(
                AuditCategory::GuestSignature,
                "Guest signed stay agreement",
                format!(
                    "{} signed the agreement for invitation {} ({} to {}).",
                    actor.label(),
                    code,
                    invitation.stay_start_date,
                    invitation.stay_end_date
                ),
                actor.clone(),
                now,
            )
            .with_meta(serde_json::json!({
                "code": code.as_str(),
                "signature_id": signature_id.trim(),
            })),
        );
        let sealed = self.store.append(entry).await?;
        tracing::info!(code = %code, sequence = sealed.sequence, "guest signature recorded");
        Ok(sealed)
    }

    pub async fn accept_invitation(
        &self,
        actor: &Actor,
        code: &InvitationCode,
        req: AcceptanceRequest,
    ) -> ServiceResult<(Invitation, Stay)> {
        const OP: &str = "accept_invitation";
        let existing = self.invitation_for(OP, actor, code).await?;
        let guest_id = self
            .permit(OP, require_user(actor, ActorRole::Guest), actor, Subject::invitation(&existing))
            .await?;

        let acceptance = Acceptance {
            guest_id,
            guest_name: req.guest_name,
            guest_email: req.guest_email.or_else(|| actor.email.clone()),
            signature_id: req.signature_id,
        };
        let now = self.clock.now();
        let result = self
            .store
            .accept_invitation(code, acceptance, actor.clone(), now)
            .await;
        let (invitation, stay, _) = self.settle(OP, result, actor, Subject::invitation(&existing)).await?;

        tracing::info!(code = %code, stay_id = %stay.id, guest = %actor.label(), "invitation accepted");
        self.notify(NotificationKind::InvitationAccepted, &stay, Audience::Owner).await;
        // A stay accepted on its last day gets its Shield Mode right away.
        self.evaluate(std::slice::from_ref(&stay), now).await;
        Ok((invitation, stay))
    }

    pub async fn cancel_invitation(&self, actor: &Actor, code: &InvitationCode) -> ServiceResult<Invitation> {
        const OP: &str = "cancel_invitation";
        let existing = self.invitation_for(OP, actor, code).await?;
        self.permit(OP, authorize_owner(actor, existing.owner_id), actor, Subject::invitation(&existing))
            .await?;

        let now = self.clock.now();
        let by = actor.clone();
        let result = self
            .store
            .transition_invitation(
                code,
                Box::new(move |inv: &mut Invitation| {
                    let t = inv.cancel(&by, now)?;
                    Ok(NewAuditEntry::invitation_transition(&t, None))
                }),
            )
            .await;
        let (invitation, _) = self.settle(OP, result, actor, Subject::invitation(&existing)).await?;

        tracing::info!(code = %code, "invitation cancelled");
        Ok(invitation)
    }

    /// The caller's invitations, newest first, optionally for one property.
    pub async fn list_invitations(
        &self,
        actor: &Actor,
        property_id: Option<PropertyId>,
    ) -> ServiceResult<Vec<InvitationListing>> {
        let owner_id = match actor.role {
            ActorRole::System => None,
            ActorRole::Owner => Some(require_user(actor, ActorRole::Owner)?),
            ActorRole::Guest => return Err(forbidden(actor, "list invitations")),
        };
        let now = self.clock.now();
        let invitations = self
            .store
            .invitations(&InvitationFilter {
                owner_id,
                property_id,
            })
            .await?;
        Ok(invitations
            .into_iter()
            .map(|invitation| InvitationListing {
                status: invitation.view_status(now),
                expires_at: invitation.expires_at(),
                invitation,
            })
            .collect())
    }

    // ── Stays ─────────────────────────────────────────────────────

    /// Create an open stay directly, without an invitation.
    pub async fn create_stay(&self, actor: &Actor, req: StayRequest) -> ServiceResult<Stay> {
        const OP: &str = "create_stay";
        let subject = Subject::property(req.property_id);
        let Some(property) = self.store.property(req.property_id).await? else {
            let err = LifecycleError::not_found("property", req.property_id);
            return Err(self.refuse(OP, err, actor, subject).await);
        };
        self.permit(OP, authorize_owner(actor, property.owner_id), actor, subject)
            .await?;

        let now = self.clock.now();
        let draft = NewStay {
            property_id: property.id,
            owner_id: property.owner_id,
            guest_id: req.guest_id,
            guest_name: req.guest_name,
            guest_email: req.guest_email,
            invitation_id: None,
            stay_start_date: req.stay_start_date,
            stay_end_date: req.stay_end_date,
            region_code: property.region_code,
            dead_mans_switch_enabled: req.dead_mans_switch_enabled,
        };
        let stay = match Stay::create(draft, now) {
            Ok(s) => s,
            Err(e) => return Err(self.refuse(OP, e, actor, subject).await),
        };

        let audit = NewAuditEntry::new(
            AuditCategory::StatusChange,
            "Stay created",
            format!(
                "{} created stay {} for property {} ({} to {}).",
                actor.label(),
                stay.id,
                stay.property_id,
                stay.stay_start_date,
                stay.stay_end_date
            ),
            actor.clone(),
            now,
        )
        .with_property(stay.property_id)
        .with_stay(stay.id)
        .with_meta(serde_json::json!({ "to": stay.status().name() }));
        let result = self.store.insert_stay(&stay, audit).await;
        self.settle(OP, result, actor, Subject::stay(&stay)).await?;

        tracing::info!(stay_id = %stay.id, property_id = %stay.property_id, "stay created");
        self.evaluate(std::slice::from_ref(&stay), now).await;
        Ok(stay)
    }

    async fn transition_stay<F>(
        &self,
        operation: &'static str,
        actor: &Actor,
        id: StayId,
        party: Party,
        apply: F,
    ) -> ServiceResult<Stay>
    where
        F: FnOnce(&mut Stay, &Actor, Timestamp) -> Result<StayTransition, LifecycleError>
            + Send
            + 'static,
    {
        let Some(current) = self.store.stay(id).await? else {
            let err = LifecycleError::not_found("stay", id);
            let subject = Subject {
                stay_id: Some(id),
                ..Subject::default()
            };
            return Err(self.refuse(operation, err, actor, subject).await);
        };
        self.permit(operation, party.authorize(actor, &current), actor, Subject::stay(&current))
            .await?;

        let now = self.clock.now();
        let by = actor.clone();
        let result = self
            .store
            .transition_stay(
                id,
                Box::new(move |stay: &mut Stay| {
                    let t = apply(stay, &by, now)?;
                    Ok(NewAuditEntry::stay_transition(&t))
                }),
            )
            .await;
        let (stay, entry) = self.settle(operation, result, actor, Subject::stay(&current)).await?;

        tracing::info!(
            stay_id = %id,
            operation,
            state = %stay.status(),
            sequence = entry.sequence,
            "stay transition recorded"
        );
        Ok(stay)
    }

    pub async fn end_stay(&self, actor: &Actor, id: StayId) -> ServiceResult<Stay> {
        let stay = self.transition_stay("end_stay", actor, id, Party::Guest, Stay::end).await?;
        self.notify(NotificationKind::StayEnded, &stay, Audience::Owner).await;
        Ok(stay)
    }

    /// Guest confirms leaving a revoked stay.
    pub async fn vacate_stay(&self, actor: &Actor, id: StayId) -> ServiceResult<Stay> {
        let stay = self.transition_stay("vacate_stay", actor, id, Party::Guest, Stay::vacate).await?;
        self.notify(NotificationKind::StayEnded, &stay, Audience::Owner).await;
        Ok(stay)
    }

    pub async fn cancel_stay(&self, actor: &Actor, id: StayId) -> ServiceResult<Stay> {
        self.transition_stay("cancel_stay", actor, id, Party::Guest, Stay::cancel).await
    }

    /// Owner kill switch: the guest has 12 hours to vacate.
    pub async fn revoke_stay(&self, actor: &Actor, id: StayId) -> ServiceResult<Stay> {
        let stay = self.transition_stay("revoke_stay", actor, id, Party::Owner, Stay::revoke).await?;
        self.notify(NotificationKind::StayRevoked, &stay, Audience::Guest).await;
        Ok(stay)
    }

    pub async fn release_usat_token(&self, actor: &Actor, id: StayId) -> ServiceResult<Stay> {
        self.transition_stay("release_usat_token", actor, id, Party::Owner, Stay::release_usat_token)
            .await
    }

    pub async fn get_stay(&self, actor: &Actor, id: StayId) -> ServiceResult<StayView> {
        let stay = self
            .store
            .stay(id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("stay", id))?;
        if Party::Owner.authorize(actor, &stay).is_err() {
            Party::Guest.authorize(actor, &stay)?;
        }
        let occupied = self.owner_occupancy(std::slice::from_ref(&stay)).await?;
        let owner_occupied = occupied.get(&stay.property_id).copied().unwrap_or(false);
        Ok(StayView::new(stay, owner_occupied, self.clock.today(), &self.rules))
    }

    /// Stays visible to the caller: an owner's stays, a guest's own stays,
    /// or everything for system callers.
    pub async fn list_stays(
        &self,
        actor: &Actor,
        property_id: Option<PropertyId>,
    ) -> ServiceResult<Vec<StayView>> {
        let mut filter = StayFilter {
            property_id,
            ..StayFilter::default()
        };
        match actor.role {
            ActorRole::System => {}
            ActorRole::Owner => filter.owner_id = Some(require_user(actor, ActorRole::Owner)?),
            ActorRole::Guest => filter.guest_id = Some(require_user(actor, ActorRole::Guest)?),
        }
        let today = self.clock.today();
        let stays = self.store.stays(&filter).await?;
        let occupied = self.owner_occupancy(&stays).await?;
        Ok(stays
            .into_iter()
            .map(|s| {
                let owner_occupied = occupied.get(&s.property_id).copied().unwrap_or(false);
                StayView::new(s, owner_occupied, today, &self.rules)
            })
            .collect())
    }

    /// Whether the owner lives at each property the stays belong to.
    async fn owner_occupancy(&self, stays: &[Stay]) -> ServiceResult<HashMap<PropertyId, bool>> {
        let mut occupied = HashMap::new();
        for stay in stays {
            if occupied.contains_key(&stay.property_id) {
                continue;
            }
            let flag = self
                .store
                .property(stay.property_id)
                .await?
                .map_or(false, |p| p.owner_occupied);
            occupied.insert(stay.property_id, flag);
        }
        Ok(occupied)
    }

    // ── Classification & reference data ───────────────────────────

    pub fn classify(&self, region: &RegionCode, attrs: &StayAttributes) -> ServiceResult<Classification> {
        classify_in_region(&self.rules, region, attrs).map_err(|e| match e {
            ClassifyError::UnknownRegion(_) => ServiceError::Lifecycle(classify_refusal(e)),
            other => ServiceError::Invalid(other.to_string()),
        })
    }

    pub fn list_rules(&self) -> Vec<JurisdictionRule> {
        self.rules.iter().cloned().collect()
    }

    // ── Audit ─────────────────────────────────────────────────────

    /// Ledger entries newest first. Owners only see entries filed under
    /// their own properties.
    pub async fn query_audit_log(&self, actor: &Actor, mut query: AuditQuery) -> ServiceResult<Vec<AuditEntry>> {
        match actor.role {
            ActorRole::System => {}
            ActorRole::Owner => {
                let owner_id = require_user(actor, ActorRole::Owner)?;
                let owned = self.store.properties(Some(owner_id)).await?;
                query.scope = Some(owned.iter().map(|p| p.id).collect());
            }
            ActorRole::Guest => return Err(forbidden(actor, "read the audit log")),
        }
        Ok(self.store.query(&query).await?)
    }

    pub async fn verify_audit_chain(&self, actor: &Actor) -> ServiceResult<ChainVerification> {
        if actor.role == ActorRole::Guest {
            return Err(forbidden(actor, "verify the audit log"));
        }
        let verification = self.store.verify_chain().await?;
        if !verification.chain_valid {
            tracing::error!(
                broken_links = verification.broken_links,
                first_broken_sequence = ?verification.first_broken_sequence,
                "audit hash chain verification failed"
            );
        }
        Ok(verification)
    }

    // ── Enforcement ───────────────────────────────────────────────

    /// One Dead Man's Switch pass over every open stay as of `as_of`.
    ///
    /// Safe to run repeatedly and concurrently: each `(stay, threshold)`
    /// fires at most once, and a stay resolved after the scan is skipped.
    pub async fn run_enforcement(&self, as_of: Timestamp) -> ServiceResult<EnforcementReport> {
        let open = self.store.stays(&StayFilter::open()).await?;
        let report = self.evaluate(&open, as_of).await;
        tracing::info!(
            as_of = %as_of,
            stays_scanned = report.stays_scanned,
            fired = report.fired.len(),
            notifications_failed = report.notifications_failed,
            errors = report.errors,
            "enforcement pass complete"
        );
        Ok(report)
    }

    async fn evaluate(&self, stays: &[Stay], as_of: Timestamp) -> EnforcementReport {
        let mut report = EnforcementReport::new(as_of);
        let mut properties: HashMap<PropertyId, Property> = HashMap::new();

        for stay in stays.iter().filter(|s| s.is_open()) {
            report.stays_scanned += 1;
            if !properties.contains_key(&stay.property_id) {
                match self.store.property(stay.property_id).await {
                    Ok(Some(p)) => {
                        properties.insert(p.id, p);
                    }
                    Ok(None) => {
                        tracing::error!(stay_id = %stay.id, property_id = %stay.property_id, "stay references a missing property");
                        report.errors += 1;
                        continue;
                    }
                    Err(e) => {
                        tracing::error!(stay_id = %stay.id, "failed to load property: {e}");
                        report.errors += 1;
                        continue;
                    }
                }
            }
            let shield_on = properties
                .get(&stay.property_id)
                .map_or(false, |p| p.shield_mode_enabled);

            let mut single = EnforcementReport::new(as_of);
            for threshold in due_thresholds(stay, shield_on, as_of) {
                let audit = threshold.audit_entry(stay, as_of);
                let entry = match self.store.fire_threshold(stay.id, threshold, audit, as_of).await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::error!(stay_id = %stay.id, %threshold, "failed to record threshold: {e}");
                        single.errors += 1;
                        continue;
                    }
                };
                tracing::info!(
                    stay_id = %stay.id,
                    property_id = %stay.property_id,
                    %threshold,
                    sequence = entry.sequence,
                    "enforcement threshold fired"
                );

                let owner_email = properties.get_mut(&stay.property_id).and_then(|p| {
                    if threshold.property_effect().is_some() {
                        p.shield_mode_enabled = true;
                    }
                    p.owner_email.clone()
                });
                if threshold == EnforcementThreshold::PostEndEnforcement {
                    let event = EnforcementEvent::UtilityLock {
                        property_id: stay.property_id,
                        stay_id: stay.id,
                        at: as_of,
                    };
                    if let Err(e) = self.sink.emit(&event).await {
                        tracing::error!(stay_id = %stay.id, "failed to emit utility lock event: {e}");
                    }
                }

                let audience = match threshold {
                    EnforcementThreshold::LastDayShield => Audience::Owner,
                    _ => Audience::Both,
                };
                let (sent, failed) = self
                    .deliver(threshold.notification_kind(), stay, owner_email, audience)
                    .await;
                single.notifications_sent += sent;
                single.notifications_failed += failed;
                single.fired.push(FiredThreshold {
                    stay_id: stay.id,
                    property_id: stay.property_id,
                    threshold,
                    sequence: entry.sequence,
                });
            }
            report.absorb(single);
        }
        report
    }

    // ── Notifications ─────────────────────────────────────────────

    async fn notify(&self, kind: NotificationKind, stay: &Stay, audience: Audience) {
        let owner_email = if audience.includes(ActorRole::Owner) {
            match self.store.property(stay.property_id).await {
                Ok(p) => p.and_then(|p| p.owner_email),
                Err(e) => {
                    tracing::warn!(property_id = %stay.property_id, "owner email lookup failed: {e}");
                    None
                }
            }
        } else {
            None
        };
        self.deliver(kind, stay, owner_email, audience).await;
    }

    /// Send `kind` for `stay` to `audience`. Returns (delivered, dropped).
    async fn deliver(
        &self,
        kind: NotificationKind,
        stay: &Stay,
        owner_email: Option<String>,
        audience: Audience,
    ) -> (usize, usize) {
        let mut delivered = 0;
        let mut dropped = 0;
        for n in Notification::for_stay(kind, stay, owner_email)
            .into_iter()
            .filter(|n| audience.includes(n.recipient_role))
        {
            if self.retry.send_with_retry(self.notifier.as_ref(), &n).await {
                delivered += 1;
            } else {
                dropped += 1;
            }
        }
        (delivered, dropped)
    }
}
