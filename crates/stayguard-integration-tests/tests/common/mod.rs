//! Shared fixtures: a lifecycle service over the in-memory store with a
//! fixed clock and a recording notifier.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;

use stayguard_agentic::{AuditCategory, AuditEntry, AuditLedger, AuditQuery, RecordingNotifier, RetryPolicy};
use stayguard_api::service::{LifecycleService, StayRequest};
use stayguard_api::store::MemoryStore;
use stayguard_core::{Actor, FixedClock, JurisdictionRuleTable, RegionCode, Timestamp, UserId};
use stayguard_state::{Property, Stay};

pub struct Harness {
    pub service: LifecycleService,
    pub store: MemoryStore,
    pub clock: FixedClock,
    pub notifier: RecordingNotifier,
    pub owner: Actor,
    pub guest: Actor,
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn at(s: &str) -> Timestamp {
    Timestamp::parse(s).unwrap()
}

impl Harness {
    pub fn new(now: &str) -> Self {
        let store = MemoryStore::new();
        let clock = FixedClock::new(at(now));
        let notifier = RecordingNotifier::new();
        let service = LifecycleService::new(
            Arc::new(store.clone()),
            Arc::new(JurisdictionRuleTable::seeded()),
        )
        .with_clock(Arc::new(clock.clone()))
        .with_notifier(Arc::new(notifier.clone()))
        .with_retry(RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        });
        Self {
            service,
            store,
            clock,
            notifier,
            owner: Actor::owner(UserId::new()).with_email("owner@example.com"),
            guest: Actor::guest(UserId::new()).with_email("guest@example.com"),
        }
    }

    /// Swap in collaborators, e.g. a failing notifier or a recording sink.
    pub fn configure(mut self, f: impl FnOnce(LifecycleService) -> LifecycleService) -> Self {
        self.service = f(self.service);
        self
    }

    pub fn guest_id(&self) -> UserId {
        self.guest.user_id.unwrap()
    }

    pub async fn property(&self, region: &str) -> Property {
        self.service
            .register_property(&self.owner, "Maple St".into(), RegionCode::new(region).unwrap(), None, false)
            .await
            .unwrap()
    }

    /// An open stay for `self.guest` at a fresh NYC property.
    pub async fn stay(&self, start: &str, end: &str) -> Stay {
        let property = self.property("NYC").await;
        self.stay_at(&property, start, end).await
    }

    pub async fn stay_at(&self, property: &Property, start: &str, end: &str) -> Stay {
        self.service
            .create_stay(
                &self.owner,
                StayRequest {
                    property_id: property.id,
                    guest_id: self.guest_id(),
                    guest_name: Some("Ada".into()),
                    guest_email: Some("guest@example.com".into()),
                    stay_start_date: date(start),
                    stay_end_date: date(end),
                    dead_mans_switch_enabled: true,
                },
            )
            .await
            .unwrap()
    }

    pub async fn entries(&self, category: AuditCategory) -> Vec<AuditEntry> {
        self.store
            .query(&AuditQuery {
                category: Some(category),
                ..AuditQuery::default()
            })
            .await
            .unwrap()
    }
}
