//! Dead Man's Switch passes: once-only thresholds, property effects, the
//! utility lock signal and notification failures.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use stayguard_agentic::{
    AuditCategory, EnforcementEvent, EnforcementSink, EnforcementThreshold, Notification,
    NotificationKind, Notifier, NotifyError,
};
use stayguard_api::store::LifecycleStore;

use common::{at, Harness};

fn fired(report: &stayguard_api::service::EnforcementReport) -> Vec<EnforcementThreshold> {
    let mut thresholds: Vec<_> = report.fired.iter().map(|f| f.threshold).collect();
    thresholds.sort();
    thresholds
}

#[derive(Default, Clone)]
struct RecordingSink {
    events: Arc<Mutex<Vec<EnforcementEvent>>>,
}

#[async_trait]
impl EnforcementSink for RecordingSink {
    async fn emit(&self, event: &EnforcementEvent) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct Unreachable;

#[async_trait]
impl Notifier for Unreachable {
    async fn send(&self, _n: &Notification) -> Result<(), NotifyError> {
        Err(NotifyError::Setup("mail relay unreachable".into()))
    }
}

#[tokio::test]
async fn renewal_reminder_fires_once_across_runs() {
    let h = Harness::new("2026-03-01T08:00:00Z");
    let stay = h.stay("2026-03-03", "2026-03-08").await;

    h.clock.set(at("2026-03-06T09:00:00Z"));
    let morning = h.service.run_enforcement(h.service.now()).await.unwrap();
    assert_eq!(fired(&morning), vec![EnforcementThreshold::RenewalReminder]);
    assert_eq!(morning.fired[0].stay_id, stay.id);

    h.clock.set(at("2026-03-06T15:00:00Z"));
    let afternoon = h.service.run_enforcement(h.service.now()).await.unwrap();
    assert!(afternoon.fired.is_empty());
    assert_eq!(afternoon.stays_scanned, 1);

    let reminders: Vec<_> = h
        .entries(AuditCategory::DeadMansSwitch)
        .await
        .into_iter()
        .filter(|e| e.meta.as_ref().and_then(|m| m["threshold"].as_str()) == Some("renewal_reminder"))
        .collect();
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].stay_id, Some(stay.id));
    assert_eq!(h.notifier.count(NotificationKind::RenewalReminder), 2);
}

#[tokio::test]
async fn last_day_turns_shield_mode_on() {
    let h = Harness::new("2026-03-01T08:00:00Z");
    let stay = h.stay("2026-03-03", "2026-03-08").await;

    h.clock.set(at("2026-03-08T07:00:00Z"));
    let report = h.service.run_enforcement(h.service.now()).await.unwrap();
    assert_eq!(
        fired(&report),
        vec![EnforcementThreshold::FinalDay, EnforcementThreshold::LastDayShield]
    );

    let property = h.store.property(stay.property_id).await.unwrap().unwrap();
    assert!(property.shield_mode_enabled);
    assert!(property.utility_lock_engaged_at.is_none());
    assert_eq!(h.entries(AuditCategory::ShieldMode).await.len(), 1);
    assert_eq!(h.notifier.count(NotificationKind::ShieldModeActivated), 1);
}

#[tokio::test]
async fn overstay_past_grace_engages_the_utility_lock() {
    let sink = RecordingSink::default();
    let h = Harness::new("2026-03-01T08:00:00Z").configure({
        let sink = sink.clone();
        move |svc| svc.with_sink(Arc::new(sink))
    });
    let stay = h.stay("2026-03-03", "2026-03-08").await;

    // Before the 48h grace has run out only the overstay is recorded.
    h.clock.set(at("2026-03-09T12:00:00Z"));
    let early = h.service.run_enforcement(h.service.now()).await.unwrap();
    assert_eq!(fired(&early), vec![EnforcementThreshold::OverstayDetected]);
    assert!(sink.events.lock().unwrap().is_empty());

    h.clock.set(at("2026-03-10T00:00:01Z"));
    let late = h.service.run_enforcement(h.service.now()).await.unwrap();
    assert_eq!(fired(&late), vec![EnforcementThreshold::PostEndEnforcement]);

    let property = h.store.property(stay.property_id).await.unwrap().unwrap();
    assert!(property.shield_mode_enabled);
    assert_eq!(property.utility_lock_engaged_at, Some(at("2026-03-10T00:00:01Z")));

    let events = sink.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![EnforcementEvent::UtilityLock {
            property_id: stay.property_id,
            stay_id: stay.id,
            at: at("2026-03-10T00:00:01Z"),
        }]
    );

    // The stay itself stays open; nothing closes it automatically.
    let stored = h.store.stay(stay.id).await.unwrap().unwrap();
    assert!(stored.is_open());
    let again = h.service.run_enforcement(at("2026-03-20T00:00:00Z")).await.unwrap();
    assert!(again.fired.is_empty());
}

#[tokio::test]
async fn switch_disabled_stays_only_get_shield_and_overstay() {
    let h = Harness::new("2026-03-01T08:00:00Z");
    let property = h.property("CA").await;
    let stay = h
        .service
        .create_stay(
            &h.owner,
            stayguard_api::service::StayRequest {
                property_id: property.id,
                guest_id: h.guest_id(),
                guest_name: None,
                guest_email: None,
                stay_start_date: common::date("2026-03-03"),
                stay_end_date: common::date("2026-03-05"),
                dead_mans_switch_enabled: false,
            },
        )
        .await
        .unwrap();

    let on_last_day = h.service.run_enforcement(at("2026-03-05T10:00:00Z")).await.unwrap();
    assert_eq!(fired(&on_last_day), vec![EnforcementThreshold::LastDayShield]);

    let long_after = h.service.run_enforcement(at("2026-03-12T10:00:00Z")).await.unwrap();
    assert_eq!(fired(&long_after), vec![EnforcementThreshold::OverstayDetected]);
    assert_eq!(
        h.store.fired_thresholds(stay.id).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn notification_failures_do_not_block_thresholds() {
    let h = Harness::new("2026-03-01T08:00:00Z").configure(|svc| svc.with_notifier(Arc::new(Unreachable)));
    let stay = h.stay("2026-03-03", "2026-03-08").await;

    let report = h.service.run_enforcement(at("2026-03-08T09:00:00Z")).await.unwrap();
    assert_eq!(
        fired(&report),
        vec![EnforcementThreshold::FinalDay, EnforcementThreshold::LastDayShield]
    );
    assert_eq!(report.notifications_sent, 0);
    assert!(report.notifications_failed > 0);
    assert_eq!(report.errors, 0);

    // Marks were written, so a rerun does not retry the thresholds.
    let rerun = h.service.run_enforcement(at("2026-03-08T10:00:00Z")).await.unwrap();
    assert!(rerun.fired.is_empty());
    assert_eq!(h.store.fired_thresholds(stay.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn resolved_stays_are_not_scanned() {
    let h = Harness::new("2026-03-04T08:00:00Z");
    let stay = h.stay("2026-03-03", "2026-03-08").await;
    h.service.end_stay(&h.guest, stay.id).await.unwrap();

    let report = h.service.run_enforcement(at("2026-03-12T00:00:00Z")).await.unwrap();
    assert_eq!(report.stays_scanned, 0);
    assert!(report.fired.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_passes_fire_each_threshold_once() {
    let h = Arc::new(Harness::new("2026-03-01T08:00:00Z"));
    let stay = h.stay("2026-03-03", "2026-03-08").await;
    let as_of = at("2026-03-08T09:00:00Z");

    let mut handles = Vec::new();
    for _ in 0..4 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move { h.service.run_enforcement(as_of).await }));
    }
    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap().unwrap().fired.len();
    }
    assert_eq!(total, 2);
    assert_eq!(h.store.fired_thresholds(stay.id).await.unwrap().len(), 2);
}
