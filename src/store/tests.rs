use super::*;
use crate::alert::AlertSource;
use crate::event::{self, Phenomenon, Significance};
use crate::threat::Threat;
use crate::vtec::Vtec;
use chrono::TimeZone;
use std::collections::BTreeSet;

fn store() -> AlertStore {
    AlertStore::new(std::time::Duration::from_secs(60), 256)
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 12, 20, 18, 15, 0).unwrap()
}

/// A minimal alert for a given VTEC line.
fn alert_for(vtec: &str, expires_in_minutes: i64) -> Alert {
    let vtec: Vtec = vtec.parse().unwrap();
    let issued = base_time();
    let expiration = issued + Duration::minutes(expires_in_minutes);
    let phenomenon = vtec.phenomenon.clone();
    let significance = vtec.significance;
    Alert {
        product_id: ProductId::from_vtec(&vtec, issued),
        source: AlertSource::Push,
        vtec: Some(vtec),
        event_name: event::event_name(&phenomenon, significance),
        priority: event::priority(&phenomenon, significance),
        phenomenon,
        significance,
        headline: None,
        description: Some("description".into()),
        instruction: None,
        issued_time: issued,
        effective_time: Some(issued),
        expiration_time: expiration,
        affected_areas: vec!["OHC085".parse().unwrap()],
        display_locations: "Lake County, OH".into(),
        polygon: None,
        issuing_offices: BTreeSet::from(["KCLE".to_string()]),
        threat: Threat::default(),
        status: AlertStatus::Active,
        parsed_at: issued,
        last_updated: issued,
        update_count: 0,
    }
}

fn no_vtec_alert(id: &str, expires_in_minutes: i64) -> Alert {
    let mut alert = alert_for("/O.NEW.KCLE.SV.W.0099.251220T1815Z-251220T1900Z/", expires_in_minutes);
    alert.vtec = None;
    alert.product_id = id.parse().unwrap();
    alert.phenomenon = Phenomenon::SpecialWeatherStatement;
    alert.significance = Significance::Statement;
    alert
}

const SVR_NEW: &str = "/O.NEW.KCLE.SV.W.0042.251220T1815Z-251220T1900Z/";
const SVR_CON: &str = "/O.CON.KCLE.SV.W.0042.251220T1815Z-251220T1930Z/";
const SVR_CAN: &str = "/O.CAN.KCLE.SV.W.0042.000000T0000Z-251220T1900Z/";
const SVR_EXP: &str = "/O.EXP.KCLE.SV.W.0042.000000T0000Z-251220T1900Z/";

#[test]
fn new_then_duplicate_new() {
    let store = store();
    assert_eq!(store.upsert(alert_for(SVR_NEW, 45)), UpsertOutcome::Added);
    assert_eq!(store.upsert(alert_for(SVR_NEW, 45)), UpsertOutcome::Ignored);
    assert_eq!(store.stats().total, 1);
}

#[test]
fn continuation_replaces_and_keeps_issued_time() {
    let store = store();
    store.upsert(alert_for(SVR_NEW, 45));

    let mut follow_up = alert_for(SVR_CON, 75);
    follow_up.issued_time = base_time() + Duration::minutes(30);
    follow_up.product_id = ProductId::from_vtec(
        follow_up.vtec.as_ref().unwrap(),
        follow_up.issued_time,
    );
    follow_up.description = Some("updated description".into());
    let follow_up_id = follow_up.product_id.clone();

    assert_eq!(store.upsert(follow_up), UpsertOutcome::Updated);
    assert_eq!(store.stats().total, 1);

    let stored = store.get(&follow_up_id).unwrap();
    // The original issuance stamp survives the update
    assert_eq!(stored.issued_time, base_time());
    assert_eq!(stored.update_count, 1);
    assert_eq!(stored.status, AlertStatus::Updated);
    assert_eq!(stored.description.as_deref(), Some("updated description"));
}

#[test]
fn continuation_with_no_changes_still_bumps_update_count() {
    let store = store();
    store.upsert(alert_for(SVR_NEW, 45));

    let mut follow_up = alert_for(SVR_CON, 45);
    follow_up.product_id = ProductId::new("KCLE-SV-W-0042-202512201845").unwrap();
    let id = follow_up.product_id.clone();

    assert_eq!(store.upsert(follow_up), UpsertOutcome::Updated);
    let stored = store.get(&id).unwrap();
    assert_eq!(stored.update_count, 1);
    assert_eq!(stored.description.as_deref(), Some("description"));
}

#[test]
fn continuation_for_unknown_event_is_added() {
    let store = store();
    assert_eq!(store.upsert(alert_for(SVR_CON, 45)), UpsertOutcome::Added);
    assert_eq!(store.stats().total, 1);
}

#[test]
fn cancel_removes_and_stores_nothing() {
    let store = store();
    let original = alert_for(SVR_NEW, 45);
    let original_id = original.product_id.clone();
    store.upsert(original);

    let mut subscription = store.subscribe();

    assert_eq!(store.upsert(alert_for(SVR_CAN, 45)), UpsertOutcome::Superseded);
    assert_eq!(store.stats().total, 0);

    match subscription.events.try_recv().unwrap() {
        StoreEvent::Removed { alert, reason } => {
            assert_eq!(alert.product_id, original_id);
            assert_eq!(reason, RemoveReason::Cancelled);
            assert_eq!(alert.status, AlertStatus::Cancelled);
        }
        other => panic!("expected Removed, got {other:?}"),
    }

    // Cancelling a second time references nothing
    assert_eq!(store.upsert(alert_for(SVR_CAN, 45)), UpsertOutcome::Ignored);
}

#[test]
fn exp_removes_even_when_expiration_is_future() {
    let store = store();
    store.upsert(alert_for(SVR_NEW, 45));

    let mut subscription = store.subscribe();
    assert_eq!(store.upsert(alert_for(SVR_EXP, 45)), UpsertOutcome::Superseded);
    assert_eq!(store.stats().total, 0);

    match subscription.events.try_recv().unwrap() {
        StoreEvent::Removed { reason, .. } => assert_eq!(reason, RemoveReason::Expired),
        other => panic!("expected Removed, got {other:?}"),
    }
}

#[test]
fn upgrade_removes_prior_event() {
    let store = store();
    store.upsert(alert_for(SVR_NEW, 45));
    assert_eq!(
        store.upsert(alert_for("/O.UPG.KCLE.SV.W.0042.000000T0000Z-251220T1900Z/", 45)),
        UpsertOutcome::Superseded
    );
    assert_eq!(store.stats().total, 0);
}

#[test]
fn no_vtec_dedup() {
    let store = store();
    assert_eq!(
        store.upsert(no_vtec_alert("KCLE-SPS-202512201830", 90)),
        UpsertOutcome::Added
    );
    // Same content again: ignored
    assert_eq!(
        store.upsert(no_vtec_alert("KCLE-SPS-202512201830", 90)),
        UpsertOutcome::Ignored
    );
    // Changed content under the same id: update in place
    let mut changed = no_vtec_alert("KCLE-SPS-202512201830", 90);
    changed.description = Some("now with more wind".into());
    assert_eq!(store.upsert(changed), UpsertOutcome::Updated);

    let stored = store
        .get(&"KCLE-SPS-202512201830".parse().unwrap())
        .unwrap();
    assert_eq!(stored.update_count, 1);
}

#[test]
fn event_key_uniqueness_is_maintained() {
    let store = store();
    store.upsert(alert_for(SVR_NEW, 45));

    let mut follow_up = alert_for(SVR_CON, 75);
    follow_up.product_id = ProductId::new("KCLE-SV-W-0042-202512201845").unwrap();
    store.upsert(follow_up);

    // One record for the event key; the older product id is gone
    assert_eq!(store.stats().total, 1);
    let original_id = alert_for(SVR_NEW, 45).product_id;
    assert!(store.get(&original_id).is_none());
}

#[test]
fn manual_remove() {
    let store = store();
    let alert = alert_for(SVR_NEW, 45);
    let id = alert.product_id.clone();
    store.upsert(alert);

    let removed = store.remove(&id, RemoveReason::Manual).unwrap();
    assert_eq!(removed.status, AlertStatus::Cancelled);
    assert!(store.remove(&id, RemoveReason::Manual).is_none());
}

#[test]
fn snapshot_is_priority_ordered() {
    let store = store();
    store.upsert(alert_for("/O.NEW.KCLE.WW.Y.0001.251220T1815Z-251221T1900Z/", 600));
    store.upsert(alert_for("/O.NEW.KCLE.TO.W.0002.251220T1815Z-251220T1900Z/", 45));
    store.upsert(alert_for("/O.NEW.KCLE.SV.W.0003.251220T1815Z-251220T1900Z/", 45));

    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot[0].event_name, "Tornado Warning");
    assert_eq!(snapshot[1].event_name, "Severe Thunderstorm Warning");
    assert_eq!(snapshot[2].event_name, "Winter Weather Advisory");
}

#[test]
fn stats_counts() {
    let store = store();
    store.upsert(alert_for("/O.NEW.KCLE.TO.W.0002.251220T1815Z-251220T1900Z/", 45));
    store.upsert(alert_for("/O.NEW.KCLE.SV.W.0003.251220T1815Z-251220T1900Z/", 45));
    let mut pull = alert_for("/O.NEW.KOKX.SV.W.0004.251220T1815Z-251220T1900Z/", 45);
    pull.source = AlertSource::Pull;
    store.upsert(pull);

    let stats = store.stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_phenomenon.get("SV"), Some(&2));
    assert_eq!(stats.by_phenomenon.get("TO"), Some(&1));
    assert_eq!(stats.by_source.get("push"), Some(&2));
    assert_eq!(stats.by_source.get("pull"), Some(&1));
    assert_eq!(stats.total_added, 3);
}

#[test]
fn subscription_partitions_history_exactly() {
    let store = store();
    store.upsert(alert_for("/O.NEW.KCLE.TO.W.0001.251220T1815Z-251220T1900Z/", 45));

    let mut subscription = store.subscribe();
    // The pre-subscription alert is in the snapshot, not the stream
    assert_eq!(subscription.snapshot.len(), 1);
    assert!(subscription.events.try_recv().is_err());

    store.upsert(alert_for("/O.NEW.KCLE.SV.W.0002.251220T1815Z-251220T1900Z/", 45));
    match subscription.events.try_recv().unwrap() {
        StoreEvent::Added(alert) => {
            assert_eq!(alert.event_name, "Severe Thunderstorm Warning")
        }
        other => panic!("expected Added, got {other:?}"),
    }
}

#[test]
fn events_arrive_in_writer_order() {
    let store = store();
    let mut subscription = store.subscribe();

    for n in 1..=20u16 {
        let vtec = format!(
            "/O.NEW.KCLE.SV.W.{n:04}.251220T1815Z-251220T1900Z/"
        );
        store.upsert(alert_for(&vtec, 45));
    }

    for n in 1..=20u16 {
        match subscription.events.try_recv().unwrap() {
            StoreEvent::Added(alert) => {
                assert_eq!(alert.vtec.as_ref().unwrap().event_number, n)
            }
            other => panic!("expected Added, got {other:?}"),
        }
    }
}

#[test]
fn slow_subscriber_is_dropped_without_affecting_others() {
    let store = AlertStore::new(std::time::Duration::from_secs(60), 4);
    let slow = store.subscribe();
    let mut healthy = store.subscribe();
    assert_eq!(store.subscriber_count(), 2);

    // The healthy subscriber drains as events arrive; nobody drains `slow`,
    // so its 4-slot queue overflows and it is dropped.
    let mut received = Vec::new();
    for n in 1..=10u16 {
        let vtec = format!(
            "/O.NEW.KCLE.SV.W.{n:04}.251220T1815Z-251220T1900Z/"
        );
        store.upsert(alert_for(&vtec, 45));
        match healthy.events.try_recv().unwrap() {
            StoreEvent::Added(alert) => {
                received.push(alert.vtec.unwrap().event_number)
            }
            other => panic!("expected Added, got {other:?}"),
        }
    }

    assert_eq!(store.subscriber_count(), 1);
    // The healthy subscriber saw every event, in order
    assert_eq!(received, (1..=10).collect::<Vec<u16>>());
    drop(slow);
}

#[test]
fn unsubscribe_stops_delivery() {
    let store = store();
    let subscription = store.subscribe();
    store.unsubscribe(subscription.id);
    assert_eq!(store.subscriber_count(), 0);
}

#[test]
fn eviction_respects_grace() {
    let store = store();
    let alert = alert_for(SVR_NEW, 45);
    let expiration = alert.expiration_time;
    store.upsert(alert);

    // Before expiration: nothing
    assert_eq!(store.evict_due(expiration - Duration::seconds(1)), 0);
    // After expiration but within grace: still nothing
    assert_eq!(store.evict_due(expiration + Duration::seconds(30)), 0);
    // Past expiration + grace: evicted
    assert_eq!(store.evict_due(expiration + Duration::seconds(61)), 1);
    assert_eq!(store.stats().total, 0);
}

#[test]
fn eviction_skips_stale_heap_entries() {
    let store = store();
    store.upsert(alert_for(SVR_NEW, 45));

    // The continuation extends the expiration; the old heap entry is stale.
    let mut follow_up = alert_for(SVR_CON, 120);
    follow_up.product_id = ProductId::new("KCLE-SV-W-0042-202512201845").unwrap();
    store.upsert(follow_up);

    let first_expiration = base_time() + Duration::minutes(45);
    assert_eq!(store.evict_due(first_expiration + Duration::minutes(2)), 0);
    assert_eq!(store.stats().total, 1);

    let second_expiration = base_time() + Duration::minutes(120);
    assert_eq!(store.evict_due(second_expiration + Duration::minutes(2)), 1);
    assert_eq!(store.stats().total, 0);
}

#[test]
fn next_eviction_due_tracks_earliest_live_entry() {
    let store = store();
    assert_eq!(store.next_eviction_due(), None);

    store.upsert(alert_for("/O.NEW.KCLE.SV.W.0001.251220T1815Z-251220T1900Z/", 45));
    store.upsert(alert_for("/O.NEW.KCLE.TO.W.0002.251220T1815Z-251220T2000Z/", 105));

    let due = store.next_eviction_due().unwrap();
    assert_eq!(due, base_time() + Duration::minutes(45) + Duration::seconds(60));
}

#[test]
fn reconcile_applies_set_difference() {
    let store = store();

    // Push delivered A and B
    let a = alert_for("/O.NEW.KCLE.SV.W.0001.251220T1815Z-251220T1900Z/", 45);
    let a_id = a.product_id.clone();
    let b = alert_for("/O.NEW.KCLE.TO.W.0002.251220T1815Z-251220T2000Z/", 105);
    let b_id = b.product_id.clone();
    store.upsert(a);
    store.upsert(b);

    // The pull cycle reports B and C only
    let b_again = alert_for("/O.NEW.KCLE.TO.W.0002.251220T1815Z-251220T2000Z/", 105);
    let c = alert_for("/O.NEW.KOKX.SV.W.0003.251220T1815Z-251220T1900Z/", 45);
    let c_id = c.product_id.clone();

    // A's expiration has not passed yet: left alone
    let now = base_time() + Duration::minutes(30);
    let summary = store.reconcile(vec![b_again.clone(), c.clone()], now);
    assert_eq!(summary.added, 1);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.removed, 0);
    assert!(store.get(&a_id).is_some());

    // Next cycle, past A's expiration: removed
    let now = base_time() + Duration::minutes(50);
    let summary = store.reconcile(vec![b_again, c], now);
    assert_eq!(summary.removed, 1);
    assert!(store.get(&a_id).is_none());
    assert!(store.get(&b_id).is_some());
    assert!(store.get(&c_id).is_some());
}

#[test]
fn snapshot_persistence_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("alerts.json");

    let store = store();
    store.upsert(alert_for("/O.NEW.KCLE.SV.W.0001.251220T1815Z-251220T1900Z/", 45));
    store.upsert(alert_for("/O.NEW.KCLE.TO.W.0002.251220T1815Z-251220T2000Z/", 105));
    store.save_snapshot(&path).unwrap();

    // Restart 10 simulated seconds later: both alive
    let restarted = AlertStore::new(std::time::Duration::from_secs(60), 256);
    let now = base_time() + Duration::seconds(10);
    assert_eq!(restarted.load_snapshot(&path, now).unwrap(), 2);
    let subscription = restarted.subscribe();
    assert_eq!(subscription.snapshot.len(), 2);

    // Restart after the first has expired: only the second survives
    let restarted = AlertStore::new(std::time::Duration::from_secs(60), 256);
    let now = base_time() + Duration::minutes(50);
    assert_eq!(restarted.load_snapshot(&path, now).unwrap(), 1);
    assert_eq!(
        restarted.snapshot()[0].event_name,
        "Tornado Warning"
    );
}

#[test]
fn missing_snapshot_file_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = store();
    assert_eq!(
        store
            .load_snapshot(dir.path().join("absent.json"), base_time())
            .unwrap(),
        0
    );
}
