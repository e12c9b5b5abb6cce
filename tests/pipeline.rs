//! End-to-end scenarios: raw product in, subscriber frames out.

use chrono::{TimeZone, Utc};
use stormwire::hub::Frame;
use stormwire::product::Product;
use stormwire::reference::ReferenceTable;
use stormwire::store::{AlertStore, RemoveReason, StoreEvent, UpsertOutcome};

fn reference_table() -> ReferenceTable {
    ReferenceTable::load("data/ugc_zones.json").expect("bundled reference table")
}

fn store() -> AlertStore {
    AlertStore::new(std::time::Duration::from_secs(60), 256)
}

const SVR_NEW: &str = "\
WUUS53 KCLE 201815
SVRCLE
OHC085-201900-
/O.NEW.KCLE.SV.W.0042.251220T1815Z-251220T1900Z/

Severe Thunderstorm Warning for...
Lake County in northeast Ohio...

* Until 700 PM EST.

* At 615 PM EST, a severe thunderstorm was located near Mentor,
  moving east at 40 mph.

HAIL...1.00 IN
WIND...70 MPH

LAT...LON 4119 8185 4121 8176 4112 8170 4111 8184

$$
";

const SVR_CAN: &str = "\
WUUS53 KCLE 201840
SVRCLE
OHC085-201900-
/O.CAN.KCLE.SV.W.0042.000000T0000Z-251220T1900Z/

The severe thunderstorm warning for Lake County has been cancelled.

$$
";

/// S1: a pushed severe thunderstorm warning reaches subscribers as one
/// `new` frame with the threat fields extracted.
#[test]
fn push_severe_thunderstorm_warning() {
    let table = reference_table();
    let store = store();
    let mut subscription = store.subscribe();

    let received = Utc.with_ymd_and_hms(2025, 12, 20, 18, 16, 0).unwrap();
    let product = Product::parse_with(SVR_NEW, received, Some(&table)).unwrap();
    assert_eq!(product.alerts.len(), 1);

    for alert in product.alerts {
        assert_eq!(store.upsert(alert), UpsertOutcome::Added);
    }

    let event = subscription.events.try_recv().unwrap();
    let StoreEvent::Added(alert) = &event else {
        panic!("expected Added, got {event:?}");
    };
    assert_eq!(alert.product_id, "KCLE-SV-W-0042-202512201815");
    assert_eq!(alert.event_name, "Severe Thunderstorm Warning");
    assert_eq!(alert.threat.max_wind_gust_mph, Some(70));
    assert_eq!(alert.threat.max_hail_size_inches, Some(1.0));
    assert_eq!(alert.display_locations, "Lake County, OH");

    let frame = Frame::for_event(&event);
    let value = serde_json::to_value(&frame).unwrap();
    assert_eq!(value["type"], "new");
    assert_eq!(
        value["data"]["alert"]["product_id"],
        "KCLE-SV-W-0042-202512201815"
    );
}

/// S2: a follow-up cancellation removes the original, stores nothing, and
/// subscribers see one `remove` frame with the original product id.
#[test]
fn follow_up_cancellation() {
    let table = reference_table();
    let store = store();
    let received = Utc.with_ymd_and_hms(2025, 12, 20, 18, 16, 0).unwrap();

    let product = Product::parse_with(SVR_NEW, received, Some(&table)).unwrap();
    for alert in product.alerts {
        store.upsert(alert);
    }

    let mut subscription = store.subscribe();
    assert_eq!(subscription.snapshot.len(), 1);

    let received = Utc.with_ymd_and_hms(2025, 12, 20, 18, 41, 0).unwrap();
    let cancellation = Product::parse_with(SVR_CAN, received, Some(&table)).unwrap();
    for alert in cancellation.alerts {
        assert_eq!(store.upsert(alert), UpsertOutcome::Superseded);
    }

    assert_eq!(store.stats().total, 0);

    let event = subscription.events.try_recv().unwrap();
    match &event {
        StoreEvent::Removed { alert, reason } => {
            assert_eq!(alert.product_id, "KCLE-SV-W-0042-202512201815");
            assert_eq!(*reason, RemoveReason::Cancelled);
        }
        other => panic!("expected Removed, got {other:?}"),
    }
    // No further frames: the cancellation product itself is not stored
    assert!(subscription.events.try_recv().is_err());

    let frame = Frame::for_event(&event);
    let value = serde_json::to_value(&frame).unwrap();
    assert_eq!(value["type"], "remove");
    assert_eq!(value["data"]["reason"], "cancelled");
}

/// S5: reference-table rendering of affected areas.
#[test]
fn reference_table_rendering() {
    let table = reference_table();
    let raw = SVR_NEW.replace("OHC085-201900-", "OHC085-093-201900-");
    let received = Utc.with_ymd_and_hms(2025, 12, 20, 18, 16, 0).unwrap();
    let product = Product::parse_with(&raw, received, Some(&table)).unwrap();
    assert_eq!(
        product.alerts[0].display_locations,
        "Lake County, OH; Lorain County, OH"
    );
}

/// The bulk snapshot and the event stream partition history exactly: an
/// alert is in one or the other, never both, never neither.
#[test]
fn bulk_and_stream_partition_history() {
    let table = reference_table();
    let store = store();
    let received = Utc.with_ymd_and_hms(2025, 12, 20, 18, 16, 0).unwrap();

    // Before subscribing
    let product = Product::parse_with(SVR_NEW, received, Some(&table)).unwrap();
    for alert in product.alerts {
        store.upsert(alert);
    }

    let mut subscription = store.subscribe();
    assert_eq!(subscription.snapshot.len(), 1);

    // After subscribing
    let raw = SVR_NEW.replace("SV.W.0042", "SV.W.0043");
    let product = Product::parse_with(&raw, received, Some(&table)).unwrap();
    for alert in product.alerts {
        store.upsert(alert);
    }

    let mut streamed = Vec::new();
    while let Ok(event) = subscription.events.try_recv() {
        streamed.push(event);
    }
    assert_eq!(streamed.len(), 1);
    match &streamed[0] {
        StoreEvent::Added(alert) => {
            assert_eq!(alert.vtec.as_ref().unwrap().event_number, 43)
        }
        other => panic!("expected Added, got {other:?}"),
    }
}

/// S4: a burst overwhelms a stalled subscriber's bounded queue; it is
/// dropped while a draining subscriber sees every frame in order.
#[test]
fn slow_subscriber_does_not_stall_the_burst() {
    let table = reference_table();
    let store = store();
    let received = Utc.with_ymd_and_hms(2025, 12, 20, 18, 16, 0).unwrap();

    let stalled = store.subscribe();
    let mut healthy = store.subscribe();
    assert_eq!(store.subscriber_count(), 2);

    let mut seen = Vec::new();
    for n in 1..=1000u16 {
        let raw = SVR_NEW.replace("SV.W.0042", &format!("SV.W.{n:04}"));
        let product = Product::parse_with(&raw, received, Some(&table)).unwrap();
        for alert in product.alerts {
            store.upsert(alert);
        }
        match healthy.events.try_recv().unwrap() {
            StoreEvent::Added(alert) => {
                seen.push(alert.vtec.unwrap().event_number);
            }
            other => panic!("expected Added, got {other:?}"),
        }
    }

    // The stalled subscriber hit its 256-frame bound and was dropped; the
    // healthy one saw all 1,000 new frames in order.
    assert_eq!(store.subscriber_count(), 1);
    assert_eq!(seen, (1..=1000).collect::<Vec<u16>>());
    drop(stalled);
}

/// A multi-state product survives the state filter when any zone matches.
#[test]
fn state_filter_matches_any_zone() {
    let table = reference_table();
    let raw = SVR_NEW.replace("OHC085-201900-", "OHC085-PAC003-201900-");
    let received = Utc.with_ymd_and_hms(2025, 12, 20, 18, 16, 0).unwrap();
    let product = Product::parse_with(&raw, received, Some(&table)).unwrap();
    let alert = &product.alerts[0];

    assert!(alert.touches_states(&["PA".to_string()]));
    assert!(alert.touches_states(&["OH".to_string()]));
    assert!(!alert.touches_states(&["TX".to_string()]));
    assert!(alert.touches_states(&[]));
}
