//! The authoritative in-memory set of active alerts.
//!
//! The store is the single mutator of the alert set. Every mutation —
//! upserts from either source, explicit removals, eviction — runs under one
//! writer lock, giving all changes a total order. Change events are fanned
//! out to subscribers synchronously on the writer path through bounded
//! per-subscriber queues, so a stalled subscriber can never stall the
//! pipeline: its queue fills and it is dropped instead.
//!
//! Subscribing takes the bulk snapshot and registers the event queue under
//! the same writer lock, so the snapshot and the subsequent stream partition
//! the event history exactly: an event is either reflected in the snapshot
//! or delivered on the stream, never neither, never both.

use crate::alert::{Alert, AlertStatus, ProductId};
use crate::vtec::{EventKey, VtecAction};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[cfg(test)]
mod tests;

/// Why an alert left the active set.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoveReason {
    /// Its expiration time (plus grace) passed
    Expired,
    /// A `CAN` or `UPG` action referenced it
    Cancelled,
    /// An operator removed it
    Manual,
}

/// What an upsert did.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UpsertOutcome {
    /// A new alert entered the active set
    Added,
    /// An existing event was replaced by a newer product
    Updated,
    /// A terminal action removed its referent; nothing was stored
    Superseded,
    /// The product was a duplicate or referenced nothing
    Ignored,
}

/// A change to the active set, in writer order.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// An alert entered the active set
    Added(Alert),
    /// An existing event was replaced; `previous_id` is the product it
    /// replaced
    Updated {
        /// The surviving record
        alert: Alert,
        /// The product id the record replaced
        previous_id: ProductId,
    },
    /// An alert left the active set
    Removed {
        /// The departed record
        alert: Alert,
        /// Why it left
        reason: RemoveReason,
    },
}

/// Counts over the active set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    /// Number of active alerts
    pub total: usize,
    /// Active alerts per phenomenon code
    pub by_phenomenon: BTreeMap<String, usize>,
    /// Active alerts per source
    pub by_source: BTreeMap<String, usize>,
    /// Lifetime count of accepted inserts
    pub total_added: u64,
    /// Lifetime count of accepted updates
    pub total_updated: u64,
    /// Lifetime count of removals
    pub total_removed: u64,
}

/// A live subscription to store changes.
///
/// Created by [`AlertStore::subscribe`]. `snapshot` is the bulk view taken
/// atomically with registration; `events` then delivers every later change
/// in writer order. Dropping the receiver (or falling behind until the
/// bounded queue fills) cancels the subscription.
#[derive(Debug)]
pub struct Subscription {
    /// Subscriber id, for logs and explicit cancellation
    pub id: u64,
    /// Point-in-time consistent copy of the active set
    pub snapshot: Vec<Alert>,
    /// Ordered change events after the snapshot
    pub events: mpsc::Receiver<StoreEvent>,
}

#[derive(Debug)]
struct SubscriberSlot {
    id: u64,
    sender: mpsc::Sender<StoreEvent>,
}

#[derive(Debug, Default)]
struct Inner {
    alerts: HashMap<ProductId, Alert>,
    by_event: HashMap<EventKey, ProductId>,
    expirations: BinaryHeap<Reverse<(DateTime<Utc>, ProductId)>>,
    subscribers: Vec<SubscriberSlot>,
    total_added: u64,
    total_updated: u64,
    total_removed: u64,
}

impl Inner {
    /// Deliver an event to every subscriber, dropping any whose queue is
    /// full or gone.
    fn emit(&mut self, event: StoreEvent) {
        self.subscribers.retain(|slot| {
            match slot.sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    info!(subscriber = slot.id, "dropping slow consumer");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(subscriber = slot.id, "subscriber went away");
                    false
                }
            }
        });
    }

    fn insert(&mut self, alert: Alert) {
        if let Some(key) = alert.event_key() {
            self.by_event.insert(key, alert.product_id.clone());
        }
        self.expirations.push(Reverse((
            alert.expiration_time,
            alert.product_id.clone(),
        )));
        self.alerts.insert(alert.product_id.clone(), alert);
    }

    fn remove(&mut self, product_id: &ProductId, reason: RemoveReason) -> Option<Alert> {
        let mut alert = self.alerts.remove(product_id)?;
        if let Some(key) = alert.event_key() {
            // Only drop the index entry if it still points at us; an update
            // may have repointed it already.
            if self.by_event.get(&key) == Some(product_id) {
                self.by_event.remove(&key);
            }
        }
        alert.status = match reason {
            RemoveReason::Expired => AlertStatus::Expired,
            RemoveReason::Cancelled | RemoveReason::Manual => AlertStatus::Cancelled,
        };
        self.total_removed += 1;
        self.emit(StoreEvent::Removed {
            alert: alert.clone(),
            reason,
        });
        Some(alert)
    }

    /// Fields that make two products the same content, for no-VTEC
    /// deduplication.
    fn same_content(a: &Alert, b: &Alert) -> bool {
        a.expiration_time == b.expiration_time
            && a.headline == b.headline
            && a.description == b.description
            && a.instruction == b.instruction
            && a.affected_areas == b.affected_areas
            && a.polygon == b.polygon
            && a.threat == b.threat
    }
}

/// The shared active-alert set. See the [module docs](self).
#[derive(Debug)]
pub struct AlertStore {
    inner: RwLock<Inner>,
    grace: Duration,
    eviction_wakeup: Notify,
    next_subscriber_id: AtomicU64,
    subscriber_queue_capacity: usize,
}

impl AlertStore {
    /// A store evicting alerts `grace` after their expiration, with
    /// per-subscriber queues of `subscriber_queue_capacity` events.
    pub fn new(grace: std::time::Duration, subscriber_queue_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            grace: Duration::from_std(grace).unwrap_or_else(|_| Duration::seconds(60)),
            eviction_wakeup: Notify::new(),
            next_subscriber_id: AtomicU64::new(1),
            subscriber_queue_capacity,
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().expect("alert store lock poisoned")
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().expect("alert store lock poisoned")
    }

    /// Insert, update, or act on one parsed alert. The VTEC action drives
    /// the behavior; see the variants of [`UpsertOutcome`].
    pub fn upsert(&self, alert: Alert) -> UpsertOutcome {
        let now = Utc::now();
        let mut inner = self.write();

        let action = alert.vtec.as_ref().map(|v| v.action);
        let outcome = match action {
            // Terminal actions remove their referent; the cancellation
            // product itself is not stored.
            Some(VtecAction::Can) | Some(VtecAction::Upg) => {
                self.remove_by_key(&mut inner, &alert, RemoveReason::Cancelled)
            }
            Some(VtecAction::Exp) => {
                self.remove_by_key(&mut inner, &alert, RemoveReason::Expired)
            }
            Some(VtecAction::New) => {
                if inner.alerts.contains_key(&alert.product_id) {
                    UpsertOutcome::Ignored
                } else {
                    // Both sources can announce the same NEW event under
                    // slightly different product ids; the event key keeps
                    // the set to one record per event.
                    self.update_by_key(&mut inner, alert, now)
                }
            }
            Some(VtecAction::Con)
            | Some(VtecAction::Ext)
            | Some(VtecAction::Exa)
            | Some(VtecAction::Exb)
            | Some(VtecAction::Cor) => self.update_by_key(&mut inner, alert, now),
            Some(VtecAction::Rou) | None => self.upsert_no_vtec(&mut inner, alert, now),
        };

        if matches!(outcome, UpsertOutcome::Added | UpsertOutcome::Updated) {
            // The heap top may have moved; let the eviction loop re-arm.
            self.eviction_wakeup.notify_one();
        }
        outcome
    }

    fn remove_by_key(
        &self,
        inner: &mut Inner,
        alert: &Alert,
        reason: RemoveReason,
    ) -> UpsertOutcome {
        let Some(key) = alert.event_key() else {
            return UpsertOutcome::Ignored;
        };
        match inner.by_event.get(&key).cloned() {
            Some(existing_id) => {
                inner.remove(&existing_id, reason);
                UpsertOutcome::Superseded
            }
            None => UpsertOutcome::Ignored,
        }
    }

    fn update_by_key(&self, inner: &mut Inner, alert: Alert, now: DateTime<Utc>) -> UpsertOutcome {
        let Some(key) = alert.event_key() else {
            return self.upsert_no_vtec(inner, alert, now);
        };
        let Some(existing_id) = inner.by_event.get(&key).cloned() else {
            // A continuation for an event we never saw: treat as new.
            inner.total_added += 1;
            inner.emit(StoreEvent::Added(alert.clone()));
            inner.insert(alert);
            return UpsertOutcome::Added;
        };

        let Some(existing) = inner.alerts.remove(&existing_id) else {
            // The index pointing at a missing alert is a bug; recover by
            // treating the product as new.
            debug_assert!(false, "event index points at a missing alert");
            warn!(%existing_id, "event index pointed at a missing alert");
            inner.by_event.remove(&key);
            inner.total_added += 1;
            inner.emit(StoreEvent::Added(alert.clone()));
            inner.insert(alert);
            return UpsertOutcome::Added;
        };

        let mut updated = alert;
        // The original product's issuance stamp survives updates.
        updated.issued_time = existing.issued_time;
        updated.update_count = existing.update_count + 1;
        updated.status = AlertStatus::Updated;
        updated.last_updated = now;

        inner.total_updated += 1;
        inner.emit(StoreEvent::Updated {
            alert: updated.clone(),
            previous_id: existing_id,
        });
        inner.insert(updated);
        UpsertOutcome::Updated
    }

    fn upsert_no_vtec(&self, inner: &mut Inner, alert: Alert, now: DateTime<Utc>) -> UpsertOutcome {
        match inner.alerts.get(&alert.product_id) {
            Some(existing) if Inner::same_content(existing, &alert) => UpsertOutcome::Ignored,
            Some(existing) => {
                let mut updated = alert;
                updated.issued_time = existing.issued_time;
                updated.update_count = existing.update_count + 1;
                updated.status = AlertStatus::Updated;
                updated.last_updated = now;
                let previous_id = updated.product_id.clone();
                inner.total_updated += 1;
                inner.emit(StoreEvent::Updated {
                    alert: updated.clone(),
                    previous_id,
                });
                inner.insert(updated);
                UpsertOutcome::Updated
            }
            None => {
                inner.total_added += 1;
                inner.emit(StoreEvent::Added(alert.clone()));
                inner.insert(alert);
                UpsertOutcome::Added
            }
        }
    }

    /// Remove one alert by id. Returns the removed alert, or `None` when
    /// absent.
    pub fn remove(&self, product_id: &ProductId, reason: RemoveReason) -> Option<Alert> {
        self.write().remove(product_id, reason)
    }

    /// A non-blocking read of one alert.
    pub fn get(&self, product_id: &ProductId) -> Option<Alert> {
        self.read().alerts.get(product_id).cloned()
    }

    /// A point-in-time consistent copy of the active set, most urgent first.
    pub fn snapshot(&self) -> Vec<Alert> {
        let inner = self.read();
        let mut alerts: Vec<Alert> = inner.alerts.values().cloned().collect();
        alerts.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.issued_time.cmp(&a.issued_time))
        });
        alerts
    }

    /// Counts by phenomenon and source, plus lifetime totals.
    pub fn stats(&self) -> StoreStats {
        let inner = self.read();
        let mut stats = StoreStats {
            total: inner.alerts.len(),
            total_added: inner.total_added,
            total_updated: inner.total_updated,
            total_removed: inner.total_removed,
            ..StoreStats::default()
        };
        for alert in inner.alerts.values() {
            *stats
                .by_phenomenon
                .entry(alert.phenomenon.as_code().to_string())
                .or_default() += 1;
            *stats
                .by_source
                .entry(alert.source.to_string())
                .or_default() += 1;
        }
        stats
    }

    /// Register a subscriber: atomically snapshot the active set and start
    /// its event stream at the position right after the snapshot.
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (sender, events) = mpsc::channel(self.subscriber_queue_capacity);

        let mut inner = self.write();
        let mut snapshot: Vec<Alert> = inner.alerts.values().cloned().collect();
        snapshot.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.issued_time.cmp(&a.issued_time))
        });
        inner.subscribers.push(SubscriberSlot { id, sender });
        drop(inner);

        debug!(subscriber = id, "subscribed");
        Subscription {
            id,
            snapshot,
            events,
        }
    }

    /// Cancel a subscription explicitly. Harmless if already gone.
    pub fn unsubscribe(&self, id: u64) {
        self.write().subscribers.retain(|slot| slot.id != id);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.read().subscribers.len()
    }

    /// Reconcile against the pull source's full active list.
    ///
    /// Arrivals are upserted. Stored alerts missing from the list are
    /// removed once their expiration has passed; an alert the pull source
    /// no longer reports but which is not yet expired is left for the next
    /// cycle (or eviction).
    pub fn reconcile(&self, alerts: Vec<Alert>, now: DateTime<Utc>) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let reported: HashSet<ProductId> =
            alerts.iter().map(|a| a.product_id.clone()).collect();
        let reported_keys: HashSet<EventKey> =
            alerts.iter().filter_map(|a| a.event_key()).collect();

        for alert in alerts {
            match self.upsert(alert) {
                UpsertOutcome::Added => summary.added += 1,
                UpsertOutcome::Updated => summary.updated += 1,
                UpsertOutcome::Superseded => summary.removed += 1,
                UpsertOutcome::Ignored => summary.unchanged += 1,
            }
        }

        // Departures: ids the authoritative list no longer carries, once
        // expired. An updated event reappears under a fresh product id, so
        // a stored alert also counts as reported when its event key is.
        let departed: Vec<ProductId> = {
            let inner = self.read();
            inner
                .alerts
                .values()
                .filter(|alert| {
                    !reported.contains(&alert.product_id)
                        && !alert
                            .event_key()
                            .is_some_and(|key| reported_keys.contains(&key))
                        && alert.is_expired_at(now)
                })
                .map(|alert| alert.product_id.clone())
                .collect()
        };
        for product_id in departed {
            if self.remove(&product_id, RemoveReason::Expired).is_some() {
                summary.removed += 1;
            }
        }
        summary
    }

    /// Evict every alert whose expiration plus grace has passed. Returns
    /// the number evicted.
    pub fn evict_due(&self, now: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        loop {
            let due: Option<ProductId> = {
                let mut inner = self.write();
                loop {
                    match inner.expirations.peek() {
                        None => break None,
                        Some(Reverse((expiration, product_id))) => {
                            let product_id = product_id.clone();
                            let expiration = *expiration;
                            // Heap entries are lazy: stale ones (removed or
                            // re-expired alerts) just pop off.
                            let live = inner
                                .alerts
                                .get(&product_id)
                                .map(|a| a.expiration_time == expiration);
                            match live {
                                None => {
                                    inner.expirations.pop();
                                    continue;
                                }
                                Some(false) => {
                                    inner.expirations.pop();
                                    continue;
                                }
                                Some(true) if expiration + self.grace <= now => {
                                    inner.expirations.pop();
                                    break Some(product_id);
                                }
                                Some(true) => break None,
                            }
                        }
                    }
                }
            };
            match due {
                Some(product_id) => {
                    debug!(%product_id, "evicting expired alert");
                    if self.remove(&product_id, RemoveReason::Expired).is_some() {
                        evicted += 1;
                    }
                }
                None => return evicted,
            }
        }
    }

    /// The next instant at which eviction has work, if any.
    pub fn next_eviction_due(&self) -> Option<DateTime<Utc>> {
        let inner = self.read();
        inner
            .expirations
            .iter()
            .filter(|Reverse((expiration, product_id))| {
                inner
                    .alerts
                    .get(product_id)
                    .is_some_and(|a| a.expiration_time == *expiration)
            })
            .map(|Reverse((expiration, _))| *expiration + self.grace)
            .min()
    }

    /// The eviction loop: wakes when the earliest `expiration + grace`
    /// comes due (or the set changes under it) and removes what has
    /// expired. Runs until `shutdown` fires.
    pub async fn run_eviction(&self, shutdown: CancellationToken) {
        loop {
            let now = Utc::now();
            let evicted = self.evict_due(now);
            if evicted > 0 {
                info!(evicted, "evicted expired alerts");
            }

            let sleep = match self.next_eviction_due() {
                Some(due) => (due - Utc::now())
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO),
                // Nothing expiring; sleep until the set changes.
                None => std::time::Duration::from_secs(3600),
            };

            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("eviction loop stopping");
                    return;
                }
                _ = self.eviction_wakeup.notified() => {}
                _ = tokio::time::sleep(sleep) => {}
            }
        }
    }
}

/// What a [`AlertStore::reconcile`] pass changed.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ReconcileSummary {
    /// Alerts inserted
    pub added: usize,
    /// Alerts updated in place
    pub updated: usize,
    /// Alerts removed (terminal actions and expired departures)
    pub removed: usize,
    /// Alerts already present and unchanged
    pub unchanged: usize,
}

/// The on-disk snapshot format.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    generated_at: DateTime<Utc>,
    alerts: Vec<Alert>,
}

/// The error returned when the snapshot file cannot be written or read.
#[derive(thiserror::Error, Debug)]
pub enum PersistError {
    /// Filesystem trouble
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not a valid snapshot
    #[error("snapshot format: {0}")]
    Format(#[from] serde_json::Error),
}

impl AlertStore {
    /// Write the current active set to `path`.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let state = PersistedState {
            generated_at: Utc::now(),
            alerts: self.snapshot(),
        };
        let json = serde_json::to_vec_pretty(&state)?;
        // Write-then-rename so a crash mid-write never truncates the last
        // good snapshot.
        let tmp = path.as_ref().with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path.as_ref())?;
        Ok(())
    }

    /// Load a snapshot from `path`, dropping entries already expired at
    /// `now`, and insert the survivors.
    ///
    /// Returns the number of alerts rehydrated. A missing file is an empty
    /// snapshot, not an error.
    pub fn load_snapshot(
        &self,
        path: impl AsRef<Path>,
        now: DateTime<Utc>,
    ) -> Result<usize, PersistError> {
        let bytes = match std::fs::read(path.as_ref()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let state: PersistedState = serde_json::from_slice(&bytes)?;

        let mut rehydrated = 0;
        for alert in state.alerts {
            if alert.is_expired_at(now) {
                continue;
            }
            let mut inner = self.write();
            inner.insert(alert);
            rehydrated += 1;
        }
        if rehydrated > 0 {
            info!(
                rehydrated,
                generated_at = %state.generated_at,
                "restored snapshot"
            );
            self.eviction_wakeup.notify_one();
        }
        Ok(rehydrated)
    }

    /// Periodically snapshot to `path` until `shutdown` fires, then write
    /// one final snapshot.
    pub async fn run_persistence(
        &self,
        path: std::path::PathBuf,
        interval: std::time::Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    if let Err(e) = self.save_snapshot(&path) {
                        warn!(error = %e, "final snapshot failed");
                    }
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.save_snapshot(&path) {
                        warn!(error = %e, "periodic snapshot failed");
                    }
                }
            }
        }
    }
}
