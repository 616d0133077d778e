// libs/scheduling-cell/src/services/availability.rs
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::error::SchedulingError;
use crate::models::{Appointment, AvailabilitySnapshot, Slot};
use crate::services::backend::{call_with_timeout, AppointmentBackend};
use crate::services::time_offset::ScheduleClock;

/// Read-only availability predicates for rendering.
pub trait AvailabilityLookup {
    fn is_hour_booked(&self, date: NaiveDate, hour: u32) -> bool;
    fn is_disabled(&self, date: NaiveDate, hour: u32) -> bool;
}

/// Frozen copy of the snapshots for a set of dates. Every view of the
/// calendar built from the same view answers identically.
#[derive(Debug, Clone, Default)]
pub struct AvailabilityView {
    snapshots: HashMap<NaiveDate, AvailabilitySnapshot>,
}

impl AvailabilityView {
    pub fn from_snapshots(snapshots: impl IntoIterator<Item = AvailabilitySnapshot>) -> Self {
        Self {
            snapshots: snapshots.into_iter().map(|s| (s.date, s)).collect(),
        }
    }

    pub fn snapshot(&self, date: NaiveDate) -> Option<&AvailabilitySnapshot> {
        self.snapshots.get(&date)
    }
}

impl AvailabilityLookup for AvailabilityView {
    fn is_hour_booked(&self, date: NaiveDate, hour: u32) -> bool {
        self.snapshots.get(&date).is_some_and(|s| s.booked_hours.contains(&hour))
    }

    fn is_disabled(&self, date: NaiveDate, hour: u32) -> bool {
        self.snapshots.get(&date).is_some_and(|s| s.disabled_hours.contains(&hour))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SnapshotKey {
    fixer_id: Uuid,
    date: NaiveDate,
}

#[derive(Default)]
struct IndexState {
    snapshots: HashMap<SnapshotKey, AvailabilitySnapshot>,
    visible: HashMap<Uuid, BTreeSet<NaiveDate>>,
    generations: HashMap<SnapshotKey, u64>,
    next_generation: u64,
}

impl IndexState {
    fn is_visible(&self, key: &SnapshotKey) -> bool {
        self.visible.get(&key.fixer_id).is_some_and(|dates| dates.contains(&key.date))
    }
}

/// Per (fixer, date) cache of booked and disabled hours.
pub struct AvailabilityIndex {
    backend: Arc<dyn AppointmentBackend>,
    clock: ScheduleClock,
    request_timeout: Duration,
    state: RwLock<IndexState>,
}

impl AvailabilityIndex {
    pub fn new(backend: Arc<dyn AppointmentBackend>, clock: ScheduleClock, request_timeout: Duration) -> Self {
        Self {
            backend,
            clock,
            request_timeout,
            state: RwLock::new(IndexState::default()),
        }
    }

    pub fn from_config(backend: Arc<dyn AppointmentBackend>, config: &AppConfig) -> Self {
        Self::new(backend, ScheduleClock::from_config(config), config.request_timeout())
    }

    /// Replaces the visible dates for a fixer and evicts everything else cached for them.
    pub async fn set_visible_range(&self, fixer_id: Uuid, dates: &[NaiveDate]) {
        let visible: BTreeSet<NaiveDate> = dates.iter().copied().collect();
        let mut state = self.state.write().await;

        state.snapshots.retain(|key, _| key.fixer_id != fixer_id || visible.contains(&key.date));
        state.generations.retain(|key, _| key.fixer_id != fixer_id || visible.contains(&key.date));
        state.visible.insert(fixer_id, visible);
    }

    /// Fetches one date. The result is stored only if the date is visible
    /// when it arrives and no newer load for it was issued meanwhile; failures
    /// store the fail-open snapshot. Loading never widens the visible range.
    #[instrument(skip(self))]
    pub async fn load(&self, fixer_id: Uuid, date: NaiveDate) -> AvailabilitySnapshot {
        let key = SnapshotKey { fixer_id, date };

        let ticket = {
            let mut state = self.state.write().await;
            state.next_generation += 1;
            let ticket = state.next_generation;
            state.generations.insert(key, ticket);
            ticket
        };

        let snapshot = match self.fetch_snapshot(fixer_id, date).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Availability load failed for fixer {} on {}, treating all hours as open: {}", fixer_id, date, e);
                AvailabilitySnapshot::failed(fixer_id, date)
            }
        };

        let mut state = self.state.write().await;
        if !state.is_visible(&key) {
            debug!("Discarding availability for {}: no longer visible", date);
        } else if state.generations.get(&key) != Some(&ticket) {
            debug!("Discarding stale availability for {} (ticket {})", date, ticket);
        } else {
            state.snapshots.insert(key, snapshot.clone());
        }

        snapshot
    }

    /// Declares `dates` as the visible range and loads them all concurrently.
    pub async fn load_visible(&self, fixer_id: Uuid, dates: &[NaiveDate]) {
        self.set_visible_range(fixer_id, dates).await;
        join_all(dates.iter().map(|date| self.load(fixer_id, *date))).await;
    }

    /// Refetches every visible date for a fixer.
    pub async fn refresh_visible(&self, fixer_id: Uuid) {
        let dates: Vec<NaiveDate> = {
            let state = self.state.read().await;
            state.visible.get(&fixer_id)
                .map(|dates| dates.iter().copied().collect())
                .unwrap_or_default()
        };
        debug!("Refreshing {} visible date(s) for fixer {}", dates.len(), fixer_id);
        join_all(dates.iter().map(|date| self.load(fixer_id, *date))).await;
    }

    /// Reloads `date` only when some calendar shows it. Returns whether a
    /// load was issued.
    pub async fn reload_if_visible(&self, fixer_id: Uuid, date: NaiveDate) -> bool {
        if !self.is_visible(fixer_id, date).await {
            debug!("Skipping reload of {} for fixer {}: not visible", date, fixer_id);
            return false;
        }
        self.load(fixer_id, date).await;
        true
    }

    pub async fn is_visible(&self, fixer_id: Uuid, date: NaiveDate) -> bool {
        self.state.read().await.is_visible(&SnapshotKey { fixer_id, date })
    }

    /// Availability to decide on before a write: the cached snapshot when
    /// there is a good one, otherwise a direct read. Unlike [`Self::load`]
    /// a failed read is an error here, never fail-open.
    pub async fn current(&self, fixer_id: Uuid, date: NaiveDate) -> Result<AvailabilitySnapshot, SchedulingError> {
        if let Some(cached) = self.snapshot(fixer_id, date).await.filter(|s| !s.load_failed) {
            return Ok(cached);
        }
        self.fetch_snapshot(fixer_id, date).await
    }

    pub async fn invalidate(&self, fixer_id: Uuid, date: NaiveDate) {
        self.state.write().await.snapshots.remove(&SnapshotKey { fixer_id, date });
    }

    pub async fn snapshot(&self, fixer_id: Uuid, date: NaiveDate) -> Option<AvailabilitySnapshot> {
        self.state.read().await.snapshots.get(&SnapshotKey { fixer_id, date }).cloned()
    }

    pub async fn view(&self, fixer_id: Uuid, dates: &[NaiveDate]) -> AvailabilityView {
        let state = self.state.read().await;
        AvailabilityView::from_snapshots(
            dates.iter()
                .filter_map(|date| state.snapshots.get(&SnapshotKey { fixer_id, date: *date }))
                .cloned(),
        )
    }

    pub async fn is_hour_booked(&self, fixer_id: Uuid, slot: Slot) -> bool {
        self.snapshot(fixer_id, slot.date()).await
            .is_some_and(|s| s.booked_hours.contains(&slot.hour()))
    }

    pub async fn is_disabled(&self, fixer_id: Uuid, slot: Slot) -> bool {
        self.snapshot(fixer_id, slot.date()).await
            .is_some_and(|s| s.disabled_hours.contains(&slot.hour()))
    }

    /// Marks a slot booked in the cached snapshot. Returns false when the
    /// date is not cached, in which case the caller should reload it.
    pub async fn mark_booked(&self, fixer_id: Uuid, slot: Slot) -> bool {
        self.edit_snapshot(fixer_id, slot.date(), |s| {
            s.booked_hours.insert(slot.hour());
        }).await
    }

    pub async fn mark_open(&self, fixer_id: Uuid, slot: Slot) -> bool {
        self.edit_snapshot(fixer_id, slot.date(), |s| {
            s.booked_hours.remove(&slot.hour());
        }).await
    }

    pub async fn set_disabled(&self, fixer_id: Uuid, slot: Slot, disabled: bool) -> bool {
        self.edit_snapshot(fixer_id, slot.date(), |s| {
            if disabled {
                s.disabled_hours.insert(slot.hour());
            } else {
                s.disabled_hours.remove(&slot.hour());
            }
        }).await
    }

    async fn edit_snapshot<F>(&self, fixer_id: Uuid, date: NaiveDate, edit: F) -> bool
    where
        F: FnOnce(&mut AvailabilitySnapshot),
    {
        let mut state = self.state.write().await;
        let key = SnapshotKey { fixer_id, date };

        // Local edits supersede any load still in flight for this date.
        state.next_generation += 1;
        let ticket = state.next_generation;
        if state.generations.contains_key(&key) {
            state.generations.insert(key, ticket);
        }

        match state.snapshots.get_mut(&key) {
            Some(snapshot) => {
                edit(snapshot);
                true
            }
            None => false,
        }
    }

    async fn fetch_snapshot(&self, fixer_id: Uuid, date: NaiveDate) -> Result<AvailabilitySnapshot, SchedulingError> {
        let (appointments, disabled) = futures::try_join!(
            call_with_timeout(self.request_timeout, self.backend.list_booked_appointments(fixer_id, date)),
            call_with_timeout(self.request_timeout, self.backend.list_disabled_hours(fixer_id, date)),
        )?;

        Ok(AvailabilitySnapshot {
            fixer_id,
            date,
            booked_hours: self.booked_hours_on(date, &appointments),
            disabled_hours: disabled.into_iter().filter(|h| *h < Slot::HOURS_PER_DAY).collect(),
            load_failed: false,
        })
    }

    fn booked_hours_on(&self, date: NaiveDate, appointments: &[Appointment]) -> BTreeSet<u32> {
        appointments.iter()
            .filter(|a| a.is_active())
            .map(|a| self.clock.decode(a.start_time))
            .filter(|slot| slot.date() == date)
            .map(|slot| slot.hour())
            .collect()
    }
}
