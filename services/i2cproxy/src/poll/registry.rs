//! Time-ordered registry of poll records
//!
//! Records are kept sorted by `(next_run_ms, insertion sequence)`, so equal
//! due times are served in insertion order. The registry itself does no
//! locking; [`SharedRegistry`] owns it behind one mutex so a caller can
//! remove and reinsert a record inside a single critical section.

use std::collections::{BTreeMap, HashMap};

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, error};

use super::record::{align_to_second, PollRecord};

type ScheduleKey = (u64, u64);

#[derive(Debug)]
struct Slot {
    record: PollRecord,
    key: ScheduleKey,
}

/// Ordered collection of poll records plus the id counter
#[derive(Debug)]
pub struct PollRegistry {
    schedule: BTreeMap<ScheduleKey, u32>,
    records: HashMap<u32, Slot>,
    next_id: u32,
    next_seq: u64,
}

impl Default for PollRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PollRegistry {
    pub fn new() -> Self {
        Self {
            schedule: BTreeMap::new(),
            records: HashMap::new(),
            next_id: 1,
            next_seq: 0,
        }
    }

    /// Link a record and return its id.
    ///
    /// A zero id is replaced by the next id from the counter. A record with no
    /// due time is aligned to the next whole second at or after `now_ms`.
    /// The record goes after every record already due at the same time.
    pub fn insert(&mut self, mut record: PollRecord, now_ms: u64) -> u32 {
        if record.id == 0 {
            record.id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1).max(1);
        } else if record.id >= self.next_id {
            self.next_id = record.id.wrapping_add(1).max(1);
        }

        if self.records.contains_key(&record.id) {
            debug_assert!(false, "poll record {} inserted twice", record.id);
            error!("Poll record {} is already scheduled, replacing it", record.id);
            self.unlink(record.id);
        }

        let next_run = *record
            .next_run_ms
            .get_or_insert_with(|| align_to_second(now_ms));
        let key = (next_run, self.next_seq);
        self.next_seq += 1;

        let id = record.id;
        self.schedule.insert(key, id);
        self.records.insert(id, Slot { record, key });
        id
    }

    /// Unlink and return the record with `id`
    pub fn remove(&mut self, id: u32) -> Option<PollRecord> {
        self.unlink(id)
    }

    pub fn find(&self, id: u32) -> Option<&PollRecord> {
        self.records.get(&id).map(|slot| &slot.record)
    }

    /// Earliest record, due or not
    pub fn head(&self) -> Option<&PollRecord> {
        self.schedule
            .values()
            .next()
            .and_then(|id| self.find(*id))
    }

    /// Earliest record if it is due within `grace_ms` of `now_ms`
    pub fn head_due(&self, now_ms: u64, grace_ms: u64) -> Option<&PollRecord> {
        self.head()
            .filter(|record| record.next_run_ms.unwrap_or(0) <= now_ms.saturating_add(grace_ms))
    }

    /// Due time of the earliest record
    pub fn next_due_ms(&self) -> Option<u64> {
        self.schedule.keys().next().map(|(next_run, _)| *next_run)
    }

    /// Move a linked record to a new due time.
    ///
    /// Rescheduling an id that is not linked is a caller bug.
    pub fn reschedule(&mut self, id: u32, next_run_ms: u64) {
        match self.unlink(id) {
            Some(mut record) => {
                record.next_run_ms = Some(next_run_ms);
                self.insert(record, next_run_ms);
            },
            None => {
                debug_assert!(false, "reschedule of unlinked poll record {}", id);
                error!("Cannot reschedule poll record {}: not scheduled", id);
            },
        }
    }

    /// Advance a record after it ran and relink it.
    ///
    /// Returns the number of skipped periods, or `None` if the record was
    /// removed while it ran.
    pub fn complete_run(&mut self, id: u32, now_ms: u64, grace_ms: u64) -> Option<u64> {
        let mut record = self.unlink(id)?;
        let skipped = record.advance(now_ms, grace_ms);
        self.insert(record, now_ms);
        Some(skipped)
    }

    /// Remove every record; returns how many were dropped
    pub fn clear_all(&mut self) -> usize {
        let dropped = self.records.len();
        self.schedule.clear();
        self.records.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in service order
    pub fn iter(&self) -> impl Iterator<Item = &PollRecord> + '_ {
        self.schedule
            .values()
            .filter_map(|id| self.records.get(id).map(|slot| &slot.record))
    }

    fn unlink(&mut self, id: u32) -> Option<PollRecord> {
        let slot = self.records.remove(&id)?;
        self.schedule.remove(&slot.key);
        Some(slot.record)
    }
}

/// Registry shared by the command and poll services
///
/// Every mutation made through the helpers raises a change signal that
/// wakes a sleeping poll executor.
#[derive(Debug, Default)]
pub struct SharedRegistry {
    inner: Mutex<PollRegistry>,
    changed: Notify,
}

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock for a critical section. Keep it short; never hold it across bus I/O.
    pub fn lock(&self) -> MutexGuard<'_, PollRegistry> {
        self.inner.lock()
    }

    pub fn notify_changed(&self) {
        self.changed.notify_one();
    }

    /// Resolves after the next change signal
    pub async fn changed(&self) {
        self.changed.notified().await;
    }

    /// Schedule a new record and return its id
    pub fn add(&self, record: PollRecord, now_ms: u64) -> u32 {
        let id = self.lock().insert(record, now_ms);
        self.notify_changed();
        id
    }

    pub fn remove(&self, id: u32) -> Option<PollRecord> {
        let removed = self.lock().remove(id);
        if removed.is_some() {
            self.notify_changed();
        }
        removed
    }

    pub fn clear_all(&self) -> usize {
        let dropped = self.lock().clear_all();
        if dropped > 0 {
            debug!("Cleared {} poll records", dropped);
        }
        self.notify_changed();
        dropped
    }
}
