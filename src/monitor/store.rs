//! Fixed-capacity call store.
//!
//! A ring of slots plus an id→slot index. Insert, evict, lookup and update are
//! all O(1); iteration walks backwards from the newest slot.

use super::record::CallRecord;
use std::collections::HashMap;

/// Bounded, most-recent-first history of call records.
///
/// Not synchronized: [`super::CallTracker`] owns the lock.
#[derive(Debug)]
pub struct CallStore {
    slots: Vec<Option<CallRecord>>,
    index: HashMap<String, usize>,
    /// Slot the next insert writes to
    next: usize,
    len: usize,
}

impl CallStore {
    /// Create a store holding at most `capacity` records (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            index: HashMap::with_capacity(capacity),
            next: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Insert as the newest record, returning the evicted oldest one if the
    /// store was full. The caller guarantees `record.id` is not present.
    pub fn insert(&mut self, record: CallRecord) -> Option<CallRecord> {
        let slot = self.next;
        let evicted = self.slots[slot].take();
        if let Some(old) = &evicted {
            self.index.remove(&old.id);
        } else {
            self.len += 1;
        }

        self.index.insert(record.id.clone(), slot);
        self.slots[slot] = Some(record);
        self.next = (slot + 1) % self.capacity();
        evicted
    }

    pub fn get(&self, id: &str) -> Option<&CallRecord> {
        let slot = *self.index.get(id)?;
        self.slots[slot].as_ref()
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut CallRecord> {
        let slot = *self.index.get(id)?;
        self.slots[slot].as_mut()
    }

    /// Records from newest to oldest.
    pub fn iter_recent(&self) -> impl Iterator<Item = &CallRecord> + '_ {
        let capacity = self.capacity();
        (1..=self.len).filter_map(move |offset| {
            let slot = (self.next + capacity - offset) % capacity;
            self.slots[slot].as_ref()
        })
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.index.clear();
        self.next = 0;
        self.len = 0;
    }
}
