//! In-memory battle cache
//!
//! Best-effort cache over the metadata bucket, which stays the source of
//! truth: a miss here falls through to a bucket fetch. Bounded by
//! insertion order so a long-lived process cannot grow without limit;
//! capacity 0 means unbounded.

use clash_common::Battle;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

pub struct BattleCache {
    entries: HashMap<Uuid, Battle>,
    order: VecDeque<Uuid>,
    capacity: Option<usize>,
}

impl BattleCache {
    /// `capacity` 0 (or None) means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: (capacity > 0).then_some(capacity),
        }
    }

    /// Insert or replace a battle. Replacement keeps the original
    /// insertion position; new entries may evict the oldest ones.
    pub fn insert(&mut self, battle: Battle) {
        let uuid = battle.uuid;
        if self.entries.insert(uuid, battle).is_none() {
            self.order.push_back(uuid);
        }
        if let Some(capacity) = self.capacity {
            while self.entries.len() > capacity {
                match self.order.pop_front() {
                    Some(oldest) => {
                        self.entries.remove(&oldest);
                        tracing::debug!(battle = %oldest, "evicted battle from cache");
                    }
                    None => break,
                }
            }
        }
    }

    pub fn get(&self, uuid: &Uuid) -> Option<&Battle> {
        self.entries.get(uuid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
