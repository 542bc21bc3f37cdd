use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use rowbind_core::{Entity, Model, Persisted};

pub const DEFAULT_SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    table: String,
    id: i64,
}

impl CacheKey {
    fn new(table: &str, id: i64) -> Self {
        Self {
            table: table.to_string(),
            id,
        }
    }
}

struct Slots {
    entries: HashMap<CacheKey, Weak<dyn Persisted>>,
    next_sweep: usize,
}

/// Maps `(table, primary key)` to the live instance for that row.
///
/// Entries are weak: the cache never keeps an entity alive. Slots whose entity has
/// been dropped are swept once the map reaches the sweep threshold, and the next
/// threshold is set to twice the surviving live count (never below the configured
/// floor), so dead slots never outnumber the threshold.
///
/// `put` overwrites: the most recently materialized instance wins.
pub struct IdentityCache {
    slots: RwLock<Slots>,
    sweep_floor: usize,
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::with_sweep_threshold(DEFAULT_SWEEP_THRESHOLD)
    }

    pub fn with_sweep_threshold(threshold: usize) -> Self {
        let sweep_floor = threshold.max(1);
        Self {
            slots: RwLock::new(Slots {
                entries: HashMap::new(),
                next_sweep: sweep_floor,
            }),
            sweep_floor,
        }
    }

    pub fn get(&self, table: &str, id: i64) -> Option<Arc<dyn Persisted>> {
        self.slots
            .read()
            .entries
            .get(&CacheKey::new(table, id))
            .and_then(Weak::upgrade)
    }

    pub fn get_as<T: Entity>(&self, table: &str, id: i64) -> Option<Model<T>> {
        self.get(table, id).and_then(Model::from_erased)
    }

    pub fn put(&self, table: &str, id: i64, entity: &Arc<dyn Persisted>) {
        let mut slots = self.slots.write();
        slots
            .entries
            .insert(CacheKey::new(table, id), Arc::downgrade(entity));

        if slots.entries.len() >= slots.next_sweep {
            slots.entries.retain(|_, entry| entry.strong_count() > 0);
            slots.next_sweep = (slots.entries.len() * 2).max(self.sweep_floor);
        }
    }

    /// Returns whether a live entry was removed.
    pub fn remove(&self, table: &str, id: i64) -> bool {
        self.slots
            .write()
            .entries
            .remove(&CacheKey::new(table, id))
            .is_some_and(|entry| entry.strong_count() > 0)
    }

    pub fn evict_table(&self, table: &str) -> usize {
        let mut slots = self.slots.write();
        let before = slots.entries.len();
        slots.entries.retain(|key, _| key.table != table);
        before - slots.entries.len()
    }

    pub fn clear(&self) {
        self.slots.write().entries.clear();
    }

    /// Number of entries whose entity is still alive.
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .entries
            .values()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots held, including ones not yet swept.
    pub fn slot_count(&self) -> usize {
        self.slots.read().entries.len()
    }
}
