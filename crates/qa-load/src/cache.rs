use std::collections::VecDeque;

use parking_lot::Mutex;
use rand::Rng;

/// Bounded FIFO of identifiers produced by write operations, shared by
/// every virtual user of a run. When full, inserting evicts the oldest
/// identifier.
#[derive(Debug)]
pub struct TargetCache {
    ids: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl TargetCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ids: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an identifier, returning the evicted one if the cache was full.
    pub fn insert(&self, id: String) -> Option<String> {
        let mut ids = self.ids.lock();
        let evicted = if ids.len() >= self.capacity {
            ids.pop_front()
        } else {
            None
        };
        ids.push_back(id);
        evicted
    }

    /// A uniformly chosen live identifier.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<String> {
        let ids = self.ids.lock();
        if ids.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..ids.len());
        ids.get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.lock().iter().any(|existing| existing == id)
    }
}
