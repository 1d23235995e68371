// crates/fierce-ledger/src/journal.rs
//
// Undo logs for transactional vault operations.
//
// Components keep their keyed and append-only collections in journaled
// containers. While a transaction is open every write records the value it
// replaced, and rolling back replays those records in reverse. Undoing an
// operation therefore costs what the operation touched, not the size of the
// component. Outside a transaction the containers record nothing.
//
// Transactions nest: a checkpoint taken inside an open transaction marks the
// current log position, and rolling back to it leaves earlier records in
// place for the outer transaction.

use std::collections::BTreeMap;
use std::ops::Deref;

/// State that can open, roll back, and commit transactions.
pub trait Journaled {
    /// Scalar fields plus the log position of every container.
    type Checkpoint;

    /// Start recording (or mark a nested point) and return where to roll back to.
    fn checkpoint(&mut self) -> Self::Checkpoint;

    /// Undo every write made since `checkpoint` was taken.
    fn rollback(&mut self, checkpoint: Self::Checkpoint);

    /// End the outermost transaction: drop the undo records and stop
    /// recording.
    fn commit(&mut self);
}

/// Ordered map that records overwritten entries while recording.
#[derive(Debug, Clone)]
pub struct JournaledMap<K, V> {
    map: BTreeMap<K, V>,
    log: Vec<(K, Option<V>)>,
    recording: bool,
}

impl<K: Ord + Clone, V: Clone> JournaledMap<K, V> {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            log: Vec::new(),
            recording: false,
        }
    }

    fn record(&mut self, key: &K) {
        if self.recording {
            let previous = self.map.get(key).cloned();
            self.log.push((key.clone(), previous));
        }
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.record(&key);
        self.map.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        if !self.map.contains_key(key) {
            return None;
        }
        self.record(key);
        self.map.remove(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if !self.map.contains_key(key) {
            return None;
        }
        self.record(key);
        self.map.get_mut(key)
    }

    /// Mutable access to the entry for `key`, inserting `default()` first if
    /// it is missing.
    pub fn get_or_insert_with(&mut self, key: K, default: impl FnOnce() -> V) -> &mut V {
        self.record(&key);
        self.map.entry(key).or_insert_with(default)
    }

    pub fn begin(&mut self) -> usize {
        self.recording = true;
        self.log.len()
    }

    pub fn rollback(&mut self, mark: usize) {
        while self.log.len() > mark {
            if let Some((key, previous)) = self.log.pop() {
                match previous {
                    Some(value) => self.map.insert(key, value),
                    None => self.map.remove(&key),
                };
            }
        }
    }

    pub fn commit(&mut self) {
        self.log.clear();
        self.recording = false;
    }

    /// Number of undo records currently held.
    pub fn pending_undo(&self) -> usize {
        self.log.len()
    }
}

impl<K: Ord + Clone, V: Clone> Default for JournaledMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> From<BTreeMap<K, V>> for JournaledMap<K, V> {
    fn from(map: BTreeMap<K, V>) -> Self {
        Self {
            map,
            log: Vec::new(),
            recording: false,
        }
    }
}

impl<K, V> Deref for JournaledMap<K, V> {
    type Target = BTreeMap<K, V>;

    fn deref(&self) -> &BTreeMap<K, V> {
        &self.map
    }
}

#[derive(Debug, Clone)]
enum VecUndo<T> {
    Pushed,
    Replaced(usize, T),
}

/// Append-only vector whose elements may be updated in place.
#[derive(Debug, Clone)]
pub struct JournaledVec<T> {
    items: Vec<T>,
    log: Vec<VecUndo<T>>,
    recording: bool,
}

impl<T: Clone> JournaledVec<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            log: Vec::new(),
            recording: false,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.recording {
            self.log.push(VecUndo::Pushed);
        }
        self.items.push(item);
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        let current = self.items.get(index)?;
        if self.recording {
            self.log.push(VecUndo::Replaced(index, current.clone()));
        }
        self.items.get_mut(index)
    }

    pub fn begin(&mut self) -> usize {
        self.recording = true;
        self.log.len()
    }

    pub fn rollback(&mut self, mark: usize) {
        while self.log.len() > mark {
            match self.log.pop() {
                Some(VecUndo::Pushed) => {
                    self.items.pop();
                }
                Some(VecUndo::Replaced(index, previous)) => {
                    if let Some(slot) = self.items.get_mut(index) {
                        *slot = previous;
                    }
                }
                None => break,
            }
        }
    }

    pub fn commit(&mut self) {
        self.log.clear();
        self.recording = false;
    }

    pub fn pending_undo(&self) -> usize {
        self.log.len()
    }
}

impl<T: Clone> Default for JournaledVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deref for JournaledVec<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.items
    }
}
