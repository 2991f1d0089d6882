//! Ordered item indices
//!
//! Both the per-root inode index and the per-inode range index are
//! ordered maps from a `u64` key to a counted item reference. Insertion
//! follows a two-phase pattern: probe under the lock, allocate outside
//! it, re-probe, and discard the candidate if another thread won the
//! race. The lock is therefore never held across an allocation.
//!
//! The stored `Arc` is the index's own reference; callers returned an
//! item hold a clone. Clones are only ever taken while the index lock is
//! held, so a `strong_count` probe under the lock gives an exact sharer
//! count for the evictability check.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::status::Status;

/// Key extraction for indexed items
pub(crate) trait Keyed {
    /// The item's index key
    fn key(&self) -> u64;
}

/// Ordered map from key to counted item reference
#[derive(Debug)]
pub(crate) struct TrackIndex<T> {
    tree: Mutex<BTreeMap<u64, Arc<T>>>,
}

impl<T: Keyed> TrackIndex<T> {
    pub(crate) fn new() -> Self {
        Self {
            tree: Mutex::new(BTreeMap::new()),
        }
    }

    /// Return the item at `key`, installing a new one if absent
    ///
    /// `make` runs outside the lock and may fail with `OutOfMemory`; the
    /// boolean is true when this call installed the item. When two
    /// callers miss concurrently exactly one installs its candidate and
    /// the loser's is dropped.
    pub(crate) fn find_or_insert<F>(&self, key: u64, mut make: F) -> Result<(Arc<T>, bool), Status>
    where
        F: FnMut() -> Result<Arc<T>, Status>,
    {
        let mut candidate: Option<Arc<T>> = None;

        loop {
            {
                let mut tree = self.tree.lock();
                if let Some(existing) = tree.get(&key) {
                    // Lost the race or the item was already present; any
                    // candidate we allocated is discarded on drop.
                    return Ok((Arc::clone(existing), false));
                }

                if let Some(fresh) = candidate.take() {
                    debug_assert_eq!(fresh.key(), key);
                    tree.insert(key, Arc::clone(&fresh));
                    return Ok((fresh, true));
                }
            }

            candidate = Some(make()?);
        }
    }

    /// Return the item at `key`, if present
    pub(crate) fn lookup(&self, key: u64) -> Option<Arc<T>> {
        self.tree.lock().get(&key).cloned()
    }

    /// Remove and return the item at `key`; idempotent
    pub(crate) fn remove(&self, key: u64) -> Option<Arc<T>> {
        self.tree.lock().remove(&key)
    }

    /// Remove the item at `key` only if `pred` approves it
    ///
    /// `pred` runs under the index lock against the index's own
    /// reference.
    pub(crate) fn remove_if<F>(&self, key: u64, pred: F) -> Option<Arc<T>>
    where
        F: FnOnce(&Arc<T>) -> bool,
    {
        let mut tree = self.tree.lock();
        if pred(tree.get(&key)?) {
            tree.remove(&key)
        } else {
            None
        }
    }

    /// Whether `key` currently maps to this exact item
    pub(crate) fn contains(&self, key: u64, item: &Arc<T>) -> bool {
        self.tree
            .lock()
            .get(&key)
            .is_some_and(|held| Arc::ptr_eq(held, item))
    }

    /// Take every item out of the index
    pub(crate) fn drain(&self) -> Vec<Arc<T>> {
        let mut tree = self.tree.lock();
        let drained = std::mem::take(&mut *tree);
        drained.into_values().collect()
    }

    /// Snapshot up to `cap` items with keys strictly above `cursor`
    ///
    /// Traversals take bounded chunks so the lock is never held across
    /// per-item work.
    pub(crate) fn scan_from(&self, cursor: Option<u64>, cap: usize) -> Vec<Arc<T>> {
        let tree = self.tree.lock();
        let lower = match cursor {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        tree.range((lower, Bound::Unbounded))
            .take(cap)
            .map(|(_, item)| Arc::clone(item))
            .collect()
    }

    /// Number of indexed items
    pub(crate) fn len(&self) -> usize {
        self.tree.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct Node {
        key: u64,
    }

    impl Keyed for Node {
        fn key(&self) -> u64 {
            self.key
        }
    }

    fn make(key: u64) -> impl FnMut() -> Result<Arc<Node>, Status> {
        move || Ok(Arc::new(Node { key }))
    }

    #[test]
    fn test_find_or_insert_then_lookup() {
        let index = TrackIndex::new();

        let (first, inserted) = index.find_or_insert(7, make(7)).unwrap();
        assert!(inserted);
        assert_eq!(first.key(), 7);

        let (second, inserted) = index.find_or_insert(7, make(7)).unwrap();
        assert!(!inserted);
        assert!(Arc::ptr_eq(&first, &second));

        assert!(index.lookup(7).is_some());
        assert!(index.lookup(8).is_none());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_allocation_failure_propagates() {
        let index: TrackIndex<Node> = TrackIndex::new();
        let result = index.find_or_insert(1, || Err(Status::OutOfMemory));
        assert_eq!(result.err(), Some(Status::OutOfMemory));
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let index = TrackIndex::new();
        index.find_or_insert(3, make(3)).unwrap();

        assert!(index.remove(3).is_some());
        assert!(index.remove(3).is_none());
        assert!(index.lookup(3).is_none());
    }

    #[test]
    fn test_remove_if_respects_predicate() {
        let index = TrackIndex::new();
        let (held, _) = index.find_or_insert(9, make(9)).unwrap();

        // Index reference plus ours: a sharer-count gate of 1 refuses.
        assert!(
            index
                .remove_if(9, |item| Arc::strong_count(item) == 1)
                .is_none()
        );
        assert!(index.lookup(9).is_some());

        drop(held);
        assert!(
            index
                .remove_if(9, |item| Arc::strong_count(item) == 1)
                .is_some()
        );
        assert!(index.lookup(9).is_none());
    }

    #[test]
    fn test_scan_from_is_ordered_and_chunked() {
        let index = TrackIndex::new();
        for key in [5u64, 1, 9, 3, 7] {
            index.find_or_insert(key, make(key)).unwrap();
        }

        let first = index.scan_from(None, 2);
        assert_eq!(
            first.iter().map(|n| n.key()).collect::<Vec<_>>(),
            vec![1, 3]
        );

        let rest = index.scan_from(Some(3), 16);
        assert_eq!(
            rest.iter().map(|n| n.key()).collect::<Vec<_>>(),
            vec![5, 7, 9]
        );

        assert!(index.scan_from(Some(9), 16).is_empty());
    }

    #[test]
    fn test_drain_empties_index() {
        let index = TrackIndex::new();
        for key in 0..4 {
            index.find_or_insert(key, make(key)).unwrap();
        }

        let drained = index.drain();
        assert_eq!(drained.len(), 4);
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_concurrent_insert_race_has_one_winner() {
        let index = Arc::new(TrackIndex::new());
        let installs = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let index = Arc::clone(&index);
                let installs = Arc::clone(&installs);
                thread::spawn(move || {
                    let (item, inserted) = index.find_or_insert(42, make(42)).unwrap();
                    if inserted {
                        installs.fetch_add(1, Ordering::AcqRel);
                    }
                    item.key()
                })
            })
            .collect();

        for handle in threads {
            assert_eq!(handle.join().unwrap(), 42);
        }

        assert_eq!(installs.load(Ordering::Acquire), 1);
        assert_eq!(index.len(), 1);
    }
}
