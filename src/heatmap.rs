//! Heat-bucket index
//!
//! For each item kind the map keeps [`MAP_SIZE`](crate::constants::MAP_SIZE)
//! FIFO lists, one per coarse temperature band. An item lives in at most
//! one bucket, selected by the top bits of its last published
//! temperature; the aging worker migrates items between buckets as their
//! temperature drifts. Buckets hold weak links only — ownership stays
//! with the indices.
//!
//! Lists are keyed by a monotone insertion sequence, which gives FIFO
//! iteration (eviction takes the oldest links first) and cheap unlink by
//! sequence number. An item's link state is mutated only under the map
//! lock.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::constants::MAP_SIZE;
use crate::freq::{FreqSample, bucket_of};

/// Sentinel bucket value for "not linked"
const UNLINKED: u32 = u32::MAX;

/// Items that can be placed in a heat map
pub(crate) trait Bucketed {
    /// The item's embedded link state
    fn heat_node(&self) -> &HeatNode;
    /// The item's frequency sample
    fn freq(&self) -> &FreqSample;
}

/// Per-item heat-map link state
///
/// Fields are atomics only so the item stays `Sync`; they are read and
/// written exclusively under the owning map's lock.
#[derive(Debug)]
pub(crate) struct HeatNode {
    bucket: AtomicU32,
    seq: AtomicU64,
}

impl HeatNode {
    pub(crate) fn new() -> Self {
        Self {
            bucket: AtomicU32::new(UNLINKED),
            seq: AtomicU64::new(0),
        }
    }

    /// Current bucket index, or `None` when unlinked
    fn bucket(&self) -> Option<usize> {
        match self.bucket.load(Ordering::Relaxed) {
            UNLINKED => None,
            bucket => Some(bucket as usize),
        }
    }

    fn seq(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }

    fn set(&self, bucket: usize, seq: u64) {
        self.bucket.store(bucket as u32, Ordering::Relaxed);
        self.seq.store(seq, Ordering::Relaxed);
    }

    fn clear(&self) {
        self.bucket.store(UNLINKED, Ordering::Relaxed);
    }
}

struct BucketArray<T> {
    lists: Vec<BTreeMap<u64, Weak<T>>>,
    next_seq: u64,
}

impl<T> BucketArray<T> {
    fn push(&mut self, bucket: usize, link: Weak<T>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.lists[bucket].insert(seq, link);
        seq
    }
}

/// Bucketed temperature index over one item kind
pub(crate) struct HeatMap<T> {
    buckets: Mutex<BucketArray<T>>,
}

impl<T: Bucketed> HeatMap<T> {
    pub(crate) fn new() -> Self {
        Self {
            buckets: Mutex::new(BucketArray {
                lists: (0..MAP_SIZE).map(|_| BTreeMap::new()).collect(),
                next_seq: 0,
            }),
        }
    }

    /// Link a freshly installed item
    ///
    /// A new item has no published temperature yet and lands in bucket 0.
    pub(crate) fn link(&self, item: &Arc<T>) {
        let mut buckets = self.buckets.lock();
        let node = item.heat_node();
        debug_assert!(node.bucket().is_none(), "item already linked");

        let bucket = bucket_of(item.freq().last_temp());
        let seq = buckets.push(bucket, Arc::downgrade(item));
        node.set(bucket, seq);
    }

    /// Unlink an item; idempotent
    pub(crate) fn unlink(&self, item: &T) {
        let mut buckets = self.buckets.lock();
        let node = item.heat_node();
        if let Some(bucket) = node.bucket() {
            buckets.lists[bucket].remove(&node.seq());
            node.clear();
        }
    }

    /// Recompute the item's temperature and migrate it if its band changed
    pub(crate) fn rebucket(&self, item: &Arc<T>, now: u64) {
        let temp = item.freq().temperature(now);
        let new_bucket = bucket_of(temp);

        let mut buckets = self.buckets.lock();
        let node = item.heat_node();
        let Some(old_bucket) = node.bucket() else {
            // Concurrently unlinked; the teardown owns it now.
            return;
        };

        if old_bucket != new_bucket {
            buckets.lists[old_bucket].remove(&node.seq());
            let seq = buckets.push(new_bucket, Arc::downgrade(item));
            node.set(new_bucket, seq);
        }
        item.freq().store_last_temp(temp);
    }

    /// Oldest live links in `bucket`, up to `cap`
    ///
    /// Dead links (items whose owner already dropped them) are pruned on
    /// the way through.
    pub(crate) fn candidates(&self, bucket: usize, cap: usize) -> Vec<Arc<T>> {
        let mut buckets = self.buckets.lock();
        let list = &mut buckets.lists[bucket];

        let mut live = Vec::new();
        let mut dead = Vec::new();
        for (&seq, link) in list.iter() {
            if live.len() == cap {
                break;
            }
            match link.upgrade() {
                Some(item) => live.push(item),
                None => dead.push(seq),
            }
        }
        for seq in dead {
            list.remove(&seq);
        }
        live
    }

    /// Resumable FIFO walk over `bucket` for the evictor
    ///
    /// Examines up to `cap` links past `cursor`, pruning dead ones.
    /// Returns the live items plus the cursor to continue from, or
    /// `None` when the bucket is exhausted. Skipped (in-use) items do
    /// not stall the walk: the cursor advances past them.
    pub(crate) fn candidates_from(
        &self,
        bucket: usize,
        cursor: Option<u64>,
        cap: usize,
    ) -> (Vec<Arc<T>>, Option<u64>) {
        let mut buckets = self.buckets.lock();
        let list = &mut buckets.lists[bucket];

        let lower = match cursor {
            Some(seq) => Bound::Excluded(seq),
            None => Bound::Unbounded,
        };

        let mut live = Vec::new();
        let mut dead = Vec::new();
        let mut examined = 0;
        let mut last = None;
        for (&seq, link) in list.range((lower, Bound::Unbounded)) {
            if examined == cap {
                break;
            }
            examined += 1;
            last = Some(seq);
            match link.upgrade() {
                Some(item) => live.push(item),
                None => dead.push(seq),
            }
        }
        for seq in dead {
            list.remove(&seq);
        }

        let next = if examined == cap { last } else { None };
        (live, next)
    }

    /// Up to `n` live items, hottest bucket first
    pub(crate) fn hottest(&self, n: usize) -> Vec<Arc<T>> {
        let mut out = Vec::new();
        for bucket in (0..MAP_SIZE).rev() {
            if out.len() == n {
                break;
            }
            out.extend(self.candidates(bucket, n - out.len()));
        }
        out
    }

    /// Up to `n` live items, coldest bucket first
    pub(crate) fn coldest(&self, n: usize) -> Vec<Arc<T>> {
        let mut out = Vec::new();
        for bucket in 0..MAP_SIZE {
            if out.len() == n {
                break;
            }
            out.extend(self.candidates(bucket, n - out.len()));
        }
        out
    }

    /// Number of links currently in `bucket`, dead ones included
    #[cfg(test)]
    pub(crate) fn bucket_len(&self, bucket: usize) -> usize {
        self.buckets.lock().lists[bucket].len()
    }
}
