//! Tracker root: lifecycle, ingress, eviction
//!
//! A [`HotTracker`] is installed per filesystem. It owns the inode index,
//! the heat maps for both item kinds, the size account, the epoch
//! service, and the aging worker. Ingress ([`HotTracker::record_access`])
//! is the fast path invoked from I/O hooks; it upserts the touched items
//! and folds the access into their frequency samples without ever
//! blocking on more than a short critical section or an allocation.
//!
//! Eviction is shared between two callers: the high-watermark governor
//! run by the aging worker, and the shrinker scan callback driven by
//! external memory pressure. Both walk the inode heat buckets coldest
//! first and drop items whose only remaining reference is the index's.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::account::{MemoryUsage, SizeAccount};
use crate::clock::{Clock, SystemClock};
use crate::config::{Knobs, TrackerConfig};
use crate::constants::{MAP_SIZE, RANGE_BITS, RANGE_SIZE};
use crate::epoch::{Epoch, Retired};
use crate::freq::HeatInfo;
use crate::heatmap::HeatMap;
use crate::index::TrackIndex;
use crate::item::{self, InodeItem, RangeItem};
use crate::shrink::{ScanControl, ScanOutcome, Shrinker};
use crate::status::Status;
use crate::worker::AgingWorker;

/// Items pulled from a heat bucket per eviction batch
const EVICT_BATCH: usize = 64;

/// Items pulled from an index per rebucket traversal chunk
const SCAN_CHUNK: usize = 64;

/// Metric an eviction budget is denominated in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictMetric {
    /// Budget counts bytes returned to the size account
    Bytes,
    /// Budget counts items freed
    Count,
}

/// Per-filesystem hot-tracking root
pub struct HotTracker {
    enabled: AtomicBool,
    knobs: Knobs,
    clock: Arc<dyn Clock>,
    epoch: Epoch,
    account: SizeAccount,
    inodes: TrackIndex<InodeItem>,
    inode_map: HeatMap<InodeItem>,
    range_map: HeatMap<RangeItem>,
    worker: Mutex<Option<AgingWorker>>,
}

impl HotTracker {
    /// Install a tracker using the system wall clock
    pub fn enable(config: TrackerConfig) -> Result<Arc<Self>, Status> {
        Self::enable_with_clock(config, Arc::new(SystemClock))
    }

    /// Install a tracker with an explicit clock collaborator
    pub fn enable_with_clock(
        config: TrackerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, Status> {
        let start_worker = config.start_worker;

        let tracker = Arc::new(Self {
            enabled: AtomicBool::new(true),
            knobs: Knobs::from_config(&config),
            clock,
            epoch: Epoch::new(),
            account: SizeAccount::new(),
            inodes: TrackIndex::new(),
            inode_map: HeatMap::new(),
            range_map: HeatMap::new(),
            worker: Mutex::new(None),
        });

        if start_worker {
            *tracker.worker.lock() = Some(AgingWorker::spawn(Arc::downgrade(&tracker)));
        }

        info!("hot tracking enabled");
        Ok(tracker)
    }

    /// Whether ingress currently records anything
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Stop tracking and release every tracked item
    ///
    /// Cancels the worker synchronously, tears down all items, and drains
    /// the epoch service. Ingress callers must have quiesced; concurrent
    /// `record_access` calls racing past the enabled check may leave
    /// their items untracked but unharmed.
    pub fn disable(&self) {
        if !self.enabled.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(worker) = self.worker.lock().take() {
            worker.stop();
        }

        for inode in self.inodes.drain() {
            self.teardown_inode(inode);
        }

        self.epoch.barrier();
        info!("hot tracking disabled");
    }

    /// Record one I/O against `[offset, offset + length)` of `file_id`
    ///
    /// The caller guards file-type preconditions (regular file, non-zero
    /// link count). Infallible: allocation or protection-slot failure
    /// drops the sample and later calls proceed normally.
    pub fn record_access(&self, file_id: u64, offset: u64, length: u64, is_write: bool) {
        if !self.is_enabled() || length == 0 {
            return;
        }

        let _guard = match self.epoch.pin() {
            Ok(guard) => guard,
            Err(status) => {
                warn!(%status, "dropping access sample");
                return;
            }
        };

        let now = self.clock.now_ns();

        let inode = match self.upsert_inode(file_id) {
            Ok(inode) => inode,
            Err(status) => {
                warn!(file_id, %status, "dropping access sample");
                return;
            }
        };
        inode.freq().record(now, is_write);

        // Ranges are aligned on the range-size boundary to bound the
        // number of range structs a large file can fan out into.
        let end = offset
            .saturating_add(length)
            .saturating_add(RANGE_SIZE - 1)
            >> RANGE_BITS;
        let mut cur = offset >> RANGE_BITS;
        while cur < end {
            match self.upsert_range(&inode, cur << RANGE_BITS) {
                Ok(range) => range.freq().record(now, is_write),
                Err(status) => {
                    warn!(file_id, %status, "dropping range sample");
                    break;
                }
            }
            cur += 1;
        }

        // A forced unlink may have raced us; anything we installed after
        // its teardown drained the trees must not outlive the item.
        if !self.inodes.contains(file_id, &inode) {
            self.retire_orphan(&inode);
        }
    }

    /// Drop the item for `file_id` immediately, ranges included
    ///
    /// Forced removal: outstanding caller references keep the memory
    /// alive through the grace period but the item leaves the index and
    /// the heat map now. Later accesses re-create it cleanly.
    pub fn on_unlink(&self, file_id: u64) {
        if !self.is_enabled() {
            return;
        }

        if let Some(inode) = self.inodes.remove(file_id) {
            self.teardown_inode(inode);
        }
    }

    /// Heat report for a tracked file
    pub fn inode_heat_info(&self, file_id: u64) -> Option<HeatInfo> {
        self.inodes.lookup(file_id).map(|inode| inode.heat_info())
    }

    /// Heat report for the tracked range containing `offset`
    pub fn range_heat_info(&self, file_id: u64, offset: u64) -> Option<HeatInfo> {
        let inode = self.inodes.lookup(file_id)?;
        inode
            .ranges()
            .lookup(item::range_start(offset))
            .map(|range| range.heat_info())
    }

    /// Up to `n` tracked files, hottest first, with their temperatures
    pub fn hottest_inodes(&self, n: usize) -> Vec<(u64, u32)> {
        self.inode_map
            .hottest(n)
            .iter()
            .map(|inode| (inode.file_id(), inode.freq().last_temp()))
            .collect()
    }

    /// Up to `n` tracked files, coldest first, with their temperatures
    pub fn coldest_inodes(&self, n: usize) -> Vec<(u64, u32)> {
        self.inode_map
            .coldest(n)
            .iter()
            .map(|inode| (inode.file_id(), inode.freq().last_temp()))
            .collect()
    }

    /// Current memory attributed to tracked items
    pub fn usage(&self) -> MemoryUsage {
        self.account.usage()
    }

    /// Shrinker callback: number of live items
    pub fn count_objects(&self) -> u64 {
        self.account.items()
    }

    /// Shrinker callback: evict up to `nr_to_scan` items
    ///
    /// Honors the avoid-fs-recursion flag by declining to do any work.
    pub fn scan_objects(&self, nr_to_scan: u64, control: ScanControl) -> ScanOutcome {
        if control.avoid_fs_recursion || !self.is_enabled() {
            return ScanOutcome::Stop;
        }

        ScanOutcome::Freed(self.evict(nr_to_scan, EvictMetric::Count))
    }

    /// Detached count/scan handle for the host's memory-pressure hookup
    pub fn shrinker(self: &Arc<Self>) -> Shrinker {
        Shrinker::new(Arc::downgrade(self))
    }

    /// One aging pass: memory governor, rebucket every item, then drop
    /// parked references whose grace period has ended
    ///
    /// This is the worker tick body; tests drive it directly to age items
    /// deterministically.
    pub fn sweep(&self) {
        if !self.is_enabled() {
            return;
        }

        self.apply_memory_pressure();
        self.rebucket_all();
        self.epoch.flush();
    }

    /// Set the high watermark in MiB; `0` disables the governor
    pub fn set_mem_high_thresh_mib(&self, mib: u64) {
        self.knobs.set_mem_high_thresh_mib(mib);
    }

    /// Set the aging worker cadence in seconds
    pub fn set_update_interval_secs(&self, secs: u64) {
        self.knobs.set_update_interval_secs(secs);
    }

    /// Current aging worker cadence
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.knobs.update_interval_secs())
    }

    fn upsert_inode(&self, file_id: u64) -> Result<Arc<InodeItem>, Status> {
        let (inode, inserted) = self
            .inodes
            .find_or_insert(file_id, || Ok(item::alloc_inode(file_id)))?;
        if inserted {
            self.account.charge(InodeItem::footprint());
            self.inode_map.link(&inode);
        }
        Ok(inode)
    }

    fn upsert_range(&self, inode: &InodeItem, start: u64) -> Result<Arc<RangeItem>, Status> {
        let (range, inserted) = inode
            .ranges()
            .find_or_insert(start, || Ok(item::alloc_range(start)))?;
        if inserted {
            self.account.charge(RangeItem::footprint());
            self.range_map.link(&range);
        }
        Ok(range)
    }

    /// Unlink an already-removed inode everywhere and retire its memory
    ///
    /// Returns the bytes and item count released. The size account is
    /// settled before the deferred frees run.
    fn teardown_inode(&self, inode: Arc<InodeItem>) -> (u64, u64) {
        let mut bytes = 0;
        let mut items = 0;

        for range in inode.ranges().drain() {
            self.range_map.unlink(&range);
            self.account.discharge(RangeItem::footprint());
            bytes += RangeItem::footprint();
            items += 1;
            self.epoch.retire(Retired::Range(range));
        }

        self.inode_map.unlink(&inode);
        self.account.discharge(InodeItem::footprint());
        bytes += InodeItem::footprint();
        items += 1;
        self.epoch.retire(Retired::Inode(inode));

        (bytes, items)
    }

    /// Unwind an ingress that lost a race against a forced unlink
    ///
    /// The teardown already discharged the inode itself; only links and
    /// ranges installed after its drain remain to clean up. Both paths
    /// drain disjoint sets, so nothing is discharged twice.
    fn retire_orphan(&self, inode: &Arc<InodeItem>) {
        self.inode_map.unlink(inode);
        for range in inode.ranges().drain() {
            self.range_map.unlink(&range);
            self.account.discharge(RangeItem::footprint());
            self.epoch.retire(Retired::Range(range));
        }
    }

    /// Evict cold items until `budget` of `metric` has been released
    ///
    /// Walks inode buckets coldest first, FIFO within a bucket. An item
    /// is evictable only while the index holds its sole reference; the
    /// sharer count is probed under the index lock, where no new clone
    /// can appear. Range items ride out with their owning inode. Returns
    /// the number of items freed.
    pub(crate) fn evict(&self, budget: u64, metric: EvictMetric) -> u64 {
        let _guard = self.epoch.pin().ok();

        let mut remaining = budget;
        let mut freed_items = 0;

        for bucket in 0..MAP_SIZE {
            if remaining == 0 {
                break;
            }

            let mut cursor = None;
            loop {
                let (batch, next) = self.inode_map.candidates_from(bucket, cursor, EVICT_BATCH);

                for candidate in batch {
                    if remaining == 0 {
                        break;
                    }

                    // Two references: the index's and our candidate.
                    // Anything above that means a caller is using it.
                    let Some(inode) = self
                        .inodes
                        .remove_if(candidate.file_id(), |held| Arc::strong_count(held) == 2)
                    else {
                        continue;
                    };

                    let (bytes, items) = self.teardown_inode(inode);
                    freed_items += items;
                    remaining = remaining.saturating_sub(match metric {
                        EvictMetric::Bytes => bytes,
                        EvictMetric::Count => items,
                    });
                }

                if remaining == 0 || next.is_none() {
                    break;
                }
                cursor = next;
            }

            std::thread::yield_now();
        }

        freed_items
    }

    fn apply_memory_pressure(&self) {
        let thresh_mib = self.knobs.mem_high_thresh_mib();
        if thresh_mib == 0 {
            return;
        }

        let thresh = thresh_mib << 20;
        let bytes = self.account.bytes();
        if bytes > thresh {
            self.evict(bytes - thresh, EvictMetric::Bytes);
        }
    }

    /// Recompute every item's temperature and migrate heat buckets
    ///
    /// Traverses the inode index in key order in bounded chunks, range
    /// trees under their per-inode lock only long enough to snapshot a
    /// chunk. Runs under an epoch pin so teardown on other threads defers
    /// its frees past this traversal.
    fn rebucket_all(&self) {
        let _guard = match self.epoch.pin() {
            Ok(guard) => guard,
            Err(status) => {
                warn!(%status, "skipping aging pass");
                return;
            }
        };

        let now = self.clock.now_ns();
        let mut cursor = None;

        loop {
            let chunk = self.inodes.scan_from(cursor, SCAN_CHUNK);
            let Some(last) = chunk.last() else {
                break;
            };
            cursor = Some(last.file_id());

            for inode in &chunk {
                self.inode_map.rebucket(inode, now);

                let mut range_cursor = None;
                loop {
                    let ranges = inode.ranges().scan_from(range_cursor, SCAN_CHUNK);
                    let Some(last) = ranges.last() else {
                        break;
                    };
                    range_cursor = Some(last.start());

                    for range in &ranges {
                        self.range_map.rebucket(range, now);
                    }
                }
            }

            std::thread::yield_now();
        }
    }
}

impl std::fmt::Debug for HotTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotTracker")
            .field("enabled", &self.is_enabled())
            .field("usage", &self.usage())
            .finish()
    }
}
