//! Epoch-based deferred reclamation
//!
//! Items unlinked from the indices cannot be freed in place: the aging
//! worker and the evictor may still be walking them. Teardown instead
//! parks the index's counted reference in a limbo queue stamped with the
//! epoch at parking time; the reference is dropped once every protected
//! region that began before the parking has ended.
//!
//! Only two kinds of reference ever wait out a grace period here, so the
//! queue holds them directly as [`Retired`] cases and reclamation is the
//! drop itself. Parked references become ripe when the reclamation
//! horizon passes their stamp; ripe entries are reclaimed on the next
//! [`Epoch::retire`], aging sweep, or [`Epoch::barrier`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

use parking_lot::Mutex;

use crate::constants::MAX_THREADS;
use crate::item::{InodeItem, RangeItem};
use crate::status::Status;

/// Epoch value meaning "slot idle"
const IDLE: u64 = 0;

// ============ Thread slot allocation ============

static NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);

static FREE_SLOTS: OnceLock<Mutex<Vec<usize>>> = OnceLock::new();

fn free_slots() -> &'static Mutex<Vec<usize>> {
    FREE_SLOTS.get_or_init(|| Mutex::new(Vec::new()))
}

struct SlotGuard {
    id: usize,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(free) = FREE_SLOTS.get() {
            free.lock().push(self.id);
        }
    }
}

fn try_allocate_slot() -> Option<SlotGuard> {
    if let Some(id) = free_slots().lock().pop() {
        return Some(SlotGuard { id });
    }

    match NEXT_SLOT.fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
        if next < MAX_THREADS { Some(next + 1) } else { None }
    }) {
        Ok(id) => Some(SlotGuard { id }),
        // Another thread may have just returned a slot. Re-check before
        // giving up.
        Err(_) => free_slots().lock().pop().map(|id| SlotGuard { id }),
    }
}

thread_local! {
    static THREAD_SLOT: RefCell<Option<SlotGuard>> = const { RefCell::new(None) };
}

/// Get this thread's protection slot, allocating one on first use
///
/// # Errors
///
/// Returns `Status::TooManyThreads` when more than
/// [`MAX_THREADS`](crate::constants::MAX_THREADS) threads concurrently
/// use the tracker.
pub fn thread_slot() -> Result<usize, Status> {
    THREAD_SLOT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if let Some(guard) = slot.as_ref() {
            return Ok(guard.id);
        }

        let guard = try_allocate_slot().ok_or(Status::TooManyThreads)?;
        let id = guard.id;
        *slot = Some(guard);
        Ok(id)
    })
}

// ============ Protection table and limbo queue ============

/// Per-thread protection slot, padded to its own cache line
#[repr(C, align(64))]
struct Slot {
    /// Epoch this thread pinned under; `IDLE` when outside
    entered: AtomicU64,
    /// Nesting depth of pins on this slot
    nesting: AtomicU32,
    _padding: [u8; 64 - 12],
}

impl Slot {
    const fn new() -> Self {
        Self {
            entered: AtomicU64::new(IDLE),
            nesting: AtomicU32::new(0),
            _padding: [0; 64 - 12],
        }
    }
}

/// An index reference waiting out its grace period
pub(crate) enum Retired {
    /// A torn-down file item
    Inode(Arc<InodeItem>),
    /// A torn-down range item
    Range(Arc<RangeItem>),
}

/// Grace-period reclamation service
///
/// [`Epoch::retire`] guarantees the parked reference is dropped only
/// after every protected region that began before the call has ended.
/// [`Epoch::barrier`] reclaims everything outstanding and is the
/// shutdown quiescence point.
pub struct Epoch {
    table: Box<[Slot]>,
    /// Epoch-stamped parked references, oldest first
    limbo: Mutex<VecDeque<(u64, Retired)>>,
    pending: AtomicUsize,
    current: AtomicU64,
}

impl Epoch {
    /// Create a new epoch service
    pub fn new() -> Self {
        Self {
            table: (0..MAX_THREADS).map(|_| Slot::new()).collect(),
            limbo: Mutex::new(VecDeque::new()),
            pending: AtomicUsize::new(0),
            current: AtomicU64::new(1),
        }
    }

    /// Enter a protected region on the calling thread
    ///
    /// Nested pins are cheap; the region ends when the outermost guard
    /// drops. While any guard from before a `retire` is held, that
    /// retired reference stays parked.
    pub fn pin(&self) -> Result<Guard<'_>, Status> {
        let slot = thread_slot()?;
        let entry = &self.table[slot];

        if entry.nesting.fetch_add(1, Ordering::AcqRel) == 0 {
            let epoch = self.current.load(Ordering::Acquire);
            entry.entered.store(epoch, Ordering::Release);
        }

        Ok(Guard { epoch: self, slot })
    }

    /// Check whether a slot is inside a protected region
    pub fn is_pinned(&self, slot: usize) -> bool {
        debug_assert!(slot < MAX_THREADS);
        self.table[slot].entered.load(Ordering::Acquire) != IDLE
    }

    fn unpin(&self, slot: usize) {
        let entry = &self.table[slot];
        if entry.nesting.fetch_sub(1, Ordering::AcqRel) == 1 {
            entry.entered.store(IDLE, Ordering::Release);
        }
    }

    /// Park an index reference until the current grace period ends
    ///
    /// Also reclaims whatever became ripe in the meantime, so steady
    /// teardown traffic keeps the limbo queue short.
    pub(crate) fn retire(&self, item: Retired) {
        {
            // Stamping under the lock keeps the queue ordered by epoch,
            // which lets reclamation stop at the first unripe entry.
            let mut limbo = self.limbo.lock();
            let epoch = self.current.fetch_add(1, Ordering::AcqRel);
            limbo.push_back((epoch, item));
        }
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.flush();
    }

    /// Drop every parked reference whose grace period has ended
    pub(crate) fn flush(&self) {
        if self.pending.load(Ordering::Acquire) == 0 {
            return;
        }

        let horizon = self.reclaim_horizon();
        let ripe: Vec<(u64, Retired)> = {
            let mut limbo = self.limbo.lock();
            let ripe_len = limbo
                .iter()
                .take_while(|(stamp, _)| *stamp <= horizon)
                .count();
            limbo.drain(..ripe_len).collect()
        };
        if ripe.is_empty() {
            return;
        }

        let count = ripe.len();
        for (_, retired) in ripe {
            match retired {
                Retired::Inode(inode) => drop(inode),
                Retired::Range(range) => drop(range),
            }
        }
        self.pending.fetch_sub(count, Ordering::AcqRel);
    }

    /// Reclaim every outstanding parked reference
    ///
    /// Spins until the limbo queue is empty. All threads must eventually
    /// leave their protected regions for this to return; it is intended
    /// for shutdown, after new entries have been fenced off.
    pub fn barrier(&self) {
        while self.pending.load(Ordering::Acquire) > 0 {
            self.flush();
            thread::yield_now();
        }
    }

    /// Newest epoch whose parked references are safe to drop
    ///
    /// One less than the oldest epoch any pinned thread still sees: a
    /// reference parked at epoch `e` may have been observed by any
    /// region that entered at or before `e`.
    fn reclaim_horizon(&self) -> u64 {
        let oldest = self
            .table
            .iter()
            .map(|slot| slot.entered.load(Ordering::Acquire))
            .filter(|&seen| seen != IDLE)
            .min()
            .unwrap_or_else(|| self.current.load(Ordering::Acquire));

        oldest.saturating_sub(1)
    }
}

impl Default for Epoch {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII protected-region guard returned by [`Epoch::pin`]
pub struct Guard<'a> {
    epoch: &'a Epoch,
    slot: usize,
}

impl Guard<'_> {
    /// Protection slot held by this guard
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        self.epoch.unpin(self.slot);
    }
}
