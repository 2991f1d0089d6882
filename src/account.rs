//! Memory accounting for tracked items
//!
//! Every installed item charges its footprint here; teardown discharges
//! it before the deferred free runs. The high-watermark governor and the
//! shrinker count callback both read these totals.

use std::sync::atomic::{AtomicU64, Ordering};

/// Bytes and item count attributed to live tracked items
#[derive(Debug, Default)]
pub struct SizeAccount {
    bytes: AtomicU64,
    items: AtomicU64,
}

/// Point-in-time memory usage snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Total bytes held by live items
    pub bytes: u64,
    /// Number of live items
    pub items: u64,
}

impl SizeAccount {
    /// Create an empty account
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute one item of `bytes` to the account
    pub fn charge(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::AcqRel);
        self.items.fetch_add(1, Ordering::AcqRel);
    }

    /// Release one item of `bytes` from the account
    pub fn discharge(&self, bytes: u64) {
        let prev_bytes = self.bytes.fetch_sub(bytes, Ordering::AcqRel);
        let prev_items = self.items.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev_bytes >= bytes, "size account bytes underflow");
        debug_assert!(prev_items >= 1, "size account item underflow");
    }

    /// Total bytes held by live items
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Acquire)
    }

    /// Number of live items
    pub fn items(&self) -> u64 {
        self.items.load(Ordering::Acquire)
    }

    /// Snapshot both totals
    pub fn usage(&self) -> MemoryUsage {
        MemoryUsage {
            bytes: self.bytes(),
            items: self.items(),
        }
    }
}
