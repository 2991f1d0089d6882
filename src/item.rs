//! Tracked items
//!
//! An [`InodeItem`] exists per tracked file and owns an ordered index of
//! [`RangeItem`]s, one per touched aligned sub-file range. Both carry a
//! frequency sample and a heat-map link. Items are shared through `Arc`:
//! the owning index holds one reference, every caller returned an item
//! holds another, and the backing memory is released through the epoch
//! service once the last reference drops after removal.

use std::sync::Arc;

use crate::constants::{RANGE_BITS, RANGE_SIZE};
use crate::freq::{FreqSample, HeatInfo};
use crate::heatmap::{Bucketed, HeatNode};
use crate::index::{Keyed, TrackIndex};

/// Per-file tracking state
#[derive(Debug)]
pub struct InodeItem {
    file_id: u64,
    freq: FreqSample,
    node: HeatNode,
    ranges: TrackIndex<RangeItem>,
}

impl InodeItem {
    pub(crate) fn new(file_id: u64) -> Self {
        Self {
            file_id,
            freq: FreqSample::new(),
            node: HeatNode::new(),
            ranges: TrackIndex::new(),
        }
    }

    /// Identifier of the tracked file
    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    /// This file's frequency sample
    pub fn freq(&self) -> &FreqSample {
        &self.freq
    }

    pub(crate) fn ranges(&self) -> &TrackIndex<RangeItem> {
        &self.ranges
    }

    /// Bytes this item charges to the size account
    pub(crate) fn footprint() -> u64 {
        std::mem::size_of::<Self>() as u64
    }

    /// Snapshot into the fixed reporting layout
    pub fn heat_info(&self) -> HeatInfo {
        self.freq.heat_info(true)
    }
}

impl Keyed for InodeItem {
    fn key(&self) -> u64 {
        self.file_id
    }
}

impl Bucketed for InodeItem {
    fn heat_node(&self) -> &HeatNode {
        &self.node
    }

    fn freq(&self) -> &FreqSample {
        &self.freq
    }
}

/// Per-range tracking state within one file
#[derive(Debug)]
pub struct RangeItem {
    start: u64,
    len: u64,
    freq: FreqSample,
    node: HeatNode,
}

impl RangeItem {
    pub(crate) fn new(start: u64) -> Self {
        debug_assert_eq!(start % RANGE_SIZE, 0, "range start must be aligned");
        Self {
            start,
            len: RANGE_SIZE,
            freq: FreqSample::new(),
            node: HeatNode::new(),
        }
    }

    /// Aligned byte offset of this range within its file
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Width of this range in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// This range's frequency sample
    pub fn freq(&self) -> &FreqSample {
        &self.freq
    }

    /// Bytes this item charges to the size account
    pub(crate) fn footprint() -> u64 {
        std::mem::size_of::<Self>() as u64
    }

    /// Snapshot into the fixed reporting layout
    pub fn heat_info(&self) -> HeatInfo {
        self.freq.heat_info(true)
    }
}

impl Keyed for RangeItem {
    fn key(&self) -> u64 {
        self.start
    }
}

impl Bucketed for RangeItem {
    fn heat_node(&self) -> &HeatNode {
        &self.node
    }

    fn freq(&self) -> &FreqSample {
        &self.freq
    }
}

/// Align a byte offset down to its containing range start
#[inline]
pub(crate) fn range_start(offset: u64) -> u64 {
    (offset >> RANGE_BITS) << RANGE_BITS
}

/// Allocate a fresh inode item behind a counted reference
pub(crate) fn alloc_inode(file_id: u64) -> Arc<InodeItem> {
    Arc::new(InodeItem::new(file_id))
}

/// Allocate a fresh range item behind a counted reference
pub(crate) fn alloc_range(start: u64) -> Arc<RangeItem> {
    Arc::new(RangeItem::new(start))
}
