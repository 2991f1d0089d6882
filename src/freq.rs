//! Frequency samples and the temperature function
//!
//! Each tracked item carries a [`FreqSample`]: monotone access counters,
//! last-access timestamps, and a moving average of the inter-access gap.
//! [`FreqSample::temperature`] collapses a sample into a 32-bit scalar;
//! the top [`MAP_BITS`](crate::constants::MAP_BITS) of that scalar select
//! the item's heat bucket.
//!
//! `avg_delta_{reads,writes}` are a simple moving average of the time
//! difference between each of the last `2^FREQ_POWER` accesses. They are
//! initialized to the largest possible value so that a few fast accesses
//! to a brand-new file do not automatically make it appear very hot.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bytemuck::{Pod, Zeroable};

use crate::constants::{FREQ_POWER, MAP_BITS};

/// Multiplier power for the read-count term
pub const NRR_MULT_POWER: u32 = 20;
/// Multiplier power for the write-count term
pub const NRW_MULT_POWER: u32 = 20;
/// Divider power for the last-read recency term
pub const LTR_DIV_POWER: u32 = 30;
/// Divider power for the last-write recency term
pub const LTW_DIV_POWER: u32 = 30;
/// Divider power for the read-gap term
pub const AVR_DIV_POWER: u32 = 40;
/// Divider power for the write-gap term
pub const AVW_DIV_POWER: u32 = 40;

/// Weight coefficient (0..=3) for the read-count term
pub const NRR_COEFF_POWER: u32 = 0;
/// Weight coefficient (0..=3) for the write-count term
pub const NRW_COEFF_POWER: u32 = 0;
/// Weight coefficient (0..=3) for the last-read recency term
pub const LTR_COEFF_POWER: u32 = 1;
/// Weight coefficient (0..=3) for the last-write recency term
pub const LTW_COEFF_POWER: u32 = 1;
/// Weight coefficient (0..=3) for the read-gap term
pub const AVR_COEFF_POWER: u32 = 0;
/// Weight coefficient (0..=3) for the write-gap term
pub const AVW_COEFF_POWER: u32 = 0;

/// Heat bucket index for a temperature value
#[inline]
pub const fn bucket_of(temp: u32) -> usize {
    (temp >> (32 - MAP_BITS)) as usize
}

/// Per-item access frequency state
///
/// All fields are atomic: ingress may run on any number of I/O threads
/// concurrently with the aging worker. Counter increments never lose
/// updates; the moving-average fold is load/compute/store and may drop a
/// concurrent update, which only delays convergence.
#[derive(Debug)]
pub struct FreqSample {
    last_read_time: AtomicU64,
    last_write_time: AtomicU64,
    nr_reads: AtomicU32,
    nr_writes: AtomicU32,
    avg_delta_reads: AtomicU64,
    avg_delta_writes: AtomicU64,
    last_temp: AtomicU32,
}

impl FreqSample {
    /// Create a zeroed sample with the gap averages biased fully cold
    pub fn new() -> Self {
        Self {
            last_read_time: AtomicU64::new(0),
            last_write_time: AtomicU64::new(0),
            nr_reads: AtomicU32::new(0),
            nr_writes: AtomicU32::new(0),
            avg_delta_reads: AtomicU64::new(u64::MAX),
            avg_delta_writes: AtomicU64::new(u64::MAX),
            last_temp: AtomicU32::new(0),
        }
    }

    /// Fold one access at time `now` into the sample
    ///
    /// The first access in each direction only stamps the timestamp; there
    /// is no previous access to measure a gap against, and folding one
    /// would spuriously warm the gap average.
    pub fn record(&self, now: u64, is_write: bool) {
        let (counter, last_time, avg_delta) = if is_write {
            (
                &self.nr_writes,
                &self.last_write_time,
                &self.avg_delta_writes,
            )
        } else {
            (&self.nr_reads, &self.last_read_time, &self.avg_delta_reads)
        };

        counter.fetch_add(1, Ordering::Relaxed);

        let last = last_time.load(Ordering::Relaxed);
        if last != 0 {
            let delta = now.saturating_sub(last) >> FREQ_POWER;
            let avg = avg_delta.load(Ordering::Relaxed);
            avg_delta.store(ema_fold(avg, delta), Ordering::Relaxed);
        }
        last_time.store(now, Ordering::Relaxed);
    }

    /// Compute the temperature of this sample as of time `now`
    ///
    /// Six terms: access counts, recency of the last read/write, and the
    /// inverted read/write gap averages. Each term is weighted by a
    /// right shift of `3 - *_COEFF_POWER`; the sum saturates at
    /// `u32::MAX`.
    pub fn temperature(&self, now: u64) -> u32 {
        let nr_reads = self.nr_reads.load(Ordering::Relaxed) as u64;
        let nr_writes = self.nr_writes.load(Ordering::Relaxed) as u64;
        let last_read = self.last_read_time.load(Ordering::Relaxed);
        let last_write = self.last_write_time.load(Ordering::Relaxed);
        let avg_delta_reads = self.avg_delta_reads.load(Ordering::Relaxed);
        let avg_delta_writes = self.avg_delta_writes.load(Ordering::Relaxed);

        let mut temp: u64 = 0;

        temp += (nr_reads << NRR_MULT_POWER) >> (3 - NRR_COEFF_POWER);
        temp += (nr_writes << NRW_MULT_POWER) >> (3 - NRW_COEFF_POWER);

        let read_age = now.saturating_sub(last_read) >> LTR_DIV_POWER;
        temp += (1u64 << 32).saturating_sub(read_age) >> (3 - LTR_COEFF_POWER);

        let write_age = now.saturating_sub(last_write) >> LTW_DIV_POWER;
        temp += (1u64 << 32).saturating_sub(write_age) >> (3 - LTW_COEFF_POWER);

        let read_gap = ((u64::MAX - avg_delta_reads) >> AVR_DIV_POWER).min(u32::MAX as u64);
        temp += read_gap >> (3 - AVR_COEFF_POWER);

        let write_gap = ((u64::MAX - avg_delta_writes) >> AVW_DIV_POWER).min(u32::MAX as u64);
        temp += write_gap >> (3 - AVW_COEFF_POWER);

        temp.min(u32::MAX as u64) as u32
    }

    /// Most recently published temperature
    #[inline]
    pub fn last_temp(&self) -> u32 {
        self.last_temp.load(Ordering::Acquire)
    }

    /// Publish a freshly computed temperature
    #[inline]
    pub(crate) fn store_last_temp(&self, temp: u32) {
        self.last_temp.store(temp, Ordering::Release);
    }

    /// Number of recorded reads
    #[inline]
    pub fn nr_reads(&self) -> u32 {
        self.nr_reads.load(Ordering::Relaxed)
    }

    /// Number of recorded writes
    #[inline]
    pub fn nr_writes(&self) -> u32 {
        self.nr_writes.load(Ordering::Relaxed)
    }

    /// Snapshot this sample into the fixed reporting layout
    pub fn heat_info(&self, live: bool) -> HeatInfo {
        HeatInfo {
            live: live as u8,
            resv: [0; 3],
            temp: self.last_temp(),
            avg_delta_reads: self.avg_delta_reads.load(Ordering::Relaxed),
            avg_delta_writes: self.avg_delta_writes.load(Ordering::Relaxed),
            last_read_time: self.last_read_time.load(Ordering::Relaxed),
            last_write_time: self.last_write_time.load(Ordering::Relaxed),
            num_reads: self.nr_reads(),
            num_writes: self.nr_writes(),
            future: [0; 4],
        }
    }
}

impl Default for FreqSample {
    fn default() -> Self {
        Self::new()
    }
}

/// One step of the gap moving average with smoothing factor `1/2^FREQ_POWER`
///
/// Wrapping arithmetic is intentional: the average starts at `u64::MAX`
/// and the first fold must collapse it toward the observed delta rather
/// than panic on overflow.
#[inline]
fn ema_fold(avg: u64, delta: u64) -> u64 {
    avg.wrapping_shl(FREQ_POWER)
        .wrapping_sub(avg)
        .wrapping_add(delta)
        >> FREQ_POWER
}

/// Fixed-layout heat report for one tracked item
///
/// Array-of-scalars layout for ioctl/telemetry consumers: field order and
/// widths are frozen, endianness is host. `live` is zero when the queried
/// item was not being tracked.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct HeatInfo {
    /// Non-zero when the item was live at snapshot time
    pub live: u8,
    /// Reserved padding bytes
    pub resv: [u8; 3],
    /// Last published temperature
    pub temp: u32,
    /// Moving average of the inter-read gap (ns-derived)
    pub avg_delta_reads: u64,
    /// Moving average of the inter-write gap (ns-derived)
    pub avg_delta_writes: u64,
    /// Wall-clock time of the last read, ns
    pub last_read_time: u64,
    /// Wall-clock time of the last write, ns
    pub last_write_time: u64,
    /// Total recorded reads
    pub num_reads: u32,
    /// Total recorded writes
    pub num_writes: u32,
    /// Reserved for future expansion
    pub future: [u64; 4],
}

impl HeatInfo {
    /// Report for an item that is not being tracked
    pub fn dead() -> Self {
        Self::zeroed()
    }
}
