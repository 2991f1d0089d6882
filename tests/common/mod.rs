//! Shared helpers for tracker integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use hottrack::{HotTracker, ManualClock, TrackerConfig};

/// Base timestamp far from zero so recency terms behave like steady state.
pub const BASE_NS: u64 = 1 << 50;

/// One millisecond in nanoseconds.
pub const MS: u64 = 1_000_000;

/// Tracker with a hand-driven clock and no background worker.
pub fn manual_tracker() -> (Arc<HotTracker>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(BASE_NS));
    let config = TrackerConfig {
        start_worker: false,
        ..TrackerConfig::default()
    };
    let tracker = HotTracker::enable_with_clock(config, clock.clone()).expect("enable tracker");
    (tracker, clock)
}

/// Step count for randomized tests, overridable via `HOTTRACK_TEST_STEPS`.
pub fn steps(default: usize) -> usize {
    std::env::var("HOTTRACK_TEST_STEPS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
