//! Lock-free tile streaming counters.
//!
//! Tracker ticks and world ticks update these with relaxed atomics; the
//! dashboard and the autosave log read them at their own pace.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::{Duration, Instant};

use explorers_engine::tracker::TickStats;

pub struct Metrics {
    // Monotonic counters
    ticks: AtomicU64,
    tick_ns_sum: AtomicU64,
    tiles_generated: AtomicU64,
    tiles_reloaded: AtomicU64,
    tiles_replayed: AtomicU64,
    deferred: AtomicU64,
    cache_misses: AtomicU64,
    write_failures: AtomicU64,
    updates_sent: AtomicU64,
    tiles_sent: AtomicU64,
    broadcasts_forwarded: AtomicU64,
    terrain_edits: AtomicU64,

    // Tracker tick duration histogram
    hist_under_100us: AtomicU64,
    hist_100us_1ms: AtomicU64,
    hist_1_10ms: AtomicU64,
    hist_over_10ms: AtomicU64,

    // Gauges
    sessions: AtomicU64,
    worlds: AtomicU64,

    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            tick_ns_sum: AtomicU64::new(0),
            tiles_generated: AtomicU64::new(0),
            tiles_reloaded: AtomicU64::new(0),
            tiles_replayed: AtomicU64::new(0),
            deferred: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            updates_sent: AtomicU64::new(0),
            tiles_sent: AtomicU64::new(0),
            broadcasts_forwarded: AtomicU64::new(0),
            terrain_edits: AtomicU64::new(0),
            hist_under_100us: AtomicU64::new(0),
            hist_100us_1ms: AtomicU64::new(0),
            hist_1_10ms: AtomicU64::new(0),
            hist_over_10ms: AtomicU64::new(0),
            sessions: AtomicU64::new(0),
            worlds: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Called after every tracker tick.
    pub fn record_tick(&self, stats: &TickStats, duration: Duration) {
        self.ticks.fetch_add(1, Relaxed);
        self.tick_ns_sum
            .fetch_add(duration.as_nanos() as u64, Relaxed);
        self.tiles_generated
            .fetch_add(stats.generated as u64, Relaxed);
        self.tiles_reloaded.fetch_add(stats.reloaded as u64, Relaxed);
        self.tiles_replayed.fetch_add(stats.replayed as u64, Relaxed);
        self.deferred.fetch_add(stats.deferred as u64, Relaxed);
        self.cache_misses
            .fetch_add(stats.cache_misses as u64, Relaxed);
        self.write_failures
            .fetch_add(stats.write_failures as u64, Relaxed);
        if stats.sent > 0 {
            self.updates_sent.fetch_add(1, Relaxed);
            self.tiles_sent.fetch_add(stats.sent as u64, Relaxed);
        }

        match duration.as_micros() as u64 {
            0..=99 => {
                self.hist_under_100us.fetch_add(1, Relaxed);
            }
            100..=999 => {
                self.hist_100us_1ms.fetch_add(1, Relaxed);
            }
            1_000..=9_999 => {
                self.hist_1_10ms.fetch_add(1, Relaxed);
            }
            _ => {
                self.hist_over_10ms.fetch_add(1, Relaxed);
            }
        }
    }

    pub fn record_broadcast(&self, receivers: u64) {
        self.broadcasts_forwarded.fetch_add(receivers, Relaxed);
    }

    pub fn record_terrain_edit(&self) {
        self.terrain_edits.fetch_add(1, Relaxed);
    }

    pub fn session_started(&self) {
        self.sessions.fetch_add(1, Relaxed);
    }

    pub fn session_ended(&self) {
        self.sessions.fetch_sub(1, Relaxed);
    }

    pub fn world_added(&self) {
        self.worlds.fetch_add(1, Relaxed);
    }

    pub fn world_removed(&self) {
        self.worlds.fetch_sub(1, Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            ticks: self.ticks.load(Relaxed),
            tick_ns_sum: self.tick_ns_sum.load(Relaxed),
            tiles_generated: self.tiles_generated.load(Relaxed),
            tiles_reloaded: self.tiles_reloaded.load(Relaxed),
            tiles_replayed: self.tiles_replayed.load(Relaxed),
            deferred: self.deferred.load(Relaxed),
            cache_misses: self.cache_misses.load(Relaxed),
            write_failures: self.write_failures.load(Relaxed),
            updates_sent: self.updates_sent.load(Relaxed),
            tiles_sent: self.tiles_sent.load(Relaxed),
            broadcasts_forwarded: self.broadcasts_forwarded.load(Relaxed),
            terrain_edits: self.terrain_edits.load(Relaxed),
            sessions: self.sessions.load(Relaxed),
            worlds: self.worlds.load(Relaxed),
            hist: [
                self.hist_under_100us.load(Relaxed),
                self.hist_100us_1ms.load(Relaxed),
                self.hist_1_10ms.load(Relaxed),
                self.hist_over_10ms.load(Relaxed),
            ],
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of all metrics at a point in time.
/// Rates come from diffing consecutive snapshots.
#[derive(Clone, Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub ticks: u64,
    pub tick_ns_sum: u64,
    pub tiles_generated: u64,
    pub tiles_reloaded: u64,
    pub tiles_replayed: u64,
    pub deferred: u64,
    pub cache_misses: u64,
    pub write_failures: u64,
    pub updates_sent: u64,
    pub tiles_sent: u64,
    pub broadcasts_forwarded: u64,
    pub terrain_edits: u64,
    pub sessions: u64,
    pub worlds: u64,
    /// Tracker tick duration: `[<100μs, 100μs-1ms, 1-10ms, >10ms]`
    pub hist: [u64; 4],
}
