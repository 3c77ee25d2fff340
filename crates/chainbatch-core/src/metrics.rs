//! Progress metrics aggregator.
//!
//! Tracks the chain and processor heights, mapping throughput over the last
//! few batches and the overall sync rate, and renders the status line.
//!
//! ## Prometheus gauges (after [`Metrics::install`])
//! - `chainbatch_processor_last_block`
//! - `chainbatch_processor_chain_height`
//! - `chainbatch_processor_mapping_blocks_per_second`
//! - `chainbatch_processor_mapping_items_per_second`
//! - `chainbatch_processor_sync_eta_seconds`
//! - `chainbatch_processor_sync_ratio`

use std::collections::VecDeque;
use std::time::Duration;

use prometheus::{Gauge, IntGauge, Registry};
use serde::Serialize;
use tokio::time::Instant;

use crate::error::IndexerError;

const MAPPING_WINDOW: usize = 5;
const PROGRESS_WINDOW: usize = 5;
const PROGRESS_GRANULARITY: Duration = Duration::from_secs(1);

// ─── Speed ────────────────────────────────────────────────────────────────────

/// Throughput over the last `max_points` measured intervals.
#[derive(Debug)]
struct Speed {
    max_points: usize,
    points: VecDeque<(u64, Duration)>,
}

impl Speed {
    fn new(max_points: usize) -> Self {
        Self {
            max_points,
            points: VecDeque::with_capacity(max_points),
        }
    }

    fn push(&mut self, count: u64, start: Instant, end: Instant) {
        if self.points.len() >= self.max_points {
            self.points.pop_front();
        }
        self.points.push_back((count, end.saturating_duration_since(start)));
    }

    /// Units per second, `0.0` until time has been measured.
    fn speed(&self) -> f64 {
        let (count, time) = self
            .points
            .iter()
            .fold((0u64, Duration::ZERO), |(c, t), (pc, pt)| (c + pc, t + *pt));
        let secs = time.as_secs_f64();
        if secs <= f64::EPSILON {
            0.0
        } else {
            count as f64 / secs
        }
    }
}

// ─── Progress ─────────────────────────────────────────────────────────────────

/// Sync rate derived from (time, processed) samples, one per granularity bucket.
#[derive(Debug)]
struct Progress {
    window: usize,
    samples: VecDeque<(Instant, u64)>,
    target: u64,
}

impl Progress {
    fn new(window: usize) -> Self {
        Self {
            window,
            samples: VecDeque::with_capacity(window + 1),
            target: 0,
        }
    }

    fn set_current(&mut self, value: u64, at: Instant) {
        match self.samples.back_mut() {
            Some(last) if at.saturating_duration_since(last.0) < PROGRESS_GRANULARITY => {
                last.1 = value;
            }
            _ => {
                self.samples.push_back((at, value));
                while self.samples.len() > self.window + 1 {
                    self.samples.pop_front();
                }
            }
        }
    }

    fn set_target(&mut self, target: u64) {
        self.target = target;
    }

    fn current(&self) -> u64 {
        self.samples.back().map_or(0, |s| s.1)
    }

    fn speed(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let secs = last.0.saturating_duration_since(first.0).as_secs_f64();
        if secs <= f64::EPSILON {
            return 0.0;
        }
        last.1.saturating_sub(first.1) as f64 / secs
    }

    fn left(&self) -> u64 {
        self.target.saturating_sub(self.current())
    }

    fn eta(&self) -> Option<Duration> {
        let left = self.left();
        if left == 0 {
            return Some(Duration::ZERO);
        }
        let speed = self.speed();
        if speed <= f64::EPSILON {
            None
        } else {
            Some(Duration::from_secs_f64(left as f64 / speed))
        }
    }

    fn ratio(&self) -> f64 {
        if self.target == 0 {
            0.0
        } else {
            self.current() as f64 / self.target as f64
        }
    }
}

// ─── Snapshot ─────────────────────────────────────────────────────────────────

/// Point-in-time view of processor progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub chain_height: i64,
    pub last_block: i64,
    pub blocks_processed: u64,
    pub blocks_left: u64,
    pub mapping_blocks_per_sec: f64,
    pub mapping_items_per_sec: f64,
    pub sync_blocks_per_sec: f64,
    pub eta: Option<Duration>,
}

// ─── Gauges ───────────────────────────────────────────────────────────────────

struct Gauges {
    last_block: IntGauge,
    chain_height: IntGauge,
    mapping_blocks_per_second: Gauge,
    mapping_items_per_second: Gauge,
    sync_eta_seconds: Gauge,
    sync_ratio: Gauge,
}

fn prom_err(e: prometheus::Error) -> IndexerError {
    IndexerError::Other(format!("metrics registration failed: {e}"))
}

impl Gauges {
    fn register(registry: &Registry) -> Result<Self, IndexerError> {
        let gauges = Self {
            last_block: IntGauge::new(
                "chainbatch_processor_last_block",
                "Last processed block",
            )
            .map_err(prom_err)?,
            chain_height: IntGauge::new(
                "chainbatch_processor_chain_height",
                "Current finalized height of the source",
            )
            .map_err(prom_err)?,
            mapping_blocks_per_second: Gauge::new(
                "chainbatch_processor_mapping_blocks_per_second",
                "Mapping performance in blocks per second",
            )
            .map_err(prom_err)?,
            mapping_items_per_second: Gauge::new(
                "chainbatch_processor_mapping_items_per_second",
                "Mapping performance in items per second",
            )
            .map_err(prom_err)?,
            sync_eta_seconds: Gauge::new(
                "chainbatch_processor_sync_eta_seconds",
                "Estimated time until all blocks are processed",
            )
            .map_err(prom_err)?,
            sync_ratio: Gauge::new(
                "chainbatch_processor_sync_ratio",
                "Percentage of processed blocks",
            )
            .map_err(prom_err)?,
        };
        registry.register(Box::new(gauges.last_block.clone())).map_err(prom_err)?;
        registry.register(Box::new(gauges.chain_height.clone())).map_err(prom_err)?;
        registry
            .register(Box::new(gauges.mapping_blocks_per_second.clone()))
            .map_err(prom_err)?;
        registry
            .register(Box::new(gauges.mapping_items_per_second.clone()))
            .map_err(prom_err)?;
        registry.register(Box::new(gauges.sync_eta_seconds.clone())).map_err(prom_err)?;
        registry.register(Box::new(gauges.sync_ratio.clone())).map_err(prom_err)?;
        Ok(gauges)
    }
}

// ─── Metrics ──────────────────────────────────────────────────────────────────

/// Cumulative processor metrics. Owned and mutated by the processor only.
pub struct Metrics {
    chain_height: i64,
    last_block: i64,
    blocks_processed: u64,
    items_processed: u64,
    mapping_time: Duration,
    mapping_speed: Speed,
    mapping_items_speed: Speed,
    progress: Progress,
    gauges: Option<Gauges>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            chain_height: -1,
            last_block: -1,
            blocks_processed: 0,
            items_processed: 0,
            mapping_time: Duration::ZERO,
            mapping_speed: Speed::new(MAPPING_WINDOW),
            mapping_items_speed: Speed::new(MAPPING_WINDOW),
            progress: Progress::new(PROGRESS_WINDOW),
            gauges: None,
        }
    }

    /// Register the Prometheus gauges in `registry` and keep them updated from now on.
    pub fn install(&mut self, registry: &Registry) -> Result<(), IndexerError> {
        self.gauges = Some(Gauges::register(registry)?);
        self.refresh_gauges();
        Ok(())
    }

    pub fn set_chain_height(&mut self, height: i64) {
        self.chain_height = height;
        self.refresh_gauges();
    }

    pub fn chain_height(&self) -> i64 {
        self.chain_height
    }

    pub fn set_last_processed_block(&mut self, height: i64) {
        self.last_block = height;
        self.refresh_gauges();
    }

    pub fn last_processed_block(&self) -> i64 {
        self.last_block
    }

    /// Record how many blocks are done and how many remain, as of `at`.
    pub fn update_progress(&mut self, processed: u64, left: u64, at: Instant) {
        self.progress.set_current(processed, at);
        self.progress.set_target(processed + left);
        self.refresh_gauges();
    }

    /// Account one committed batch mapped between `start` and `end`.
    pub fn register_batch(
        &mut self,
        block_count: usize,
        item_count: usize,
        start: Instant,
        end: Instant,
    ) {
        self.blocks_processed += block_count as u64;
        self.items_processed += item_count as u64;
        self.mapping_time += end.saturating_duration_since(start);
        self.mapping_speed.push(block_count as u64, start, end);
        self.mapping_items_speed.push(item_count as u64, start, end);
        self.refresh_gauges();
    }

    /// Blocks mapped since the process started.
    pub fn total_blocks(&self) -> u64 {
        self.blocks_processed
    }

    /// Items mapped since the process started.
    pub fn total_items(&self) -> u64 {
        self.items_processed
    }

    /// Time spent inside batch transactions since the process started.
    pub fn total_mapping_time(&self) -> Duration {
        self.mapping_time
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            chain_height: self.chain_height,
            last_block: self.last_block,
            blocks_processed: self.progress.current(),
            blocks_left: self.progress.left(),
            mapping_blocks_per_sec: self.mapping_speed.speed(),
            mapping_items_per_sec: self.mapping_items_speed.speed(),
            sync_blocks_per_sec: self.progress.speed(),
            eta: self.progress.eta(),
        }
    }

    pub fn status_line(&self) -> String {
        let snap = self.snapshot();
        format!(
            "{} / {}, rate: {} blocks/sec, mapping: {} blocks/sec, {} items/sec, eta: {}",
            snap.last_block,
            snap.chain_height,
            snap.sync_blocks_per_sec.round() as u64,
            snap.mapping_blocks_per_sec.round() as u64,
            snap.mapping_items_per_sec.round() as u64,
            format_eta(snap.eta),
        )
    }

    fn refresh_gauges(&self) {
        let Some(g) = &self.gauges else { return };
        g.last_block.set(self.last_block);
        g.chain_height.set(self.chain_height);
        g.mapping_blocks_per_second.set(self.mapping_speed.speed());
        g.mapping_items_per_second.set(self.mapping_items_speed.speed());
        g.sync_eta_seconds
            .set(self.progress.eta().map_or(0.0, |eta| eta.as_secs_f64()));
        g.sync_ratio.set(self.progress.ratio());
    }
}

/// Human-readable ETA: `45s`, `12m 5s`, `3h 20m`, `2d 4h`; `-` when unknown.
pub fn format_eta(eta: Option<Duration>) -> String {
    let Some(eta) = eta else {
        return "-".into();
    };
    let secs = eta.as_secs();
    let (d, h, m, s) = (secs / 86_400, secs / 3_600 % 24, secs / 60 % 60, secs % 60);
    if d > 0 {
        format!("{d}d {h}h")
    } else if h > 0 {
        format!("{h}h {m}m")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}
