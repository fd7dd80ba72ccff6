//! Reconciliation metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::store::FactUpsert;

/// Thread-safe atomic counter.
#[derive(Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Simple histogram using fixed buckets.
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    bucket_bounds: Vec<f64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(bucket_bounds: Vec<f64>) -> Self {
        let buckets = (0..=bucket_bounds.len())
            .map(|_| AtomicU64::new(0))
            .collect();
        Self {
            buckets,
            bucket_bounds,
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Buckets sized for billing runs, in milliseconds.
    pub fn run_duration() -> Self {
        Self::new(vec![
            100.0, 500.0, 1_000.0, 5_000.0, 15_000.0, 60_000.0, 300_000.0,
        ])
    }

    pub fn observe(&self, value: f64) {
        let idx = self
            .bucket_bounds
            .iter()
            .position(|&bound| value <= bound)
            .unwrap_or(self.bucket_bounds.len());

        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn bucket_counts(&self) -> Vec<u64> {
        self.buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .collect()
    }

    pub fn sum(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

/// Counters accumulated across reconciliation runs.
///
/// One registry is usually shared by every run of a process, so the
/// counters describe the process lifetime rather than a single run.
pub struct ReconcileMetrics {
    pub runs_total: Counter,
    pub runs_aborted: Counter,
    pub facts_inserted: Counter,
    pub facts_advanced: Counter,
    pub facts_not_advanced: Counter,
    pub records_failed: Counter,
    pub observations_dropped: Counter,
    pub run_duration_ms: Histogram,
}

impl Default for ReconcileMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconcileMetrics {
    pub fn new() -> Self {
        Self {
            runs_total: Counter::new(),
            runs_aborted: Counter::new(),
            facts_inserted: Counter::new(),
            facts_advanced: Counter::new(),
            facts_not_advanced: Counter::new(),
            records_failed: Counter::new(),
            observations_dropped: Counter::new(),
            run_duration_ms: Histogram::run_duration(),
        }
    }

    pub fn record_run_start(&self) {
        self.runs_total.inc();
    }

    pub fn record_run_end(&self, aborted: bool, duration_ms: f64) {
        if aborted {
            self.runs_aborted.inc();
        }
        self.run_duration_ms.observe(duration_ms);
    }

    pub fn record_upsert(&self, outcome: &FactUpsert) {
        match outcome {
            FactUpsert::Inserted { .. } => self.facts_inserted.inc(),
            FactUpsert::Advanced { .. } => self.facts_advanced.inc(),
            FactUpsert::NotAdvanced { .. } => self.facts_not_advanced.inc(),
        }
    }

    pub fn record_failure(&self) {
        self.records_failed.inc();
    }

    pub fn record_dropped(&self, count: usize) {
        self.observations_dropped.add(count as u64);
    }
}

/// Point-in-time view of a [`ReconcileMetrics`] registry.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct MetricsSummary {
    pub runs: u64,
    pub aborted_runs: u64,
    pub inserted: u64,
    pub advanced: u64,
    pub not_advanced: u64,
    pub failed: u64,
    pub dropped: u64,
    pub avg_run_ms: f64,
}

impl MetricsSummary {
    pub fn from_metrics(metrics: &ReconcileMetrics) -> Self {
        let count = metrics.run_duration_ms.count();
        let avg_run_ms = if count > 0 {
            metrics.run_duration_ms.sum() / count as f64
        } else {
            0.0
        };

        Self {
            runs: metrics.runs_total.get(),
            aborted_runs: metrics.runs_aborted.get(),
            inserted: metrics.facts_inserted.get(),
            advanced: metrics.facts_advanced.get(),
            not_advanced: metrics.facts_not_advanced.get(),
            failed: metrics.records_failed.get(),
            dropped: metrics.observations_dropped.get(),
            avg_run_ms,
        }
    }
}
