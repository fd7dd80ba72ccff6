//! Observability for reconciliation runs.
//!
//! - **Metrics**: atomic counters for fact outcomes and failures, shared via `Arc`
//! - **Spans**: a structured `reconcile.run` span with outcome fields

mod metrics;
mod spans;

pub use metrics::{Counter, Histogram, MetricsSummary, ReconcileMetrics};
pub use spans::RunSpan;
