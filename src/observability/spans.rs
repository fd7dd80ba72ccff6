//! Structured span for reconciliation runs.

use std::time::Instant;

use tracing::{Level, Span, field, span};

/// Tracks one billing run within a span.
pub struct RunSpan {
    span: Span,
    start: Instant,
}

impl RunSpan {
    pub fn new(zone: &str, adapter: &str) -> Self {
        let span = span!(
            Level::INFO,
            "reconcile.run",
            zone = zone,
            adapter = adapter,
            records = field::Empty,
            failed = field::Empty,
            not_advanced = field::Empty,
            duration_ms = field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
        }
    }

    pub fn record_outcome(&self, records: usize, failed: usize, not_advanced: usize) {
        self.span.record("records", records as u64);
        self.span.record("failed", failed as u64);
        self.span.record("not_advanced", not_advanced as u64);
    }

    /// Record the elapsed time and return it in milliseconds.
    pub fn finish(self) -> f64 {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.span.record("duration_ms", elapsed_ms as u64);
        elapsed_ms
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span() {
        let span = RunSpan::new("zone-1", "object-storage");
        span.record_outcome(3, 1, 0);
        let elapsed = span.finish();
        assert!(elapsed >= 0.0);
    }
}
