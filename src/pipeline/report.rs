//! Per-run outcome reporting.

use serde::Serialize;

use crate::Error;
use crate::aggregate::DroppedObservation;
use crate::key::Key;
use crate::store::{FactUpsert, SeedSummary};

/// A record that reached the ledger.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RecordOutcome {
    pub key: Key,
    pub source_string: String,
    pub upsert: FactUpsert,
}

/// A record whose resolve-and-upsert transaction was rolled back.
#[derive(Debug)]
pub struct RecordFailure {
    pub key: Key,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub seed: SeedSummary,
    /// Distinct keys produced by aggregation.
    pub aggregated: usize,
    pub outcomes: Vec<RecordOutcome>,
    pub failures: Vec<RecordFailure>,
    pub dropped: Vec<DroppedObservation>,
    /// Set when cancellation stopped the run before every record was processed.
    pub cancelled: bool,
}

impl RunReport {
    pub fn inserted(&self) -> usize {
        self.count(|u| matches!(u, FactUpsert::Inserted { .. }))
    }

    pub fn advanced(&self) -> usize {
        self.count(|u| matches!(u, FactUpsert::Advanced { .. }))
    }

    pub fn not_advanced(&self) -> usize {
        self.count(|u| matches!(u, FactUpsert::NotAdvanced { .. }))
    }

    /// Every aggregated record was processed without failure.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    pub fn outcome(&self, key: &Key) -> Option<&RecordOutcome> {
        self.outcomes.iter().find(|o| &o.key == key)
    }

    fn count(&self, predicate: impl Fn(&FactUpsert) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|o| predicate(&o.upsert))
            .count()
    }
}
