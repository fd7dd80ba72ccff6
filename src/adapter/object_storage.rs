//! Object storage buckets, billed by stored gigabytes.

use super::UsageAdapter;
use crate::Result;
use crate::aggregate::Observation;

/// Decimal gigabyte.
pub const BYTES_PER_GB: f64 = 1_000_000_000.0;

#[derive(Debug, Clone)]
pub struct ObjectStorageAdapter {
    query: String,
}

impl ObjectStorageAdapter {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }
}

impl UsageAdapter for ObjectStorageAdapter {
    fn name(&self) -> &str {
        "object-storage"
    }

    fn convert(&self, observation: &Observation) -> f64 {
        observation.value / BYTES_PER_GB
    }

    fn query_name(&self, _dimensions: &[String]) -> Result<String> {
        Ok(self.query.clone())
    }

    fn source_suffix(&self, _dimensions: &[String]) -> Vec<String> {
        Vec::new()
    }
}
