//! Per-resource adapters: unit conversion, key dimensions, and query naming.
//!
//! One generic aggregation and matching path serves every resource kind; an
//! adapter supplies only what differs between them.

mod clock;
mod database;
mod object_storage;

pub use clock::BillingClock;
pub use database::DatabaseAdapter;
pub use object_storage::{BYTES_PER_GB, ObjectStorageAdapter};

use crate::Result;
use crate::aggregate::Observation;

pub trait UsageAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Converts a raw value into the billed unit.
    fn convert(&self, observation: &Observation) -> f64 {
        observation.value
    }

    /// Metered query for a record, given the key dimensions after the namespace.
    fn query_name(&self, dimensions: &[String]) -> Result<String>;

    /// Dimensions appended to the source string after the namespace.
    fn source_suffix(&self, dimensions: &[String]) -> Vec<String> {
        dimensions.to_vec()
    }
}
