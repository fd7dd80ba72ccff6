//! # usage-reconciler
//!
//! Turns raw resource-usage observations into billable facts.
//!
//! A run aggregates observations into per-key totals, matches each total
//! against a catalog of products and discounts using wildcard source
//! patterns, and records the result in a ledger whose quantities only
//! ever move upward.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chrono::Utc;
//! use usage_reconciler::adapter::{BillingClock, ObjectStorageAdapter};
//! use usage_reconciler::aggregate::{Observation, StaticResolver, StaticUsageSource};
//! use usage_reconciler::config::ReconcilerConfig;
//! use usage_reconciler::pipeline::ReconciliationPipeline;
//! use usage_reconciler::store::{MemoryLedger, ReconciliationStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), usage_reconciler::Error> {
//!     let config = ReconcilerConfig::from_env().await?;
//!     let catalog = config.load_catalog().await?;
//!     let store = ReconciliationStore::new(Arc::new(MemoryLedger::new()), catalog);
//!
//!     let pipeline = ReconciliationPipeline::builder()
//!         .store(Arc::new(store))
//!         .adapter(Arc::new(ObjectStorageAdapter::new(&config.object_storage_query)))
//!         .config(&config)
//!         .build()?;
//!
//!     let now = Utc::now();
//!     let usage = StaticUsageSource::new(vec![Observation::new("bucket-1", 2e9, now)]);
//!     let resolver = StaticResolver::new()
//!         .entity("bucket-1", "team-a")
//!         .namespace("team-a", "acme");
//!
//!     let report = pipeline.run(&usage, &resolver, BillingClock::new(now)).await?;
//!     println!("{} facts inserted", report.inserted());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod adapter;
pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod key;
pub mod observability;
pub mod pipeline;
pub mod source;
pub mod store;

pub use adapter::{BillingClock, DatabaseAdapter, ObjectStorageAdapter, UsageAdapter};
pub use aggregate::{
    Aggregated, Aggregation, Aggregator, DimensionResolver, Observation, UsageSource,
};
pub use catalog::{Catalog, CatalogBuilder, Discount, Period, Product, Query};
pub use config::{ConfigError, ReconcilerConfig};
pub use key::Key;
pub use observability::{MetricsSummary, ReconcileMetrics};
pub use pipeline::{PipelineBuilder, ReconciliationPipeline, RunReport};
pub use source::{MAX_TOKENS, TokenizedSource, find_best_match, generate_patterns};
#[cfg(feature = "postgres")]
pub use store::PostgresLedger;
pub use store::{BillingRecord, FactUpsert, Ledger, MemoryLedger, ReconciliationStore, StoreError};

/// Error type for reconciliation operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Source has more tokens than pattern generation supports.
    #[error("Source has {tokens} tokens; at most {max} are supported")]
    UnsupportedCardinality { tokens: usize, max: usize },

    /// Aggregation key is not valid base64 or not valid UTF-8.
    #[error("Malformed key {key:?}: {reason}")]
    MalformedKey { key: String, reason: String },

    /// Observation could not be attributed to a namespace or organization.
    #[error("Unresolved dimension for {entity}: {message}")]
    UnresolvedDimension { entity: String, message: String },

    #[error("Invalid source {source_string:?}: {message}")]
    InvalidSource {
        source_string: String,
        message: String,
    },

    /// No catalog entry of `kind` applies to the source.
    #[error("No {kind} matches {source_string:?}")]
    NoMatch {
        kind: &'static str,
        source_string: String,
    },

    /// Catalog seeding failed; the run was aborted.
    #[error("Catalog seeding failed: {0}")]
    CatalogSeed(#[source] StoreError),

    /// One record's transaction was rolled back; the run continued.
    #[error("Reconciliation failed for key {key}: {error}")]
    RecordReconciliation {
        key: String,
        #[source]
        error: Box<Error>,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Usage source could not be read.
    #[error("Usage source error: {message}")]
    Usage { message: String },

    #[error("Run cancelled")]
    Cancelled,
}

impl Error {
    pub fn usage(message: impl Into<String>) -> Self {
        Error::Usage {
            message: message.into(),
        }
    }

    /// Errors local to one record; the run that produced them still completed.
    pub fn is_record_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedKey { .. }
                | Error::UnresolvedDimension { .. }
                | Error::InvalidSource { .. }
                | Error::NoMatch { .. }
                | Error::UnsupportedCardinality { .. }
                | Error::RecordReconciliation { .. }
        )
    }
}

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;
