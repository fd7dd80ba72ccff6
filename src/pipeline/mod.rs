//! One billing run, end to end.
//!
//! A run seeds the catalog, aggregates observations into per-key totals,
//! and then resolves and records each total in its own transaction:
//!
//! ```text
//! seed catalog ─(fail: abort)─> aggregate ─(empty: done)─> for each record:
//!     resolve query/product/discount ─> ratchet upsert ─(fail: report, continue)
//! ```
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chrono::Utc;
//! use usage_reconciler::adapter::{BillingClock, ObjectStorageAdapter};
//! use usage_reconciler::aggregate::{StaticResolver, StaticUsageSource};
//! use usage_reconciler::catalog::Catalog;
//! use usage_reconciler::pipeline::ReconciliationPipeline;
//! use usage_reconciler::store::{MemoryLedger, ReconciliationStore};
//!
//! # async fn example(catalog: Catalog) -> usage_reconciler::Result<()> {
//! let store = ReconciliationStore::new(Arc::new(MemoryLedger::new()), catalog);
//! let pipeline = ReconciliationPipeline::builder()
//!     .store(Arc::new(store))
//!     .adapter(Arc::new(ObjectStorageAdapter::new("object-storage-storage")))
//!     .zone("ch-gva-2")
//!     .build()?;
//!
//! let report = pipeline
//!     .run(
//!         &StaticUsageSource::new(vec![]),
//!         &StaticResolver::new(),
//!         BillingClock::new(Utc::now()),
//!     )
//!     .await?;
//! println!("{} inserted, {} failed", report.inserted(), report.failures.len());
//! # Ok(())
//! # }
//! ```

mod builder;
mod report;

pub use builder::PipelineBuilder;
pub use report::{RecordFailure, RecordOutcome, RunReport};

pub use crate::store::BillingRecord;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::adapter::{BillingClock, UsageAdapter};
use crate::aggregate::{Aggregated, DimensionResolver, UsageSource, aggregate};
use crate::observability::{ReconcileMetrics, RunSpan};
use crate::source::TokenizedSource;
use crate::store::{FactUpsert, ReconciliationStore};
use crate::{Error, Result};

pub struct ReconciliationPipeline {
    store: Arc<ReconciliationStore>,
    adapter: Arc<dyn UsageAdapter>,
    zone: String,
    prorate_intraday: bool,
    metrics: Arc<ReconcileMetrics>,
    cancel: Option<CancellationToken>,
}

impl ReconciliationPipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    pub fn store(&self) -> &Arc<ReconciliationStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<ReconcileMetrics> {
        &self.metrics
    }

    /// Runs one billing pass for `clock.billing_date()`.
    ///
    /// Errors only when the run as a whole cannot proceed: cancellation
    /// before start, a failed catalog seed, or an unreachable usage source.
    /// Individual record failures are collected in [`RunReport::failures`].
    pub async fn run(
        &self,
        usage: &dyn UsageSource,
        resolver: &dyn DimensionResolver,
        clock: BillingClock,
    ) -> Result<RunReport> {
        let span = RunSpan::new(&self.zone, self.adapter.name());
        self.metrics.record_run_start();

        let result = self
            .execute(usage, resolver, clock)
            .instrument(span.span().clone())
            .await;

        if let Ok(report) = &result {
            span.record_outcome(
                report.aggregated,
                report.failures.len(),
                report.not_advanced(),
            );
        }
        let elapsed_ms = span.finish();
        self.metrics.record_run_end(result.is_err(), elapsed_ms);
        result
    }

    async fn execute(
        &self,
        usage: &dyn UsageSource,
        resolver: &dyn DimensionResolver,
        clock: BillingClock,
    ) -> Result<RunReport> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut report = RunReport {
            seed: self.store.seed_catalog().await?,
            ..Default::default()
        };

        let billing_date = clock.billing_date();
        let observations = usage
            .observations(billing_date)
            .await
            .map_err(|e| match e {
                Error::Usage { .. } => e,
                other => Error::Usage {
                    message: format!("{}: {}", usage.name(), other),
                },
            })?;

        let adapter = self.adapter.as_ref();
        let aggregation = aggregate(resolver, &observations, |observation| {
            let value = adapter.convert(observation);
            if self.prorate_intraday {
                clock.prorate(value)
            } else {
                value
            }
        });
        self.metrics.record_dropped(aggregation.dropped.len());
        report.aggregated = aggregation.len();
        report.dropped = aggregation.dropped;

        if aggregation.records.is_empty() {
            tracing::info!(
                observations = observations.len(),
                dropped = report.dropped.len(),
                "No usage to reconcile"
            );
            return Ok(report);
        }

        for aggregated in aggregation.records.values() {
            if self.is_cancelled() {
                tracing::warn!(
                    processed = report.outcomes.len() + report.failures.len(),
                    remaining = report.aggregated - report.outcomes.len() - report.failures.len(),
                    "Run cancelled"
                );
                report.cancelled = true;
                break;
            }

            match self.reconcile_record(aggregated, billing_date).await {
                Ok(outcome) => {
                    self.metrics.record_upsert(&outcome.upsert);
                    report.outcomes.push(outcome);
                }
                Err(error) => {
                    tracing::warn!(key = %aggregated.key, error = %error, "Record failed");
                    self.metrics.record_failure();
                    report.failures.push(RecordFailure {
                        key: aggregated.key.clone(),
                        error: Error::RecordReconciliation {
                            key: aggregated.key.to_string(),
                            error: Box::new(error),
                        },
                    });
                }
            }
        }

        tracing::info!(
            records = report.aggregated,
            inserted = report.inserted(),
            advanced = report.advanced(),
            not_advanced = report.not_advanced(),
            failed = report.failures.len(),
            dropped = report.dropped.len(),
            "Reconciliation run finished"
        );
        Ok(report)
    }

    async fn reconcile_record(
        &self,
        aggregated: &Aggregated,
        at: DateTime<Utc>,
    ) -> Result<RecordOutcome> {
        let record = self.billing_record(aggregated)?;
        let upsert = self.store.reconcile(&record, at).await?;
        if let FactUpsert::NotAdvanced {
            recorded,
            attempted,
        } = upsert
        {
            tracing::debug!(
                source = %record.source,
                recorded,
                attempted,
                "Recorded quantity not advanced"
            );
        }
        Ok(RecordOutcome {
            key: record.key,
            source_string: record.source.to_string(),
            upsert,
        })
    }

    /// Translates an aggregated total into a record.
    ///
    /// The key decodes to `[namespace, dimensions...]`; the source is
    /// `{query}:{zone}:{organization}:{namespace}[:suffix...]`.
    pub fn billing_record(&self, aggregated: &Aggregated) -> Result<BillingRecord> {
        let mut fields = aggregated.key.decode()?.into_iter();
        let namespace = fields.next().unwrap_or_default();
        let dimensions: Vec<String> = fields.collect();

        let query = self.adapter.query_name(&dimensions)?;
        let source = TokenizedSource::from_tokens([
            query.as_str(),
            self.zone.as_str(),
            aggregated.organization.as_str(),
            namespace.as_str(),
        ])?
        .extended(self.adapter.source_suffix(&dimensions))?;

        Ok(BillingRecord {
            key: aggregated.key.clone(),
            query,
            source,
            tenant: aggregated.organization.clone(),
            category: format!("{}:{}", self.zone, namespace),
            quantity: aggregated.value,
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}
