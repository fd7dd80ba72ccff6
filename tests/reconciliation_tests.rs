//! Reconciliation Pipeline Tests
//!
//! End-to-end billing runs against the in-memory ledger: proration, partial
//! failure isolation, the quantity ratchet, cancellation, fact export and the
//! warnings logged for skipped work.
//!
//! Run: cargo nextest run --test reconciliation_tests

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;
use usage_reconciler::adapter::{BillingClock, DatabaseAdapter, ObjectStorageAdapter};
use usage_reconciler::aggregate::{
    DimensionResolver, Observation, StaticResolver, StaticUsageSource, UsageSource,
};
use usage_reconciler::catalog::{Catalog, Discount, Product, Query};
use usage_reconciler::observability::{MetricsSummary, ReconcileMetrics};
use usage_reconciler::pipeline::{ReconciliationPipeline, RunReport};
use usage_reconciler::store::{FactUpsert, MemoryLedger, ReconciliationStore};
use usage_reconciler::{Error, Key};

const ZONE: &str = "ch-gva-2";
const STORAGE: &str = "object-storage-storage";

fn billing_date(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 2, hour, 0, 0).unwrap()
}

fn storage_catalog() -> Catalog {
    Catalog::builder()
        .query(Query::new(STORAGE, "GB").with_description("Object storage"))
        .product(Product::new(
            format!("{}:{}", STORAGE, ZONE),
            dec!(0.02),
            "GB",
        ))
        .discount(Discount::new(STORAGE, dec!(0)))
        .build()
}

fn resolver() -> StaticResolver {
    StaticResolver::new()
        .entity("bucket-a", "team-a")
        .entity("bucket-a2", "team-a")
        .entity("bucket-b", "team-b")
        .entity("bucket-c", "team-c")
        .namespace("team-a", "acme")
        .namespace("team-b", "globex")
        .namespace("team-c", "initech")
}

struct Harness {
    ledger: Arc<MemoryLedger>,
    pipeline: ReconciliationPipeline,
}

fn harness(catalog: Catalog) -> Harness {
    let ledger = Arc::new(MemoryLedger::new());
    let store = ReconciliationStore::new(ledger.clone(), catalog);
    let pipeline = ReconciliationPipeline::builder()
        .store(Arc::new(store))
        .adapter(Arc::new(ObjectStorageAdapter::new(STORAGE)))
        .zone(ZONE)
        .build()
        .unwrap();
    Harness { ledger, pipeline }
}

async fn run_with(
    harness: &Harness,
    observations: Vec<Observation>,
    clock: BillingClock,
) -> RunReport {
    harness
        .pipeline
        .run(&StaticUsageSource::new(observations), &resolver(), clock)
        .await
        .unwrap()
}

fn bytes(entity: &str, value: f64) -> Observation {
    Observation::new(entity, value, billing_date(6))
}

// =============================================================================
// Proration
// =============================================================================

mod proration_tests {
    use super::*;

    #[tokio::test]
    async fn test_last_hour_bills_full_gigabyte() {
        let harness = harness(storage_catalog());
        let clock = BillingClock::intraday(billing_date(23), 23).unwrap();

        let report = run_with(&harness, vec![bytes("bucket-a", 1e9)], clock).await;

        assert_eq!(report.inserted(), 1);
        let facts = harness.ledger.snapshot().await.facts;
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].quantity, 1.0);
    }

    #[tokio::test]
    async fn test_early_hour_prorates_over_remaining_parts() {
        let harness = harness(storage_catalog());
        let clock = BillingClock::intraday(billing_date(6), 6).unwrap();

        run_with(&harness, vec![bytes("bucket-a", 1e9)], clock).await;

        let facts = harness.ledger.snapshot().await.facts;
        assert!((facts[0].quantity - 1.0 / 18.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_proration_disabled_ignores_hour() {
        let ledger = Arc::new(MemoryLedger::new());
        let store = ReconciliationStore::new(ledger.clone(), storage_catalog());
        let pipeline = ReconciliationPipeline::builder()
            .store(Arc::new(store))
            .adapter(Arc::new(ObjectStorageAdapter::new(STORAGE)))
            .zone(ZONE)
            .prorate_intraday(false)
            .build()
            .unwrap();

        let clock = BillingClock::intraday(billing_date(6), 6).unwrap();
        pipeline
            .run(
                &StaticUsageSource::new(vec![bytes("bucket-a", 1e9)]),
                &resolver(),
                clock,
            )
            .await
            .unwrap();

        assert_eq!(ledger.snapshot().await.facts[0].quantity, 1.0);
    }
}

// =============================================================================
// Aggregation & Failure Isolation
// =============================================================================

mod run_tests {
    use super::*;

    #[tokio::test]
    async fn test_observations_for_same_namespace_are_summed() {
        let harness = harness(storage_catalog());
        let report = run_with(
            &harness,
            vec![bytes("bucket-a", 2e9), bytes("bucket-a2", 3e9)],
            BillingClock::new(billing_date(6)),
        )
        .await;

        assert_eq!(report.aggregated, 1);
        let facts = harness.ledger.snapshot().await.facts;
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].quantity, 5.0);
    }

    #[tokio::test]
    async fn test_one_bad_record_does_not_block_others() {
        // initech has no product
        let catalog = Catalog::builder()
            .query(Query::new(STORAGE, "GB"))
            .product(Product::new(
                format!("{}:{}:acme", STORAGE, ZONE),
                dec!(0.02),
                "GB",
            ))
            .product(Product::new(
                format!("{}:{}:globex", STORAGE, ZONE),
                dec!(0.03),
                "GB",
            ))
            .discount(Discount::new(STORAGE, dec!(0)))
            .build();
        let harness = harness(catalog);

        let report = run_with(
            &harness,
            vec![
                bytes("bucket-a", 1e9),
                bytes("bucket-b", 1e9),
                bytes("bucket-c", 1e9),
            ],
            BillingClock::new(billing_date(6)),
        )
        .await;

        assert_eq!(report.aggregated, 3);
        assert_eq!(report.inserted(), 2);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_success());
        assert_eq!(report.failures[0].key, Key::encode(["team-c"]));
        assert!(matches!(
            &report.failures[0].error,
            Error::RecordReconciliation { error, .. }
                if matches!(**error, Error::NoMatch { kind: "product", .. })
        ));
        assert_eq!(harness.ledger.fact_count().await, 2);
    }

    #[tokio::test]
    async fn test_unresolved_observation_is_dropped() {
        let harness = harness(storage_catalog());
        let report = run_with(
            &harness,
            vec![bytes("bucket-a", 1e9), bytes("orphan", 7e9)],
            BillingClock::new(billing_date(6)),
        )
        .await;

        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].entity_id, "orphan");
        assert!(report.is_success());
        assert_eq!(harness.ledger.fact_count().await, 1);
    }

    #[tokio::test]
    async fn test_empty_run_seeds_and_exits_early() {
        let harness = harness(storage_catalog());
        let report = run_with(&harness, vec![], BillingClock::new(billing_date(6))).await;

        assert_eq!(report.aggregated, 0);
        assert_eq!(report.seed.created, 3);
        assert!(report.outcomes.is_empty());
        assert!(report.is_success());

        let snapshot = harness.ledger.snapshot().await;
        assert_eq!(snapshot.products.len(), 1);
        assert!(snapshot.facts.is_empty());
        assert!(snapshot.date_times.is_empty());
    }

    #[tokio::test]
    async fn test_database_records_price_by_plan() {
        let catalog = Catalog::builder()
            .query(Query::new("dbaas-pg", "hour"))
            .product(Product::new(
                format!("dbaas-pg:{}", ZONE),
                dec!(0.10),
                "hour",
            ))
            .product(Product::new(
                format!("dbaas-pg:{}:*:*:business-4", ZONE),
                dec!(0.40),
                "hour",
            ))
            .discount(Discount::new("dbaas-pg", dec!(0)))
            .build();
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(ReconciliationStore::new(ledger.clone(), catalog));
        let pipeline = ReconciliationPipeline::builder()
            .store(store.clone())
            .adapter(Arc::new(DatabaseAdapter::new("dbaas-")))
            .zone(ZONE)
            .build()
            .unwrap();

        let observations = vec![
            Observation::new("bucket-a", 1.0, billing_date(6))
                .with_dimensions(["business-4", "pg"]),
            Observation::new("bucket-b", 1.0, billing_date(6))
                .with_dimensions(["hobbyist-2", "pg"]),
        ];
        let report = pipeline
            .run(
                &StaticUsageSource::new(observations),
                &resolver(),
                BillingClock::new(billing_date(6)),
            )
            .await
            .unwrap();
        assert_eq!(report.inserted(), 2);

        let exported = store
            .facts_between(billing_date(6), billing_date(7))
            .await
            .unwrap();
        let mut products: Vec<_> = exported.iter().map(|f| f.product_source.as_str()).collect();
        products.sort();
        assert_eq!(
            products,
            vec!["dbaas-pg:ch-gva-2", "dbaas-pg:ch-gva-2:*:*:business-4"]
        );
    }
}

// =============================================================================
// Ratchet Across Runs
// =============================================================================

mod ratchet_tests {
    use super::*;

    #[tokio::test]
    async fn test_quantity_only_moves_up() {
        let harness = harness(storage_catalog());
        let clock = BillingClock::new(billing_date(6));

        let first = run_with(&harness, vec![bytes("bucket-a", 2e9)], clock).await;
        assert_eq!(first.inserted(), 1);

        let lower = run_with(&harness, vec![bytes("bucket-a", 1e9)], clock).await;
        assert_eq!(lower.not_advanced(), 1);
        assert!(lower.is_success());
        assert_eq!(harness.ledger.snapshot().await.facts[0].quantity, 2.0);

        let higher = run_with(&harness, vec![bytes("bucket-a", 3e9)], clock).await;
        let outcome = higher.outcome(&Key::encode(["team-a"])).unwrap();
        assert_eq!(
            outcome.upsert,
            FactUpsert::Advanced {
                previous: 2.0,
                quantity: 3.0
            }
        );
        assert_eq!(
            outcome.source_string,
            "object-storage-storage:ch-gva-2:acme:team-a"
        );
        assert_eq!(harness.ledger.fact_count().await, 1);
    }

    #[tokio::test]
    async fn test_reseeding_across_runs_is_idempotent() {
        let harness = harness(storage_catalog());
        let clock = BillingClock::new(billing_date(6));

        run_with(&harness, vec![bytes("bucket-a", 1e9)], clock).await;
        let second = run_with(&harness, vec![bytes("bucket-a", 1e9)], clock).await;

        assert_eq!(second.seed.created, 0);
        assert_eq!(second.seed.unchanged, 3);
        let snapshot = harness.ledger.snapshot().await;
        assert_eq!(snapshot.tenants.len(), 1);
        assert_eq!(snapshot.categories.len(), 1);
        assert_eq!(snapshot.date_times.len(), 1);
    }

    #[tokio::test]
    async fn test_next_hour_creates_new_fact() {
        let harness = harness(storage_catalog());

        for hour in [6, 7] {
            let clock = BillingClock::new(billing_date(hour));
            run_with(&harness, vec![bytes("bucket-a", 1e9)], clock).await;
        }

        assert_eq!(harness.ledger.fact_count().await, 2);
    }
}

// =============================================================================
// Aborted Runs
// =============================================================================

mod abort_tests {
    use super::*;

    struct FailingSource;

    #[async_trait::async_trait]
    impl UsageSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        async fn observations(
            &self,
            _billing_date: DateTime<Utc>,
        ) -> usage_reconciler::Result<Vec<Observation>> {
            Err(Error::usage("bucket listing unavailable"))
        }
    }

    #[tokio::test]
    async fn test_seed_failure_aborts_run() {
        let catalog = Catalog::builder()
            .query(Query::new(STORAGE, "GB"))
            .product(Product::new("", dec!(0.02), "GB"))
            .build();
        let harness = harness(catalog);

        let result = harness
            .pipeline
            .run(
                &StaticUsageSource::new(vec![bytes("bucket-a", 1e9)]),
                &resolver(),
                BillingClock::new(billing_date(6)),
            )
            .await;

        assert!(matches!(result, Err(Error::CatalogSeed(_))));
        let snapshot = harness.ledger.snapshot().await;
        assert!(snapshot.queries.is_empty());
        assert!(snapshot.facts.is_empty());
    }

    #[tokio::test]
    async fn test_usage_failure_aborts_run() {
        let harness = harness(storage_catalog());
        let result = harness
            .pipeline
            .run(
                &FailingSource,
                &resolver(),
                BillingClock::new(billing_date(6)),
            )
            .await;

        match result {
            Err(Error::Usage { message }) => assert!(message.contains("unavailable")),
            other => panic!(
                "expected usage error, got {:?}",
                other.map(|r| r.aggregated)
            ),
        }
        assert_eq!(harness.ledger.fact_count().await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();

        let ledger = Arc::new(MemoryLedger::new());
        let store = ReconciliationStore::new(ledger.clone(), storage_catalog());
        let pipeline = ReconciliationPipeline::builder()
            .store(Arc::new(store))
            .adapter(Arc::new(ObjectStorageAdapter::new(STORAGE)))
            .zone(ZONE)
            .cancellation(token)
            .build()
            .unwrap();

        let result = pipeline
            .run(
                &StaticUsageSource::new(vec![bytes("bucket-a", 1e9)]),
                &resolver(),
                BillingClock::new(billing_date(6)),
            )
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(ledger.snapshot().await.queries.is_empty());
    }

    /// Resolver that cancels the run while aggregation is in progress.
    struct CancellingResolver {
        inner: StaticResolver,
        token: CancellationToken,
    }

    impl DimensionResolver for CancellingResolver {
        fn namespace_of(&self, entity_id: &str) -> Option<String> {
            self.token.cancel();
            self.inner.namespace_of(entity_id)
        }

        fn organization_of(&self, namespace: &str) -> Option<String> {
            self.inner.organization_of(namespace)
        }
    }

    #[tokio::test]
    async fn test_cancelled_after_seed_reports_partial_run() {
        let token = CancellationToken::new();
        let ledger = Arc::new(MemoryLedger::new());
        let store = ReconciliationStore::new(ledger.clone(), storage_catalog());
        let pipeline = ReconciliationPipeline::builder()
            .store(Arc::new(store))
            .adapter(Arc::new(ObjectStorageAdapter::new(STORAGE)))
            .zone(ZONE)
            .cancellation(token.clone())
            .build()
            .unwrap();

        let resolver = CancellingResolver {
            inner: resolver(),
            token,
        };
        let report = pipeline
            .run(
                &StaticUsageSource::new(vec![bytes("bucket-a", 1e9), bytes("bucket-b", 1e9)]),
                &resolver,
                BillingClock::new(billing_date(6)),
            )
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.aggregated, 2);
        assert!(report.outcomes.is_empty());
        assert_eq!(ledger.snapshot().await.products.len(), 1);
        assert_eq!(ledger.fact_count().await, 0);
    }
}

// =============================================================================
// Export & Metrics
// =============================================================================

mod export_tests {
    use super::*;

    #[tokio::test]
    async fn test_export_joins_dimension_sources() {
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(ReconciliationStore::new(ledger.clone(), storage_catalog()));
        let pipeline = ReconciliationPipeline::builder()
            .store(store.clone())
            .adapter(Arc::new(ObjectStorageAdapter::new(STORAGE)))
            .zone(ZONE)
            .build()
            .unwrap();

        let at = billing_date(6) + Duration::minutes(42);
        pipeline
            .run(
                &StaticUsageSource::new(vec![bytes("bucket-a", 4e9)]),
                &resolver(),
                BillingClock::new(at),
            )
            .await
            .unwrap();

        let rows = store
            .facts_between(billing_date(6), billing_date(7))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.product_source, "object-storage-storage:ch-gva-2");
        assert_eq!(row.category_source, "ch-gva-2:team-a");
        assert_eq!(row.tenant_source, "acme");
        assert_eq!(row.query_name, STORAGE);
        assert_eq!(row.quantity, 4.0);
        assert_eq!(row.period.from, Some(billing_date(6)));
        assert_eq!(row.period.until, Some(billing_date(7)));

        let later = store
            .facts_between(billing_date(7), billing_date(8))
            .await
            .unwrap();
        assert!(later.is_empty());
    }

    #[tokio::test]
    async fn test_metrics_shared_across_runs() {
        let metrics = Arc::new(ReconcileMetrics::new());
        let ledger = Arc::new(MemoryLedger::new());
        let store = Arc::new(ReconciliationStore::new(ledger, storage_catalog()));
        let pipeline = ReconciliationPipeline::builder()
            .store(store)
            .adapter(Arc::new(ObjectStorageAdapter::new(STORAGE)))
            .zone(ZONE)
            .metrics(metrics.clone())
            .build()
            .unwrap();

        let clock = BillingClock::new(billing_date(6));
        for value in [2e9, 1e9] {
            pipeline
                .run(
                    &StaticUsageSource::new(vec![bytes("bucket-a", value), bytes("orphan", 1.0)]),
                    &resolver(),
                    clock,
                )
                .await
                .unwrap();
        }

        let summary = MetricsSummary::from_metrics(&metrics);
        assert_eq!(summary.runs, 2);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.not_advanced, 1);
        assert_eq!(summary.dropped, 2);
        assert_eq!(summary.failed, 0);
    }
}

// =============================================================================
// Diagnostics
// =============================================================================

mod diagnostics_tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    use tracing_subscriber::EnvFilter;

    /// Shared buffer the fmt subscriber writes into.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            let bytes = self.0.lock().unwrap();
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dropped_and_failed_records_are_logged() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_env_filter(EnvFilter::new("usage_reconciler=warn"))
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        // initech has no product
        let catalog = Catalog::builder()
            .query(Query::new(STORAGE, "GB"))
            .product(Product::new(
                format!("{}:{}:acme", STORAGE, ZONE),
                dec!(0.02),
                "GB",
            ))
            .discount(Discount::new(STORAGE, dec!(0)))
            .build();
        let harness = harness(catalog);

        let report = run_with(
            &harness,
            vec![
                bytes("bucket-a", 1e9),
                bytes("bucket-c", 1e9),
                bytes("orphan", 1e9),
            ],
            BillingClock::new(billing_date(6)),
        )
        .await;
        assert_eq!(report.inserted(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.dropped.len(), 1);

        let output = logs.contents();
        let dropped = output
            .lines()
            .find(|line| line.contains("Dropping unresolved observation"))
            .unwrap();
        assert!(dropped.contains("WARN"));
        assert!(dropped.contains("entity=orphan"));

        let failed = output
            .lines()
            .find(|line| line.contains("Record failed"))
            .unwrap();
        assert!(failed.contains("WARN"));
        assert!(failed.contains(&format!("key={}", Key::encode(["team-c"]))));

        assert!(!output.contains(" INFO "));
    }
}
