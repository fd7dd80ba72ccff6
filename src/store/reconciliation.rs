//! Catalog seeding, best-match resolution, and ratcheted fact persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{Ensured, FactExport, FactUpsert, Ledger, LedgerTransaction, StoreResult};
use crate::catalog::{Catalog, Category, DateTimeBucket, Discount, Fact, Product, Tenant};
use crate::key::Key;
use crate::source::{TokenizedSource, find_best_match};
use crate::{Error, Result};

/// One aggregated line item, ready to be priced and recorded.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BillingRecord {
    pub key: Key,
    pub query: String,
    /// `{query}:{zone}:{organization}:{namespace}[:suffix...]`
    pub source: TokenizedSource,
    pub tenant: String,
    pub category: String,
    pub quantity: f64,
}

/// Row counts touched by one catalog seeding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl SeedSummary {
    fn count<T>(&mut self, ensured: &Ensured<T>) {
        match ensured {
            Ensured::Created(_) => self.created += 1,
            Ensured::Updated(_) => self.updated += 1,
            Ensured::Unchanged(_) => self.unchanged += 1,
        }
    }
}

/// Owns the catalog definition and every write to the ledger.
pub struct ReconciliationStore {
    ledger: Arc<dyn Ledger>,
    catalog: Catalog,
}

impl ReconciliationStore {
    pub fn new(ledger: Arc<dyn Ledger>, catalog: Catalog) -> Self {
        Self { ledger, catalog }
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Ensures every catalog query, product and discount in one transaction.
    ///
    /// Any failure rolls the whole seeding back.
    pub async fn seed_catalog(&self) -> Result<SeedSummary> {
        let mut tx = self.ledger.begin().await.map_err(Error::CatalogSeed)?;
        match self.seed_in(tx.as_mut()).await {
            Ok(summary) => {
                tx.commit().await.map_err(Error::CatalogSeed)?;
                tracing::info!(
                    ledger = self.ledger.name(),
                    created = summary.created,
                    updated = summary.updated,
                    unchanged = summary.unchanged,
                    "Seeded catalog"
                );
                Ok(summary)
            }
            Err(e) => {
                rollback_quietly(tx).await;
                Err(Error::CatalogSeed(e))
            }
        }
    }

    async fn seed_in(&self, tx: &mut dyn LedgerTransaction) -> StoreResult<SeedSummary> {
        let mut summary = SeedSummary::default();
        for query in self.catalog.queries() {
            summary.count(&tx.ensure_query(query).await?);
        }
        for product in self.catalog.products() {
            let ensured = tx.ensure_product(product).await?;
            if ensured.is_updated() {
                tracing::info!(
                    source = %product.source,
                    amount = %product.amount,
                    "Updated product"
                );
            }
            summary.count(&ensured);
        }
        for discount in self.catalog.discounts() {
            summary.count(&tx.ensure_discount(discount).await?);
        }
        Ok(summary)
    }

    /// Best product for `source` among those effective at `at`.
    pub async fn resolve_product(
        &self,
        source: &TokenizedSource,
        at: DateTime<Utc>,
    ) -> Result<Option<Product>> {
        let mut tx = self.ledger.begin().await?;
        let resolved = best_product(tx.as_mut(), source, at).await;
        rollback_quietly(tx).await;
        resolved
    }

    /// Best discount for `source` among those effective at `at`.
    pub async fn resolve_discount(
        &self,
        source: &TokenizedSource,
        at: DateTime<Utc>,
    ) -> Result<Option<Discount>> {
        let mut tx = self.ledger.begin().await?;
        let resolved = best_discount(tx.as_mut(), source, at).await;
        rollback_quietly(tx).await;
        resolved
    }

    /// Resolves and records one line item inside its own transaction.
    pub async fn reconcile(&self, record: &BillingRecord, at: DateTime<Utc>) -> Result<FactUpsert> {
        let mut tx = self.ledger.begin().await?;
        match reconcile_in(tx.as_mut(), record, at).await {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                rollback_quietly(tx).await;
                Err(e)
            }
        }
    }

    pub async fn facts_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<FactExport>> {
        Ok(self.ledger.facts_between(from, until).await?)
    }
}

async fn reconcile_in(
    tx: &mut dyn LedgerTransaction,
    record: &BillingRecord,
    at: DateTime<Utc>,
) -> Result<FactUpsert> {
    let query = tx
        .query_at(&record.query, at)
        .await?
        .ok_or_else(|| Error::NoMatch {
            kind: "query",
            source_string: record.query.clone(),
        })?;
    let product = best_product(tx, &record.source, at)
        .await?
        .ok_or_else(|| Error::NoMatch {
            kind: "product",
            source_string: record.source.to_string(),
        })?;
    let discount = best_discount(tx, &record.source, at)
        .await?
        .ok_or_else(|| Error::NoMatch {
            kind: "discount",
            source_string: record.source.to_string(),
        })?;

    let bucket = tx
        .ensure_date_time(&DateTimeBucket::hour_of(at))
        .await?
        .into_inner();
    let tenant = tx
        .ensure_tenant(&Tenant::new(record.tenant.as_str()))
        .await?
        .into_inner();
    let category = tx
        .ensure_category(&Category::new(record.category.as_str()))
        .await?
        .into_inner();

    let fact = Fact {
        id: Uuid::nil(),
        date_time_id: bucket.id,
        query_id: query.id,
        tenant_id: tenant.id,
        category_id: category.id,
        product_id: product.id,
        discount_id: discount.id,
        quantity: record.quantity,
    };
    let outcome = tx.upsert_fact(&fact).await?;
    tracing::debug!(
        source = %record.source,
        product = %product.source,
        discount = %discount.source,
        ?outcome,
        "Recorded fact"
    );
    Ok(outcome)
}

async fn best_product(
    tx: &mut dyn LedgerTransaction,
    source: &TokenizedSource,
    at: DateTime<Utc>,
) -> Result<Option<Product>> {
    let candidates = tx.products_at(at).await?;
    Ok(find_best_match(source, &candidates)?.cloned())
}

async fn best_discount(
    tx: &mut dyn LedgerTransaction,
    source: &TokenizedSource,
    at: DateTime<Utc>,
) -> Result<Option<Discount>> {
    let candidates = tx.discounts_at(at).await?;
    Ok(find_best_match(source, &candidates)?.cloned())
}

async fn rollback_quietly(tx: Box<dyn LedgerTransaction>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "Rollback failed");
    }
}
