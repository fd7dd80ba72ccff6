//! Transactional ledger for the rule catalog and billing facts.
//!
//! A [`Ledger`] hands out [`LedgerTransaction`]s; nothing a transaction does
//! is visible until `commit`. [`ReconciliationStore`] layers the catalog
//! seeding, best-match resolution and ratchet upsert policy on top.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod reconciliation;

pub use memory::{LedgerSnapshot, MemoryLedger};
#[cfg(feature = "postgres")]
pub use postgres::PostgresLedger;
pub use reconciliation::{BillingRecord, ReconciliationStore, SeedSummary};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::catalog::{Category, DateTimeBucket, Discount, Fact, Period, Product, Query, Tenant};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Constraint violated: {message}")]
    Constraint { message: String },

    #[error("Not found: {what}")]
    NotFound { what: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result of a get-or-create(-or-update) operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Ensured<T> {
    Created(T),
    Updated(T),
    Unchanged(T),
}

impl<T> Ensured<T> {
    pub fn get(&self) -> &T {
        match self {
            Self::Created(row) | Self::Updated(row) | Self::Unchanged(row) => row,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Created(row) | Self::Updated(row) | Self::Unchanged(row) => row,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated(_))
    }
}

/// Outcome of a ratchet upsert.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FactUpsert {
    Inserted { quantity: f64 },
    Advanced { previous: f64, quantity: f64 },
    /// The recorded quantity was greater than or equal to the attempted one.
    NotAdvanced { recorded: f64, attempted: f64 },
}

impl FactUpsert {
    pub fn is_written(&self) -> bool {
        !matches!(self, Self::NotAdvanced { .. })
    }
}

/// A recorded fact in the shape external exporters consume.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FactExport {
    pub product_source: String,
    pub category_source: String,
    pub tenant_source: String,
    pub query_name: String,
    pub quantity: f64,
    pub period: Period,
}

#[async_trait::async_trait]
pub trait Ledger: Send + Sync {
    fn name(&self) -> &str;

    async fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction>>;

    /// Facts whose time bucket starts in `[from, until)`.
    async fn facts_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<FactExport>>;
}

/// Dimension `ensure_*` calls create if absent and otherwise return the
/// existing row untouched. Rule `ensure_*` calls additionally update the
/// existing row in place when its definition differs.
#[async_trait::async_trait]
pub trait LedgerTransaction: Send {
    async fn ensure_category(&mut self, category: &Category) -> StoreResult<Ensured<Category>>;

    async fn ensure_tenant(&mut self, tenant: &Tenant) -> StoreResult<Ensured<Tenant>>;

    async fn ensure_date_time(
        &mut self,
        bucket: &DateTimeBucket,
    ) -> StoreResult<Ensured<DateTimeBucket>>;

    async fn ensure_query(&mut self, query: &Query) -> StoreResult<Ensured<Query>>;

    async fn ensure_product(&mut self, product: &Product) -> StoreResult<Ensured<Product>>;

    async fn ensure_discount(&mut self, discount: &Discount) -> StoreResult<Ensured<Discount>>;

    async fn query_at(&mut self, name: &str, at: DateTime<Utc>) -> StoreResult<Option<Query>>;

    async fn products_at(&mut self, at: DateTime<Utc>) -> StoreResult<Vec<Product>>;

    async fn discounts_at(&mut self, at: DateTime<Utc>) -> StoreResult<Vec<Discount>>;

    /// Inserts, or overwrites only with a strictly greater quantity.
    async fn upsert_fact(&mut self, fact: &Fact) -> StoreResult<FactUpsert>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

pub(crate) fn check_source(kind: &str, source: &str) -> StoreResult<()> {
    if source.is_empty() {
        return Err(StoreError::Constraint {
            message: format!("{} source must not be empty", kind),
        });
    }
    Ok(())
}

pub(crate) fn check_quantity(quantity: f64) -> StoreResult<()> {
    if !quantity.is_finite() {
        return Err(StoreError::Constraint {
            message: format!("fact quantity {} is not finite", quantity),
        });
    }
    Ok(())
}

#[cfg(feature = "postgres")]
pub(crate) trait StorageResultExt<T> {
    fn storage_err(self) -> StoreResult<T>;
    fn storage_err_ctx(self, context: &str) -> StoreResult<T>;
}

#[cfg(feature = "postgres")]
impl<T, E: std::fmt::Display> StorageResultExt<T> for std::result::Result<T, E> {
    fn storage_err(self) -> StoreResult<T> {
        self.map_err(|e| StoreError::Storage {
            message: e.to_string(),
        })
    }

    fn storage_err_ctx(self, context: &str) -> StoreResult<T> {
        self.map_err(|e| StoreError::Storage {
            message: format!("{}: {}", context, e),
        })
    }
}
