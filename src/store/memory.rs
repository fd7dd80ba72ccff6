//! In-memory ledger (for testing and single-process deployments).
//!
//! A transaction holds the ledger lock for its whole lifetime and works on a
//! copy of the state; `commit` swaps the copy in, anything else discards it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    Ensured, FactExport, FactUpsert, Ledger, LedgerTransaction, StoreResult, check_quantity,
    check_source,
};
use crate::catalog::{Category, DateTimeBucket, Discount, Fact, Product, Query, Tenant};

/// Full copy of the ledger contents.
#[derive(Clone, Debug, Default)]
pub struct LedgerSnapshot {
    pub categories: Vec<Category>,
    pub tenants: Vec<Tenant>,
    pub date_times: Vec<DateTimeBucket>,
    pub queries: Vec<Query>,
    pub products: Vec<Product>,
    pub discounts: Vec<Discount>,
    pub facts: Vec<Fact>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerSnapshot>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> LedgerSnapshot {
        self.state.lock().await.clone()
    }

    pub async fn fact_count(&self) -> usize {
        self.state.lock().await.facts.len()
    }
}

#[async_trait::async_trait]
impl Ledger for MemoryLedger {
    fn name(&self) -> &str {
        "memory"
    }

    async fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }

    async fn facts_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<FactExport>> {
        let state = self.state.lock().await;
        let mut exports = Vec::new();
        for fact in &state.facts {
            let Some(bucket) = state.date_times.iter().find(|d| d.id == fact.date_time_id) else {
                continue;
            };
            if bucket.timestamp < from || bucket.timestamp >= until {
                continue;
            }
            let product = state.products.iter().find(|p| p.id == fact.product_id);
            let category = state.categories.iter().find(|c| c.id == fact.category_id);
            let tenant = state.tenants.iter().find(|t| t.id == fact.tenant_id);
            let query = state.queries.iter().find(|q| q.id == fact.query_id);
            if let (Some(product), Some(category), Some(tenant), Some(query)) =
                (product, category, tenant, query)
            {
                exports.push(FactExport {
                    product_source: product.source.clone(),
                    category_source: category.source.clone(),
                    tenant_source: tenant.source.clone(),
                    query_name: query.name.clone(),
                    quantity: fact.quantity,
                    period: bucket.period(),
                });
            }
        }
        exports.sort_by(|a, b| export_order(a).cmp(&export_order(b)));
        Ok(exports)
    }
}

fn export_order(export: &FactExport) -> (Option<DateTime<Utc>>, &str, &str) {
    (
        export.period.from,
        export.tenant_source.as_str(),
        export.category_source.as_str(),
    )
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<LedgerSnapshot>,
    working: LedgerSnapshot,
}

trait Row: Clone {
    fn set_id(&mut self, id: Uuid);
    fn id(&self) -> Uuid;
}

macro_rules! impl_row {
    ($($ty:ty),*) => {
        $(impl Row for $ty {
            fn set_id(&mut self, id: Uuid) {
                self.id = id;
            }

            fn id(&self) -> Uuid {
                self.id
            }
        })*
    };
}

impl_row!(Category, Tenant, DateTimeBucket, Query, Product, Discount);

fn insert<T: Row>(rows: &mut Vec<T>, incoming: &T) -> T {
    let mut row = incoming.clone();
    row.set_id(Uuid::new_v4());
    rows.push(row.clone());
    row
}

fn ensure_dimension<T: Row>(
    rows: &mut Vec<T>,
    incoming: &T,
    same_key: impl Fn(&T) -> bool,
) -> Ensured<T> {
    match rows.iter().find(|r| same_key(r)) {
        Some(existing) => Ensured::Unchanged(existing.clone()),
        None => Ensured::Created(insert(rows, incoming)),
    }
}

fn ensure_rule<T: Row>(
    rows: &mut Vec<T>,
    incoming: &T,
    same_key: impl Fn(&T) -> bool,
    same_definition: impl Fn(&T, &T) -> bool,
) -> Ensured<T> {
    match rows.iter_mut().find(|r| same_key(r)) {
        Some(existing) if same_definition(&*existing, incoming) => {
            Ensured::Unchanged(existing.clone())
        }
        Some(existing) => {
            let id = existing.id();
            *existing = incoming.clone();
            existing.set_id(id);
            Ensured::Updated(existing.clone())
        }
        None => Ensured::Created(insert(rows, incoming)),
    }
}

#[async_trait::async_trait]
impl LedgerTransaction for MemoryTransaction {
    async fn ensure_category(&mut self, category: &Category) -> StoreResult<Ensured<Category>> {
        check_source("category", &category.source)?;
        Ok(ensure_dimension(
            &mut self.working.categories,
            category,
            |c| c.source == category.source,
        ))
    }

    async fn ensure_tenant(&mut self, tenant: &Tenant) -> StoreResult<Ensured<Tenant>> {
        check_source("tenant", &tenant.source)?;
        Ok(ensure_dimension(&mut self.working.tenants, tenant, |t| {
            t.source == tenant.source
        }))
    }

    async fn ensure_date_time(
        &mut self,
        bucket: &DateTimeBucket,
    ) -> StoreResult<Ensured<DateTimeBucket>> {
        Ok(ensure_dimension(&mut self.working.date_times, bucket, |d| {
            d.timestamp == bucket.timestamp
        }))
    }

    async fn ensure_query(&mut self, query: &Query) -> StoreResult<Ensured<Query>> {
        check_source("query", &query.name)?;
        Ok(ensure_rule(
            &mut self.working.queries,
            query,
            |q| q.name == query.name && q.during.from == query.during.from,
            Query::same_definition,
        ))
    }

    async fn ensure_product(&mut self, product: &Product) -> StoreResult<Ensured<Product>> {
        check_source("product", &product.source)?;
        Ok(ensure_rule(
            &mut self.working.products,
            product,
            |p| p.source == product.source && p.during.from == product.during.from,
            Product::same_definition,
        ))
    }

    async fn ensure_discount(&mut self, discount: &Discount) -> StoreResult<Ensured<Discount>> {
        check_source("discount", &discount.source)?;
        Ok(ensure_rule(
            &mut self.working.discounts,
            discount,
            |d| d.source == discount.source && d.during.from == discount.during.from,
            Discount::same_definition,
        ))
    }

    async fn query_at(&mut self, name: &str, at: DateTime<Utc>) -> StoreResult<Option<Query>> {
        Ok(self
            .working
            .queries
            .iter()
            .find(|q| q.name == name && q.during.contains(at))
            .cloned())
    }

    async fn products_at(&mut self, at: DateTime<Utc>) -> StoreResult<Vec<Product>> {
        Ok(self
            .working
            .products
            .iter()
            .filter(|p| p.during.contains(at))
            .cloned()
            .collect())
    }

    async fn discounts_at(&mut self, at: DateTime<Utc>) -> StoreResult<Vec<Discount>> {
        Ok(self
            .working
            .discounts
            .iter()
            .filter(|d| d.during.contains(at))
            .cloned()
            .collect())
    }

    async fn upsert_fact(&mut self, fact: &Fact) -> StoreResult<FactUpsert> {
        check_quantity(fact.quantity)?;
        match self
            .working
            .facts
            .iter_mut()
            .find(|f| f.same_composite(fact))
        {
            None => {
                let mut row = fact.clone();
                row.id = Uuid::new_v4();
                self.working.facts.push(row);
                Ok(FactUpsert::Inserted {
                    quantity: fact.quantity,
                })
            }
            Some(existing) if fact.quantity > existing.quantity => {
                let previous = existing.quantity;
                existing.quantity = fact.quantity;
                Ok(FactUpsert::Advanced {
                    previous,
                    quantity: fact.quantity,
                })
            }
            Some(existing) => Ok(FactUpsert::NotAdvanced {
                recorded: existing.quantity,
                attempted: fact.quantity,
            }),
        }
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
