//! PostgreSQL ledger backend.
//!
//! Enable with the `postgres` feature flag.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use super::{
    Ensured, FactExport, FactUpsert, Ledger, LedgerTransaction, StorageResultExt, StoreResult,
    check_quantity, check_source,
};
use crate::catalog::{Category, DateTimeBucket, Discount, Fact, Period, Product, Query, Tenant};

const PERIOD_FILTER: &str =
    "(valid_from IS NULL OR valid_from <= $1) AND (valid_until IS NULL OR $1 < valid_until)";

#[derive(Clone, Debug)]
struct Tables {
    categories: String,
    tenants: String,
    date_times: String,
    queries: String,
    products: String,
    discounts: String,
    facts: String,
}

impl Tables {
    fn with_prefix(prefix: &str) -> Self {
        Self {
            categories: format!("{}categories", prefix),
            tenants: format!("{}tenants", prefix),
            date_times: format!("{}date_times", prefix),
            queries: format!("{}queries", prefix),
            products: format!("{}products", prefix),
            discounts: format!("{}discounts", prefix),
            facts: format!("{}facts", prefix),
        }
    }
}

/// PostgreSQL ledger backend.
pub struct PostgresLedger {
    pool: Arc<PgPool>,
    tables: Tables,
}

impl PostgresLedger {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::with_pool(Arc::new(pool)))
    }

    /// Create with an existing connection pool.
    pub fn with_pool(pool: Arc<PgPool>) -> Self {
        Self {
            pool,
            tables: Tables::with_prefix("billing_"),
        }
    }

    /// Set a custom table name prefix (default `billing_`).
    pub fn with_table_prefix(mut self, prefix: impl AsRef<str>) -> Self {
        self.tables = Tables::with_prefix(prefix.as_ref());
        self
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        let t = &self.tables;
        let statements = [
            format!(
                r#"CREATE TABLE IF NOT EXISTS {} (
                    id UUID PRIMARY KEY,
                    source TEXT NOT NULL UNIQUE CHECK (source <> ''),
                    target TEXT
                )"#,
                t.categories
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS {} (
                    id UUID PRIMARY KEY,
                    source TEXT NOT NULL UNIQUE CHECK (source <> ''),
                    target TEXT
                )"#,
                t.tenants
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS {} (
                    id UUID PRIMARY KEY,
                    timestamp TIMESTAMPTZ NOT NULL UNIQUE,
                    year INTEGER NOT NULL,
                    month INTEGER NOT NULL,
                    day INTEGER NOT NULL,
                    hour INTEGER NOT NULL
                )"#,
                t.date_times
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS {} (
                    id UUID PRIMARY KEY,
                    name TEXT NOT NULL CHECK (name <> ''),
                    description TEXT NOT NULL DEFAULT '',
                    unit TEXT NOT NULL,
                    valid_from TIMESTAMPTZ,
                    valid_until TIMESTAMPTZ
                )"#,
                t.queries
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_{0}_natural ON {0} (name, COALESCE(valid_from, '-infinity'))",
                t.queries
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS {} (
                    id UUID PRIMARY KEY,
                    source TEXT NOT NULL CHECK (source <> ''),
                    target TEXT,
                    amount NUMERIC NOT NULL,
                    unit TEXT NOT NULL,
                    valid_from TIMESTAMPTZ,
                    valid_until TIMESTAMPTZ
                )"#,
                t.products
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_{0}_natural ON {0} (source, COALESCE(valid_from, '-infinity'))",
                t.products
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS {} (
                    id UUID PRIMARY KEY,
                    source TEXT NOT NULL CHECK (source <> ''),
                    discount NUMERIC NOT NULL,
                    valid_from TIMESTAMPTZ,
                    valid_until TIMESTAMPTZ
                )"#,
                t.discounts
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_{0}_natural ON {0} (source, COALESCE(valid_from, '-infinity'))",
                t.discounts
            ),
            format!(
                r#"CREATE TABLE IF NOT EXISTS {} (
                    id UUID PRIMARY KEY,
                    date_time_id UUID NOT NULL REFERENCES {}(id),
                    query_id UUID NOT NULL REFERENCES {}(id),
                    tenant_id UUID NOT NULL REFERENCES {}(id),
                    category_id UUID NOT NULL REFERENCES {}(id),
                    product_id UUID NOT NULL REFERENCES {}(id),
                    discount_id UUID NOT NULL REFERENCES {}(id),
                    quantity DOUBLE PRECISION NOT NULL,
                    UNIQUE (date_time_id, query_id, tenant_id, category_id, product_id, discount_id)
                )"#,
                t.facts, t.date_times, t.queries, t.tenants, t.categories, t.products, t.discounts
            ),
        ];

        for statement in &statements {
            sqlx::query(statement).execute(&*self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Ledger for PostgresLedger {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn begin(&self) -> StoreResult<Box<dyn LedgerTransaction>> {
        let tx = self.pool.begin().await.storage_err_ctx("begin")?;
        Ok(Box::new(PgLedgerTransaction {
            tx,
            tables: self.tables.clone(),
        }))
    }

    async fn facts_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<FactExport>> {
        let t = &self.tables;
        let sql = format!(
            r#"
            SELECT p.source AS product_source, c.source AS category_source,
                   te.source AS tenant_source, q.name AS query_name,
                   f.quantity, d.timestamp
            FROM {} f
            JOIN {} d ON d.id = f.date_time_id
            JOIN {} p ON p.id = f.product_id
            JOIN {} c ON c.id = f.category_id
            JOIN {} te ON te.id = f.tenant_id
            JOIN {} q ON q.id = f.query_id
            WHERE d.timestamp >= $1 AND d.timestamp < $2
            ORDER BY d.timestamp, te.source, c.source
            "#,
            t.facts, t.date_times, t.products, t.categories, t.tenants, t.queries
        );

        let rows = sqlx::query(&sql)
            .bind(from)
            .bind(until)
            .fetch_all(&*self.pool)
            .await
            .storage_err_ctx("facts_between")?;

        rows.iter()
            .map(|row| {
                let timestamp: DateTime<Utc> = row.try_get("timestamp").storage_err()?;
                Ok(FactExport {
                    product_source: row.try_get("product_source").storage_err()?,
                    category_source: row.try_get("category_source").storage_err()?,
                    tenant_source: row.try_get("tenant_source").storage_err()?,
                    query_name: row.try_get("query_name").storage_err()?,
                    quantity: row.try_get("quantity").storage_err()?,
                    period: DateTimeBucket::hour_of(timestamp).period(),
                })
            })
            .collect()
    }
}

struct PgLedgerTransaction {
    tx: Transaction<'static, Postgres>,
    tables: Tables,
}

fn period_from_row(row: &PgRow) -> StoreResult<Period> {
    Ok(Period {
        from: row.try_get("valid_from").storage_err()?,
        until: row.try_get("valid_until").storage_err()?,
    })
}

fn query_from_row(row: &PgRow) -> StoreResult<Query> {
    Ok(Query {
        id: row.try_get("id").storage_err()?,
        name: row.try_get("name").storage_err()?,
        description: row.try_get("description").storage_err()?,
        unit: row.try_get("unit").storage_err()?,
        during: period_from_row(row)?,
    })
}

fn product_from_row(row: &PgRow) -> StoreResult<Product> {
    Ok(Product {
        id: row.try_get("id").storage_err()?,
        source: row.try_get("source").storage_err()?,
        target: row.try_get("target").storage_err()?,
        amount: row.try_get("amount").storage_err()?,
        unit: row.try_get("unit").storage_err()?,
        during: period_from_row(row)?,
    })
}

fn discount_from_row(row: &PgRow) -> StoreResult<Discount> {
    Ok(Discount {
        id: row.try_get("id").storage_err()?,
        source: row.try_get("source").storage_err()?,
        discount: row.try_get("discount").storage_err()?,
        during: period_from_row(row)?,
    })
}

fn date_time_from_row(row: &PgRow) -> StoreResult<DateTimeBucket> {
    let part = |name: &str| -> StoreResult<u32> {
        let value: i32 = row.try_get(name).storage_err()?;
        u32::try_from(value).storage_err_ctx(name)
    };
    Ok(DateTimeBucket {
        id: row.try_get("id").storage_err()?,
        timestamp: row.try_get("timestamp").storage_err()?,
        year: row.try_get("year").storage_err()?,
        month: part("month")?,
        day: part("day")?,
        hour: part("hour")?,
    })
}

impl PgLedgerTransaction {
    /// Shared get-or-create for `(id, source, target)` dimension tables.
    async fn ensure_labeled(
        &mut self,
        table: &str,
        source: &str,
        target: Option<&str>,
    ) -> StoreResult<(Uuid, Option<String>, bool)> {
        let select = format!("SELECT id, target FROM {} WHERE source = $1", table);
        if let Some(row) = sqlx::query(&select)
            .bind(source)
            .fetch_optional(&mut *self.tx)
            .await
            .storage_err_ctx(table)?
        {
            return Ok((
                row.try_get("id").storage_err()?,
                row.try_get("target").storage_err()?,
                false,
            ));
        }

        let id = Uuid::new_v4();
        let insert = format!(
            "INSERT INTO {} (id, source, target) VALUES ($1, $2, $3)",
            table
        );
        sqlx::query(&insert)
            .bind(id)
            .bind(source)
            .bind(target)
            .execute(&mut *self.tx)
            .await
            .storage_err_ctx(table)?;
        Ok((id, target.map(str::to_string), true))
    }
}

#[async_trait::async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    async fn ensure_category(&mut self, category: &Category) -> StoreResult<Ensured<Category>> {
        check_source("category", &category.source)?;
        let table = self.tables.categories.clone();
        let (id, target, created) = self
            .ensure_labeled(&table, &category.source, category.target.as_deref())
            .await?;
        let row = Category {
            id,
            source: category.source.clone(),
            target,
        };
        Ok(if created {
            Ensured::Created(row)
        } else {
            Ensured::Unchanged(row)
        })
    }

    async fn ensure_tenant(&mut self, tenant: &Tenant) -> StoreResult<Ensured<Tenant>> {
        check_source("tenant", &tenant.source)?;
        let table = self.tables.tenants.clone();
        let (id, target, created) = self
            .ensure_labeled(&table, &tenant.source, tenant.target.as_deref())
            .await?;
        let row = Tenant {
            id,
            source: tenant.source.clone(),
            target,
        };
        Ok(if created {
            Ensured::Created(row)
        } else {
            Ensured::Unchanged(row)
        })
    }

    async fn ensure_date_time(
        &mut self,
        bucket: &DateTimeBucket,
    ) -> StoreResult<Ensured<DateTimeBucket>> {
        let select = format!(
            "SELECT id, timestamp, year, month, day, hour FROM {} WHERE timestamp = $1",
            self.tables.date_times
        );
        if let Some(row) = sqlx::query(&select)
            .bind(bucket.timestamp)
            .fetch_optional(&mut *self.tx)
            .await
            .storage_err_ctx("date_times")?
        {
            return Ok(Ensured::Unchanged(date_time_from_row(&row)?));
        }

        let row = DateTimeBucket {
            id: Uuid::new_v4(),
            ..bucket.clone()
        };
        let insert = format!(
            "INSERT INTO {} (id, timestamp, year, month, day, hour) VALUES ($1, $2, $3, $4, $5, $6)",
            self.tables.date_times
        );
        sqlx::query(&insert)
            .bind(row.id)
            .bind(row.timestamp)
            .bind(row.year)
            .bind(row.month as i32)
            .bind(row.day as i32)
            .bind(row.hour as i32)
            .execute(&mut *self.tx)
            .await
            .storage_err_ctx("date_times")?;
        Ok(Ensured::Created(row))
    }

    async fn ensure_query(&mut self, query: &Query) -> StoreResult<Ensured<Query>> {
        check_source("query", &query.name)?;
        let select = format!(
            "SELECT id, name, description, unit, valid_from, valid_until FROM {} \
             WHERE name = $1 AND valid_from IS NOT DISTINCT FROM $2 FOR UPDATE",
            self.tables.queries
        );
        let existing = sqlx::query(&select)
            .bind(&query.name)
            .bind(query.during.from)
            .fetch_optional(&mut *self.tx)
            .await
            .storage_err_ctx("queries")?
            .map(|row| query_from_row(&row))
            .transpose()?;

        match existing {
            Some(existing) if existing.same_definition(query) => Ok(Ensured::Unchanged(existing)),
            Some(existing) => {
                let update = format!(
                    "UPDATE {} SET description = $2, unit = $3, valid_until = $4 WHERE id = $1",
                    self.tables.queries
                );
                sqlx::query(&update)
                    .bind(existing.id)
                    .bind(&query.description)
                    .bind(&query.unit)
                    .bind(query.during.until)
                    .execute(&mut *self.tx)
                    .await
                    .storage_err_ctx("queries")?;
                Ok(Ensured::Updated(Query {
                    id: existing.id,
                    ..query.clone()
                }))
            }
            None => {
                let id = Uuid::new_v4();
                let insert = format!(
                    "INSERT INTO {} (id, name, description, unit, valid_from, valid_until) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
                    self.tables.queries
                );
                sqlx::query(&insert)
                    .bind(id)
                    .bind(&query.name)
                    .bind(&query.description)
                    .bind(&query.unit)
                    .bind(query.during.from)
                    .bind(query.during.until)
                    .execute(&mut *self.tx)
                    .await
                    .storage_err_ctx("queries")?;
                Ok(Ensured::Created(Query {
                    id,
                    ..query.clone()
                }))
            }
        }
    }

    async fn ensure_product(&mut self, product: &Product) -> StoreResult<Ensured<Product>> {
        check_source("product", &product.source)?;
        let select = format!(
            "SELECT id, source, target, amount, unit, valid_from, valid_until FROM {} \
             WHERE source = $1 AND valid_from IS NOT DISTINCT FROM $2 FOR UPDATE",
            self.tables.products
        );
        let existing = sqlx::query(&select)
            .bind(&product.source)
            .bind(product.during.from)
            .fetch_optional(&mut *self.tx)
            .await
            .storage_err_ctx("products")?
            .map(|row| product_from_row(&row))
            .transpose()?;

        match existing {
            Some(existing) if existing.same_definition(product) => {
                Ok(Ensured::Unchanged(existing))
            }
            Some(existing) => {
                let update = format!(
                    "UPDATE {} SET target = $2, amount = $3, unit = $4, valid_until = $5 WHERE id = $1",
                    self.tables.products
                );
                sqlx::query(&update)
                    .bind(existing.id)
                    .bind(&product.target)
                    .bind(product.amount)
                    .bind(&product.unit)
                    .bind(product.during.until)
                    .execute(&mut *self.tx)
                    .await
                    .storage_err_ctx("products")?;
                Ok(Ensured::Updated(Product {
                    id: existing.id,
                    ..product.clone()
                }))
            }
            None => {
                let id = Uuid::new_v4();
                let insert = format!(
                    "INSERT INTO {} (id, source, target, amount, unit, valid_from, valid_until) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                    self.tables.products
                );
                sqlx::query(&insert)
                    .bind(id)
                    .bind(&product.source)
                    .bind(&product.target)
                    .bind(product.amount)
                    .bind(&product.unit)
                    .bind(product.during.from)
                    .bind(product.during.until)
                    .execute(&mut *self.tx)
                    .await
                    .storage_err_ctx("products")?;
                Ok(Ensured::Created(Product {
                    id,
                    ..product.clone()
                }))
            }
        }
    }

    async fn ensure_discount(&mut self, discount: &Discount) -> StoreResult<Ensured<Discount>> {
        check_source("discount", &discount.source)?;
        let select = format!(
            "SELECT id, source, discount, valid_from, valid_until FROM {} \
             WHERE source = $1 AND valid_from IS NOT DISTINCT FROM $2 FOR UPDATE",
            self.tables.discounts
        );
        let existing = sqlx::query(&select)
            .bind(&discount.source)
            .bind(discount.during.from)
            .fetch_optional(&mut *self.tx)
            .await
            .storage_err_ctx("discounts")?
            .map(|row| discount_from_row(&row))
            .transpose()?;

        match existing {
            Some(existing) if existing.same_definition(discount) => {
                Ok(Ensured::Unchanged(existing))
            }
            Some(existing) => {
                let update = format!(
                    "UPDATE {} SET discount = $2, valid_until = $3 WHERE id = $1",
                    self.tables.discounts
                );
                sqlx::query(&update)
                    .bind(existing.id)
                    .bind(discount.discount)
                    .bind(discount.during.until)
                    .execute(&mut *self.tx)
                    .await
                    .storage_err_ctx("discounts")?;
                Ok(Ensured::Updated(Discount {
                    id: existing.id,
                    ..discount.clone()
                }))
            }
            None => {
                let id = Uuid::new_v4();
                let insert = format!(
                    "INSERT INTO {} (id, source, discount, valid_from, valid_until) \
                     VALUES ($1, $2, $3, $4, $5)",
                    self.tables.discounts
                );
                sqlx::query(&insert)
                    .bind(id)
                    .bind(&discount.source)
                    .bind(discount.discount)
                    .bind(discount.during.from)
                    .bind(discount.during.until)
                    .execute(&mut *self.tx)
                    .await
                    .storage_err_ctx("discounts")?;
                Ok(Ensured::Created(Discount {
                    id,
                    ..discount.clone()
                }))
            }
        }
    }

    async fn query_at(&mut self, name: &str, at: DateTime<Utc>) -> StoreResult<Option<Query>> {
        let select = format!(
            "SELECT id, name, description, unit, valid_from, valid_until FROM {} \
             WHERE {} AND name = $2 LIMIT 1",
            self.tables.queries, PERIOD_FILTER
        );
        sqlx::query(&select)
            .bind(at)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await
            .storage_err_ctx("queries")?
            .map(|row| query_from_row(&row))
            .transpose()
    }

    async fn products_at(&mut self, at: DateTime<Utc>) -> StoreResult<Vec<Product>> {
        let select = format!(
            "SELECT id, source, target, amount, unit, valid_from, valid_until FROM {} WHERE {}",
            self.tables.products, PERIOD_FILTER
        );
        sqlx::query(&select)
            .bind(at)
            .fetch_all(&mut *self.tx)
            .await
            .storage_err_ctx("products")?
            .iter()
            .map(product_from_row)
            .collect()
    }

    async fn discounts_at(&mut self, at: DateTime<Utc>) -> StoreResult<Vec<Discount>> {
        let select = format!(
            "SELECT id, source, discount, valid_from, valid_until FROM {} WHERE {}",
            self.tables.discounts, PERIOD_FILTER
        );
        sqlx::query(&select)
            .bind(at)
            .fetch_all(&mut *self.tx)
            .await
            .storage_err_ctx("discounts")?
            .iter()
            .map(discount_from_row)
            .collect()
    }

    async fn upsert_fact(&mut self, fact: &Fact) -> StoreResult<FactUpsert> {
        check_quantity(fact.quantity)?;
        let select = format!(
            "SELECT id, quantity FROM {} WHERE date_time_id = $1 AND query_id = $2 \
             AND tenant_id = $3 AND category_id = $4 AND product_id = $5 AND discount_id = $6 \
             FOR UPDATE",
            self.tables.facts
        );
        let existing = sqlx::query(&select)
            .bind(fact.date_time_id)
            .bind(fact.query_id)
            .bind(fact.tenant_id)
            .bind(fact.category_id)
            .bind(fact.product_id)
            .bind(fact.discount_id)
            .fetch_optional(&mut *self.tx)
            .await
            .storage_err_ctx("facts")?;

        let Some(row) = existing else {
            let insert = format!(
                "INSERT INTO {} (id, date_time_id, query_id, tenant_id, category_id, product_id, \
                 discount_id, quantity) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                self.tables.facts
            );
            sqlx::query(&insert)
                .bind(Uuid::new_v4())
                .bind(fact.date_time_id)
                .bind(fact.query_id)
                .bind(fact.tenant_id)
                .bind(fact.category_id)
                .bind(fact.product_id)
                .bind(fact.discount_id)
                .bind(fact.quantity)
                .execute(&mut *self.tx)
                .await
                .storage_err_ctx("facts")?;
            return Ok(FactUpsert::Inserted {
                quantity: fact.quantity,
            });
        };

        let id: Uuid = row.try_get("id").storage_err()?;
        let recorded: f64 = row.try_get("quantity").storage_err()?;
        if fact.quantity <= recorded {
            return Ok(FactUpsert::NotAdvanced {
                recorded,
                attempted: fact.quantity,
            });
        }

        let update = format!("UPDATE {} SET quantity = $2 WHERE id = $1", self.tables.facts);
        sqlx::query(&update)
            .bind(id)
            .bind(fact.quantity)
            .execute(&mut *self.tx)
            .await
            .storage_err_ctx("facts")?;
        Ok(FactUpsert::Advanced {
            previous: recorded,
            quantity: fact.quantity,
        })
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.storage_err_ctx("commit")
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await.storage_err_ctx("rollback")
    }
}
