//! Pricing catalog definitions.
//!
//! A [`Catalog`] is plain configuration: the products, discounts and metered
//! queries a run prices usage against. It is passed to the
//! [`ReconciliationStore`](crate::store::ReconciliationStore) at construction
//! and seeded into the ledger at the start of every run.
//!
//! ```rust
//! use rust_decimal_macros::dec;
//! use usage_reconciler::catalog::{Catalog, Discount, Product, Query};
//!
//! let catalog = Catalog::builder()
//!     .query(Query::new("appcat_object-storage-storage", "GBDay"))
//!     .product(Product::new("appcat_object-storage-storage:ch-gva-2", dec!(0.0007), "GBDay"))
//!     .discount(Discount::new("appcat_object-storage-storage", dec!(0)))
//!     .build();
//!
//! assert_eq!(catalog.products().len(), 1);
//! ```

mod entity;

pub use entity::{Category, DateTimeBucket, Discount, Fact, Period, Product, Query, Tenant};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigResult};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    queries: Vec<Query>,
    #[serde(default)]
    products: Vec<Product>,
    #[serde(default)]
    discounts: Vec<Discount>,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn discounts(&self) -> &[Discount] {
        &self.discounts
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty() && self.products.is_empty() && self.discounts.is_empty()
    }

    /// Loads a catalog file; `.yaml`/`.yml` are parsed as YAML, anything else as JSON.
    pub async fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| {
                e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml")
            });

        if is_yaml {
            Self::from_yaml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    pub fn from_json(content: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_yaml(content: &str) -> ConfigResult<Self> {
        serde_yaml_bw::from_str(content).map_err(|e| ConfigError::InvalidValue {
            key: "catalog".into(),
            message: e.to_string(),
        })
    }
}

#[derive(Debug, Default)]
pub struct CatalogBuilder {
    catalog: Catalog,
}

impl CatalogBuilder {
    pub fn query(mut self, query: Query) -> Self {
        self.catalog.queries.push(query);
        self
    }

    pub fn product(mut self, product: Product) -> Self {
        self.catalog.products.push(product);
        self
    }

    pub fn discount(mut self, discount: Discount) -> Self {
        self.catalog.discounts.push(discount);
        self
    }

    pub fn products(mut self, products: impl IntoIterator<Item = Product>) -> Self {
        self.catalog.products.extend(products);
        self
    }

    pub fn discounts(mut self, discounts: impl IntoIterator<Item = Discount>) -> Self {
        self.catalog.discounts.extend(discounts);
        self
    }

    pub fn build(self) -> Catalog {
        self.catalog
    }
}
