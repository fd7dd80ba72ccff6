//! Rule catalog, dimension, and ledger row types.

use chrono::{DateTime, Datelike, DurationRound, TimeDelta, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::source::Sourced;

/// Half-open validity range `[from, until)`; `None` bounds are unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

impl Period {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn starting(from: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            until: None,
        }
    }

    pub fn between(from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            until: Some(until),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| from <= at) && self.until.is_none_or(|until| at < until)
    }
}

/// Pricing rule: a per-unit amount for usage matching `source`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(default, skip_serializing)]
    pub id: Uuid,
    pub source: String,
    /// Billing code in the downstream invoicing system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub amount: Decimal,
    pub unit: String,
    #[serde(default)]
    pub during: Period,
}

impl Product {
    pub fn new(source: impl Into<String>, amount: Decimal, unit: impl Into<String>) -> Self {
        Self {
            id: Uuid::nil(),
            source: source.into(),
            target: None,
            amount,
            unit: unit.into(),
            during: Period::unbounded(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_period(mut self, during: Period) -> Self {
        self.during = during;
        self
    }

    /// Compares everything except the row id.
    pub fn same_definition(&self, other: &Self) -> bool {
        self.source == other.source
            && self.target == other.target
            && self.amount == other.amount
            && self.unit == other.unit
            && self.during == other.during
    }
}

impl Sourced for Product {
    fn source(&self) -> &str {
        &self.source
    }
}

/// Percentage discount applied to usage matching `source`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Discount {
    #[serde(default, skip_serializing)]
    pub id: Uuid,
    pub source: String,
    pub discount: Decimal,
    #[serde(default)]
    pub during: Period,
}

impl Discount {
    pub fn new(source: impl Into<String>, discount: Decimal) -> Self {
        Self {
            id: Uuid::nil(),
            source: source.into(),
            discount,
            during: Period::unbounded(),
        }
    }

    pub fn with_period(mut self, during: Period) -> Self {
        self.during = during;
        self
    }

    pub fn same_definition(&self, other: &Self) -> bool {
        self.source == other.source
            && self.discount == other.discount
            && self.during == other.during
    }
}

impl Sourced for Discount {
    fn source(&self) -> &str {
        &self.source
    }
}

/// Named metered dimension, e.g. `appcat_object-storage-storage`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default, skip_serializing)]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub unit: String,
    #[serde(default)]
    pub during: Period,
}

impl Query {
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            id: Uuid::nil(),
            name: name.into(),
            description: String::new(),
            unit: unit.into(),
            during: Period::unbounded(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_period(mut self, during: Period) -> Self {
        self.during = during;
        self
    }

    pub fn same_definition(&self, other: &Self) -> bool {
        self.name == other.name
            && self.description == other.description
            && self.unit == other.unit
            && self.during == other.during
    }
}

/// Billing category, keyed by `zone:namespace`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub source: String,
    pub target: Option<String>,
}

impl Category {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: Uuid::nil(),
            source: source.into(),
            target: None,
        }
    }
}

/// Billed organization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub source: String,
    pub target: Option<String>,
}

impl Tenant {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: Uuid::nil(),
            source: source.into(),
            target: None,
        }
    }
}

/// Hourly time bucket facts are recorded against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateTimeBucket {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
}

impl DateTimeBucket {
    /// Buckets `at` into its containing hour.
    pub fn hour_of(at: DateTime<Utc>) -> Self {
        let timestamp = at
            .duration_trunc(TimeDelta::hours(1))
            .unwrap_or_else(|_| at.with_nanosecond(0).unwrap_or(at));
        Self {
            id: Uuid::nil(),
            timestamp,
            year: timestamp.year(),
            month: timestamp.month(),
            day: timestamp.day(),
            hour: timestamp.hour(),
        }
    }

    pub fn period(&self) -> Period {
        Period::between(self.timestamp, self.timestamp + TimeDelta::hours(1))
    }
}

/// One ledger row. At most one exists per dimension composite.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: Uuid,
    pub date_time_id: Uuid,
    pub query_id: Uuid,
    pub tenant_id: Uuid,
    pub category_id: Uuid,
    pub product_id: Uuid,
    pub discount_id: Uuid,
    pub quantity: f64,
}

impl Fact {
    pub fn same_composite(&self, other: &Self) -> bool {
        self.date_time_id == other.date_time_id
            && self.query_id == other.query_id
            && self.tenant_id == other.tenant_id
            && self.category_id == other.category_id
            && self.product_id == other.product_id
            && self.discount_id == other.discount_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_period_contains() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let period = Period::between(start, end);

        assert!(period.contains(start));
        assert!(period.contains(start + TimeDelta::days(3)));
        assert!(!period.contains(end));
        assert!(!period.contains(start - TimeDelta::seconds(1)));
        assert!(Period::unbounded().contains(end));
        assert!(Period::starting(start).contains(end));
    }

    #[test]
    fn test_hour_bucket() {
        let at = Utc.with_ymd_and_hms(2024, 3, 15, 17, 42, 9).unwrap();
        let bucket = DateTimeBucket::hour_of(at);
        assert_eq!(
            bucket.timestamp,
            Utc.with_ymd_and_hms(2024, 3, 15, 17, 0, 0).unwrap()
        );
        assert_eq!(
            (bucket.year, bucket.month, bucket.day, bucket.hour),
            (2024, 3, 15, 17)
        );
        assert!(bucket.period().contains(at));
    }

    #[test]
    fn test_same_definition_ignores_id() {
        let a = Product::new("q:zone", dec!(0.02), "GBDay");
        let mut b = a.clone();
        b.id = Uuid::new_v4();
        assert!(a.same_definition(&b));

        b.amount = dec!(0.03);
        assert!(!a.same_definition(&b));
    }
}
