//! Billing instant and intraday proration.

use chrono::{DateTime, Utc};

use crate::Result;
use crate::config::ConfigError;

pub const HOURS_PER_DAY: u32 = 24;

/// The instant facts apply to, and the wall-clock hour when billing intraday.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BillingClock {
    billing_date: DateTime<Utc>,
    current_hour: Option<u32>,
}

impl BillingClock {
    pub fn new(billing_date: DateTime<Utc>) -> Self {
        Self {
            billing_date,
            current_hour: None,
        }
    }

    /// Prorates totals over the `24 - hour` parts left in the day.
    pub fn intraday(billing_date: DateTime<Utc>, current_hour: u32) -> Result<Self> {
        if current_hour >= HOURS_PER_DAY {
            return Err(ConfigError::InvalidValue {
                key: "billing.hour".into(),
                message: format!("{} is not an hour of the day", current_hour),
            }
            .into());
        }
        Ok(Self {
            billing_date,
            current_hour: Some(current_hour),
        })
    }

    pub fn billing_date(&self) -> DateTime<Utc> {
        self.billing_date
    }

    pub fn current_hour(&self) -> Option<u32> {
        self.current_hour
    }

    pub fn parts_remaining(&self) -> u32 {
        self.current_hour
            .map(|hour| HOURS_PER_DAY - hour)
            .unwrap_or(1)
    }

    pub fn prorate(&self, value: f64) -> f64 {
        value / f64::from(self.parts_remaining())
    }
}
