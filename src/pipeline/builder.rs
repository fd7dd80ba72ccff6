//! Pipeline construction.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::ReconciliationPipeline;
use crate::Result;
use crate::adapter::UsageAdapter;
use crate::config::{ConfigError, ReconcilerConfig};
use crate::observability::ReconcileMetrics;
use crate::source::DELIMITER;
use crate::store::ReconciliationStore;

pub struct PipelineBuilder {
    store: Option<Arc<ReconciliationStore>>,
    adapter: Option<Arc<dyn UsageAdapter>>,
    zone: Option<String>,
    prorate_intraday: bool,
    metrics: Option<Arc<ReconcileMetrics>>,
    cancel: Option<CancellationToken>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            store: None,
            adapter: None,
            zone: None,
            prorate_intraday: true,
            metrics: None,
            cancel: None,
        }
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<ReconciliationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn adapter(mut self, adapter: Arc<dyn UsageAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    /// Divide totals by the hours left in the day when the clock is intraday.
    pub fn prorate_intraday(mut self, enabled: bool) -> Self {
        self.prorate_intraday = enabled;
        self
    }

    /// Take zone and proration from a loaded [`ReconcilerConfig`].
    pub fn config(self, config: &ReconcilerConfig) -> Self {
        self.zone(config.zone.clone())
            .prorate_intraday(config.prorate_intraday)
    }

    /// Share a metrics registry across pipelines.
    pub fn metrics(mut self, metrics: Arc<ReconcileMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Result<ReconciliationPipeline> {
        let store = self.store.ok_or_else(|| missing("store"))?;
        let adapter = self.adapter.ok_or_else(|| missing("adapter"))?;
        let zone = self.zone.ok_or_else(|| missing("zone"))?;
        if zone.is_empty() || zone.contains(DELIMITER) {
            return Err(ConfigError::InvalidValue {
                key: "zone".into(),
                message: format!("{:?} must be non-empty and contain no ':'", zone),
            }
            .into());
        }

        Ok(ReconciliationPipeline {
            store,
            adapter,
            zone,
            prorate_intraday: self.prorate_intraday,
            metrics: self.metrics.unwrap_or_default(),
            cancel: self.cancel,
        })
    }
}

fn missing(key: &str) -> crate::Error {
    ConfigError::NotFound { key: key.into() }.into()
}
