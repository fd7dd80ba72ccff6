//! Raw usage observations and the collaborators that supply them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// One raw usage sample for a bucket, database, or other billed entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub entity_id: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    /// Resource-specific key dimensions such as plan or engine.
    #[serde(default)]
    pub dimensions: Vec<String>,
}

impl Observation {
    pub fn new(entity_id: impl Into<String>, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.into(),
            value,
            timestamp,
            dimensions: Vec::new(),
        }
    }

    pub fn with_dimensions<I, S>(mut self, dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dimensions = dimensions.into_iter().map(Into::into).collect();
        self
    }
}

/// Produces raw observations for one billing cycle.
#[async_trait::async_trait]
pub trait UsageSource: Send + Sync {
    fn name(&self) -> &str;

    async fn observations(&self, billing_date: DateTime<Utc>) -> Result<Vec<Observation>>;
}

/// Fixed list of observations, for tests and replays.
#[derive(Debug, Clone, Default)]
pub struct StaticUsageSource {
    observations: Vec<Observation>,
}

impl StaticUsageSource {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self { observations }
    }
}

#[async_trait::async_trait]
impl UsageSource for StaticUsageSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn observations(&self, _billing_date: DateTime<Utc>) -> Result<Vec<Observation>> {
        Ok(self.observations.clone())
    }
}

/// Maps entities to namespaces and namespaces to owning organizations.
pub trait DimensionResolver: Send + Sync {
    fn namespace_of(&self, entity_id: &str) -> Option<String>;

    fn organization_of(&self, namespace: &str) -> Option<String>;
}

/// Lookup tables built up front, typically from Kubernetes object labels.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    namespaces: HashMap<String, String>,
    organizations: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, entity_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        self.namespaces.insert(entity_id.into(), namespace.into());
        self
    }

    pub fn namespace(
        mut self,
        namespace: impl Into<String>,
        organization: impl Into<String>,
    ) -> Self {
        self.organizations
            .insert(namespace.into(), organization.into());
        self
    }
}

impl DimensionResolver for StaticResolver {
    fn namespace_of(&self, entity_id: &str) -> Option<String> {
        self.namespaces.get(entity_id).cloned()
    }

    fn organization_of(&self, namespace: &str) -> Option<String> {
        self.organizations.get(namespace).cloned()
    }
}
