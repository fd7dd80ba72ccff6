//! Folding raw observations into per-key totals.
//!
//! Observations whose entity has no namespace, or whose namespace has no
//! organization, are dropped with a warning. Partial data never aborts an
//! aggregation pass.

mod observation;

pub use observation::{
    DimensionResolver, Observation, StaticResolver, StaticUsageSource, UsageSource,
};

use std::collections::BTreeMap;

use serde::Serialize;

use crate::Error;
use crate::key::Key;

/// Running total for one key within a single run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Aggregated {
    pub key: Key,
    pub organization: String,
    pub value: f64,
}

#[derive(Debug)]
pub struct DroppedObservation {
    pub entity_id: String,
    pub error: Error,
}

/// Output of one aggregation pass.
#[derive(Debug, Default)]
pub struct Aggregation {
    pub records: BTreeMap<Key, Aggregated>,
    pub dropped: Vec<DroppedObservation>,
}

impl Aggregation {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn get(&self, key: &Key) -> Option<&Aggregated> {
        self.records.get(key)
    }
}

pub struct Aggregator<'a> {
    resolver: &'a dyn DimensionResolver,
    aggregation: Aggregation,
}

impl<'a> Aggregator<'a> {
    pub fn new(resolver: &'a dyn DimensionResolver) -> Self {
        Self {
            resolver,
            aggregation: Aggregation::default(),
        }
    }

    /// Adds `value` (already unit-converted) under the observation's key.
    ///
    /// Returns `false` when the observation was dropped.
    pub fn add(&mut self, observation: &Observation, value: f64) -> bool {
        let (namespace, organization) = match self.resolve(observation) {
            Ok(resolved) => resolved,
            Err(error) => {
                tracing::warn!(
                    entity = %observation.entity_id,
                    error = %error,
                    "Dropping unresolved observation"
                );
                self.aggregation.dropped.push(DroppedObservation {
                    entity_id: observation.entity_id.clone(),
                    error,
                });
                return false;
            }
        };

        let key = Key::encode(
            std::iter::once(namespace.as_str())
                .chain(observation.dimensions.iter().map(String::as_str)),
        );
        let entry = self
            .aggregation
            .records
            .entry(key.clone())
            .or_insert_with(|| Aggregated {
                key,
                organization: organization.clone(),
                value: 0.0,
            });
        entry.value += value;
        entry.organization = organization;
        true
    }

    pub fn finish(self) -> Aggregation {
        self.aggregation
    }

    fn resolve(&self, observation: &Observation) -> Result<(String, String), Error> {
        let namespace = self
            .resolver
            .namespace_of(&observation.entity_id)
            .ok_or_else(|| Error::UnresolvedDimension {
                entity: observation.entity_id.clone(),
                message: "no namespace for entity".into(),
            })?;
        let organization =
            self.resolver
                .organization_of(&namespace)
                .ok_or_else(|| Error::UnresolvedDimension {
                    entity: observation.entity_id.clone(),
                    message: format!("no organization for namespace {}", namespace),
                })?;
        Ok((namespace, organization))
    }
}

/// Aggregates `observations`, converting each raw value with `convert`.
pub fn aggregate<'o, F>(
    resolver: &dyn DimensionResolver,
    observations: impl IntoIterator<Item = &'o Observation>,
    convert: F,
) -> Aggregation
where
    F: Fn(&Observation) -> f64,
{
    let mut aggregator = Aggregator::new(resolver);
    for observation in observations {
        aggregator.add(observation, convert(observation));
    }
    aggregator.finish()
}
