//! Managed database instances, keyed by plan and engine.

use std::collections::HashMap;

use super::UsageAdapter;
use crate::{Error, Result};

/// Expects observation dimensions `[plan, engine]`.
///
/// The query name is `{prefix}{engine}` unless an explicit mapping exists;
/// the plan is appended to the source string so products can price plans.
#[derive(Debug, Clone)]
pub struct DatabaseAdapter {
    prefix: String,
    engine_queries: HashMap<String, String>,
}

impl DatabaseAdapter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            engine_queries: HashMap::new(),
        }
    }

    pub fn engine_query(mut self, engine: impl Into<String>, query: impl Into<String>) -> Self {
        self.engine_queries.insert(engine.into(), query.into());
        self
    }

    fn split<'d>(dimensions: &'d [String]) -> Result<(&'d str, &'d str)> {
        match dimensions {
            [plan, engine] => Ok((plan.as_str(), engine.as_str())),
            _ => Err(Error::UnresolvedDimension {
                entity: dimensions.join(":"),
                message: format!(
                    "expected plan and engine dimensions, got {}",
                    dimensions.len()
                ),
            }),
        }
    }
}

impl UsageAdapter for DatabaseAdapter {
    fn name(&self) -> &str {
        "database"
    }

    fn query_name(&self, dimensions: &[String]) -> Result<String> {
        let (_, engine) = Self::split(dimensions)?;
        Ok(self
            .engine_queries
            .get(engine)
            .cloned()
            .unwrap_or_else(|| format!("{}{}", self.prefix, engine)))
    }

    fn source_suffix(&self, dimensions: &[String]) -> Vec<String> {
        Self::split(dimensions)
            .map(|(plan, _)| vec![plan.to_string()])
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(plan: &str, engine: &str) -> Vec<String> {
        vec![plan.to_string(), engine.to_string()]
    }

    #[test]
    fn test_query_per_engine() {
        let adapter = DatabaseAdapter::new("dbaas-").engine_query("pg", "dbaas-postgresql");
        assert_eq!(
            adapter.query_name(&dims("hobbyist-2", "pg")).unwrap(),
            "dbaas-postgresql"
        );
        assert_eq!(
            adapter.query_name(&dims("startup-4", "mysql")).unwrap(),
            "dbaas-mysql"
        );
        assert_eq!(
            adapter.source_suffix(&dims("startup-4", "mysql")),
            vec!["startup-4"]
        );
    }

    #[test]
    fn test_missing_dimensions() {
        let adapter = DatabaseAdapter::new("dbaas-");
        assert!(matches!(
            adapter.query_name(&["only-plan".to_string()]),
            Err(Error::UnresolvedDimension { .. })
        ));
        assert!(adapter.source_suffix(&[]).is_empty());
    }
}
