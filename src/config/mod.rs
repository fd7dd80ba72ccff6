//! Run configuration.
//!
//! ```rust,no_run
//! use usage_reconciler::config::ReconcilerConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ReconcilerConfig::from_env().await?;
//! let catalog = config.load_catalog().await?;
//! # Ok(())
//! # }
//! ```

pub mod env;
pub mod memory;
pub mod provider;

pub use env::EnvConfigProvider;
pub use memory::MemoryConfigProvider;
pub use provider::{ConfigProvider, ConfigProviderExt};

use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::Catalog;

/// Prefix of every environment variable read by [`ReconcilerConfig::from_env`].
pub const ENV_PREFIX: &str = "RECONCILER_";

/// Errors that can occur in configuration operations
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Key not found
    #[error("Key not found: {key}")]
    NotFound { key: String },

    /// Invalid configuration value
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Environment variable error
    #[error("Environment error: {0}")]
    Env(#[from] std::env::VarError),
}

/// Result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Settings for one reconciler deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerConfig {
    /// Cloud zone the usage belongs to; second token of every source string.
    pub zone: String,
    pub database_url: Option<String>,
    pub catalog_path: Option<PathBuf>,
    /// Divide totals by the hours left in the day when billing intraday.
    pub prorate_intraday: bool,
    pub object_storage_query: String,
    pub database_query_prefix: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            zone: "default".to_string(),
            database_url: None,
            catalog_path: None,
            prorate_intraday: false,
            object_storage_query: "object-storage-storage".to_string(),
            database_query_prefix: "dbaas-".to_string(),
        }
    }
}

impl ReconcilerConfig {
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            ..Default::default()
        }
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_path = Some(path.into());
        self
    }

    pub fn prorate_intraday(mut self, enabled: bool) -> Self {
        self.prorate_intraday = enabled;
        self
    }

    /// Reads `RECONCILER_*` environment variables over the defaults.
    pub async fn from_env() -> ConfigResult<Self> {
        Self::from_provider(&EnvConfigProvider::prefixed(ENV_PREFIX)).await
    }

    pub async fn from_provider(provider: &dyn ConfigProvider) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(zone) = provider.get_raw("zone").await? {
            config.zone = zone;
        }
        config.database_url = provider.get_raw("database.url").await?;
        config.catalog_path = provider.get_raw("catalog.path").await?.map(PathBuf::from);
        if let Some(enabled) = provider.get_parsed::<bool>("prorate.intraday").await? {
            config.prorate_intraday = enabled;
        }
        if let Some(query) = provider.get_raw("object_storage.query").await? {
            config.object_storage_query = query;
        }
        if let Some(prefix) = provider.get_raw("database.query_prefix").await? {
            config.database_query_prefix = prefix;
        }

        config.validate()?;
        tracing::debug!(
            provider = provider.name(),
            zone = %config.zone,
            "Loaded reconciler config"
        );
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.zone.is_empty() || self.zone.contains(crate::source::DELIMITER) {
            return Err(ConfigError::InvalidValue {
                key: "zone".into(),
                message: format!("{:?} must be non-empty and contain no ':'", self.zone),
            });
        }
        if self.object_storage_query.contains(crate::source::DELIMITER) {
            return Err(ConfigError::InvalidValue {
                key: "object_storage.query".into(),
                message: "must not contain ':'".into(),
            });
        }
        Ok(())
    }

    /// Loads the catalog from `catalog_path`.
    pub async fn load_catalog(&self) -> ConfigResult<Catalog> {
        let path = self.catalog_path.as_ref().ok_or_else(|| ConfigError::NotFound {
            key: "catalog.path".into(),
        })?;
        Catalog::load(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::NotFound {
            key: "catalog.path".to_string(),
        };
        assert!(err.to_string().contains("catalog.path"));
    }

    #[tokio::test]
    async fn test_from_provider() {
        let provider = MemoryConfigProvider::new()
            .value("zone", "ch-gva-2")
            .value("database.url", "postgres://localhost/billing")
            .value("prorate.intraday", "true")
            .value("database.query_prefix", "appcat_");

        let config = ReconcilerConfig::from_provider(&provider).await.unwrap();
        assert_eq!(config.zone, "ch-gva-2");
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/billing")
        );
        assert!(config.prorate_intraday);
        assert_eq!(config.database_query_prefix, "appcat_");
        assert_eq!(config.object_storage_query, "object-storage-storage");
    }

    #[tokio::test]
    async fn test_invalid_values() {
        let provider = MemoryConfigProvider::new().value("prorate.intraday", "sometimes");
        let err = ReconcilerConfig::from_provider(&provider).await.unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "prorate.intraday"
        ));

        let provider = MemoryConfigProvider::new().value("zone", "a:b");
        assert!(ReconcilerConfig::from_provider(&provider).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_catalog_path() {
        let config = ReconcilerConfig::new("ch-gva-2");
        assert!(matches!(
            config.load_catalog().await,
            Err(ConfigError::NotFound { .. })
        ));
    }
}
