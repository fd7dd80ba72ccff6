//! In-Memory Configuration Provider
//!
//! Useful for testing and code-defined configuration.

use std::collections::HashMap;

use super::ConfigResult;
use super::provider::ConfigProvider;

#[derive(Debug, Default, Clone)]
pub struct MemoryConfigProvider {
    data: HashMap<String, String>,
}

impl MemoryConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

#[async_trait::async_trait]
impl ConfigProvider for MemoryConfigProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        Ok(self.data.get(key).cloned())
    }
}
