use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ArbError, Result};

use super::ExchangeAdapter;

/// Named venue connections, injected into every component call
#[derive(Clone, Default)]
pub struct ExchangeRegistry {
    adapters: HashMap<String, Arc<dyn ExchangeAdapter>>,
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, adapter: Arc<dyn ExchangeAdapter>) {
        self.adapters.insert(name.into(), adapter);
    }

    pub fn with(mut self, name: impl Into<String>, adapter: Arc<dyn ExchangeAdapter>) -> Self {
        self.insert(name, adapter);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ExchangeAdapter>> {
        self.adapters
            .get(name)
            .cloned()
            .ok_or_else(|| ArbError::Validation(format!("no adapter registered for exchange '{name}'")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for ExchangeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("ExchangeRegistry").field("exchanges", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchangeAdapter;

    #[test]
    fn test_lookup_unknown_exchange_fails() {
        let registry = ExchangeRegistry::new().with("okx", Arc::new(MockExchangeAdapter::new()));
        assert!(registry.contains("okx"));
        assert!(registry.get("okx").is_ok());
        let err = registry.get("bybit").err().expect("bybit is not registered");
        assert!(err.to_string().contains("bybit"));
    }
}
