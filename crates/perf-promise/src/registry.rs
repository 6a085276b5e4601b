//! Handler to promise table.
//!
//! Built once at startup and read-only afterwards.

use crate::config::PromiseConfig;
use crate::error::{PromiseError, PromiseResult};
use crate::promise::Promise;
use std::collections::HashMap;

/// Identifier of a handler: `controller#action`.
pub fn handler_id(controller: &str, action: &str) -> String {
    format!("{controller}#{action}")
}

/// Promises by handler identifier.
#[derive(Debug, Clone, Default)]
pub struct PromiseRegistry {
    promises: HashMap<String, Promise>,
}

impl PromiseRegistry {
    pub fn builder() -> PromiseRegistryBuilder {
        PromiseRegistryBuilder::default()
    }

    /// The promise registered for `handler_id`.
    pub fn get(&self, handler_id: &str) -> Option<&Promise> {
        self.promises.get(handler_id)
    }

    pub fn contains(&self, handler_id: &str) -> bool {
        self.promises.contains_key(handler_id)
    }

    pub fn len(&self) -> usize {
        self.promises.len()
    }

    pub fn is_empty(&self) -> bool {
        self.promises.is_empty()
    }

    /// Registered handler identifiers, sorted.
    pub fn handler_ids(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.promises.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// A copy of this registry with `handler_id` bound to `promise`,
    /// replacing any existing entry.
    pub fn with_override(&self, handler_id: impl Into<String>, promise: Promise) -> Self {
        let mut promises = self.promises.clone();
        promises.insert(handler_id.into(), promise);
        Self { promises }
    }
}

/// Collects registrations; [`build`](Self::build) rejects duplicates.
#[derive(Debug, Default)]
pub struct PromiseRegistryBuilder {
    promises: HashMap<String, Promise>,
    duplicates: Vec<String>,
}

impl PromiseRegistryBuilder {
    /// Declare the promise of one handler.
    pub fn register(mut self, handler_id: impl Into<String>, promise: Promise) -> Self {
        let handler_id = handler_id.into();
        if self.promises.contains_key(&handler_id) {
            self.duplicates.push(handler_id);
        } else {
            self.promises.insert(handler_id, promise);
        }
        self
    }

    /// Declare that a handler keeps the configured speedy promise.
    pub fn speedy(self, handler_id: impl Into<String>, config: &PromiseConfig) -> Self {
        self.register(handler_id, config.speedy_promise())
    }

    pub fn build(self) -> PromiseResult<PromiseRegistry> {
        if !self.duplicates.is_empty() {
            let mut duplicates = self.duplicates;
            duplicates.sort_unstable();
            duplicates.dedup();
            return Err(PromiseError::config(format!(
                "promise registered more than once for: {}",
                duplicates.join(", ")
            )));
        }
        Ok(PromiseRegistry {
            promises: self.promises,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::LazyExpr;

    #[test]
    fn builds_and_looks_up() {
        let registry = PromiseRegistry::builder()
            .register(handler_id("articles", "index"), Promise::new().makes(2))
            .register("articles#show", Promise::new().skip())
            .build()
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get("articles#index").unwrap().makes,
            Some(LazyExpr::constant(2))
        );
        assert!(registry.get("articles#show").unwrap().skip);
        assert!(registry.get("users#index").is_none());
        assert_eq!(registry.handler_ids(), vec!["articles#index", "articles#show"]);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let err = PromiseRegistry::builder()
            .register("articles#index", Promise::new().makes(1))
            .register("articles#index", Promise::new().makes(2))
            .build()
            .unwrap_err();
        assert!(matches!(err, PromiseError::Config(ref msg) if msg.contains("articles#index")));
    }

    #[test]
    fn speedy_registration_uses_config() {
        let config = PromiseConfig::new().speedy_max_queries(3);
        let registry = PromiseRegistry::builder()
            .speedy("home#index", &config)
            .build()
            .unwrap();
        assert_eq!(
            registry.get("home#index").unwrap().makes,
            Some(LazyExpr::constant(3))
        );
    }

    #[test]
    fn override_leaves_original_untouched() {
        let registry = PromiseRegistry::builder()
            .register("articles#index", Promise::new().makes(1))
            .build()
            .unwrap();
        let relaxed = registry.with_override("articles#index", Promise::new().makes(10));

        assert_eq!(
            registry.get("articles#index").unwrap().makes,
            Some(LazyExpr::constant(1))
        );
        assert_eq!(
            relaxed.get("articles#index").unwrap().makes,
            Some(LazyExpr::constant(10))
        );
    }
}
