//! Read-only cache access
//!
//! The admission path only ever needs "give me the current snapshot" of
//! Namespaces and LimitRanges. These traits are the seam between the
//! engine and whatever keeps the snapshot fresh (a watch-backed reflector
//! in the webhook, a static store in tests and in the CLI).

use dashmap::DashMap;
use k8s_openapi::api::core::v1::{LimitRange, Namespace};
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by a cache lookup
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("{kind} \"{name}\" not found")]
    NotFound { kind: &'static str, name: String },
}

impl LookupError {
    pub fn namespace_not_found(name: &str) -> Self {
        Self::NotFound {
            kind: "namespaces",
            name: name.to_string(),
        }
    }
}

/// Namespace-by-name lookup
pub trait NamespaceLister: Send + Sync {
    fn get(&self, name: &str) -> Result<Arc<Namespace>, LookupError>;
}

/// LimitRanges-by-namespace lookup
pub trait LimitRangeLister: Send + Sync {
    /// All LimitRanges in the namespace; an empty list is not an error
    fn list(&self, namespace: &str) -> Result<Vec<Arc<LimitRange>>, LookupError>;
}

/// Static snapshot store
///
/// Clones share the same underlying maps.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    namespaces: Arc<DashMap<String, Arc<Namespace>>>,
    limit_ranges: Arc<DashMap<String, Vec<Arc<LimitRange>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a namespace, keyed by its name
    pub fn insert_namespace(&self, namespace: Namespace) {
        let name = namespace.metadata.name.clone().unwrap_or_default();
        self.namespaces.insert(name, Arc::new(namespace));
    }

    /// Add a LimitRange to the namespace named in its metadata
    pub fn insert_limit_range(&self, limit_range: LimitRange) {
        let namespace = limit_range
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        self.limit_ranges
            .entry(namespace)
            .or_default()
            .push(Arc::new(limit_range));
    }
}

impl NamespaceLister for InMemoryStore {
    fn get(&self, name: &str) -> Result<Arc<Namespace>, LookupError> {
        self.namespaces
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| LookupError::namespace_not_found(name))
    }
}

impl LimitRangeLister for InMemoryStore {
    fn list(&self, namespace: &str) -> Result<Vec<Arc<LimitRange>>, LookupError> {
        Ok(self
            .limit_ranges
            .get(namespace)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}
