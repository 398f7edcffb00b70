//! In-memory state storage backend.
//!
//! Used for plan-only runs and as a test double. Write counters let callers
//! check that each resource was committed exactly once.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::{Result, TerragraphError};

use super::store::StateStore;
use super::types::ResourceState;

/// Process-local state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    resources: BTreeMap<String, ResourceState>,
    saves: BTreeMap<String, usize>,
    removes: BTreeMap<String, usize>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with records.
    #[must_use]
    pub fn with_resources(resources: impl IntoIterator<Item = (String, ResourceState)>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                resources: resources.into_iter().collect(),
                ..Inner::default()
            }),
        }
    }

    /// Returns how many times `name` was saved.
    #[must_use]
    pub fn save_count(&self, name: &str) -> usize {
        self.inner
            .read()
            .map_or(0, |inner| inner.saves.get(name).copied().unwrap_or(0))
    }

    /// Returns how many times `name` was removed.
    #[must_use]
    pub fn remove_count(&self, name: &str) -> usize {
        self.inner
            .read()
            .map_or(0, |inner| inner.removes.get(name).copied().unwrap_or(0))
    }

    /// Returns the total number of writes of any kind.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.inner.read().map_or(0, |inner| {
            inner.saves.values().sum::<usize>() + inner.removes.values().sum::<usize>()
        })
    }
}

fn poisoned() -> TerragraphError {
    TerragraphError::internal("state store lock poisoned")
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, name: &str) -> Result<Option<ResourceState>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.resources.get(name).cloned())
    }

    async fn save(&self, name: &str, state: &ResourceState) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        inner.resources.insert(name.to_string(), state.clone());
        *inner.saves.entry(name.to_string()).or_default() += 1;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        inner.resources.remove(name);
        *inner.removes.entry(name.to_string()).or_default() += 1;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.resources.keys().cloned().collect())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ModulePath;
    use crate::provider::Attributes;

    #[tokio::test]
    async fn test_counts_writes() {
        let store = MemoryStateStore::new();
        let state = ResourceState::new(
            "r-1",
            "null_resource",
            "provider.null",
            ModulePath::root(),
            Attributes::new(),
        );

        store.save("null_resource.a", &state).await.unwrap();
        store.remove("null_resource.a").await.unwrap();

        assert_eq!(store.save_count("null_resource.a"), 1);
        assert_eq!(store.remove_count("null_resource.a"), 1);
        assert_eq!(store.write_count(), 2);
        assert!(store.load("null_resource.a").await.unwrap().is_none());
    }
}
