//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.

use async_trait::async_trait;

use super::types::ResourceState;
use crate::error::Result;

/// Trait for state storage backends.
///
/// Records are keyed by stable node name. Implementations must tolerate
/// concurrent calls for different names.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the record for one resource.
    ///
    /// Returns `None` if the resource has never been applied.
    async fn load(&self, name: &str) -> Result<Option<ResourceState>>;

    /// Saves the record for one resource.
    async fn save(&self, name: &str, state: &ResourceState) -> Result<()>;

    /// Removes the record for one resource. Removing a missing record is not an error.
    async fn remove(&self, name: &str) -> Result<()>;

    /// Lists every recorded resource name, sorted.
    async fn list(&self) -> Result<Vec<String>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
