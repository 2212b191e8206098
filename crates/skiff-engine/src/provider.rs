//! Platform provider abstraction.
//!
//! A provider performs the actual create, update and delete calls for one
//! resource at a time. It knows nothing about ordering or state: the engine
//! resolves inputs, decides which call to make, and records what comes back.

use serde_json::Value;
use skiff_common::error::Result;
use skiff_common::types::{Attributes, ResourceKind, ResourceName};
use skiff_topology::network::NetworkLookup;

/// Platform-specific resource operations.
///
/// Implementors also answer the ambient network lookup, since the default
/// network belongs to the same platform account as the resources.
pub trait Provider: NetworkLookup + Send + Sync {
    /// Creates a resource from fully resolved inputs.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses the resource.
    fn create(&self, kind: ResourceKind, name: &ResourceName, inputs: &Value) -> Result<Attributes>;

    /// Updates a resource in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses the change.
    fn update(
        &self,
        kind: ResourceKind,
        name: &ResourceName,
        inputs: &Value,
        current: &Attributes,
    ) -> Result<Attributes>;

    /// Deletes a resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform refuses the deletion.
    fn delete(&self, kind: ResourceKind, name: &ResourceName, current: &Attributes) -> Result<()>;
}
