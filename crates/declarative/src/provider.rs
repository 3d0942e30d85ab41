//! Provider trait
//!
//! A provider performs the actual remote mutations. The engine never
//! assumes a specific vendor; implementations map [`ResourceKind`]s onto
//! their own API calls.

use crate::error::ProviderError;
use crate::types::{Attributes, ResourceKind};

/// Result type for provider calls
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Remote API performing resource mutations
///
/// Implementations must be safe to call from several worker threads at
/// once; independent operations are applied concurrently.
pub trait Provider: Send + Sync {
    /// Create a resource and return its outputs
    ///
    /// The returned attributes must contain `id`.
    fn create(&self, kind: ResourceKind, inputs: &Attributes) -> ProviderResult<Attributes>;

    /// Read the current attributes of an existing resource
    ///
    /// Returns [`ProviderError::NotFound`] if it no longer exists.
    fn read(&self, kind: ResourceKind, id: &str) -> ProviderResult<Attributes>;

    /// Update an existing resource in place and return its outputs
    fn update(&self, kind: ResourceKind, id: &str, inputs: &Attributes)
    -> ProviderResult<Attributes>;

    /// Delete a resource
    ///
    /// [`ProviderError::NotFound`] means it was already gone.
    fn delete(&self, kind: ResourceKind, id: &str) -> ProviderResult<()>;
}

/// Extract the provider id from returned outputs
pub fn output_id(outputs: &Attributes) -> Option<String> {
    match outputs.get("id")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}
