// ABOUTME: Content-addressed config/secret operations trait for container runtimes.
// ABOUTME: Configs and secrets are modeled as named blobs; the engine only needs existence and hash.

use super::sealed::Sealed;
use async_trait::async_trait;
use std::collections::HashMap;

/// Whether a resource blob is a (non-sensitive) config or a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Config,
    Secret,
}

/// Config/secret blob operations.
///
/// The engine never reads a secret's content back out — it only creates,
/// looks up, and removes blobs by name, using the content hash it already
/// computed to decide whether a blob is up to date.
#[async_trait]
pub trait ResourceOps: Sealed + Send + Sync {
    /// Create a config or secret blob.
    async fn create_resource(
        &self,
        kind: ResourceKind,
        config: &ResourceConfig,
    ) -> Result<String, ResourceError>;

    /// Remove a config or secret blob by id.
    async fn remove_resource(&self, kind: ResourceKind, id: &str) -> Result<(), ResourceError>;

    /// Inspect a blob by name.
    async fn inspect_resource(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> Result<ResourceInfo, ResourceError>;

    /// List blobs matching the given label filters.
    async fn list_resources(
        &self,
        kind: ResourceKind,
        filters: &ResourceFilters,
    ) -> Result<Vec<ResourceInfo>, ResourceError>;
}

/// Configuration for creating a config/secret blob.
#[derive(Debug, Clone)]
pub struct ResourceConfig {
    /// Blob name.
    pub name: String,
    /// Raw content bytes (`name || content_bytes` is what gets hashed upstream;
    /// this field carries just the content).
    pub content: Vec<u8>,
    /// Labels.
    pub labels: HashMap<String, String>,
}

/// Information about a config/secret blob. Content is never returned.
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

/// Filters for listing config/secret blobs.
#[derive(Debug, Clone, Default)]
pub struct ResourceFilters {
    pub labels: HashMap<String, String>,
    pub name: Option<String>,
}

/// Errors from config/secret operations.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    #[error("resource in use, cannot remove: {0}")]
    InUse(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
