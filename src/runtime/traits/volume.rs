// ABOUTME: Volume operations trait for container runtimes.
// ABOUTME: Create, inspect, list, and remove named volumes.

use super::sealed::Sealed;
use crate::types::VolumeId;
use async_trait::async_trait;
use std::collections::HashMap;

/// Volume lifecycle operations.
#[async_trait]
pub trait VolumeOps: Sealed + Send + Sync {
    /// Create a volume.
    async fn create_volume(&self, config: &VolumeConfig) -> Result<VolumeId, VolumeError>;

    /// Remove a volume.
    async fn remove_volume(&self, id: &VolumeId, force: bool) -> Result<(), VolumeError>;

    /// Inspect a volume by name.
    async fn inspect_volume(&self, name: &str) -> Result<VolumeInfo, VolumeError>;

    /// List volumes matching the given label filters.
    async fn list_volumes(&self, filters: &VolumeFilters) -> Result<Vec<VolumeInfo>, VolumeError>;
}

/// Configuration for creating a volume.
#[derive(Debug, Clone)]
pub struct VolumeConfig {
    /// Volume name.
    pub name: String,
    /// Volume driver (local, etc.).
    pub driver: Option<String>,
    /// Driver-specific options.
    pub driver_opts: HashMap<String, String>,
    /// Labels.
    pub labels: HashMap<String, String>,
}

/// Information about a volume.
#[derive(Debug, Clone)]
pub struct VolumeInfo {
    /// Volume id (its name, for most runtimes).
    pub id: VolumeId,
    /// Volume name.
    pub name: String,
    /// Driver in use.
    pub driver: String,
    /// Driver-specific options as reported by the runtime.
    pub driver_opts: HashMap<String, String>,
    /// Labels.
    pub labels: HashMap<String, String>,
    /// Mount point on the runtime host.
    pub mountpoint: String,
}

/// Filters for listing volumes.
#[derive(Debug, Clone, Default)]
pub struct VolumeFilters {
    pub labels: HashMap<String, String>,
    pub name: Option<String>,
}

/// Errors from volume operations.
#[derive(Debug, thiserror::Error)]
pub enum VolumeError {
    #[error("volume not found: {0}")]
    NotFound(String),

    #[error("volume already exists: {0}")]
    AlreadyExists(String),

    #[error("volume in use, cannot remove: {0}")]
    InUse(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
