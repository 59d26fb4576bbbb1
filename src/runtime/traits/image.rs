// ABOUTME: Image operations trait for container runtimes.
// ABOUTME: Pull, check existence, and remove container images.

use super::sealed::Sealed;
use super::shared_types::RegistryAuth;
use crate::types::ImageRef;
use async_trait::async_trait;

/// Image operations: pull, check existence, remove.
#[async_trait]
pub trait ImageOps: Sealed + Send + Sync {
    /// Pull an image from a registry.
    async fn pull_image(
        &self,
        reference: &ImageRef,
        auth: Option<&RegistryAuth>,
    ) -> Result<(), ImageError>;

    /// Check if an image exists locally.
    async fn image_exists(&self, reference: &ImageRef) -> Result<bool, ImageError>;

    /// Inspect a local image for its id and content digest.
    async fn inspect_image(&self, reference: &ImageRef) -> Result<ImageInspectInfo, ImageError>;

    /// Remove an image.
    async fn remove_image(&self, reference: &ImageRef, force: bool) -> Result<(), ImageError>;
}

/// Identity of a local image, as resolved by `ImageOps::inspect_image`.
#[derive(Debug, Clone)]
pub struct ImageInspectInfo {
    /// The runtime's local image id.
    pub id: String,
    /// The pulled registry digest, if the image was pulled from one (a
    /// purely locally-built image may have none).
    pub digest: Option<String>,
}

/// Errors from image operations.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("authentication failed for registry: {0}")]
    AuthenticationFailed(String),

    #[error("pull failed: {0}")]
    PullFailed(String),

    #[error("image in use, cannot remove: {0}")]
    InUse(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
