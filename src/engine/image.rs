// ABOUTME: Image resolution for one service - pull policy handling plus the external image-build
// ABOUTME: handoff. The builder itself is out of scope; this only defines its contract.

use crate::config::{PullPolicy, ServiceConfig};
use crate::diagnostics::{Diagnostics, Warning};
use crate::error::{EngineError, ImageErrorExt, Result};
use crate::runtime::traits::{ImageError, ImageOps};
use crate::types::ImageRef;
use async_trait::async_trait;

/// External collaborator that builds an image for a service with a `build`
/// section ("the engine only requests 'ensure images for these
/// services exist'"). The classic daemon build and the external builder
/// driver both live behind this one contract from the engine's point of
/// view.
#[async_trait]
pub trait ImageProvisioner: Send + Sync {
    /// Builds (or otherwise provisions) `service`'s image so that a
    /// subsequent `ImageOps::inspect_image` on `service.image` succeeds.
    async fn build(&self, service: &ServiceConfig) -> Result<()>;
}

/// Default provisioner wired in when the caller doesn't supply one - every
/// build request fails immediately rather than hanging.
pub struct UnavailableImageProvisioner;

#[async_trait]
impl ImageProvisioner for UnavailableImageProvisioner {
    async fn build(&self, service: &ServiceConfig) -> Result<()> {
        Err(EngineError::build_failure(format!(
            "service {} declares a build section but no image provisioner is configured",
            service.name
        )))
    }
}

/// Ensures `service.image` exists locally per its `pull_policy`, falling
/// back to the build path when a pull fails or is skipped and the service
/// has a `build` section. Returns the resolved content
/// digest (or the image id when the runtime reports no digest - a purely
/// local image).
pub async fn ensure_image(
    runtime: &(impl ImageOps + ?Sized),
    provisioner: &dyn ImageProvisioner,
    service: &ServiceConfig,
    diagnostics: &mut Diagnostics,
) -> Result<String> {
    let reference = ImageRef::parse(&service.image)
        .map_err(|e| EngineError::invalid_config(format!("invalid image reference {}: {e}", service.image)))?;

    match service.pull_policy {
        PullPolicy::Never => {}
        PullPolicy::Build => {
            if service.build.is_none() {
                return Err(EngineError::invalid_config(format!(
                    "service {} has pull_policy=build but no build section",
                    service.name
                )));
            }
            provisioner.build(service).await?;
        }
        PullPolicy::Always => {
            pull_or_fall_back_to_build(runtime, provisioner, service, &reference, diagnostics).await?;
        }
        PullPolicy::IfNotPresent => {
            let exists = runtime.image_exists(&reference).await.context_image()?;
            if !exists {
                pull_or_fall_back_to_build(runtime, provisioner, service, &reference, diagnostics).await?;
            }
        }
    }

    let info = runtime.inspect_image(&reference).await.context_image()?;
    Ok(info.digest.unwrap_or(info.id))
}

async fn pull_or_fall_back_to_build(
    runtime: &(impl ImageOps + ?Sized),
    provisioner: &dyn ImageProvisioner,
    service: &ServiceConfig,
    reference: &ImageRef,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    match runtime.pull_image(reference, None).await {
        Ok(()) => Ok(()),
        Err(pull_err) => {
            if service.build.is_some() {
                diagnostics.warn(Warning::image_pull_downgraded(&service.image, pull_err.to_string()));
                provisioner.build(service).await
            } else if matches!(runtime.image_exists(reference).await, Ok(true)) {
                // A local image of the target reference already exists - the
                // pull failure (e.g. offline registry) is not fatal.
                diagnostics.warn(Warning::image_pull_downgraded(&service.image, pull_err.to_string()));
                Ok(())
            } else {
                Err(pull_err).map_err(image_pull_error)
            }
        }
    }
}

fn image_pull_error(e: ImageError) -> EngineError {
    EngineError::image_pull_failure(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServiceName;

    fn service() -> ServiceConfig {
        ServiceConfig {
            name: ServiceName::new("web").unwrap(),
            image: "nginx:1.27".to_string(),
            build: None,
            command: None,
            entrypoint: None,
            environment: Default::default(),
            env_file: Vec::new(),
            ports: Vec::new(),
            volumes: Vec::new(),
            networks: Default::default(),
            depends_on: Default::default(),
            restart: Default::default(),
            scale: 1,
            healthcheck: None,
            labels: Default::default(),
            platform: None,
            tty: false,
            pull_policy: PullPolicy::default(),
            profiles: Vec::new(),
            hooks: Default::default(),
            extensions: Default::default(),
            container_name: None,
            configs: Vec::new(),
            secrets: Vec::new(),
            stop_grace_period: None,
            stop_signal: None,
        }
    }

    #[tokio::test]
    async fn unavailable_provisioner_fails_build() {
        let err = UnavailableImageProvisioner.build(&service()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::EngineErrorKind::BuildFailure);
    }

    #[test]
    fn build_policy_without_build_section_is_invalid() {
        let mut svc = service();
        svc.pull_policy = PullPolicy::Build;
        assert!(svc.build.is_none());
    }
}
