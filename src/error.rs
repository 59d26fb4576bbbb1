// ABOUTME: Opaque error type for the convergence engine, with a stable kind() accessor.
// ABOUTME: Uses SNAFU internally; leaf errors from each subsystem are wrapped via context traits.

use snafu::{ResultExt, Snafu};

use crate::config::error::ConfigMissingError;
use crate::runtime::traits::{
    ContainerError, ExecError, ImageError, LogError, NetworkError, ResourceError, RuntimeInfoError,
    VolumeError,
};

/// Categories of engine errors, named after the error kinds in the convergence
/// engine's design rather than after internal type names.
///
/// Use `EngineError::kind()` for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineErrorKind {
    InvalidConfig,
    CyclicDependency,
    MissingExternal,
    ResourceDrift,
    AmbiguousResource,
    ConfigMissing,
    ImagePullFailure,
    BuildFailure,
    DependencyFailed,
    HealthcheckFailed,
    NoHealthcheck,
    Timeout,
    RuntimeUnavailable,
    NotFound,
}

/// Opaque error type returned by every engine operation.
///
/// Use `kind()` to branch on category; use `Display`/`source()` for a human
/// message and the underlying cause.
#[derive(Debug)]
pub struct EngineError(InnerEngineError);

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl EngineError {
    pub fn kind(&self) -> EngineErrorKind {
        match &self.0 {
            InnerEngineError::InvalidConfig { .. } => EngineErrorKind::InvalidConfig,
            InnerEngineError::CyclicDependency { .. } => EngineErrorKind::CyclicDependency,
            InnerEngineError::MissingExternal { .. } => EngineErrorKind::MissingExternal,
            InnerEngineError::ResourceDrift { .. } => EngineErrorKind::ResourceDrift,
            InnerEngineError::AmbiguousResource { .. } => EngineErrorKind::AmbiguousResource,
            InnerEngineError::ConfigMissingFailed { .. }
            | InnerEngineError::ConfigMissingMsg { .. } => EngineErrorKind::ConfigMissing,
            InnerEngineError::ImagePullFailed { .. }
            | InnerEngineError::ImagePullFailureMsg { .. } => EngineErrorKind::ImagePullFailure,
            InnerEngineError::BuildFailure { .. } => EngineErrorKind::BuildFailure,
            InnerEngineError::DependencyFailed { .. } => EngineErrorKind::DependencyFailed,
            InnerEngineError::HealthcheckFailed { .. } => EngineErrorKind::HealthcheckFailed,
            InnerEngineError::NoHealthcheck { .. } => EngineErrorKind::NoHealthcheck,
            InnerEngineError::Timeout { .. } => EngineErrorKind::Timeout,
            InnerEngineError::ContainerFailed { source } => match source {
                ContainerError::NotFound(_) => EngineErrorKind::NotFound,
                _ => EngineErrorKind::RuntimeUnavailable,
            },
            InnerEngineError::NetworkFailed { source } => match source {
                NetworkError::NotFound(_) => EngineErrorKind::NotFound,
                _ => EngineErrorKind::RuntimeUnavailable,
            },
            InnerEngineError::VolumeFailed { source } => match source {
                VolumeError::NotFound(_) => EngineErrorKind::NotFound,
                _ => EngineErrorKind::RuntimeUnavailable,
            },
            InnerEngineError::ResourceFailed { source } => match source {
                ResourceError::NotFound(_) => EngineErrorKind::NotFound,
                _ => EngineErrorKind::RuntimeUnavailable,
            },
            InnerEngineError::ExecFailed { .. } => EngineErrorKind::RuntimeUnavailable,
            InnerEngineError::LogFailed { .. } => EngineErrorKind::RuntimeUnavailable,
            InnerEngineError::RuntimeInfoFailed { .. }
            | InnerEngineError::RuntimeUnavailableMsg { .. } => EngineErrorKind::RuntimeUnavailable,
            InnerEngineError::NotFoundMsg { .. } => EngineErrorKind::NotFound,
        }
    }

    /// The cycle reported by a `CyclicDependency` error, if this is one.
    pub fn cycle(&self) -> Option<&[String]> {
        match &self.0 {
            InnerEngineError::CyclicDependency { cycle } => Some(cycle),
            _ => None,
        }
    }

    /// The resource name reported by `MissingExternal`/`AmbiguousResource`, if applicable.
    pub fn resource_name(&self) -> Option<&str> {
        match &self.0 {
            InnerEngineError::MissingExternal { resource } => Some(resource),
            InnerEngineError::AmbiguousResource { resource } => Some(resource),
            _ => None,
        }
    }
}

#[derive(Debug, Snafu)]
enum InnerEngineError {
    #[snafu(display("invalid configuration: {message}"))]
    InvalidConfig { message: String },

    #[snafu(display("cyclic dependency: {}", cycle.join(" -> ")))]
    CyclicDependency { cycle: Vec<String> },

    #[snafu(display("external resource does not exist: {resource}"))]
    MissingExternal { resource: String },

    #[snafu(display("resource drift for {resource}: {diff}"))]
    ResourceDrift { resource: String, diff: String },

    #[snafu(display("ambiguous resource, multiple matches for: {resource}"))]
    AmbiguousResource { resource: String },

    #[snafu(display("failed to resolve configuration value: {source}"))]
    ConfigMissingFailed { source: ConfigMissingError },

    #[snafu(display("failed to resolve configuration value: {message}"))]
    ConfigMissingMsg { message: String },

    #[snafu(display("failed to pull image: {source}"))]
    ImagePullFailed { source: ImageError },

    #[snafu(display("failed to pull image: {message}"))]
    ImagePullFailureMsg { message: String },

    #[snafu(display("image build failed: {message}"))]
    BuildFailure { message: String },

    #[snafu(display("dependency failed for service {service}: {message}"))]
    DependencyFailed { service: String, message: String },

    #[snafu(display("healthcheck failed for service {service}: {message}"))]
    HealthcheckFailed { service: String, message: String },

    #[snafu(display("service {service} has no healthcheck and fallbackRunning=false"))]
    NoHealthcheck { service: String },

    #[snafu(display("timed out: {message}"))]
    Timeout { message: String },

    #[snafu(display("container operation failed: {source}"))]
    ContainerFailed { source: ContainerError },

    #[snafu(display("network operation failed: {source}"))]
    NetworkFailed { source: NetworkError },

    #[snafu(display("volume operation failed: {source}"))]
    VolumeFailed { source: VolumeError },

    #[snafu(display("config/secret resource operation failed: {source}"))]
    ResourceFailed { source: ResourceError },

    #[snafu(display("exec failed: {source}"))]
    ExecFailed { source: ExecError },

    #[snafu(display("log stream failed: {source}"))]
    LogFailed { source: LogError },

    #[snafu(display("runtime unavailable: {source}"))]
    RuntimeInfoFailed { source: RuntimeInfoError },

    #[snafu(display("runtime unavailable: {message}"))]
    RuntimeUnavailableMsg { message: String },

    #[snafu(display("not found: {message}"))]
    NotFoundMsg { message: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;

pub trait ConfigMissingErrorExt<T> {
    fn context_config_missing(self) -> Result<T>;
}

impl<T> ConfigMissingErrorExt<T> for std::result::Result<T, ConfigMissingError> {
    fn context_config_missing(self) -> Result<T> {
        self.context(ConfigMissingFailedSnafu).map_err(EngineError)
    }
}

pub trait ContainerErrorExt<T> {
    fn context_container(self) -> Result<T>;
}

impl<T> ContainerErrorExt<T> for std::result::Result<T, ContainerError> {
    fn context_container(self) -> Result<T> {
        self.context(ContainerFailedSnafu).map_err(EngineError)
    }
}

pub trait ImageErrorExt<T> {
    fn context_image(self) -> Result<T>;
}

impl<T> ImageErrorExt<T> for std::result::Result<T, ImageError> {
    fn context_image(self) -> Result<T> {
        self.context(ImagePullFailedSnafu).map_err(EngineError)
    }
}

pub trait NetworkErrorExt<T> {
    fn context_network(self) -> Result<T>;
}

impl<T> NetworkErrorExt<T> for std::result::Result<T, NetworkError> {
    fn context_network(self) -> Result<T> {
        self.context(NetworkFailedSnafu).map_err(EngineError)
    }
}

pub trait VolumeErrorExt<T> {
    fn context_volume(self) -> Result<T>;
}

impl<T> VolumeErrorExt<T> for std::result::Result<T, VolumeError> {
    fn context_volume(self) -> Result<T> {
        self.context(VolumeFailedSnafu).map_err(EngineError)
    }
}

pub trait ResourceErrorExt<T> {
    fn context_resource(self) -> Result<T>;
}

impl<T> ResourceErrorExt<T> for std::result::Result<T, ResourceError> {
    fn context_resource(self) -> Result<T> {
        self.context(ResourceFailedSnafu).map_err(EngineError)
    }
}

pub trait ExecErrorExt<T> {
    fn context_exec(self) -> Result<T>;
}

impl<T> ExecErrorExt<T> for std::result::Result<T, ExecError> {
    fn context_exec(self) -> Result<T> {
        self.context(ExecFailedSnafu).map_err(EngineError)
    }
}

pub trait LogErrorExt<T> {
    fn context_log(self) -> Result<T>;
}

impl<T> LogErrorExt<T> for std::result::Result<T, LogError> {
    fn context_log(self) -> Result<T> {
        self.context(LogFailedSnafu).map_err(EngineError)
    }
}

pub trait RuntimeInfoErrorExt<T> {
    fn context_runtime_info(self) -> Result<T>;
}

impl<T> RuntimeInfoErrorExt<T> for std::result::Result<T, RuntimeInfoError> {
    fn context_runtime_info(self) -> Result<T> {
        self.context(RuntimeInfoFailedSnafu).map_err(EngineError)
    }
}

// Factory functions for message-only variants (no preserved source).
impl EngineError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self(InnerEngineError::InvalidConfig {
            message: message.into(),
        })
    }

    pub fn cyclic_dependency(cycle: Vec<String>) -> Self {
        Self(InnerEngineError::CyclicDependency { cycle })
    }

    pub fn missing_external(resource: impl Into<String>) -> Self {
        Self(InnerEngineError::MissingExternal {
            resource: resource.into(),
        })
    }

    pub fn resource_drift(resource: impl Into<String>, diff: impl Into<String>) -> Self {
        Self(InnerEngineError::ResourceDrift {
            resource: resource.into(),
            diff: diff.into(),
        })
    }

    pub fn ambiguous_resource(resource: impl Into<String>) -> Self {
        Self(InnerEngineError::AmbiguousResource {
            resource: resource.into(),
        })
    }

    pub fn config_missing(message: impl Into<String>) -> Self {
        Self(InnerEngineError::ConfigMissingMsg {
            message: message.into(),
        })
    }

    pub fn image_pull_failure(message: impl Into<String>) -> Self {
        Self(InnerEngineError::ImagePullFailureMsg {
            message: message.into(),
        })
    }

    pub fn build_failure(message: impl Into<String>) -> Self {
        Self(InnerEngineError::BuildFailure {
            message: message.into(),
        })
    }

    pub fn dependency_failed(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self(InnerEngineError::DependencyFailed {
            service: service.into(),
            message: message.into(),
        })
    }

    pub fn healthcheck_failed(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self(InnerEngineError::HealthcheckFailed {
            service: service.into(),
            message: message.into(),
        })
    }

    pub fn no_healthcheck(service: impl Into<String>) -> Self {
        Self(InnerEngineError::NoHealthcheck {
            service: service.into(),
        })
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self(InnerEngineError::Timeout {
            message: message.into(),
        })
    }

    pub fn runtime_unavailable(message: impl Into<String>) -> Self {
        Self(InnerEngineError::RuntimeUnavailableMsg {
            message: message.into(),
        })
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self(InnerEngineError::NotFoundMsg {
            message: message.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_reflects_message_variants() {
        assert_eq!(
            EngineError::invalid_config("bad").kind(),
            EngineErrorKind::InvalidConfig
        );
        assert_eq!(
            EngineError::cyclic_dependency(vec!["a".into(), "b".into(), "a".into()]).kind(),
            EngineErrorKind::CyclicDependency
        );
        assert_eq!(
            EngineError::no_healthcheck("web").kind(),
            EngineErrorKind::NoHealthcheck
        );
    }

    #[test]
    fn cycle_accessor_only_set_on_cyclic_dependency() {
        let err = EngineError::cyclic_dependency(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.cycle(), Some(&["a".to_string(), "b".to_string(), "a".to_string()][..]));
        assert_eq!(EngineError::invalid_config("x").cycle(), None);
    }

    #[test]
    fn container_not_found_maps_to_not_found_kind() {
        let err: Result<()> =
            std::result::Result::<(), ContainerError>::Err(ContainerError::NotFound("x".into()))
                .context_container();
        assert_eq!(err.unwrap_err().kind(), EngineErrorKind::NotFound);
    }
}
