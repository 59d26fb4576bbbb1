// ABOUTME: Typed representation of the already-resolved Project/ServiceConfig tree.
// ABOUTME: Not the YAML loader - this is the data the (out-of-scope) loader hands the engine.

pub mod error;
mod env_value;

pub use env_value::{EnvValue, resolve_env_map};

use crate::runtime::{HealthcheckConfig, RestartPolicyConfig};
use crate::types::{NetworkAlias, ProjectName, ServiceName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// A named bundle of services, networks, volumes, configs and secrets,
/// immutable for the duration of one operation.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: ProjectName,
    pub services: BTreeMap<ServiceName, ServiceConfig>,
    pub networks: BTreeMap<String, NetworkDecl>,
    pub volumes: BTreeMap<String, VolumeDecl>,
    pub configs: BTreeMap<String, ResourceDecl>,
    pub secrets: BTreeMap<String, ResourceDecl>,
    pub environment: BTreeMap<String, String>,
}

impl Project {
    /// Services in stable name order - the tie-break every scheduler in
    /// this crate uses when more than one service is ready at once.
    pub fn services_by_name(&self) -> impl Iterator<Item = (&ServiceName, &ServiceConfig)> {
        self.services.iter()
    }

    pub fn service(&self, name: &ServiceName) -> Option<&ServiceConfig> {
        self.services.get(name)
    }
}

/// One edge of a `depends_on` map: the condition that must hold before the
/// dependent service is considered started, and whether the absence of the
/// dependency should fail the plan outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependsOnSpec {
    pub condition: DependencyCondition,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyCondition {
    ServiceStarted,
    ServiceHealthy,
    ServiceCompletedSuccessfully,
    /// Derived: healthy if a healthcheck is configured, else just running.
    ServiceRunningOrHealthy,
}

/// Pull policy for a service's image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullPolicy {
    #[default]
    IfNotPresent,
    Always,
    Never,
    Build,
}

/// Whether a service declares a healthcheck, explicitly disables the
/// image's, or inherits whatever the image carries.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthcheckDecl {
    /// `healthcheck: { disable: true }` / `test: ["NONE"]`.
    Disabled,
    Configured(HealthcheckConfig),
}

/// Port publishing spec (host:container, with protocol).
#[derive(Debug, Clone)]
pub struct PortSpec {
    pub host_port: Option<u16>,
    pub container_port: u16,
    pub protocol: crate::runtime::Protocol,
}

/// A single bind/volume mount declared on a service.
#[derive(Debug, Clone)]
pub struct ServiceVolumeMount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
    /// Mount kind as declared (`volume`, `bind`, `tmpfs`) - carried through
    /// verbatim into the runtime spec at the boundary contract with the runtime client.
    pub kind: String,
}

/// A network attachment with its priority (highest priority is the
/// container's primary network) and explicit aliases.
#[derive(Debug, Clone)]
pub struct ServiceNetworkConfig {
    pub priority: i64,
    pub aliases: Vec<NetworkAlias>,
    pub ipv4_address: Option<String>,
    pub ipv6_address: Option<String>,
}

/// `post_start` / `pre_stop` lifecycle hooks, run via `ContainerExec`.
#[derive(Debug, Clone, Default)]
pub struct ServiceHooks {
    pub post_start: Option<HookSpec>,
    pub pre_stop: Option<HookSpec>,
}

#[derive(Debug, Clone)]
pub struct HookSpec {
    pub command: Vec<String>,
    pub user: Option<String>,
}

/// An `x-*` extension block. Unknown kinds are warnings, never silently
/// dropped - see `crate::diagnostics`.
#[derive(Debug, Clone)]
pub struct ExtensionBlock {
    pub kind: String,
    pub payload: serde_json::Value,
}

/// Declared build directive. The image builder is an external collaborator
/// (out of scope here); the engine only needs to know a service *has* one so it can
/// decide whether a missing image is fatal or buildable.
#[derive(Debug, Clone)]
pub struct BuildSpec {
    pub context: PathBuf,
    pub dockerfile: Option<PathBuf>,
    pub args: BTreeMap<String, String>,
}

/// The fields that participate in `ServiceHash` are exactly the ones with
/// `#[hash]`-worthy semantics below; `hash::service_hash` reads this struct
/// directly rather than re-deriving the exclusion list, so adding a field
/// here is a one-place decision about whether it is structural.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub name: ServiceName,
    pub image: String,
    pub build: Option<BuildSpec>,
    pub command: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub environment: BTreeMap<String, EnvValue>,
    pub env_file: Vec<PathBuf>,
    pub ports: Vec<PortSpec>,
    pub volumes: Vec<ServiceVolumeMount>,
    pub networks: BTreeMap<String, ServiceNetworkConfig>,
    pub depends_on: BTreeMap<ServiceName, DependsOnSpec>,
    pub restart: RestartPolicyConfig,
    pub scale: u32,
    pub healthcheck: Option<HealthcheckDecl>,
    pub labels: BTreeMap<String, String>,
    pub platform: Option<String>,
    pub tty: bool,
    pub pull_policy: PullPolicy,
    pub profiles: Vec<String>,
    pub hooks: ServiceHooks,
    pub extensions: BTreeMap<String, ExtensionBlock>,
    pub container_name: Option<String>,
    pub configs: Vec<String>,
    pub secrets: Vec<String>,
    pub stop_grace_period: Option<Duration>,
    pub stop_signal: Option<String>,
}

impl ServiceConfig {
    /// Whether this service's `depends_on` has any edges at all.
    pub fn has_dependencies(&self) -> bool {
        !self.depends_on.is_empty()
    }

    /// Resolved environment map; fails `ConfigMissing`-shaped errors bubble
    /// up from `EnvValue::resolve`.
    pub fn resolve_environment(&self) -> crate::config::error::Result<BTreeMap<String, String>> {
        self.environment
            .iter()
            .map(|(k, v)| v.resolve().map(|resolved| (k.clone(), resolved)))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct NetworkDecl {
    pub name: String,
    pub driver: Option<String>,
    pub driver_opts: BTreeMap<String, String>,
    pub internal: bool,
    pub labels: BTreeMap<String, String>,
    pub external: bool,
}

#[derive(Debug, Clone)]
pub struct VolumeDecl {
    pub name: String,
    pub driver: Option<String>,
    pub driver_opts: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub external: bool,
}

/// Where a config/secret's content comes from: "the inline
/// value, the resolved environment variable, or the file contents."
#[derive(Debug, Clone)]
pub enum ResourceSource {
    Inline(Vec<u8>),
    Environment(String),
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ResourceDecl {
    pub name: String,
    pub source: ResourceSource,
    pub labels: BTreeMap<String, String>,
    pub external: bool,
}

impl ResourceDecl {
    /// Reads the blob's content once. Files are re-read per call; callers
    /// in `hash` read each referenced resource exactly once per operation
    /// per the hasher's content rule.
    pub fn read_content(&self) -> crate::config::error::Result<Vec<u8>> {
        use crate::config::error::ConfigMissingError;
        match &self.source {
            ResourceSource::Inline(bytes) => Ok(bytes.clone()),
            ResourceSource::Environment(var) => std::env::var(var)
                .map(|v| v.into_bytes())
                .map_err(|_| ConfigMissingError::MissingEnvVar(var.clone())),
            ResourceSource::File(path) => {
                if !path.exists() {
                    return Err(ConfigMissingError::FileMissing(path.clone()));
                }
                std::fs::read(path).map_err(|source| ConfigMissingError::FileRead {
                    path: path.clone(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_service(name: &str) -> ServiceConfig {
        ServiceConfig {
            name: ServiceName::new(name).unwrap(),
            image: "nginx:1.27".to_string(),
            build: None,
            command: None,
            entrypoint: None,
            environment: BTreeMap::new(),
            env_file: Vec::new(),
            ports: Vec::new(),
            volumes: Vec::new(),
            networks: BTreeMap::new(),
            depends_on: BTreeMap::new(),
            restart: RestartPolicyConfig::default(),
            scale: 1,
            healthcheck: None,
            labels: BTreeMap::new(),
            platform: None,
            tty: false,
            pull_policy: PullPolicy::default(),
            profiles: Vec::new(),
            hooks: ServiceHooks::default(),
            extensions: BTreeMap::new(),
            container_name: None,
            configs: Vec::new(),
            secrets: Vec::new(),
            stop_grace_period: None,
            stop_signal: None,
        }
    }

    #[test]
    fn project_looks_up_services_by_name() {
        let web = empty_service("web");
        let mut services = BTreeMap::new();
        services.insert(web.name.clone(), web);

        let project = Project {
            name: ProjectName::new("demo").unwrap(),
            services,
            networks: BTreeMap::new(),
            volumes: BTreeMap::new(),
            configs: BTreeMap::new(),
            secrets: BTreeMap::new(),
            environment: BTreeMap::new(),
        };

        assert!(project.service(&ServiceName::new("web").unwrap()).is_some());
        assert!(project.service(&ServiceName::new("db").unwrap()).is_none());
    }

    #[test]
    fn resource_decl_inline_round_trips() {
        let decl = ResourceDecl {
            name: "app.conf".to_string(),
            source: ResourceSource::Inline(b"hello".to_vec()),
            labels: BTreeMap::new(),
            external: false,
        };
        assert_eq!(decl.read_content().unwrap(), b"hello");
    }

    #[test]
    fn resource_decl_missing_file_fails() {
        let decl = ResourceDecl {
            name: "missing".to_string(),
            source: ResourceSource::File(PathBuf::from("/nonexistent/path/does-not-exist")),
            labels: BTreeMap::new(),
            external: false,
        };
        assert!(decl.read_content().is_err());
    }
}
