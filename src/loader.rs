// ABOUTME: Compose-like YAML loader for the smoke-test binary.
// ABOUTME: Just enough deserialization to hand the engine a `config::Project`; `config::mod` holds the typed tree.

use crate::config::{
    BuildSpec, DependsOnSpec, EnvValue, HealthcheckDecl, HookSpec, NetworkDecl, PortSpec, Project,
    PullPolicy, ResourceDecl, ResourceSource, ServiceConfig, ServiceHooks, ServiceNetworkConfig,
    ServiceVolumeMount, VolumeDecl,
};
use crate::runtime::{HealthcheckConfig, Protocol, RestartPolicyConfig};
use crate::types::{NetworkAlias, ProjectName, ServiceName};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse { path: PathBuf, source: serde_yaml::Error },
    #[error("invalid project name: {0}")]
    ProjectName(#[from] crate::types::ProjectNameError),
    #[error("invalid service name {name}: {source}")]
    ServiceName {
        name: String,
        source: crate::types::ServiceNameError,
    },
    #[error("invalid network alias {alias}: {source}")]
    NetworkAlias {
        alias: String,
        source: crate::types::NetworkAliasError,
    },
    #[error("service {service} declares port {spec:?} that could not be parsed")]
    Port { service: String, spec: String },
    #[error("service {service} declares volume {spec:?} that could not be parsed")]
    Volume { service: String, spec: String },
    #[error("unknown restart policy {0:?}")]
    RestartPolicy(String),
    #[error("unknown resource source for {0}: declare exactly one of file/environment/inline")]
    ResourceSource(String),
    #[error("invalid duration {value:?}: {source}")]
    Duration {
        value: String,
        source: humantime::DurationError,
    },
    #[error("failed to resolve top-level environment: {0}")]
    EnvResolution(#[from] crate::config::error::ConfigMissingError),
}

type Result<T> = std::result::Result<T, LoadError>;

/// Reads and parses a project file at `path` into a `config::Project`.
pub fn load_project(path: &Path) -> Result<Project> {
    let raw = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file: ProjectFile = serde_yaml::from_str(&raw).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    file.into_project()
}

#[derive(Debug, Deserialize)]
struct ProjectFile {
    name: Option<String>,
    #[serde(default)]
    services: BTreeMap<String, ServiceFile>,
    #[serde(default)]
    networks: BTreeMap<String, NetworkFile>,
    #[serde(default)]
    volumes: BTreeMap<String, VolumeFile>,
    #[serde(default)]
    configs: BTreeMap<String, ResourceFile>,
    #[serde(default)]
    secrets: BTreeMap<String, ResourceFile>,
    #[serde(default)]
    environment: BTreeMap<String, EnvValue>,
}

#[derive(Debug, Deserialize)]
struct ServiceFile {
    image: String,
    #[serde(default)]
    build: Option<BuildFile>,
    #[serde(default)]
    command: Option<Vec<String>>,
    #[serde(default)]
    entrypoint: Option<Vec<String>>,
    #[serde(default)]
    environment: BTreeMap<String, EnvValue>,
    #[serde(default)]
    env_file: Vec<PathBuf>,
    #[serde(default)]
    ports: Vec<String>,
    #[serde(default)]
    volumes: Vec<String>,
    #[serde(default)]
    networks: BTreeMap<String, NetworkAttachFile>,
    #[serde(default)]
    depends_on: BTreeMap<String, DependsOnSpec>,
    #[serde(default)]
    restart: Option<String>,
    #[serde(default = "default_scale")]
    scale: u32,
    #[serde(default)]
    healthcheck: Option<HealthcheckFile>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    tty: bool,
    #[serde(default)]
    pull_policy: Option<PullPolicy>,
    #[serde(default)]
    profiles: Vec<String>,
    #[serde(default)]
    hooks: Option<HooksFile>,
    #[serde(default)]
    container_name: Option<String>,
    #[serde(default)]
    configs: Vec<String>,
    #[serde(default)]
    secrets: Vec<String>,
    #[serde(default)]
    stop_grace_period: Option<String>,
    #[serde(default)]
    stop_signal: Option<String>,
}

fn default_scale() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct BuildFile {
    context: PathBuf,
    #[serde(default)]
    dockerfile: Option<PathBuf>,
    #[serde(default)]
    args: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct NetworkAttachFile {
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    ipv4_address: Option<String>,
    #[serde(default)]
    ipv6_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthcheckFile {
    #[serde(default)]
    disable: bool,
    #[serde(default)]
    test: Vec<String>,
    #[serde(default)]
    interval: Option<String>,
    #[serde(default)]
    timeout: Option<String>,
    #[serde(default)]
    retries: Option<u32>,
    #[serde(default)]
    start_period: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HooksFile {
    #[serde(default)]
    post_start: Option<HookFile>,
    #[serde(default)]
    pre_stop: Option<HookFile>,
}

#[derive(Debug, Deserialize)]
struct HookFile {
    command: Vec<String>,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NetworkFile {
    #[serde(default)]
    driver: Option<String>,
    #[serde(default)]
    driver_opts: BTreeMap<String, String>,
    #[serde(default)]
    internal: bool,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    external: bool,
}

#[derive(Debug, Deserialize)]
struct VolumeFile {
    #[serde(default)]
    driver: Option<String>,
    #[serde(default)]
    driver_opts: BTreeMap<String, String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    external: bool,
}

#[derive(Debug, Deserialize)]
struct ResourceFile {
    #[serde(default)]
    file: Option<PathBuf>,
    #[serde(default)]
    environment: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    external: bool,
}

impl ProjectFile {
    fn into_project(self) -> Result<Project> {
        let name = ProjectName::new(self.name.as_deref().unwrap_or("default"))?;

        let mut services = BTreeMap::new();
        for (raw_name, service) in self.services {
            let service_name = ServiceName::new(&raw_name).map_err(|source| LoadError::ServiceName {
                name: raw_name.clone(),
                source,
            })?;
            services.insert(service_name.clone(), service.into_service(service_name, &raw_name)?);
        }

        let networks = self
            .networks
            .into_iter()
            .map(|(raw_name, net)| {
                (
                    raw_name.clone(),
                    NetworkDecl {
                        name: raw_name,
                        driver: net.driver,
                        driver_opts: net.driver_opts,
                        internal: net.internal,
                        labels: net.labels,
                        external: net.external,
                    },
                )
            })
            .collect();

        let volumes = self
            .volumes
            .into_iter()
            .map(|(raw_name, vol)| {
                (
                    raw_name.clone(),
                    VolumeDecl {
                        name: raw_name,
                        driver: vol.driver,
                        driver_opts: vol.driver_opts,
                        labels: vol.labels,
                        external: vol.external,
                    },
                )
            })
            .collect();

        let configs = self
            .configs
            .into_iter()
            .map(|(raw_name, res)| Ok((raw_name.clone(), res.into_decl(raw_name)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        let secrets = self
            .secrets
            .into_iter()
            .map(|(raw_name, res)| Ok((raw_name.clone(), res.into_decl(raw_name)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        let environment = self
            .environment
            .into_iter()
            .map(|(k, v)| v.resolve().map(|resolved| (k, resolved)))
            .collect::<crate::config::error::Result<BTreeMap<_, _>>>()?;

        Ok(Project {
            name,
            services,
            networks,
            volumes,
            configs,
            secrets,
            environment,
        })
    }
}

impl ResourceFile {
    fn into_decl(self, name: String) -> Result<ResourceDecl> {
        let source = match (self.file, self.environment, self.content) {
            (Some(path), None, None) => ResourceSource::File(path),
            (None, Some(var), None) => ResourceSource::Environment(var),
            (None, None, Some(content)) => ResourceSource::Inline(content.into_bytes()),
            (None, None, None) if self.external => ResourceSource::Inline(Vec::new()),
            _ => return Err(LoadError::ResourceSource(name)),
        };
        Ok(ResourceDecl {
            name,
            source,
            labels: self.labels,
            external: self.external,
        })
    }
}

impl ServiceFile {
    fn into_service(self, name: ServiceName, raw_name: &str) -> Result<ServiceConfig> {
        let ports = self
            .ports
            .iter()
            .map(|spec| parse_port(raw_name, spec))
            .collect::<Result<Vec<_>>>()?;

        let volumes = self
            .volumes
            .iter()
            .map(|spec| parse_volume(raw_name, spec))
            .collect::<Result<Vec<_>>>()?;

        let mut networks = BTreeMap::new();
        for (net_name, attach) in self.networks {
            let aliases = attach
                .aliases
                .iter()
                .map(|a| NetworkAlias::new(a).map_err(|source| LoadError::NetworkAlias { alias: a.clone(), source }))
                .collect::<Result<Vec<_>>>()?;
            networks.insert(
                net_name,
                ServiceNetworkConfig {
                    priority: attach.priority,
                    aliases,
                    ipv4_address: attach.ipv4_address,
                    ipv6_address: attach.ipv6_address,
                },
            );
        }

        let depends_on = self
            .depends_on
            .into_iter()
            .map(|(dep_name, spec)| {
                ServiceName::new(&dep_name)
                    .map(|n| (n, spec))
                    .map_err(|source| LoadError::ServiceName { name: dep_name, source })
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let restart = match &self.restart {
            None => RestartPolicyConfig::default(),
            Some(spec) => parse_restart_policy(spec)?,
        };

        let healthcheck = self.healthcheck.map(|h| h.into_decl()).transpose()?;

        let hooks = match self.hooks {
            None => ServiceHooks::default(),
            Some(h) => ServiceHooks {
                post_start: h.post_start.map(|hook| HookSpec {
                    command: hook.command,
                    user: hook.user,
                }),
                pre_stop: h.pre_stop.map(|hook| HookSpec {
                    command: hook.command,
                    user: hook.user,
                }),
            },
        };

        let stop_grace_period = self
            .stop_grace_period
            .as_deref()
            .map(parse_duration)
            .transpose()?;

        Ok(ServiceConfig {
            name,
            image: self.image,
            build: self.build.map(|b| BuildSpec {
                context: b.context,
                dockerfile: b.dockerfile,
                args: b.args,
            }),
            command: self.command,
            entrypoint: self.entrypoint,
            environment: self.environment,
            env_file: self.env_file,
            ports,
            volumes,
            networks,
            depends_on,
            restart,
            scale: self.scale,
            healthcheck,
            labels: self.labels,
            platform: self.platform,
            tty: self.tty,
            pull_policy: self.pull_policy.unwrap_or_default(),
            profiles: self.profiles,
            hooks,
            extensions: BTreeMap::new(),
            container_name: self.container_name,
            configs: self.configs,
            secrets: self.secrets,
            stop_grace_period,
            stop_signal: self.stop_signal,
        })
    }
}

impl HealthcheckFile {
    fn into_decl(self) -> Result<HealthcheckDecl> {
        if self.disable || self.test == vec!["NONE".to_string()] {
            return Ok(HealthcheckDecl::Disabled);
        }
        Ok(HealthcheckDecl::Configured(HealthcheckConfig {
            test: self.test,
            interval: self.interval.as_deref().map(parse_duration).transpose()?.unwrap_or(Duration::from_secs(30)),
            timeout: self.timeout.as_deref().map(parse_duration).transpose()?.unwrap_or(Duration::from_secs(30)),
            retries: self.retries.unwrap_or(3),
            start_period: self
                .start_period
                .as_deref()
                .map(parse_duration)
                .transpose()?
                .unwrap_or(Duration::ZERO),
        }))
    }
}

fn parse_duration(value: &str) -> Result<Duration> {
    humantime::parse_duration(value).map_err(|source| LoadError::Duration {
        value: value.to_string(),
        source,
    })
}

fn parse_restart_policy(spec: &str) -> Result<RestartPolicyConfig> {
    let (kind, arg) = spec.split_once(':').unwrap_or((spec, ""));
    match kind {
        "no" => Ok(RestartPolicyConfig::No),
        "always" => Ok(RestartPolicyConfig::Always),
        "unless-stopped" => Ok(RestartPolicyConfig::UnlessStopped),
        "on-failure" => Ok(RestartPolicyConfig::OnFailure {
            max_retries: arg.parse().ok(),
        }),
        _ => Err(LoadError::RestartPolicy(spec.to_string())),
    }
}

/// Parses `"[host:]container[/proto]"` into a `PortSpec`.
fn parse_port(service: &str, spec: &str) -> Result<PortSpec> {
    let (rest, protocol) = match spec.rsplit_once('/') {
        Some((rest, proto)) if proto.eq_ignore_ascii_case("udp") => (rest, Protocol::Udp),
        Some((rest, proto)) if proto.eq_ignore_ascii_case("tcp") => (rest, Protocol::Tcp),
        _ => (spec, Protocol::Tcp),
    };

    let invalid = || LoadError::Port {
        service: service.to_string(),
        spec: spec.to_string(),
    };

    let (host_port, container_port) = match rest.split_once(':') {
        Some((host, container)) => (
            Some(host.parse::<u16>().map_err(|_| invalid())?),
            container.parse::<u16>().map_err(|_| invalid())?,
        ),
        None => (None, rest.parse::<u16>().map_err(|_| invalid())?),
    };

    Ok(PortSpec {
        host_port,
        container_port,
        protocol,
    })
}

/// Parses `"source:target[:ro]"` into a `ServiceVolumeMount`, inferring bind
/// vs named-volume from whether `source` looks like a path.
fn parse_volume(service: &str, spec: &str) -> Result<ServiceVolumeMount> {
    let mut parts = spec.split(':');
    let source = parts.next().ok_or_else(|| LoadError::Volume {
        service: service.to_string(),
        spec: spec.to_string(),
    })?;
    let target = parts.next().ok_or_else(|| LoadError::Volume {
        service: service.to_string(),
        spec: spec.to_string(),
    })?;
    let read_only = matches!(parts.next(), Some(flag) if flag == "ro");

    let kind = if source.starts_with('.') || source.starts_with('/') {
        "bind"
    } else {
        "volume"
    };

    Ok(ServiceVolumeMount {
        source: source.to_string(),
        target: target.to_string(),
        read_only,
        kind: kind.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_container_port() {
        let port = parse_port("web", "8080:80").unwrap();
        assert_eq!(port.host_port, Some(8080));
        assert_eq!(port.container_port, 80);
        assert!(matches!(port.protocol, Protocol::Tcp));
    }

    #[test]
    fn parses_container_only_port_with_protocol() {
        let port = parse_port("web", "53/udp").unwrap();
        assert_eq!(port.host_port, None);
        assert_eq!(port.container_port, 53);
        assert!(matches!(port.protocol, Protocol::Udp));
    }

    #[test]
    fn parses_bind_mount() {
        let mount = parse_volume("web", "./data:/var/lib/data:ro").unwrap();
        assert_eq!(mount.kind, "bind");
        assert!(mount.read_only);
    }

    #[test]
    fn parses_named_volume() {
        let mount = parse_volume("web", "data:/var/lib/data").unwrap();
        assert_eq!(mount.kind, "volume");
        assert!(!mount.read_only);
    }

    #[test]
    fn parses_on_failure_restart_with_retries() {
        let policy = parse_restart_policy("on-failure:5").unwrap();
        assert!(matches!(policy, RestartPolicyConfig::OnFailure { max_retries: Some(5) }));
    }

    #[test]
    fn minimal_project_loads() {
        let yaml = r#"
name: demo
services:
  web:
    image: "nginx:1.27"
    ports:
      - "8080:80"
"#;
        let file: ProjectFile = serde_yaml::from_str(yaml).unwrap();
        let project = file.into_project().unwrap();
        assert_eq!(project.name.to_string(), "demo");
        assert!(project.service(&ServiceName::new("web").unwrap()).is_some());
    }
}
