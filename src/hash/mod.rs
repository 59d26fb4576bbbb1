// ABOUTME: Deterministic content hashes for services, configs, secrets.
// ABOUTME: Mismatch against a live container's config-hash label drives recreate decisions.

use crate::config::{DependsOnSpec, HealthcheckDecl, ResourceDecl, ServiceConfig, ServiceVolumeMount};
use crate::types::ConfigHash;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// The canonical JSON projection of a `ServiceConfig`, explicitly excluding
/// build context path, pull policy, and scale/replicas - the closed
/// exclusion list. Field order here is fixed and every field
/// is owned, so serializing this struct is always byte-for-byte stable for
/// equal services regardless of how the caller built them.
#[derive(Serialize)]
struct ServiceProjection {
    image: String,
    command: Option<Vec<String>>,
    entrypoint: Option<Vec<String>>,
    environment: BTreeMap<String, String>,
    env_file: Vec<String>,
    ports: Vec<PortProjection>,
    volumes: Vec<(String, String, bool, String)>,
    networks: BTreeMap<String, NetworkProjection>,
    depends_on: BTreeMap<String, DependsOnSpec>,
    restart: RestartProjection,
    healthcheck: HealthcheckProjection,
    labels: BTreeMap<String, String>,
    platform: Option<String>,
    tty: bool,
    profiles: Vec<String>,
    hooks: HooksProjection,
    configs: Vec<String>,
    secrets: Vec<String>,
    stop_grace_period_millis: Option<u128>,
    stop_signal: Option<String>,
    has_build: bool,
}

#[derive(Serialize)]
struct PortProjection {
    host_port: Option<u16>,
    container_port: u16,
    protocol: &'static str,
}

#[derive(Serialize)]
struct NetworkProjection {
    priority: i64,
    aliases: Vec<String>,
    ipv4_address: Option<String>,
    ipv6_address: Option<String>,
}

#[derive(Serialize)]
enum RestartProjection {
    No,
    Always,
    UnlessStopped,
    OnFailure { max_retries: Option<u32> },
}

#[derive(Serialize)]
enum HealthcheckProjection {
    None,
    Disabled,
    Configured {
        test: Vec<String>,
        interval_millis: u128,
        timeout_millis: u128,
        retries: u32,
        start_period_millis: u128,
    },
}

#[derive(Serialize)]
struct HooksProjection {
    post_start: Option<Vec<String>>,
    pre_stop: Option<Vec<String>>,
}

fn project_restart(restart: &crate::runtime::RestartPolicyConfig) -> RestartProjection {
    use crate::runtime::RestartPolicyConfig as P;
    match restart {
        P::No => RestartProjection::No,
        P::Always => RestartProjection::Always,
        P::UnlessStopped => RestartProjection::UnlessStopped,
        P::OnFailure { max_retries } => RestartProjection::OnFailure {
            max_retries: *max_retries,
        },
    }
}

fn project_healthcheck(decl: &Option<HealthcheckDecl>) -> HealthcheckProjection {
    match decl {
        None => HealthcheckProjection::None,
        Some(HealthcheckDecl::Disabled) => HealthcheckProjection::Disabled,
        Some(HealthcheckDecl::Configured(cfg)) => HealthcheckProjection::Configured {
            test: cfg.test.clone(),
            interval_millis: cfg.interval.as_millis(),
            timeout_millis: cfg.timeout.as_millis(),
            retries: cfg.retries,
            start_period_millis: cfg.start_period.as_millis(),
        },
    }
}

fn project_volumes(volumes: &[ServiceVolumeMount]) -> Vec<(String, String, bool, String)> {
    volumes
        .iter()
        .map(|v| (v.source.clone(), v.target.clone(), v.read_only, v.kind.clone()))
        .collect()
}

fn project_networks(
    networks: &BTreeMap<String, crate::config::ServiceNetworkConfig>,
) -> BTreeMap<String, NetworkProjection> {
    networks
        .iter()
        .map(|(name, cfg)| {
            (
                name.clone(),
                NetworkProjection {
                    priority: cfg.priority,
                    aliases: cfg.aliases.iter().map(ToString::to_string).collect(),
                    ipv4_address: cfg.ipv4_address.clone(),
                    ipv6_address: cfg.ipv6_address.clone(),
                },
            )
        })
        .collect()
}

fn build_projection(service: &ServiceConfig) -> crate::config::error::Result<ServiceProjection> {
    let environment = service
        .environment
        .iter()
        .map(|(k, v)| v.resolve().map(|resolved| (k.clone(), resolved)))
        .collect::<crate::config::error::Result<BTreeMap<_, _>>>()?;

    Ok(ServiceProjection {
        image: service.image.clone(),
        command: service.command.clone(),
        entrypoint: service.entrypoint.clone(),
        environment,
        env_file: service.env_file.iter().map(|p| p.display().to_string()).collect(),
        ports: service
            .ports
            .iter()
            .map(|p| PortProjection {
                host_port: p.host_port,
                container_port: p.container_port,
                protocol: match p.protocol {
                    crate::runtime::Protocol::Tcp => "tcp",
                    crate::runtime::Protocol::Udp => "udp",
                },
            })
            .collect(),
        volumes: project_volumes(&service.volumes),
        networks: project_networks(&service.networks),
        depends_on: service
            .depends_on
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect(),
        restart: project_restart(&service.restart),
        healthcheck: project_healthcheck(&service.healthcheck),
        labels: service.labels.clone(),
        platform: service.platform.clone(),
        tty: service.tty,
        profiles: service.profiles.clone(),
        hooks: HooksProjection {
            post_start: service.hooks.post_start.as_ref().map(|h| h.command.clone()),
            pre_stop: service.hooks.pre_stop.as_ref().map(|h| h.command.clone()),
        },
        configs: service.configs.clone(),
        secrets: service.secrets.clone(),
        stop_grace_period_millis: service.stop_grace_period.map(|d| d.as_millis()),
        stop_signal: service.stop_signal.clone(),
        has_build: service.build.is_some(),
    })
}

/// Computes `ServiceHash`: a stable hex digest of the structural fields of
/// `service`, with build context, pull policy and scale deliberately
/// excluded. Fails only if environment interpolation fails.
pub fn service_hash(service: &ServiceConfig) -> crate::config::error::Result<ConfigHash> {
    let projection = build_projection(service)?;
    let canonical =
        serde_json::to_vec(&projection).expect("json serialization of an owned struct never fails");
    Ok(digest_bytes(&canonical))
}

fn digest_bytes(bytes: &[u8]) -> ConfigHash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    ConfigHash::from_hex(hex_encode(&digest)).expect("sha256 output is always valid hex")
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{b:02x}").expect("writing to a String never fails");
    }
    s
}

/// `ServiceConfigsHash` / `ServiceSecretsHash`: hashes the concatenation of
/// `(name || content_bytes)` for each referenced blob, in declared name
/// order so the result does not depend on the caller's iteration order.
/// Missing files fail `ConfigMissing`.
pub fn resources_hash(decls: &[&ResourceDecl]) -> crate::config::error::Result<ConfigHash> {
    let mut sorted: Vec<&&ResourceDecl> = decls.iter().collect();
    sorted.sort_by_key(|d| d.name.clone());

    let mut hasher = Sha256::new();
    for decl in sorted {
        hasher.update(decl.name.as_bytes());
        hasher.update(decl.read_content()?);
    }
    let digest = hasher.finalize();
    Ok(ConfigHash::from_hex(hex_encode(&digest)).expect("sha256 output is always valid hex"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PullPolicy, ServiceHooks};
    use crate::runtime::RestartPolicyConfig;
    use crate::types::ServiceName;

    fn base_service() -> ServiceConfig {
        ServiceConfig {
            name: ServiceName::new("web").unwrap(),
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
    fn identical_services_hash_identically() {
        let a = base_service();
        let b = base_service();
        assert_eq!(service_hash(&a).unwrap(), service_hash(&b).unwrap());
    }

    #[test]
    fn changing_environment_changes_the_hash() {
        let a = base_service();
        let mut b = base_service();
        b.environment.insert(
            "PORT".to_string(),
            crate::config::EnvValue::Literal("8080".to_string()),
        );
        assert_ne!(service_hash(&a).unwrap(), service_hash(&b).unwrap());
    }

    #[test]
    fn scale_does_not_affect_the_hash() {
        let a = base_service();
        let mut b = base_service();
        b.scale = 5;
        assert_eq!(service_hash(&a).unwrap(), service_hash(&b).unwrap());
    }

    #[test]
    fn pull_policy_does_not_affect_the_hash() {
        let a = base_service();
        let mut b = base_service();
        b.pull_policy = PullPolicy::Always;
        assert_eq!(service_hash(&a).unwrap(), service_hash(&b).unwrap());
    }

    #[test]
    fn build_context_path_does_not_affect_the_hash_but_presence_does() {
        let a = base_service();
        let mut b = base_service();
        b.build = Some(crate::config::BuildSpec {
            context: std::path::PathBuf::from("./app"),
            dockerfile: None,
            args: BTreeMap::new(),
        });
        // has_build flips true, but the context path itself is never projected.
        assert_ne!(service_hash(&a).unwrap(), service_hash(&b).unwrap());

        let mut c = base_service();
        c.build = Some(crate::config::BuildSpec {
            context: std::path::PathBuf::from("./somewhere/else"),
            dockerfile: None,
            args: BTreeMap::new(),
        });
        assert_eq!(service_hash(&b).unwrap(), service_hash(&c).unwrap());
    }

    #[test]
    fn resources_hash_is_independent_of_input_order() {
        let a = ResourceDecl {
            name: "a.conf".to_string(),
            source: crate::config::ResourceSource::Inline(b"one".to_vec()),
            labels: BTreeMap::new(),
            external: false,
        };
        let b = ResourceDecl {
            name: "b.conf".to_string(),
            source: crate::config::ResourceSource::Inline(b"two".to_vec()),
            labels: BTreeMap::new(),
            external: false,
        };
        let forward = resources_hash(&[&a, &b]).unwrap();
        let reverse = resources_hash(&[&b, &a]).unwrap();
        assert_eq!(forward, reverse);
    }

    #[test]
    fn resources_hash_changes_with_content() {
        let a = ResourceDecl {
            name: "a.conf".to_string(),
            source: crate::config::ResourceSource::Inline(b"one".to_vec()),
            labels: BTreeMap::new(),
            external: false,
        };
        let a2 = ResourceDecl {
            name: "a.conf".to_string(),
            source: crate::config::ResourceSource::Inline(b"changed".to_vec()),
            labels: BTreeMap::new(),
            external: false,
        };
        assert_ne!(resources_hash(&[&a]).unwrap(), resources_hash(&[&a2]).unwrap());
    }
}
