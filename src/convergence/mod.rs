// ABOUTME: Per-service plan classification (keep/recreate/scale up/down) and container spec synthesis.
// ABOUTME: Classification reads a per-service snapshot of {containers, hashes} atomically, admitting skew across services.

use crate::config::{Project, ServiceConfig};
use crate::error::Result;
use crate::hash;
use crate::label::{self, default_network_alias};
use crate::runtime::traits::{ContainerConfig, ContainerSummary};
use crate::runtime::{HealthcheckConfig, RestartPolicyConfig, VolumeMount as RtVolumeMount};
use crate::types::{ConfigHash, NetworkAlias, NetworkId, ProjectName, ReplicaIndex, ServiceName};
use std::collections::{BTreeMap, HashMap};

/// The classification of every live container belonging to (project,
/// service), and the work needed to converge them to the declared state.
#[derive(Debug, Default, Clone)]
pub struct ServicePlan {
    pub keep: Vec<String>,
    pub recreate: Vec<RecreateEntry>,
    pub scale_up: Vec<ReplicaIndex>,
    pub scale_down: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RecreateEntry {
    pub old_id: String,
    pub index: ReplicaIndex,
}

impl ServicePlan {
    pub fn is_noop(&self) -> bool {
        self.recreate.is_empty() && self.scale_up.is_empty() && self.scale_down.is_empty()
    }
}

/// Classifies every live container of one service against its declared
/// scale/hash/digest. `live` must already be scoped to (project, service)
/// and exclude one-off containers by the caller.
pub fn classify_service(
    service: &ServiceConfig,
    live: &[ContainerSummary],
    config_hash: &ConfigHash,
    image_digest: &str,
    force_recreate: bool,
    no_recreate: bool,
) -> ServicePlan {
    let mut plan = ServicePlan::default();
    let mut seen_indices: BTreeMap<u32, ()> = BTreeMap::new();

    for container in live {
        let Some(index) = container
            .labels
            .get(label::LABEL_CONTAINER_NUMBER)
            .and_then(|n| n.parse::<u32>().ok())
            .and_then(|n| ReplicaIndex::new(n).ok())
        else {
            continue;
        };

        if index.get() > service.scale {
            plan.scale_down.push(container.id.to_string());
            continue;
        }

        seen_indices.insert(index.get(), ());

        if no_recreate {
            plan.keep.push(container.id.to_string());
            continue;
        }

        let is_dead = container.state.eq_ignore_ascii_case("dead")
            || container.state.eq_ignore_ascii_case("removing");
        let hash_matches = container
            .labels
            .get(label::LABEL_CONFIG_HASH)
            .is_some_and(|h| h == config_hash.as_str());
        let digest_matches = container
            .labels
            .get(label::LABEL_IMAGE_DIGEST)
            .is_some_and(|d| d == image_digest);

        if force_recreate || is_dead || !hash_matches || !digest_matches {
            plan.recreate.push(RecreateEntry {
                old_id: container.id.to_string(),
                index,
            });
        } else {
            plan.keep.push(container.id.to_string());
        }
    }

    if !no_recreate || seen_indices.is_empty() {
        for i in 1..=service.scale {
            if !seen_indices.contains_key(&i) {
                plan.scale_up.push(ReplicaIndex::new(i).expect("i in 1..=scale is non-zero"));
            }
        }
    }

    // Scale-down removes the highest indices first.
    plan.scale_down.sort_by(|a, b| b.cmp(a));

    plan
}

/// Containers whose `service` label names a service absent from the current
/// project - removed only under `--remove-orphans`.
pub fn find_orphans<'a>(project: &Project, live: &'a [ContainerSummary]) -> Vec<&'a ContainerSummary> {
    live.iter()
        .filter(|c| label::is_orphan(&c.labels, project))
        .collect()
}

/// Network endpoints resolved for one replica: the primary network (highest
/// declared priority, attached at container-create time) plus any
/// additional networks, each paired with its resolved aliases.
pub struct ResolvedNetworks {
    pub primary: Option<(String, NetworkId, Vec<NetworkAlias>)>,
    pub additional: Vec<(NetworkId, Vec<NetworkAlias>)>,
}

pub fn resolve_networks(
    project_name: &ProjectName,
    service: &ServiceConfig,
    index: ReplicaIndex,
    network_ids: &HashMap<String, NetworkId>,
) -> ResolvedNetworks {
    let mut entries: Vec<(&String, &crate::config::ServiceNetworkConfig)> = service.networks.iter().collect();
    entries.sort_by(|a, b| b.1.priority.cmp(&a.1.priority).then_with(|| a.0.cmp(b.0)));

    let mut primary = None;
    let mut additional = Vec::new();

    for (name, cfg) in entries {
        let Some(id) = network_ids.get(name) else { continue };
        let aliases = if cfg.aliases.is_empty() {
            vec![NetworkAlias::new(&default_network_alias(project_name, &service.name, index))
                .expect("synthesized alias is always valid")]
        } else {
            cfg.aliases.clone()
        };
        if primary.is_none() {
            primary = Some((name.clone(), id.clone(), aliases));
        } else {
            additional.push((id.clone(), aliases));
        }
    }

    ResolvedNetworks { primary, additional }
}

/// Whether the runtime's API version supports attaching more than one
/// network at container-create time. Below this threshold the
/// engine attaches only the primary network at create and calls
/// `NetworkConnect` for the rest afterwards.
pub fn supports_multi_network_at_create(api_version: &str) -> bool {
    parse_api_version(api_version).is_some_and(|(major, minor)| (major, minor) >= (1, 44))
}

fn parse_api_version(v: &str) -> Option<(u32, u32)> {
    let mut parts = v.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().ok()?;
    Some((major, minor))
}

/// Deterministically synthesizes the container creation spec for one
/// replica from (ServiceConfig, index, resolved image digest, resolved
/// env). Networks beyond the primary are returned separately
/// for the caller to `NetworkConnect` after create when the runtime's API
/// version gates multi-network attach-at-create.
pub fn build_container_spec(
    project: &Project,
    service: &ServiceConfig,
    index: ReplicaIndex,
    image_digest: &str,
    network_ids: &HashMap<String, NetworkId>,
    oneoff: bool,
) -> Result<(ContainerConfig, Vec<(NetworkId, Vec<NetworkAlias>)>)> {
    let config_hash = hash::service_hash(service).map_err(|e| crate::error::EngineError::config_missing(e.to_string()))?;
    let env = service
        .resolve_environment()
        .map_err(|e| crate::error::EngineError::config_missing(e.to_string()))?;

    let name = if let Some(pinned) = &service.container_name {
        pinned.clone()
    } else {
        label::container_name(&project.name, &service.name, index)
    };

    let labels = label::container_labels(&project.name, service, index, &config_hash, image_digest, oneoff);

    // ContainerConfig carries only the primary network at create (bollard's
    // create call takes one endpoint); every other declared network is
    // attached via NetworkConnect after create - the caller decides timing
    // against `supports_multi_network_at_create`.
    let resolved_networks = resolve_networks(&project.name, service, index, network_ids);
    let (network, network_aliases, deferred) = match resolved_networks.primary {
        Some((_, id, aliases)) => (Some(id.as_str().to_string()), aliases, resolved_networks.additional),
        None => (None, Vec::new(), Vec::new()),
    };

    let healthcheck = match &service.healthcheck {
        Some(crate::config::HealthcheckDecl::Configured(cfg)) => Some(cfg.clone()),
        Some(crate::config::HealthcheckDecl::Disabled) => Some(disabled_healthcheck()),
        None => None,
    };

    let volumes = service
        .volumes
        .iter()
        .map(|v| RtVolumeMount {
            source: v.source.clone(),
            target: v.target.clone(),
            read_only: v.read_only,
        })
        .collect();

    let ports = service
        .ports
        .iter()
        .map(|p| crate::runtime::PortMapping {
            host_port: p.host_port,
            container_port: p.container_port,
            protocol: p.protocol,
            host_ip: None,
        })
        .collect();

    let config = ContainerConfig {
        name,
        image: crate::types::ImageRef::parse(&service.image).map_err(|e| {
            crate::error::EngineError::invalid_config(format!("invalid image reference {}: {e}", service.image))
        })?,
        env: env.into_iter().collect(),
        labels: labels.into_iter().collect(),
        ports,
        volumes,
        command: service.command.clone(),
        entrypoint: service.entrypoint.clone(),
        working_dir: None,
        user: None,
        restart_policy: service.restart.clone(),
        resources: None,
        healthcheck,
        stop_timeout: service.stop_grace_period,
        network,
        network_aliases,
    };

    Ok((config, deferred))
}

fn disabled_healthcheck() -> HealthcheckConfig {
    HealthcheckConfig {
        test: vec!["NONE".to_string()],
        interval: std::time::Duration::ZERO,
        timeout: std::time::Duration::ZERO,
        retries: 0,
        start_period: std::time::Duration::ZERO,
    }
}

/// True iff a healthcheck spec is the "explicitly disabled" sentinel
/// (`Test = ["NONE"]`) rather than a real check -
/// `service_running_or_healthy` / `fallbackRunning` edge case.
pub fn is_disabled_healthcheck(hc: &HealthcheckConfig) -> bool {
    hc.test == ["NONE".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PullPolicy, ServiceHooks};
    use crate::types::ContainerId;

    fn service(scale: u32) -> ServiceConfig {
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
            scale,
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

    fn container(index: u32, hash: &str, digest: &str, state: &str) -> ContainerSummary {
        let mut labels = HashMap::new();
        labels.insert(label::LABEL_CONTAINER_NUMBER.to_string(), index.to_string());
        labels.insert(label::LABEL_CONFIG_HASH.to_string(), hash.to_string());
        labels.insert(label::LABEL_IMAGE_DIGEST.to_string(), digest.to_string());
        ContainerSummary {
            id: ContainerId::new(format!("c{index}")),
            name: format!("demo-web-{index}"),
            image: "nginx:1.27".to_string(),
            state: state.to_string(),
            status: String::new(),
            labels,
        }
    }

    #[test]
    fn matching_hash_and_digest_is_kept() {
        let service = service(1);
        let hash = ConfigHash::from_hex("deadbeef").unwrap();
        let live = vec![container(1, "deadbeef", "sha256:abc", "running")];
        let plan = classify_service(&service, &live, &hash, "sha256:abc", false, false);
        assert_eq!(plan.keep.len(), 1);
        assert!(plan.recreate.is_empty());
    }

    #[test]
    fn drifted_hash_is_recreated() {
        let service = service(1);
        let hash = ConfigHash::from_hex("deadbeef").unwrap();
        let live = vec![container(1, "stale", "sha256:abc", "running")];
        let plan = classify_service(&service, &live, &hash, "sha256:abc", false, false);
        assert_eq!(plan.recreate.len(), 1);
        assert_eq!(plan.recreate[0].old_id, "c1");
    }

    #[test]
    fn dead_container_is_recreated_even_with_matching_hash() {
        let service = service(1);
        let hash = ConfigHash::from_hex("deadbeef").unwrap();
        let live = vec![container(1, "deadbeef", "sha256:abc", "dead")];
        let plan = classify_service(&service, &live, &hash, "sha256:abc", false, false);
        assert_eq!(plan.recreate.len(), 1);
    }

    #[test]
    fn scale_up_fills_missing_indices() {
        let service = service(3);
        let hash = ConfigHash::from_hex("deadbeef").unwrap();
        let live = vec![container(1, "deadbeef", "sha256:abc", "running")];
        let plan = classify_service(&service, &live, &hash, "sha256:abc", false, false);
        assert_eq!(plan.scale_up.len(), 2);
        assert_eq!(plan.scale_up[0].get(), 2);
        assert_eq!(plan.scale_up[1].get(), 3);
    }

    #[test]
    fn scale_down_removes_highest_indices_first() {
        let service = service(1);
        let hash = ConfigHash::from_hex("deadbeef").unwrap();
        let live = vec![
            container(1, "deadbeef", "sha256:abc", "running"),
            container(2, "deadbeef", "sha256:abc", "running"),
            container(3, "deadbeef", "sha256:abc", "running"),
        ];
        let plan = classify_service(&service, &live, &hash, "sha256:abc", false, false);
        assert_eq!(plan.scale_down, vec!["c3".to_string(), "c2".to_string()]);
    }

    #[test]
    fn no_recreate_forbids_recreate_despite_drift() {
        let service = service(1);
        let hash = ConfigHash::from_hex("deadbeef").unwrap();
        let live = vec![container(1, "stale", "sha256:abc", "running")];
        let plan = classify_service(&service, &live, &hash, "sha256:abc", false, true);
        assert!(plan.recreate.is_empty());
        assert_eq!(plan.keep.len(), 1);
    }

    #[test]
    fn force_recreate_recreates_despite_matching_hash() {
        let service = service(1);
        let hash = ConfigHash::from_hex("deadbeef").unwrap();
        let live = vec![container(1, "deadbeef", "sha256:abc", "running")];
        let plan = classify_service(&service, &live, &hash, "sha256:abc", true, false);
        assert_eq!(plan.recreate.len(), 1);
    }

    #[test]
    fn multi_network_api_version_gate() {
        assert!(supports_multi_network_at_create("1.44"));
        assert!(supports_multi_network_at_create("1.45"));
        assert!(!supports_multi_network_at_create("1.40"));
    }
}
