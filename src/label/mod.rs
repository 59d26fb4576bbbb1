// ABOUTME: Canonical label set stamped on every managed resource, name synthesis, filter builders.
// ABOUTME: Discovery filters are always (project) AND (service?) AND (oneoff policy) AND (config-hash present).

use crate::config::{Project, ServiceConfig};
use crate::runtime::traits::{ContainerFilters, NetworkConfig, ResourceConfig, VolumeConfig};
use crate::types::{ConfigHash, ProjectName, ReplicaIndex, ServiceName};
use std::collections::BTreeMap;

/// Engine version stamped into the `version` label. Bumping this does not
/// invalidate existing containers by itself - only `config-hash` drift does.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const LABEL_PROJECT: &str = "project";
pub const LABEL_SERVICE: &str = "service";
pub const LABEL_CONTAINER_NUMBER: &str = "container-number";
pub const LABEL_VERSION: &str = "version";
pub const LABEL_ONEOFF: &str = "oneoff";
pub const LABEL_CONFIG_HASH: &str = "config-hash";
pub const LABEL_IMAGE_DIGEST: &str = "image-digest";
pub const LABEL_DEPENDS_ON: &str = "depends-on";
pub const LABEL_CONFIG_FILES: &str = "config-files";
pub const LABEL_WORKING_DIR: &str = "working-dir";
pub const LABEL_ENVIRONMENT_FILES: &str = "environment-files";
pub const LABEL_REPLACE: &str = "replace";

/// Canonical container name: `{project}-{service}-{index}`.
pub fn container_name(project: &ProjectName, service: &ServiceName, index: ReplicaIndex) -> String {
    format!("{project}-{service}-{index}")
}

/// The default network alias for a replica: `{project}-{service}-{index-1}`
/// (zero-based in the alias, one-based in `container-number`).
pub fn default_network_alias(project: &ProjectName, service: &ServiceName, index: ReplicaIndex) -> String {
    format!("{project}-{service}-{}", index.get() - 1)
}

/// Canonical labels for a managed container.
pub fn container_labels(
    project: &ProjectName,
    service: &ServiceConfig,
    index: ReplicaIndex,
    config_hash: &ConfigHash,
    image_digest: &str,
    oneoff: bool,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_PROJECT.to_string(), project.to_string());
    labels.insert(LABEL_SERVICE.to_string(), service.name.to_string());
    labels.insert(LABEL_CONTAINER_NUMBER.to_string(), index.to_string());
    labels.insert(LABEL_VERSION.to_string(), ENGINE_VERSION.to_string());
    labels.insert(
        LABEL_ONEOFF.to_string(),
        if oneoff { "True" } else { "False" }.to_string(),
    );
    labels.insert(LABEL_CONFIG_HASH.to_string(), config_hash.to_string());
    labels.insert(LABEL_IMAGE_DIGEST.to_string(), image_digest.to_string());
    labels.insert(
        LABEL_DEPENDS_ON.to_string(),
        serialize_depends_on(service),
    );
    for (k, v) in &service.labels {
        labels.insert(k.clone(), v.clone());
    }
    labels
}

fn serialize_depends_on(service: &ServiceConfig) -> String {
    service
        .depends_on
        .keys()
        .map(ServiceName::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Canonical labels for a managed network/volume/config/secret.
pub fn resource_labels(project: &ProjectName, extra: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_PROJECT.to_string(), project.to_string());
    labels.insert(LABEL_VERSION.to_string(), ENGINE_VERSION.to_string());
    for (k, v) in extra {
        labels.insert(k.clone(), v.clone());
    }
    labels
}

/// Whether a label map marks a managed container: project+service both
/// present.
pub fn is_managed_container(labels: &std::collections::HashMap<String, String>) -> bool {
    labels.contains_key(LABEL_PROJECT) && labels.contains_key(LABEL_SERVICE)
}

/// Whether a label map carries `config-hash`, i.e. was created by a current
/// engine rather than an older toolchain.
pub fn has_config_hash(labels: &std::collections::HashMap<String, String>) -> bool {
    labels.contains_key(LABEL_CONFIG_HASH)
}

/// `oneoff=True` policy for discovery filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneoffPolicy {
    /// Only managed-service containers, excludes one-offs (default for
    /// `Up`/`Down`/`Stop`/`Start` unless explicitly named).
    ExcludeOneoff,
    /// Only one-off containers (e.g. `run`'s own bookkeeping).
    OnlyOneoff,
    /// Either.
    Any,
}

/// Builds the discovery filter for containers in `project`, optionally
/// scoped to one `service`, applying the `oneoff` policy.
///
/// Always ANDs in `project`; the `config-hash` presence check happens after
/// listing since bollard's label filter cannot express "key present, any
/// value" against an opaque string - callers should pair this with
/// `has_config_hash` when distinguishing managed containers from legacy
/// orphans.
pub fn container_filters(
    project: &ProjectName,
    service: Option<&ServiceName>,
    oneoff: OneoffPolicy,
    all: bool,
) -> ContainerFilters {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_PROJECT.to_string(), project.to_string());
    if let Some(service) = service {
        labels.insert(LABEL_SERVICE.to_string(), service.to_string());
    }
    match oneoff {
        OneoffPolicy::ExcludeOneoff => {
            labels.insert(LABEL_ONEOFF.to_string(), "False".to_string());
        }
        OneoffPolicy::OnlyOneoff => {
            labels.insert(LABEL_ONEOFF.to_string(), "True".to_string());
        }
        OneoffPolicy::Any => {}
    }
    ContainerFilters {
        labels: labels.into_iter().collect(),
        name: None,
        all,
    }
}

/// Discovery filter for a network/volume/config/secret by declared name,
/// scoped to `project`.
pub fn resource_filter_labels(project: &ProjectName, resource_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_PROJECT.to_string(), project.to_string());
    labels.insert("resource".to_string(), resource_name.to_string());
    labels
}

pub fn network_create_config(
    project: &ProjectName,
    decl: &crate::config::NetworkDecl,
) -> NetworkConfig {
    let mut labels = decl.labels.clone();
    labels.insert("resource".to_string(), decl.name.clone());
    NetworkConfig {
        name: format!("{project}_{}", decl.name),
        driver: decl.driver.clone(),
        labels: resource_labels(project, &labels).into_iter().collect(),
    }
}

pub fn volume_create_config(
    project: &ProjectName,
    decl: &crate::config::VolumeDecl,
) -> VolumeConfig {
    let mut labels = decl.labels.clone();
    labels.insert("resource".to_string(), decl.name.clone());
    VolumeConfig {
        name: format!("{project}_{}", decl.name),
        driver: decl.driver.clone(),
        driver_opts: decl.driver_opts.clone().into_iter().collect(),
        labels: resource_labels(project, &labels).into_iter().collect(),
    }
}

pub fn resource_create_config(
    project: &ProjectName,
    decl: &crate::config::ResourceDecl,
    content: Vec<u8>,
) -> ResourceConfig {
    let mut labels = decl.labels.clone();
    labels.insert("resource".to_string(), decl.name.clone());
    ResourceConfig {
        name: format!("{project}_{}", decl.name),
        content,
        labels: resource_labels(project, &labels).into_iter().collect(),
    }
}

/// Validates `container_name` pinning against `scale`: a
/// pinned name with `scale > 1` is always `InvalidConfig`.
pub fn validate_pinned_name(service: &ServiceConfig) -> crate::error::Result<()> {
    if service.container_name.is_some() && service.scale > 1 {
        return Err(crate::error::EngineError::invalid_config(format!(
            "service {} pins container_name but has scale {} > 1",
            service.name, service.scale
        )));
    }
    Ok(())
}

/// The replica index carried by a container's `container-number` label, if
/// any - used everywhere a live container needs to be matched back to its
/// declared slot.
pub fn container_index(labels: &std::collections::HashMap<String, String>) -> Option<ReplicaIndex> {
    labels
        .get(LABEL_CONTAINER_NUMBER)?
        .parse::<u32>()
        .ok()
        .and_then(|n| ReplicaIndex::new(n).ok())
}

/// Marks up the given project's services for discovery of orphaned
/// containers: anything in the runtime labeled with this project but whose
/// `service` label names a service not in `project`.
pub fn is_orphan(labels: &std::collections::HashMap<String, String>, project: &Project) -> bool {
    match labels.get(LABEL_SERVICE) {
        Some(name) => match ServiceName::new(name) {
            Ok(name) => !project.services.contains_key(&name),
            Err(_) => true,
        },
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_name() -> ProjectName {
        ProjectName::new("demo").unwrap()
    }

    #[test]
    fn container_name_format() {
        let name = container_name(
            &project_name(),
            &ServiceName::new("web").unwrap(),
            ReplicaIndex::FIRST,
        );
        assert_eq!(name, "demo-web-1");
    }

    #[test]
    fn default_alias_is_zero_based() {
        let alias = default_network_alias(
            &project_name(),
            &ServiceName::new("web").unwrap(),
            ReplicaIndex::FIRST,
        );
        assert_eq!(alias, "demo-web-0");
    }

    #[test]
    fn container_filters_always_include_project() {
        let filters = container_filters(&project_name(), None, OneoffPolicy::ExcludeOneoff, false);
        assert_eq!(filters.labels.get(LABEL_PROJECT).unwrap(), "demo");
        assert_eq!(filters.labels.get(LABEL_ONEOFF).unwrap(), "False");
    }

    #[test]
    fn container_filters_scope_to_service_when_given() {
        let service = ServiceName::new("web").unwrap();
        let filters = container_filters(&project_name(), Some(&service), OneoffPolicy::Any, true);
        assert_eq!(filters.labels.get(LABEL_SERVICE).unwrap(), "web");
        assert!(!filters.labels.contains_key(LABEL_ONEOFF));
        assert!(filters.all);
    }

    #[test]
    fn is_managed_requires_both_labels() {
        let mut labels = std::collections::HashMap::new();
        labels.insert(LABEL_PROJECT.to_string(), "demo".to_string());
        assert!(!is_managed_container(&labels));
        labels.insert(LABEL_SERVICE.to_string(), "web".to_string());
        assert!(is_managed_container(&labels));
    }
}
