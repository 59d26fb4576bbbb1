// ABOUTME: Top-level control flow - opens an operation scope over a Project and drives it through
// ABOUTME: the graph scheduler, convergence planner, reconcilers, start/wait/attach and the event bus.

mod down;
mod image;
mod lifecycle;
mod query;
mod up;

pub use image::{ImageProvisioner, UnavailableImageProvisioner};
pub use query::ServiceWaitOutcome;

use crate::config::Project;
use crate::error::{EngineError, Result};
use crate::operation::{ContainerEvent, EventSink, Operation, StatusLevel};
use crate::runtime::traits::ContainerSummary;
use crate::runtime::FullRuntime;
use crate::types::{ProjectName, ServiceName};
use arc_swap::ArcSwapOption;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// Default bound on concurrent per-service work within one DAG layer
/// when the caller does not override it.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Outcome of a dispatched `Operation` - most operations just converge
/// state and report through the event sink, but `Ps` returns data the
/// caller actually wants back.
#[derive(Debug, Clone)]
pub enum OperationOutcome {
    Done,
    Containers(Vec<ContainerSummary>),
}

/// The convergence engine, parameterized over a concrete Runtime Client
/// Port implementation. Holds no project state between operations - the
/// `Project` is reread and replanned fresh every call ("immutable
/// input to one operation").
pub struct Engine<R: FullRuntime + 'static> {
    runtime: Arc<R>,
    max_concurrency: usize,
    image_provisioner: Arc<dyn ImageProvisioner>,
}

impl<R: FullRuntime + 'static> Engine<R> {
    pub fn new(runtime: R) -> Self {
        Self {
            runtime: Arc::new(runtime),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            image_provisioner: Arc::new(UnavailableImageProvisioner),
        }
    }

    /// Overrides the default DAG-layer concurrency bound (the
    /// `maxConcurrency`, "default = runtime-suggested").
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Wires in the external image-build collaborator ("the
    /// engine only requests 'ensure images for these services exist'").
    /// Without one, a missing image with no successful pull always fails
    /// `ImagePullFailure`/`BuildFailure`.
    pub fn with_image_provisioner(mut self, provisioner: Arc<dyn ImageProvisioner>) -> Self {
        self.image_provisioner = provisioner;
        self
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Dispatches one top-level `Operation`. Every
    /// variant opens its own scope over `project` with `cancel` as its
    /// cancellable context and `sink` as its event sink. `sink` is `Arc`'d
    /// rather than borrowed because per-service convergence work runs on
    /// its own `tokio::spawn`ed task (bounded-concurrency
    /// scheduler), which requires everything it captures to be `'static`.
    pub async fn run(
        &self,
        project: &Project,
        operation: Operation,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Result<OperationOutcome> {
        match operation {
            Operation::Up(opts) => {
                up::run(self, project, opts, sink, cancel).await?;
                Ok(OperationOutcome::Done)
            }
            Operation::Down(opts) => {
                down::run(self, project, opts, sink, cancel).await;
                Ok(OperationOutcome::Done)
            }
            Operation::Start(opts) => {
                lifecycle::start(self, project, opts, sink, cancel).await?;
                Ok(OperationOutcome::Done)
            }
            Operation::Stop(opts) => {
                lifecycle::stop(self, project, opts, sink, cancel).await?;
                Ok(OperationOutcome::Done)
            }
            Operation::Restart(opts) => {
                lifecycle::restart(self, project, opts, sink, cancel).await?;
                Ok(OperationOutcome::Done)
            }
            Operation::Kill(opts) => {
                lifecycle::kill(self, project, opts).await?;
                Ok(OperationOutcome::Done)
            }
            Operation::Remove(opts) => {
                lifecycle::remove(self, project, opts).await?;
                Ok(OperationOutcome::Done)
            }
            Operation::Ps(opts) => {
                let containers = query::ps(self, project, opts).await?;
                Ok(OperationOutcome::Containers(containers))
            }
            Operation::Logs(opts) => {
                query::logs(self, project, opts, sink, cancel).await?;
                Ok(OperationOutcome::Done)
            }
            Operation::Wait(opts) => {
                query::wait(self, project, opts, sink, cancel).await?;
                Ok(OperationOutcome::Done)
            }
        }
    }

    /// Resolves a `Services` selector against the project, defaulting to
    /// every declared service. Fails `InvalidConfig` if a named service
    /// does not exist.
    fn target_services(&self, project: &Project, selector: &Option<Vec<ServiceName>>) -> Result<BTreeSet<ServiceName>> {
        match selector {
            None => Ok(project.services.keys().cloned().collect()),
            Some(names) => {
                let mut set = BTreeSet::new();
                for name in names {
                    if !project.services.contains_key(name) {
                        return Err(EngineError::invalid_config(format!("no such service: {name}")));
                    }
                    set.insert(name.clone());
                }
                Ok(set)
            }
        }
    }

    /// Lists live containers for `project`, optionally scoped to one
    /// service, under the given one-off policy (the canonical filter rule).
    async fn live_containers(
        &self,
        project: &Project,
        service: Option<&ServiceName>,
        oneoff: crate::label::OneoffPolicy,
        all: bool,
    ) -> Result<Vec<ContainerSummary>> {
        use crate::error::ContainerErrorExt;
        use crate::runtime::traits::ContainerOps;
        let filters = crate::label::container_filters(&project.name, service, oneoff, all);
        self.runtime.list_containers(&filters).await.context_container()
    }

    pub(super) fn emit_status(&self, sink: &dyn EventSink, level: StatusLevel, text: impl Into<String>) {
        sink.emit(ContainerEvent::Status {
            level,
            text: text.into(),
        });
    }
}

/// Process-wide cache of the runtime's API version: lazily populated per
/// runtime endpoint, invalidated when the endpoint changes. No other
/// global mutable state.
struct CachedApiVersion {
    endpoint: String,
    api_version: String,
}

static API_VERSION_CACHE: OnceLock<ArcSwapOption<CachedApiVersion>> = OnceLock::new();

fn api_version_cache() -> &'static ArcSwapOption<CachedApiVersion> {
    API_VERSION_CACHE.get_or_init(|| ArcSwapOption::from(None))
}

/// Returns the cached API version for `endpoint`, refreshing it from
/// `runtime.info()` the first time this endpoint is seen or after it
/// changes.
pub(crate) async fn cached_api_version(
    runtime: &dyn crate::runtime::traits::RuntimeInfo,
    endpoint: &str,
) -> Result<String> {
    use crate::error::RuntimeInfoErrorExt;

    if let Some(cached) = api_version_cache().load_full()
        && cached.endpoint == endpoint
    {
        return Ok(cached.api_version.clone());
    }

    let metadata = runtime.info().await.context_runtime_info()?;
    api_version_cache().store(Some(Arc::new(CachedApiVersion {
        endpoint: endpoint.to_string(),
        api_version: metadata.api_version.clone(),
    })));
    Ok(metadata.api_version)
}

/// Endpoint key used by `cached_api_version` - callers pass whatever
/// identifies the runtime socket/connection; the engine does not interpret
/// it beyond equality.
pub fn endpoint_key(project: &ProjectName) -> String {
    // The cache key doesn't need to be the project - one runtime endpoint
    // serves every project - but giving callers a ready-made stable key
    // avoids every call site inventing its own convention.
    format!("runtime:{project}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_key_is_stable_for_equal_inputs() {
        let project = ProjectName::new("demo").unwrap();
        assert_eq!(endpoint_key(&project), endpoint_key(&project));
    }
}
