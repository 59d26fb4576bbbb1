// ABOUTME: Start/Stop/Restart/Kill/Remove - the scoped, non-converging lifecycle operations that
// ABOUTME: act on a project's already-created containers without planning or recreating anything.

use super::Engine;
use crate::config::Project;
use crate::diagnostics::{Diagnostics, Warning};
use crate::error::{ContainerErrorExt, Result};
use crate::graph::{DependencyGraph, ServiceResult};
use crate::label::{self, OneoffPolicy};
use crate::operation::{ContainerEvent, EventSink, KillOptions, RemoveOptions, ServiceScopedOptions, StopOptions};
use crate::runtime::traits::{ContainerOps, ContainerState, ContainerSummary};
use crate::runtime::FullRuntime;
use crate::start;
use crate::types::ServiceName;
use futures::future::BoxFuture;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

fn scope_of(project: &Project, services: &Option<Vec<ServiceName>>) -> BTreeSet<ServiceName> {
    match services {
        None => project.services.keys().cloned().collect(),
        Some(names) => names.iter().cloned().collect(),
    }
}

async fn live_of(runtime: &dyn ContainerOps, project: &Project, name: &ServiceName) -> Result<Vec<ContainerSummary>> {
    let filters = label::container_filters(&project.name, Some(name), OneoffPolicy::ExcludeOneoff, true);
    runtime.list_containers(&filters).await.context_container()
}

/// `ContainerStart` on every not-already-running container of the scoped
/// services, in dependency order (a `Start` waits on the
/// same required `depends_on` conditions an `Up` would, since a dependency
/// might itself still be starting).
pub(super) async fn start<R: FullRuntime + 'static>(
    engine: &Engine<R>,
    project: &Project,
    opts: ServiceScopedOptions,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) -> Result<()> {
    let scope = scope_of(project, &opts.services);
    let graph = DependencyGraph::build(project)?;

    let runtime = Arc::clone(&engine.runtime);
    let project = Arc::new(project.clone());
    let sink = Arc::clone(&sink);

    let results = crate::graph::in_dependency_order(&graph, engine.max_concurrency, cancel.clone(), {
        let scope = scope.clone();
        let graph = Arc::new(graph.clone());
        move |name| {
            let name = name.clone();
            let runtime = Arc::clone(&runtime);
            let project = Arc::clone(&project);
            let scope = scope.clone();
            let graph = Arc::clone(&graph);
            let cancel = cancel.clone();
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                if scope.contains(&name) {
                    start_one_service(runtime.as_ref(), &project, &graph, &name, &cancel, sink.as_ref()).await?;
                }
                Ok(())
            }) as BoxFuture<'static, ServiceResult>
        }
    })
    .await;

    first_error(results)
}

async fn start_one_service(
    runtime: &dyn FullRuntime,
    project: &Project,
    graph: &DependencyGraph,
    name: &ServiceName,
    cancel: &CancellationToken,
    sink: &dyn EventSink,
) -> Result<()> {
    let Some(service) = project.service(name) else {
        return Ok(());
    };

    for dep_name in graph.required_dependencies(name) {
        let Some(spec) = service.depends_on.get(&dep_name) else {
            continue;
        };
        let spec = *spec;
        let healthcheck = project.service(&dep_name).and_then(|s| s.healthcheck.clone());
        for container in live_of(runtime, project, &dep_name).await? {
            start::wait_condition(
                runtime,
                &dep_name,
                &container.id,
                spec.condition,
                &healthcheck,
                true,
                cancel,
                start::DEFAULT_POLL_INTERVAL,
                None,
            )
            .await?;
        }
    }

    let post_start = service.hooks.post_start.clone();
    for container in live_of(runtime, project, name).await? {
        let info = runtime.inspect_container(&container.id).await.context_container()?;
        if info.state == ContainerState::Running {
            continue;
        }
        start::start_replica(runtime, &container.id).await?;
        if let Some(hook) = &post_start {
            start::run_hook(runtime, name, &container.id, hook).await?;
        }
        if let Some(index) = label::container_index(&container.labels) {
            sink.emit(ContainerEvent::Restarted {
                service: name.clone(),
                index,
            });
        }
    }
    Ok(())
}

/// `ContainerStop` on every live container of the scoped services, in
/// reverse dependency order, running each service's `pre_stop` hook first
/// Best-effort per service - a single container's error
/// is recorded as a diagnostics warning rather than aborting the others.
pub(super) async fn stop<R: FullRuntime + 'static>(
    engine: &Engine<R>,
    project: &Project,
    opts: StopOptions,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) -> Result<()> {
    let scope = scope_of(project, &opts.services);
    let graph = DependencyGraph::build(project)?;
    let diagnostics = Arc::new(Mutex::new(Diagnostics::default()));

    let runtime = Arc::clone(&engine.runtime);
    let project = Arc::new(project.clone());
    let sink = Arc::clone(&sink);

    let _: std::collections::BTreeMap<ServiceName, ServiceResult> = crate::graph::in_reverse_dependency_order(
        &graph,
        engine.max_concurrency,
        cancel,
        {
            let scope = scope.clone();
            let diagnostics = Arc::clone(&diagnostics);
            move |name| {
                let name = name.clone();
                let runtime = Arc::clone(&runtime);
                let project = Arc::clone(&project);
                let scope = scope.clone();
                let diagnostics = Arc::clone(&diagnostics);
                let sink = Arc::clone(&sink);
                Box::pin(async move {
                    if scope.contains(&name) {
                        stop_one_service(runtime.as_ref(), &project, &name, opts.timeout, &diagnostics, sink.as_ref()).await;
                    }
                    Ok(())
                }) as BoxFuture<'static, ServiceResult>
            }
        },
    )
    .await;

    Ok(())
}

async fn stop_one_service(
    runtime: &dyn FullRuntime,
    project: &Project,
    name: &ServiceName,
    timeout: std::time::Duration,
    diagnostics: &Mutex<Diagnostics>,
    sink: &dyn EventSink,
) {
    let live = match live_of(runtime, project, name).await {
        Ok(containers) => containers,
        Err(e) => {
            diagnostics.lock().await.warn(Warning::recreate_aborted(name.as_str(), e.to_string()));
            return;
        }
    };

    let pre_stop = project.service(name).and_then(|s| s.hooks.pre_stop.clone());

    for container in live {
        let Some(index) = label::container_index(&container.labels) else {
            continue;
        };

        if let Some(hook) = &pre_stop
            && let Err(e) = start::run_hook(runtime, name, &container.id, hook).await
        {
            diagnostics.lock().await.warn(Warning::recreate_aborted(name.as_str(), e.to_string()));
        }

        if let Err(e) = runtime.stop_container(&container.id, timeout).await {
            diagnostics.lock().await.warn(Warning::recreate_aborted(name.as_str(), e.to_string()));
            continue;
        }
        sink.emit(ContainerEvent::Stopped {
            service: name.clone(),
            index,
        });
    }
}

/// Stop, then start: a bounded two-phase operation rather than a watched
/// one - unlike `Up`'s recreate path this never replaces a container's
/// identity, so it reports completion directly instead of going through the
/// event bus's restart-count bookkeeping (restarts *caused
/// by the runtime*, e.g. a restart policy; this is the operator-invoked
/// equivalent over the same containers).
pub(super) async fn restart<R: FullRuntime + 'static>(
    engine: &Engine<R>,
    project: &Project,
    opts: StopOptions,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) -> Result<()> {
    stop(engine, project, opts.clone(), Arc::clone(&sink), cancel.clone()).await?;
    start(
        engine,
        project,
        ServiceScopedOptions {
            services: opts.services,
        },
        sink,
        cancel,
    )
    .await
}

/// `ContainerKill(id, signal)` against every live container of the scoped
/// services - immediate, unordered: killing does not wait on
/// dependents the way a graceful stop does.
pub(super) async fn kill<R: FullRuntime + 'static>(engine: &Engine<R>, project: &Project, opts: KillOptions) -> Result<()> {
    let scope = scope_of(project, &opts.services);
    for name in &scope {
        let live = live_of(engine.runtime(), project, name).await?;
        for container in live {
            engine
                .runtime()
                .kill_container(&container.id, opts.signal.as_deref())
                .await
                .context_container()?;
        }
    }
    Ok(())
}

/// `ContainerRemove(id, {force, volumes})` against every container of the
/// scoped services, including stopped ones. A still-running
/// container is only removed when `force` is set; otherwise it is left
/// alone and its removal is skipped rather than failing the whole call.
pub(super) async fn remove<R: FullRuntime + 'static>(engine: &Engine<R>, project: &Project, opts: RemoveOptions) -> Result<()> {
    let scope = scope_of(project, &opts.services);
    for name in &scope {
        let filters = label::container_filters(&project.name, Some(name), OneoffPolicy::ExcludeOneoff, true);
        let live = engine.runtime().list_containers(&filters).await.context_container()?;
        for container in live {
            let info = engine.runtime().inspect_container(&container.id).await.context_container()?;
            if info.state == ContainerState::Running && !opts.force {
                continue;
            }
            engine
                .runtime()
                .remove_container(&container.id, opts.force, opts.volumes)
                .await
                .context_container()?;
        }
    }
    Ok(())
}

fn first_error(results: std::collections::BTreeMap<ServiceName, ServiceResult>) -> Result<()> {
    for result in results.into_values() {
        result?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::types::ServiceName;
    use std::collections::BTreeMap;

    fn service(name: &str) -> ServiceConfig {
        ServiceConfig {
            name: ServiceName::new(name).unwrap(),
            image: "img".to_string(),
            build: None,
            command: None,
            entrypoint: None,
            environment: BTreeMap::new(),
            env_file: Vec::new(),
            ports: Vec::new(),
            volumes: Vec::new(),
            networks: BTreeMap::new(),
            depends_on: BTreeMap::new(),
            restart: crate::runtime::RestartPolicyConfig::default(),
            scale: 1,
            healthcheck: None,
            labels: BTreeMap::new(),
            platform: None,
            tty: false,
            pull_policy: crate::config::PullPolicy::default(),
            profiles: Vec::new(),
            hooks: crate::config::ServiceHooks::default(),
            extensions: BTreeMap::new(),
            container_name: None,
            configs: Vec::new(),
            secrets: Vec::new(),
            stop_grace_period: None,
            stop_signal: None,
        }
    }

    fn project(services: Vec<ServiceConfig>) -> Project {
        let mut map = BTreeMap::new();
        for s in services {
            map.insert(s.name.clone(), s);
        }
        Project {
            name: crate::types::ProjectName::new("demo").unwrap(),
            services: map,
            networks: BTreeMap::new(),
            volumes: BTreeMap::new(),
            configs: BTreeMap::new(),
            secrets: BTreeMap::new(),
            environment: BTreeMap::new(),
        }
    }

    #[test]
    fn scope_of_defaults_to_every_declared_service() {
        let project = project(vec![service("a"), service("b")]);
        let resolved = scope_of(&project, &None);
        assert_eq!(
            resolved,
            BTreeSet::from([ServiceName::new("a").unwrap(), ServiceName::new("b").unwrap()])
        );
    }

    #[test]
    fn scope_of_honors_explicit_selection() {
        let project = project(vec![service("a"), service("b")]);
        let resolved = scope_of(&project, &Some(vec![ServiceName::new("a").unwrap()]));
        assert_eq!(resolved, BTreeSet::from([ServiceName::new("a").unwrap()]));
    }

    #[test]
    fn first_error_surfaces_any_failing_service() {
        let mut results = std::collections::BTreeMap::new();
        results.insert(ServiceName::new("a").unwrap(), Ok(()));
        results.insert(
            ServiceName::new("b").unwrap(),
            Err(crate::error::EngineError::no_healthcheck("b")),
        );
        assert!(first_error(results).is_err());
    }

    #[test]
    fn first_error_ok_when_all_succeed() {
        let mut results = std::collections::BTreeMap::new();
        results.insert(ServiceName::new("a").unwrap(), Ok(()));
        assert!(first_error(results).is_ok());
    }
}
