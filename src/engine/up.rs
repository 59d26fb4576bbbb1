// ABOUTME: Up - reconciles networks/volumes/configs/secrets, classifies every targeted service's
// ABOUTME: live containers against its declared state, and converges them in dependency order.

use super::{Engine, ImageProvisioner};
use crate::config::{Project, ServiceConfig};
use crate::convergence::{self, RecreateEntry};
use crate::diagnostics::{Diagnostics, Warning};
use crate::error::{ContainerErrorExt, NetworkErrorExt, Result};
use crate::graph::DependencyGraph;
use crate::hash;
use crate::label::{self, OneoffPolicy};
use crate::operation::{ContainerEvent, EventSink, StatusLevel, UpOptions};
use crate::reconcile;
use crate::runtime::traits::{ContainerOps, ContainerSummary, NetworkOps, ResourceKind};
use crate::runtime::FullRuntime;
use crate::start;
use crate::types::{ContainerId, NetworkAlias, NetworkId, ProjectName, ReplicaIndex, ServiceName};
use futures::future::BoxFuture;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Shared state for one `Up` call's convergence tasks. Built once in `run`
/// and `Arc`'d into every per-service task spawned by the graph scheduler.
struct UpContext<R: FullRuntime + 'static> {
    runtime: Arc<R>,
    image_provisioner: Arc<dyn ImageProvisioner>,
    sink: Arc<dyn EventSink>,
    project: Project,
    graph: DependencyGraph,
    network_ids: HashMap<String, NetworkId>,
    multi_network: bool,
    force_recreate: bool,
    no_recreate: bool,
    attach_to: BTreeSet<ServiceName>,
    cancel: CancellationToken,
    diagnostics: Mutex<Diagnostics>,
    attach_handles: Mutex<Vec<JoinHandle<()>>>,
}

pub(super) async fn run<R: FullRuntime + 'static>(
    engine: &Engine<R>,
    project: &Project,
    opts: UpOptions,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) -> Result<()> {
    let selected = engine.target_services(project, &opts.services)?;
    let full_graph = DependencyGraph::build(project)?;
    let scope = full_graph.transitive_dependencies(&selected);

    for name in &scope {
        let service = project
            .service(name)
            .expect("scope is drawn from project.services");
        label::validate_pinned_name(service)?;
    }

    engine.emit_status(sink.as_ref(), StatusLevel::Working, "reconciling networks, volumes and resources");

    let diagnostics = Mutex::new(Diagnostics::default());
    let network_ids = {
        let mut d = diagnostics.lock().await;
        reconcile::reconcile_networks_up(engine.runtime(), project, &mut d).await?
    };
    reconcile::reconcile_volumes_up(engine.runtime(), project).await?;
    reconcile::reconcile_resources_up(engine.runtime(), project, ResourceKind::Config).await?;
    reconcile::reconcile_resources_up(engine.runtime(), project, ResourceKind::Secret).await?;

    if opts.remove_orphans {
        remove_orphans(engine, project).await?;
    } else {
        let mut d = diagnostics.lock().await;
        warn_orphans(engine, project, &mut d).await?;
    }

    let endpoint = super::endpoint_key(&project.name);
    let api_version = super::cached_api_version(engine.runtime(), &endpoint).await?;
    let multi_network = convergence::supports_multi_network_at_create(&api_version);

    let scoped_project = subset_project(project, &scope);
    let scoped_graph = DependencyGraph::build(&scoped_project)?;

    let ctx = Arc::new(UpContext {
        runtime: Arc::clone(&engine.runtime),
        image_provisioner: Arc::clone(&engine.image_provisioner),
        sink: Arc::clone(&sink),
        project: scoped_project,
        graph: scoped_graph,
        network_ids,
        multi_network,
        force_recreate: opts.force_recreate,
        no_recreate: opts.no_recreate,
        attach_to: opts.attach_to.iter().cloned().collect(),
        cancel: cancel.clone(),
        diagnostics,
        attach_handles: Mutex::new(Vec::new()),
    });

    let task_ctx = Arc::clone(&ctx);
    let results = crate::graph::in_dependency_order(&ctx.graph, engine.max_concurrency, cancel.clone(), move |name| {
        let ctx = Arc::clone(&task_ctx);
        let name = name.clone();
        Box::pin(async move { converge_one(ctx, name).await }) as BoxFuture<'static, crate::graph::ServiceResult>
    })
    .await;

    for (name, outcome) in results {
        if let Err(err) = outcome {
            engine.emit_status(sink.as_ref(), StatusLevel::Error, format!("service {name} failed: {err}"));
            return Err(err);
        }
    }

    if opts.wait {
        engine.emit_status(sink.as_ref(), StatusLevel::Working, "waiting for services to become ready");
        let deadline = opts.wait_timeout.map(|d| Instant::now() + d);
        for name in &scope {
            let service = project.service(name).expect("scope service exists in project");
            let live = list_live(engine.runtime(), &project.name, name).await?;
            for container in &live {
                start::wait_running_or_healthy(
                    engine.runtime(),
                    name,
                    &container.id,
                    &service.healthcheck,
                    true,
                    &cancel,
                    start::DEFAULT_POLL_INTERVAL,
                    deadline,
                )
                .await?;
            }
        }
    }

    let handles = std::mem::take(&mut *ctx.attach_handles.lock().await);
    for handle in handles {
        let _ = handle.await;
    }

    engine.emit_status(sink.as_ref(), StatusLevel::Done, "up complete");
    Ok(())
}

/// Builds the scoped `Project` a transitive-closure `Up` actually converges,
/// carrying along the full set of declared networks/volumes/resources -
/// those are reconciled against the whole project regardless of scope.
fn subset_project(project: &Project, scope: &BTreeSet<ServiceName>) -> Project {
    Project {
        name: project.name.clone(),
        services: project
            .services
            .iter()
            .filter(|(name, _)| scope.contains(name))
            .map(|(name, service)| (name.clone(), service.clone()))
            .collect(),
        networks: project.networks.clone(),
        volumes: project.volumes.clone(),
        configs: project.configs.clone(),
        secrets: project.secrets.clone(),
        environment: project.environment.clone(),
    }
}

async fn warn_orphans<R: FullRuntime + 'static>(engine: &Engine<R>, project: &Project, diagnostics: &mut Diagnostics) -> Result<()> {
    let live = engine.live_containers(project, None, OneoffPolicy::ExcludeOneoff, true).await?;
    for orphan in convergence::find_orphans(project, &live) {
        let service = orphan.labels.get(label::LABEL_SERVICE).cloned().unwrap_or_default();
        diagnostics.warn(Warning::orphan_left(&service));
    }
    Ok(())
}

async fn remove_orphans<R: FullRuntime + 'static>(engine: &Engine<R>, project: &Project) -> Result<()> {
    let live = engine.live_containers(project, None, OneoffPolicy::ExcludeOneoff, true).await?;
    for orphan in convergence::find_orphans(project, &live) {
        let _ = engine.runtime().stop_container(&orphan.id, Duration::from_secs(10)).await;
        engine.runtime().remove_container(&orphan.id, true, false).await.context_container()?;
    }
    Ok(())
}

async fn list_live(runtime: &dyn ContainerOps, project: &ProjectName, service: &ServiceName) -> Result<Vec<ContainerSummary>> {
    let filters = label::container_filters(project, Some(service), OneoffPolicy::ExcludeOneoff, true);
    runtime.list_containers(&filters).await.context_container()
}

/// One service's unit of convergence work within the graph scheduler: wait
/// on required dependencies, resolve image/hash, classify against live
/// containers, then execute the resulting plan.
async fn converge_one<R: FullRuntime + 'static>(ctx: Arc<UpContext<R>>, name: ServiceName) -> Result<()> {
    let service = ctx
        .project
        .service(&name)
        .expect("converge_one only runs for services in the scoped project")
        .clone();

    wait_on_required_dependencies(&ctx, &service).await?;

    let live = list_live(ctx.runtime.as_ref(), &ctx.project.name, &name).await?;

    let image_digest = {
        let mut diagnostics = ctx.diagnostics.lock().await;
        super::image::ensure_image(ctx.runtime.as_ref(), ctx.image_provisioner.as_ref(), &service, &mut diagnostics).await?
    };
    let config_hash = hash::service_hash(&service).map_err(|e| crate::error::EngineError::config_missing(e.to_string()))?;

    let plan = convergence::classify_service(&service, &live, &config_hash, &image_digest, ctx.force_recreate, ctx.no_recreate);

    let live_index_by_id: HashMap<String, ReplicaIndex> = live
        .iter()
        .filter_map(|c| label::container_index(&c.labels).map(|i| (c.id.to_string(), i)))
        .collect();

    let mut current: Vec<(ContainerId, ReplicaIndex)> = Vec::new();

    for id in &plan.keep {
        if let Some(index) = live_index_by_id.get(id) {
            current.push((ContainerId::new(id.clone()), *index));
        }
    }

    for old_id in &plan.scale_down {
        scale_down_one(ctx.runtime.as_ref(), old_id).await?;
    }

    for entry in &plan.recreate {
        let (new_id, index) = recreate_one(&ctx, &service, entry, &image_digest).await?;
        current.push((new_id, index));
    }

    for idx in &plan.scale_up {
        let (new_id, index) = create_and_start_replica(&ctx, &service, *idx, &image_digest, None).await?;
        current.push((new_id, index));
    }

    if ctx.attach_to.contains(&name) {
        for (id, index) in current {
            spawn_attach(&ctx, &name, index, id, service.tty).await;
        }
    }

    Ok(())
}

/// Waits on every required `depends_on` edge of `service`, re-querying each
/// dependency's live containers fresh since the dependency's own task may
/// have just converged them. Non-required edges are
/// fire-and-forget and gate nothing here, mirroring the graph scheduler.
async fn wait_on_required_dependencies<R: FullRuntime + 'static>(ctx: &Arc<UpContext<R>>, service: &ServiceConfig) -> Result<()> {
    for dep_name in ctx.graph.required_dependencies(&service.name) {
        let Some(spec) = service.depends_on.get(&dep_name) else {
            continue;
        };
        let spec = *spec;
        let healthcheck = ctx.project.service(&dep_name).and_then(|s| s.healthcheck.clone());
        let dep_live = list_live(ctx.runtime.as_ref(), &ctx.project.name, &dep_name).await?;
        for container in &dep_live {
            start::wait_condition(
                ctx.runtime.as_ref(),
                &dep_name,
                &container.id,
                spec.condition,
                &healthcheck,
                true,
                &ctx.cancel,
                start::DEFAULT_POLL_INTERVAL,
                None,
            )
            .await?;
        }
    }
    Ok(())
}

async fn scale_down_one(runtime: &dyn ContainerOps, old_id: &str) -> Result<()> {
    let id = ContainerId::new(old_id.to_string());
    runtime.stop_container(&id, Duration::from_secs(10)).await.context_container()?;
    runtime.remove_container(&id, false, false).await.context_container()?;
    Ok(())
}

/// Creates, connects and starts one replica, runs its `post_start` hook, and
/// (when replacing an old container) stamps the `replace` label so the hook
/// and any event translation downstream can correlate the two.
async fn create_and_start_replica<R: FullRuntime + 'static>(
    ctx: &Arc<UpContext<R>>,
    service: &ServiceConfig,
    index: ReplicaIndex,
    image_digest: &str,
    replace: Option<&str>,
) -> Result<(ContainerId, ReplicaIndex)> {
    let (mut config, deferred) =
        convergence::build_container_spec(&ctx.project, service, index, image_digest, &ctx.network_ids, false)?;
    if let Some(old_id) = replace {
        config.labels.insert(label::LABEL_REPLACE.to_string(), old_id.to_string());
    }

    let id = ctx.runtime.create_container(&config).await.context_container()?;

    // Below API 1.44 bollard/the daemon only accepts one network at create
    // time; the rest are connected after start instead of before.
    if ctx.multi_network {
        connect_networks(ctx.runtime.as_ref(), &id, &deferred).await?;
        start::start_replica(ctx.runtime.as_ref(), &id).await?;
    } else {
        start::start_replica(ctx.runtime.as_ref(), &id).await?;
        connect_networks(ctx.runtime.as_ref(), &id, &deferred).await?;
    }

    start::wait_started(ctx.runtime.as_ref(), &service.name, &id, &ctx.cancel, start::DEFAULT_POLL_INTERVAL).await?;

    if let Some(hook) = &service.hooks.post_start {
        ctx.sink.emit(ContainerEvent::Hook {
            service: service.name.clone(),
            line: hook.command.join(" "),
        });
        start::run_hook(ctx.runtime.as_ref(), &service.name, &id, hook).await?;
    }

    Ok((id, index))
}

async fn connect_networks(
    runtime: &dyn NetworkOps,
    id: &ContainerId,
    deferred: &[(NetworkId, Vec<NetworkAlias>)],
) -> Result<()> {
    for (network_id, aliases) in deferred {
        runtime.connect_to_network(id, network_id, aliases).await.context_network()?;
    }
    Ok(())
}

/// Creates and starts the replacement container, then stops and removes the
/// old one. A failure stopping/removing the old container is non-fatal
/// (both old and new remain rather than leaving the service
/// with no running replica at all) - it is recorded as a warning instead.
async fn recreate_one<R: FullRuntime + 'static>(
    ctx: &Arc<UpContext<R>>,
    service: &ServiceConfig,
    entry: &RecreateEntry,
    image_digest: &str,
) -> Result<(ContainerId, ReplicaIndex)> {
    let (new_id, index) = create_and_start_replica(ctx, service, entry.index, image_digest, Some(&entry.old_id)).await?;

    let old_id = ContainerId::new(entry.old_id.clone());
    let stop_timeout = service.stop_grace_period.unwrap_or(Duration::from_secs(10));
    if let Err(e) = ctx.runtime.stop_container(&old_id, stop_timeout).await {
        ctx.diagnostics
            .lock()
            .await
            .warn(Warning::recreate_aborted(service.name.as_str(), e.to_string()));
        return Ok((new_id, index));
    }
    if let Err(e) = ctx.runtime.remove_container(&old_id, false, false).await {
        ctx.diagnostics
            .lock()
            .await
            .warn(Warning::recreate_aborted(service.name.as_str(), e.to_string()));
        return Ok((new_id, index));
    }

    ctx.sink.emit(ContainerEvent::Recreated {
        service: service.name.clone(),
        old_id: entry.old_id.clone(),
        new_id: new_id.to_string(),
    });

    Ok((new_id, index))
}

/// Spawns a detached attach task so streaming a service's stdio can never
/// stall the graph scheduler's dependents (attach is a
/// side-channel, not part of the completion condition a dependent waits
/// on). Its `JoinHandle` is collected so `run` can await it after the whole
/// traversal (and any `--wait` pass) completes.
async fn spawn_attach<R: FullRuntime + 'static>(ctx: &Arc<UpContext<R>>, service: &ServiceName, index: ReplicaIndex, id: ContainerId, tty: bool) {
    let task_ctx = Arc::clone(ctx);
    let service = service.clone();
    let cancel = ctx.cancel.clone();
    let handle = tokio::spawn(async move {
        if let Err(e) = start::attach_and_stream(task_ctx.runtime.as_ref(), &service, index, &id, tty, task_ctx.sink.as_ref(), &cancel).await {
            tracing::warn!(service = %service, error = %e, "attach stream ended with an error");
        }
    });
    ctx.attach_handles.lock().await.push(handle);
}
