// ABOUTME: Down - reverse-dependency-order teardown of a project's (or a scoped subset's)
// ABOUTME: containers, with project-wide infra/image cleanup only when the whole project is torn down.

use super::Engine;
use crate::config::Project;
use crate::diagnostics::{Diagnostics, Warning};
use crate::graph::{DependencyGraph, ServiceResult};
use crate::label::{self, OneoffPolicy};
use crate::operation::{ContainerEvent, DownOptions, EventSink, ImagesPolicy, StatusLevel};
use crate::reconcile;
use crate::runtime::traits::{ContainerOps, ImageOps, ResourceKind};
use crate::runtime::FullRuntime;
use crate::start;
use crate::types::{ContainerId, ImageRef, ServiceName};
use futures::future::BoxFuture;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Tears down `project` per `opts`. Best-effort by design (a
/// `Down` does not fail outright on a single service's teardown error) -
/// every failure is recorded as a diagnostics warning instead of propagated.
pub(super) async fn run<R: FullRuntime + 'static>(
    engine: &Engine<R>,
    project: &Project,
    opts: DownOptions,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) {
    engine.emit_status(sink.as_ref(), StatusLevel::Working, "stopping and removing containers");

    let scope = match &opts.services {
        None => project.services.keys().cloned().collect::<BTreeSet<_>>(),
        Some(names) => names.iter().cloned().collect(),
    };
    let whole_project = opts.services.is_none();

    let diagnostics = Arc::new(Mutex::new(Diagnostics::default()));

    let graph = match DependencyGraph::build(project) {
        Ok(g) => g,
        Err(e) => {
            diagnostics.lock().await.warn(Warning::recreate_aborted("<graph>", e.to_string()));
            return;
        }
    };

    let runtime = Arc::clone(&engine.runtime);
    let project_name = project.name.clone();
    let project_for_task = project.clone();
    let scope_for_task = scope.clone();
    let diagnostics_for_task = Arc::clone(&diagnostics);
    let sink_for_task = Arc::clone(&sink);
    let timeout = opts.timeout;

    let _: std::collections::BTreeMap<ServiceName, ServiceResult> = crate::graph::in_reverse_dependency_order(
        &graph,
        engine.max_concurrency,
        cancel.clone(),
        move |name| {
            let name = name.clone();
            let runtime = Arc::clone(&runtime);
            let project = project_for_task.clone();
            let project_name = project_name.clone();
            let scope = scope_for_task.clone();
            let diagnostics = Arc::clone(&diagnostics_for_task);
            let sink = Arc::clone(&sink_for_task);
            Box::pin(async move {
                if scope.contains(&name) {
                    stop_and_remove_service(runtime.as_ref(), &project_name, &project, &name, timeout, &diagnostics, sink.as_ref()).await;
                }
                Ok(())
            }) as BoxFuture<'static, ServiceResult>
        },
    )
    .await;

    if opts.remove_orphans {
        remove_orphans(engine, project).await;
    }

    if whole_project {
        let mut d = diagnostics.lock().await;
        reconcile::reconcile_networks_down(engine.runtime(), project, &mut d).await;
        if opts.volumes {
            reconcile::reconcile_volumes_down(engine.runtime(), project, &mut d).await;
        }
        reconcile::reconcile_resources_down(engine.runtime(), project, ResourceKind::Config, &mut d).await;
        reconcile::reconcile_resources_down(engine.runtime(), project, ResourceKind::Secret, &mut d).await;
    }

    if opts.images != ImagesPolicy::None {
        remove_images(engine, project, &scope, opts.images).await;
    }

    engine.emit_status(sink.as_ref(), StatusLevel::Done, "down complete");
}

#[allow(clippy::too_many_arguments)]
async fn stop_and_remove_service(
    runtime: &dyn FullRuntime,
    project_name: &crate::types::ProjectName,
    project: &Project,
    name: &ServiceName,
    timeout: std::time::Duration,
    diagnostics: &Mutex<Diagnostics>,
    sink: &dyn EventSink,
) {
    let filters = label::container_filters(project_name, Some(name), OneoffPolicy::ExcludeOneoff, true);
    let live = match runtime.list_containers(&filters).await {
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

        if let Err(e) = runtime.remove_container(&container.id, false, false).await {
            diagnostics.lock().await.warn(Warning::recreate_aborted(name.as_str(), e.to_string()));
        }
    }
}

async fn remove_orphans<R: FullRuntime + 'static>(engine: &Engine<R>, project: &Project) {
    let Ok(live) = engine.live_containers(project, None, OneoffPolicy::ExcludeOneoff, true).await else {
        return;
    };
    for orphan in crate::convergence::find_orphans(project, &live) {
        let _ = engine.runtime().stop_container(&orphan.id, std::time::Duration::from_secs(10)).await;
        let _: Result<(), _> = engine.runtime().remove_container(&orphan.id, true, false).await;
    }
}

async fn remove_images<R: FullRuntime + 'static>(engine: &Engine<R>, project: &Project, scope: &BTreeSet<ServiceName>, policy: ImagesPolicy) {
    for name in scope {
        let Some(service) = project.service(name) else { continue };
        if policy == ImagesPolicy::Local && service.build.is_none() {
            continue;
        }
        let Ok(reference) = ImageRef::parse(&service.image) else { continue };
        let runtime: &dyn ImageOps = engine.runtime();
        let _ = runtime.remove_image(&reference, false).await;
    }
}
