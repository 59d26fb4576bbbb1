// ABOUTME: Read-only and blocking operations over live containers - ps, logs, and wait for exit,
// ABOUTME: The event bus's event-driven completion condition, reused for `logs --follow` and `wait`.

use super::Engine;
use crate::config::Project;
use crate::error::{LogErrorExt, Result};
use crate::events::Watcher;
use crate::label::{self, OneoffPolicy};
use crate::operation::{ContainerEvent, EventSink, LogStreamKind, LogsOptions, PsOptions, WaitOptions};
use crate::runtime::traits::{ContainerSummary, LogOps, LogOptions, LogStream};
use crate::runtime::FullRuntime;
use crate::types::{ContainerId, ReplicaIndex, ServiceName};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Outcome of one watched container exiting while a `Wait` operation was in
/// progress.
#[derive(Debug, Clone)]
pub struct ServiceWaitOutcome {
    pub service: ServiceName,
    pub index: ReplicaIndex,
    pub exit_code: i64,
}

pub(super) async fn ps<R: FullRuntime + 'static>(engine: &Engine<R>, project: &Project, opts: PsOptions) -> Result<Vec<ContainerSummary>> {
    let services = engine.target_services(project, &opts.services)?;
    let mut containers = Vec::new();
    for name in &services {
        containers.extend(engine.live_containers(project, Some(name), OneoffPolicy::Any, opts.all).await?);
    }
    Ok(containers)
}

pub(super) async fn logs<R: FullRuntime + 'static>(
    engine: &Engine<R>,
    project: &Project,
    opts: LogsOptions,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) -> Result<()> {
    let services = engine.target_services(project, &opts.services)?;
    let log_opts = build_log_options(&opts);

    let mut handles = Vec::new();
    for name in &services {
        let live = engine.live_containers(project, Some(name), OneoffPolicy::ExcludeOneoff, true).await?;
        for container in live {
            let Some(index) = label::container_index(&container.labels) else {
                continue;
            };
            if let Some(wanted) = opts.index
                && wanted != index
            {
                continue;
            }

            let runtime = Arc::clone(&engine.runtime);
            let sink = Arc::clone(&sink);
            let cancel = cancel.clone();
            let service = name.clone();
            let log_opts = log_opts.clone();
            handles.push(tokio::spawn(async move {
                let _ = stream_logs(runtime.as_ref(), &service, index, &container.id, &log_opts, sink.as_ref(), &cancel).await;
            }));
        }
    }

    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

fn build_log_options(opts: &LogsOptions) -> LogOptions {
    LogOptions {
        stdout: true,
        stderr: true,
        follow: opts.follow,
        timestamps: opts.timestamps,
        tail: opts.tail,
        since: opts.since,
        until: opts.until,
    }
}

async fn stream_logs(
    runtime: &dyn LogOps,
    service: &ServiceName,
    index: ReplicaIndex,
    id: &ContainerId,
    opts: &LogOptions,
    sink: &dyn EventSink,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut stream = runtime.container_logs(id, opts).await.context_log()?;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = stream.next() => {
                match next {
                    Some(Ok(line)) => {
                        let stream_kind = match line.stream {
                            LogStream::Stdout => LogStreamKind::Out,
                            LogStream::Stderr => LogStreamKind::Err,
                        };
                        sink.emit(ContainerEvent::Log {
                            service: service.clone(),
                            index,
                            line: line.content,
                            stream: stream_kind,
                        });
                    }
                    Some(Err(_)) | None => return Ok(()),
                }
            }
        }
    }
}

/// Watches every live container of the scoped services until all of them
/// have exited, emitting translated `ContainerEvent`s along the
/// way and optionally triggering a `Down` on the first exit.
pub(super) async fn wait<R: FullRuntime + 'static>(
    engine: &Engine<R>,
    project: &Project,
    opts: WaitOptions,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) -> Result<Vec<ServiceWaitOutcome>> {
    let services = engine.target_services(project, &opts.services)?;

    let outcomes: Arc<Mutex<Vec<ServiceWaitOutcome>>> = Arc::new(Mutex::new(Vec::new()));
    let recording_sink = Arc::new(ExitRecordingSink {
        inner: Arc::clone(&sink),
        outcomes: Arc::clone(&outcomes),
    });

    let mut watcher = Watcher::new();
    for name in &services {
        let live = engine.live_containers(project, Some(name), OneoffPolicy::ExcludeOneoff, true).await?;
        for container in live {
            let Some(index) = label::container_index(&container.labels) else {
                continue;
            };
            watcher.track(container.id, name.clone(), index, true);
        }
    }

    watcher.run(engine.runtime(), &project.name, recording_sink.as_ref(), &cancel).await?;

    let outcomes = std::mem::take(&mut *outcomes.lock().expect("outcomes mutex poisoned"));

    if opts.down_project_on_container_exit && !outcomes.is_empty() {
        let down_opts = crate::operation::DownOptions {
            services: opts.services.clone(),
            ..Default::default()
        };
        super::down::run(engine, project, down_opts, Arc::clone(&sink), cancel).await;
    }

    Ok(outcomes)
}

/// Forwards every event to the caller's sink while separately recording
/// non-restarting `Exit` events - `Watcher` only knows how to emit events,
/// this is the one place that needs to know *which* container exited.
struct ExitRecordingSink {
    inner: Arc<dyn EventSink>,
    outcomes: Arc<Mutex<Vec<ServiceWaitOutcome>>>,
}

impl EventSink for ExitRecordingSink {
    fn emit(&self, event: ContainerEvent) {
        if let ContainerEvent::Exit {
            service,
            index,
            exit_code,
            restarting,
        } = &event
            && !restarting
        {
            self.outcomes.lock().expect("outcomes mutex poisoned").push(ServiceWaitOutcome {
                service: service.clone(),
                index: *index,
                exit_code: *exit_code,
            });
        }
        self.inner.emit(event);
    }
}
