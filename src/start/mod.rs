// ABOUTME: Start/wait/attach for one replica - hook execution, the four dependency wait
// ABOUTME: conditions, health polling, and the three attach rules.

use crate::config::{DependencyCondition, HealthcheckDecl, HookSpec};
use crate::error::{ContainerErrorExt, EngineError, ExecErrorExt, LogErrorExt, Result};
use crate::operation::{ContainerEvent, EventSink, LogStreamKind};
use crate::runtime::traits::{
    AttachOptions, ContainerOps, ContainerState, ExecConfig, ExecOps, HealthState, LogOptions, LogStream,
};
use crate::runtime::FullRuntime;
use crate::types::{ContainerId, ReplicaIndex, ServiceName};
use futures::StreamExt;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default polling interval for health/wait loops.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The two-byte escape Docker itself uses (`Ctrl-P Ctrl-Q`) to detach from
/// an attached container without stopping it.
pub const DETACH_SEQUENCE: [u8; 2] = [0x10, 0x11];

pub fn contains_detach_sequence(buf: &[u8]) -> bool {
    buf.windows(2).any(|w| w == DETACH_SEQUENCE)
}

/// `ContainerStart(id)`. A `pre_start` "filesystem prep step" has no
/// counterpart in this runtime's capability set - `post_start` (run via
/// `run_hook` after this returns) is the only hook this engine executes.
pub async fn start_replica(runtime: &dyn ContainerOps, id: &ContainerId) -> Result<()> {
    runtime.start_container(id).await.context_container()
}

/// Runs a `post_start`/`pre_stop` hook as `ContainerExec`; a nonzero exit
/// fails the service.
pub async fn run_hook(runtime: &dyn ExecOps, service: &ServiceName, id: &ContainerId, hook: &HookSpec) -> Result<()> {
    let config = ExecConfig {
        cmd: hook.command.clone(),
        user: hook.user.clone(),
        ..ExecConfig::default()
    };
    let result = runtime.exec(id, &config).await.context_exec()?;
    if result.exit_code != 0 {
        return Err(EngineError::dependency_failed(
            service.to_string(),
            format!("hook exited with code {}", result.exit_code),
        ));
    }
    Ok(())
}

/// `service_started`: return as soon as the container transitions to running.
pub async fn wait_started(
    runtime: &dyn ContainerOps,
    service: &ServiceName,
    id: &ContainerId,
    cancel: &CancellationToken,
    poll_interval: Duration,
) -> Result<()> {
    loop {
        if cancel.is_cancelled() {
            return Err(EngineError::timeout("cancelled while waiting for service to start"));
        }
        let info = runtime.inspect_container(id).await.context_container()?;
        match info.state {
            ContainerState::Running => return Ok(()),
            ContainerState::Exited | ContainerState::Dead => {
                return Err(EngineError::dependency_failed(
                    service.to_string(),
                    "container exited before becoming running",
                ));
            }
            _ => {}
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// `service_healthy`: poll `inspect.state.health.status` until `healthy` or
/// `unhealthy` (final) or the container exits.
pub async fn wait_healthy(
    runtime: &dyn ContainerOps,
    service: &ServiceName,
    id: &ContainerId,
    cancel: &CancellationToken,
    poll_interval: Duration,
    deadline: Option<Instant>,
) -> Result<()> {
    loop {
        if cancel.is_cancelled() {
            return Err(EngineError::timeout("cancelled while waiting for healthcheck"));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(EngineError::timeout(format!(
                "application not healthy after waiting for service {service}"
            )));
        }
        let info = runtime.inspect_container(id).await.context_container()?;
        match info.health {
            Some(HealthState::Healthy) => return Ok(()),
            Some(HealthState::Unhealthy) => {
                return Err(EngineError::healthcheck_failed(service.to_string(), "healthcheck reported unhealthy"));
            }
            _ => {}
        }
        if matches!(info.state, ContainerState::Exited | ContainerState::Dead) {
            return Err(EngineError::healthcheck_failed(
                service.to_string(),
                "container exited before becoming healthy",
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// `service_completed_successfully`: block until exit; exit code 0 satisfies.
pub async fn wait_completed_successfully(
    runtime: &dyn ContainerOps,
    service: &ServiceName,
    id: &ContainerId,
    cancel: &CancellationToken,
    poll_interval: Duration,
) -> Result<()> {
    loop {
        if cancel.is_cancelled() {
            return Err(EngineError::timeout("cancelled while waiting for completion"));
        }
        let info = runtime.inspect_container(id).await.context_container()?;
        if matches!(info.state, ContainerState::Exited | ContainerState::Dead) {
            return match info.exit_code {
                Some(0) => Ok(()),
                Some(code) => Err(EngineError::dependency_failed(service.to_string(), format!("exited with code {code}"))),
                None => Err(EngineError::dependency_failed(service.to_string(), "exited with unknown code")),
            };
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// `service_running_or_healthy`: healthy if a healthcheck is configured,
/// else started. An explicitly disabled healthcheck (`Test = ["NONE"]`)
/// falls back to started when `fallback_running` is set, else fails
/// `NoHealthcheck`.
pub async fn wait_running_or_healthy(
    runtime: &dyn ContainerOps,
    service: &ServiceName,
    id: &ContainerId,
    healthcheck: &Option<HealthcheckDecl>,
    fallback_running: bool,
    cancel: &CancellationToken,
    poll_interval: Duration,
    deadline: Option<Instant>,
) -> Result<()> {
    match healthcheck {
        Some(HealthcheckDecl::Configured(_)) => wait_healthy(runtime, service, id, cancel, poll_interval, deadline).await,
        Some(HealthcheckDecl::Disabled) => {
            if fallback_running {
                wait_started(runtime, service, id, cancel, poll_interval).await
            } else {
                Err(EngineError::no_healthcheck(service.to_string()))
            }
        }
        None => wait_started(runtime, service, id, cancel, poll_interval).await,
    }
}

/// Dispatches to the right wait implementation for a `depends_on` edge.
#[allow(clippy::too_many_arguments)]
pub async fn wait_condition(
    runtime: &dyn ContainerOps,
    service: &ServiceName,
    id: &ContainerId,
    condition: DependencyCondition,
    healthcheck: &Option<HealthcheckDecl>,
    fallback_running: bool,
    cancel: &CancellationToken,
    poll_interval: Duration,
    deadline: Option<Instant>,
) -> Result<()> {
    match condition {
        DependencyCondition::ServiceStarted => wait_started(runtime, service, id, cancel, poll_interval).await,
        DependencyCondition::ServiceHealthy => {
            wait_healthy(runtime, service, id, cancel, poll_interval, deadline).await
        }
        DependencyCondition::ServiceCompletedSuccessfully => {
            wait_completed_successfully(runtime, service, id, cancel, poll_interval).await
        }
        DependencyCondition::ServiceRunningOrHealthy => {
            wait_running_or_healthy(runtime, service, id, healthcheck, fallback_running, cancel, poll_interval, deadline).await
        }
    }
}

/// Attaches to a container's stdio and streams its output to `sink` until
/// EOF or cancellation, falling back to `ContainerLogs` when attach is
/// refused. Demultiplexing is the runtime's job: non-TTY
/// containers yield separately-tagged stdout/stderr lines, TTY containers
/// are copied through as a single raw stream tagged `Out`.
pub async fn attach_and_stream(
    runtime: &dyn FullRuntime,
    service: &ServiceName,
    index: ReplicaIndex,
    id: &ContainerId,
    tty: bool,
    sink: &dyn EventSink,
    cancel: &CancellationToken,
) -> Result<()> {
    sink.emit(ContainerEvent::Attach {
        service: service.clone(),
        index,
    });

    let opts = AttachOptions {
        stdin: true,
        stdout: true,
        stderr: true,
        tty,
    };

    let (mut stdin, mut output) = match runtime.attach_container(id, &opts).await {
        Ok(stream) => (Some(stream.stdin), stream.output),
        Err(_) => {
            let log_opts = LogOptions::follow_all();
            let stream = runtime.container_logs(id, &log_opts).await.context_log()?;
            (None, stream)
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Some(stdin) = stdin.as_mut() {
                    let _ = stdin.shutdown().await;
                }
                return Ok(());
            }
            next = output.next() => {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detach_sequence_found_inside_larger_buffer() {
        let buf = [b'a', b'b', 0x10, 0x11, b'c'];
        assert!(contains_detach_sequence(&buf));
    }

    #[test]
    fn detach_sequence_absent() {
        let buf = [b'a', b'b', b'c'];
        assert!(!contains_detach_sequence(&buf));
    }

    #[test]
    fn default_poll_interval_is_100ms() {
        assert_eq!(DEFAULT_POLL_INTERVAL, Duration::from_millis(100));
    }
}
