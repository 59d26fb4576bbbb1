// ABOUTME: External interface - the Operation enum and its per-variant options.
// ABOUTME: Represented as small closed enums, one option struct per operation.

use crate::types::{ReplicaIndex, ServiceName};
use std::time::{Duration, SystemTime};

/// The engine's single entry point's argument: which top-level operation to
/// run and its options.
#[derive(Debug, Clone)]
pub enum Operation {
    Up(UpOptions),
    Down(DownOptions),
    Start(ServiceScopedOptions),
    Stop(StopOptions),
    Restart(StopOptions),
    Kill(KillOptions),
    Remove(RemoveOptions),
    Ps(PsOptions),
    Logs(LogsOptions),
    Wait(WaitOptions),
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Default)]
pub struct UpOptions {
    pub services: Option<Vec<ServiceName>>,
    pub build: bool,
    pub quiet_pull: bool,
    pub force_recreate: bool,
    pub no_recreate: bool,
    pub remove_orphans: bool,
    pub wait: bool,
    pub wait_timeout: Option<Duration>,
    pub attach_to: Vec<ServiceName>,
    pub inherit: bool,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagesPolicy {
    None,
    Local,
    All,
}

#[derive(Debug, Clone)]
pub struct DownOptions {
    pub remove_orphans: bool,
    pub volumes: bool,
    pub images: ImagesPolicy,
    pub timeout: Duration,
    pub services: Option<Vec<ServiceName>>,
}

impl Default for DownOptions {
    fn default() -> Self {
        Self {
            remove_orphans: false,
            volumes: false,
            images: ImagesPolicy::None,
            timeout: default_timeout(),
            services: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceScopedOptions {
    pub services: Option<Vec<ServiceName>>,
}

#[derive(Debug, Clone)]
pub struct StopOptions {
    pub services: Option<Vec<ServiceName>>,
    pub timeout: Duration,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            services: None,
            timeout: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct KillOptions {
    pub services: Option<Vec<ServiceName>>,
    pub signal: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    pub services: Option<Vec<ServiceName>>,
    pub force: bool,
    pub volumes: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PsOptions {
    pub services: Option<Vec<ServiceName>>,
    pub all: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LogsOptions {
    pub services: Option<Vec<ServiceName>>,
    pub follow: bool,
    pub tail: Option<u64>,
    pub since: Option<SystemTime>,
    pub until: Option<SystemTime>,
    pub timestamps: bool,
    pub index: Option<ReplicaIndex>,
}

#[derive(Debug, Clone, Default)]
pub struct WaitOptions {
    pub services: Option<Vec<ServiceName>>,
    pub down_project_on_container_exit: bool,
}

/// Events emitted to the caller's sink. Emission is serialized
/// (single-writer) - the sink is whatever the caller passes, this
/// type just fixes the vocabulary.
#[derive(Debug, Clone)]
pub enum ContainerEvent {
    Attach {
        service: ServiceName,
        index: ReplicaIndex,
    },
    Log {
        service: ServiceName,
        index: ReplicaIndex,
        line: String,
        stream: LogStreamKind,
    },
    Exit {
        service: ServiceName,
        index: ReplicaIndex,
        exit_code: i64,
        restarting: bool,
    },
    Stopped {
        service: ServiceName,
        index: ReplicaIndex,
    },
    Recreated {
        service: ServiceName,
        old_id: String,
        new_id: String,
    },
    Restarted {
        service: ServiceName,
        index: ReplicaIndex,
    },
    Hook {
        service: ServiceName,
        line: String,
    },
    Status {
        level: StatusLevel,
        text: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStreamKind {
    Out,
    Err,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Working,
    Done,
    Error,
}

/// A sink for `ContainerEvent`s. The engine never assumes anything about
/// delivery beyond "called in emission order, once per event" - callers
/// implement this over a channel, a `Vec`, a terminal renderer, whatever.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ContainerEvent);
}

/// An in-memory sink used by tests and the smoke-test CLI.
#[derive(Default)]
pub struct CollectingSink {
    events: std::sync::Mutex<Vec<ContainerEvent>>,
}

impl EventSink for CollectingSink {
    fn emit(&self, event: ContainerEvent) {
        self.events.lock().expect("event sink mutex poisoned").push(event);
    }
}

impl CollectingSink {
    pub fn take(&self) -> Vec<ContainerEvent> {
        std::mem::take(&mut *self.events.lock().expect("event sink mutex poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_sink_records_in_order() {
        let sink = CollectingSink::default();
        sink.emit(ContainerEvent::Status {
            level: StatusLevel::Working,
            text: "a".to_string(),
        });
        sink.emit(ContainerEvent::Status {
            level: StatusLevel::Done,
            text: "b".to_string(),
        });
        let events = sink.take();
        assert_eq!(events.len(), 2);
        assert!(sink.take().is_empty());
    }
}
