// ABOUTME: Event bus watcher - tracks watched[id] -> restartCount, translates runtime events
// ABOUTME: into ContainerEvents, stops once every required id has drained.

use crate::label;
use crate::operation::{ContainerEvent, EventSink};
use crate::runtime::traits::{ContainerState, EventFilters, RuntimeEvent};
use crate::runtime::FullRuntime;
use crate::types::{ContainerId, ProjectName, ReplicaIndex, ServiceName};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;

struct WatchEntry {
    service: ServiceName,
    index: ReplicaIndex,
    restart_count: u32,
}

/// Tracks every managed container the current operation cares about and
/// decides when the operation is done: once every *required* id has
/// drained out of `watched` (by a non-restarting `die` or a `destroy`).
pub struct Watcher {
    watched: HashMap<ContainerId, WatchEntry>,
    required: HashSet<ContainerId>,
}

impl Default for Watcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Watcher {
    pub fn new() -> Self {
        Self {
            watched: HashMap::new(),
            required: HashSet::new(),
        }
    }

    /// Begin watching `id`. `required` marks it as counting toward the
    /// watcher's stop condition.
    pub fn track(&mut self, id: ContainerId, service: ServiceName, index: ReplicaIndex, required: bool) {
        if required {
            self.required.insert(id.clone());
        }
        self.watched.insert(
            id,
            WatchEntry {
                service,
                index,
                restart_count: 0,
            },
        );
    }

    /// True once every required id has drained.
    pub fn is_done(&self) -> bool {
        self.required.is_empty()
    }

    /// Subscribes to `project`'s container events and drives the state
    /// machine until `is_done()` or cancellation. Emits translated
    /// `ContainerEvent`s to `sink` as it goes.
    pub async fn run(
        mut self,
        runtime: &dyn FullRuntime,
        project: &ProjectName,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> crate::error::Result<()> {
        let mut labels = HashMap::new();
        labels.insert(label::LABEL_PROJECT.to_string(), project.to_string());
        let filters = EventFilters {
            labels,
            types: vec!["container".to_string()],
        };

        let mut stream = runtime
            .events(&filters)
            .await
            .map_err(|e| crate::error::EngineError::runtime_unavailable(e.to_string()))?;

        if self.is_done() {
            return Ok(());
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = stream.next() => {
                    match next {
                        Some(Ok(event)) => {
                            self.handle_event(runtime, event, sink).await;
                            if self.is_done() {
                                return Ok(());
                            }
                        }
                        Some(Err(_)) | None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn handle_event(&mut self, runtime: &dyn FullRuntime, event: RuntimeEvent, sink: &dyn EventSink) {
        match event.action.as_str() {
            "create" => self.handle_create(event, sink),
            "start" => self.handle_start(event, sink),
            "die" => self.handle_die(runtime, event, sink).await,
            "stop" => self.handle_stop(event, sink),
            "destroy" => self.handle_destroy(event),
            _ => {}
        }
    }

    fn handle_create(&mut self, event: RuntimeEvent, sink: &dyn EventSink) {
        let Some(old_id_str) = event.attributes.get(label::LABEL_REPLACE) else {
            return;
        };
        let old_id = ContainerId::new(old_id_str.clone());
        let new_id = ContainerId::new(event.actor_id.clone());
        let Some(entry) = self.watched.remove(&old_id) else {
            return;
        };
        sink.emit(ContainerEvent::Recreated {
            service: entry.service.clone(),
            old_id: old_id.to_string(),
            new_id: new_id.to_string(),
        });
        if self.required.remove(&old_id) {
            self.required.insert(new_id.clone());
        }
        self.watched.insert(
            new_id,
            WatchEntry {
                service: entry.service,
                index: entry.index,
                restart_count: 0,
            },
        );
    }

    fn handle_start(&mut self, event: RuntimeEvent, sink: &dyn EventSink) {
        let id = ContainerId::new(event.actor_id.clone());
        if let Some(entry) = self.watched.get(&id) {
            if entry.restart_count > 0 {
                sink.emit(ContainerEvent::Restarted {
                    service: entry.service.clone(),
                    index: entry.index,
                });
            }
            return;
        }

        // Unknown id whose labels place it in a watched service - scale-up case.
        let Some(service_label) = event.attributes.get(label::LABEL_SERVICE) else {
            return;
        };
        let Some(index_label) = event.attributes.get(label::LABEL_CONTAINER_NUMBER) else {
            return;
        };
        let Ok(service) = ServiceName::new(service_label) else {
            return;
        };
        let Some(index) = index_label.parse::<u32>().ok().and_then(|n| ReplicaIndex::new(n).ok()) else {
            return;
        };
        self.watched.insert(
            id,
            WatchEntry {
                service,
                index,
                restart_count: 0,
            },
        );
    }

    async fn handle_die(&mut self, runtime: &dyn FullRuntime, event: RuntimeEvent, sink: &dyn EventSink) {
        let id = ContainerId::new(event.actor_id.clone());
        let Some(entry) = self.watched.get_mut(&id) else {
            return;
        };
        entry.restart_count += 1;
        let exit_code: i64 = event
            .attributes
            .get("exitCode")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let will_restart = match runtime.inspect_container(&id).await {
            Ok(info) => matches!(info.state, ContainerState::Restarting | ContainerState::Running),
            Err(_) => false,
        };

        sink.emit(ContainerEvent::Exit {
            service: entry.service.clone(),
            index: entry.index,
            exit_code,
            restarting: will_restart,
        });

        if !will_restart {
            self.watched.remove(&id);
            self.required.remove(&id);
        }
    }

    fn handle_stop(&mut self, event: RuntimeEvent, sink: &dyn EventSink) {
        let id = ContainerId::new(event.actor_id.clone());
        if let Some(entry) = self.watched.get(&id) {
            sink.emit(ContainerEvent::Stopped {
                service: entry.service.clone(),
                index: entry.index,
            });
        }
    }

    fn handle_destroy(&mut self, event: RuntimeEvent) {
        let id = ContainerId::new(event.actor_id.clone());
        self.watched.remove(&id);
        self.required.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::CollectingSink;
    use chrono::Utc;

    fn event(action: &str, actor_id: &str, attrs: &[(&str, &str)]) -> RuntimeEvent {
        RuntimeEvent {
            event_type: "container".to_string(),
            actor_id: actor_id.to_string(),
            action: action.to_string(),
            timestamp: Utc::now(),
            attributes: attrs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn stop_emits_for_tracked_id() {
        let mut watcher = Watcher::new();
        let id = ContainerId::new("c1".to_string());
        watcher.track(id.clone(), ServiceName::new("web").unwrap(), ReplicaIndex::FIRST, true);

        let sink = CollectingSink::default();
        watcher.handle_stop(event("stop", "c1", &[]), &sink);

        let events = sink.take();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ContainerEvent::Stopped { .. }));
    }

    #[test]
    fn stop_is_silent_for_untracked_id() {
        let mut watcher = Watcher::new();
        let sink = CollectingSink::default();
        watcher.handle_stop(event("stop", "ghost", &[]), &sink);
        assert!(sink.take().is_empty());
    }

    #[test]
    fn create_with_replace_label_emits_recreated_and_retargets_required() {
        let mut watcher = Watcher::new();
        let old_id = ContainerId::new("old".to_string());
        watcher.track(old_id, ServiceName::new("web").unwrap(), ReplicaIndex::FIRST, true);
        assert!(!watcher.is_done());

        let sink = CollectingSink::default();
        watcher.handle_create(event("create", "new", &[(label::LABEL_REPLACE, "old")]), &sink);

        let events = sink.take();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ContainerEvent::Recreated { .. }));
        assert!(watcher.required.contains(&ContainerId::new("new".to_string())));
        assert!(!watcher.required.contains(&ContainerId::new("old".to_string())));
    }

    #[test]
    fn destroy_removes_without_needing_inspect() {
        let mut watcher = Watcher::new();
        let id = ContainerId::new("c1".to_string());
        watcher.track(id, ServiceName::new("web").unwrap(), ReplicaIndex::FIRST, true);

        watcher.handle_destroy(event("destroy", "c1", &[]));
        assert!(watcher.is_done());
    }

    #[test]
    fn start_on_unknown_watched_service_adds_scale_up_container() {
        let mut watcher = Watcher::new();
        let sink = CollectingSink::default();
        watcher.handle_start(
            event("start", "new-replica", &[(label::LABEL_SERVICE, "web"), (label::LABEL_CONTAINER_NUMBER, "2")]),
            &sink,
        );
        assert!(watcher.watched.contains_key(&ContainerId::new("new-replica".to_string())));
        assert!(sink.take().is_empty());
    }

    #[test]
    fn start_with_prior_restarts_emits_restarted() {
        let mut watcher = Watcher::new();
        let id = ContainerId::new("c1".to_string());
        watcher.watched.insert(
            id,
            WatchEntry {
                service: ServiceName::new("web").unwrap(),
                index: ReplicaIndex::FIRST,
                restart_count: 1,
            },
        );
        let sink = CollectingSink::default();
        watcher.handle_start(event("start", "c1", &[]), &sink);
        let events = sink.take();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ContainerEvent::Restarted { .. }));
    }
}
