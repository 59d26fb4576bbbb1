// ABOUTME: Runtime event stream trait feeding the engine's event watcher.
// ABOUTME: A thin pass-through of the runtime's own event feed, not yet the engine's ContainerEvent.

use super::sealed::Sealed;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;

/// Runtime event subscription.
#[async_trait]
pub trait EventOps: Sealed + Send + Sync {
    /// Subscribe to runtime events matching the given filters.
    ///
    /// The stream runs until dropped; callers cancel by dropping it or via
    /// their own cancellation token, there is no explicit unsubscribe call.
    async fn events(
        &self,
        filters: &EventFilters,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<RuntimeEvent, EventError>> + Send>>, EventError>;
}

/// Filters for a runtime event subscription.
#[derive(Debug, Clone, Default)]
pub struct EventFilters {
    /// Label filters, e.g. `project=demo`.
    pub labels: HashMap<String, String>,
    /// Restrict to these event types; empty means all.
    pub types: Vec<String>,
}

/// A single runtime event, as reported by the runtime's own event feed.
#[derive(Debug, Clone)]
pub struct RuntimeEvent {
    /// Event type, e.g. "container".
    pub event_type: String,
    /// The id of the actor (usually a container id) this event concerns.
    pub actor_id: String,
    /// The action, e.g. "create", "start", "die", "stop", "destroy".
    pub action: String,
    /// When the runtime reported the event.
    pub timestamp: DateTime<Utc>,
    /// Actor attributes, including labels.
    pub attributes: HashMap<String, String>,
}

/// Errors from the event stream.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("stream error: {0}")]
    StreamError(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}
