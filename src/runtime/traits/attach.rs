// ABOUTME: Bidirectional attach trait for streaming a container's stdio.
// ABOUTME: Falls back to LogOps::container_logs at the call site when the runtime refuses attach.

use super::sealed::Sealed;
use super::logs::{LogError, LogLine};
use crate::types::ContainerId;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use tokio::io::AsyncWrite;

/// Bidirectional attach to a running container's stdio.
#[async_trait]
pub trait AttachOps: Sealed + Send + Sync {
    /// Attach to a container. Returns an input sink and an output stream,
    /// independent of each other so the caller can pump each on its own task.
    async fn attach_container(
        &self,
        id: &ContainerId,
        opts: &AttachOptions,
    ) -> Result<AttachStream, LogError>;
}

/// Options for attaching to a container.
#[derive(Debug, Clone, Default)]
pub struct AttachOptions {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    /// Whether the container was created with a TTY (changes stream framing).
    pub tty: bool,
}

/// A live attach session: an input sink paired with an output stream.
pub struct AttachStream {
    pub stdin: Pin<Box<dyn AsyncWrite + Send>>,
    pub output: Pin<Box<dyn Stream<Item = Result<LogLine, LogError>> + Send>>,
}
