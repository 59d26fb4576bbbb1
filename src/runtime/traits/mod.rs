// ABOUTME: Composable capability traits for container runtimes.
// ABOUTME: Defines ImageOps, ContainerOps, NetworkOps, VolumeOps, ResourceOps, ExecOps, LogOps, AttachOps, EventOps, RuntimeInfo.

mod attach;
mod container;
mod events;
mod exec;
mod image;
mod logs;
mod network;
mod resource;
mod runtime_info;
pub(crate) mod sealed;
mod shared_types;
mod volume;

pub use attach::{AttachOps, AttachOptions, AttachStream};
pub use container::{ContainerError, ContainerFilters, ContainerOps, ContainerSummary};
pub use events::{EventError, EventFilters, EventOps, RuntimeEvent};
pub use exec::{ExecError, ExecOps};
pub use image::{ImageError, ImageInspectInfo, ImageOps};
pub use logs::{LogError, LogLine, LogOps, LogOptions, LogStream};
pub use network::{NetworkError, NetworkOps};
pub use resource::{
    ResourceConfig, ResourceError, ResourceFilters, ResourceInfo, ResourceKind, ResourceOps,
};
pub use runtime_info::{RuntimeInfo, RuntimeInfoError};
pub use shared_types::*;
pub use volume::{VolumeConfig, VolumeError, VolumeFilters, VolumeInfo, VolumeOps};

/// Full runtime capability - convenience trait combining all sub-traits.
///
/// Auto-implemented for any type that implements all the required traits.
pub trait FullRuntime:
    ImageOps
    + ContainerOps
    + NetworkOps
    + VolumeOps
    + ResourceOps
    + ExecOps
    + LogOps
    + AttachOps
    + EventOps
    + RuntimeInfo
{
}

impl<T> FullRuntime for T where
    T: ImageOps
        + ContainerOps
        + NetworkOps
        + VolumeOps
        + ResourceOps
        + ExecOps
        + LogOps
        + AttachOps
        + EventOps
        + RuntimeInfo
{
}
