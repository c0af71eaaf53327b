//! Kernel mount plumbing for strata.
//!
//! This crate owns every OS-level side effect of checkout: attaching layer
//! blobs to loop devices ([`LoopDevice`]), mounting them read-only, composing
//! overlay mounts ([`OverlayOptions`]), and rediscovering live mounts from
//! `/proc/self/mountinfo` ([`MountTable`]). The [`Mounter`] trait is the seam
//! between the repository and the kernel; [`MockMounter`] stands in for it in
//! tests.

pub mod adapter;
pub mod backend;
pub mod kernel;
pub mod loopdev;
pub mod mock;
pub mod mountinfo;
pub mod overlay;

pub use adapter::{mount_read_only, MountOutcome};
pub use backend::{select_mounter, Mounter};
pub use kernel::KernelMounter;
pub use loopdev::LoopDevice;
pub use mock::{MockMounter, MountCall};
pub use mountinfo::{MountEntry, MountTable};
pub use overlay::OverlayOptions;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MountError {
    #[error("mount I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no free loop device: {0}")]
    NoFreeLoopDevice(#[source] std::io::Error),
    #[error("failed to bind {backing} to {device}: {error}")]
    LoopAttach {
        device: PathBuf,
        backing: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to detach {device}: {error}")]
    LoopDetach {
        device: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to mount {device} ({fstype}) at {target}: {error}")]
    Mount {
        device: String,
        target: PathBuf,
        fstype: String,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to unmount {target}: {error}")]
    Unmount {
        target: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("malformed mountinfo line: {0}")]
    MountTable(String),
    #[error("path contains an interior NUL byte: {0}")]
    InvalidPath(PathBuf),
    #[error("path cannot be used in overlay mount options: {0}")]
    OverlayPath(PathBuf),
    #[error("mounter '{0}' is not available")]
    Unavailable(String),
}
