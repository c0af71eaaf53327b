use crate::{MountError, OverlayOptions};
use std::path::Path;
use std::sync::Arc;

/// Performs the kernel side effects of checkout.
///
/// Implementations must be safe to share between threads; the repository
/// hands one instance to every checkout and build it runs.
pub trait Mounter: Send + Sync {
    fn name(&self) -> &str;

    /// Whether something is currently mounted on `target`.
    fn is_mounted(&self, target: &Path) -> Result<bool, MountError>;

    /// Mount the filesystem image at `image` read-only on `target`.
    fn mount_image(&self, image: &Path, target: &Path, fstype: &str) -> Result<(), MountError>;

    /// Mount an overlay of `options` on `target`.
    fn mount_overlay(&self, options: &OverlayOptions, target: &Path) -> Result<(), MountError>;

    fn unmount(&self, target: &Path) -> Result<(), MountError>;
}

pub fn select_mounter(name: &str) -> Result<Arc<dyn Mounter>, MountError> {
    match name {
        "kernel" => Ok(Arc::new(crate::kernel::KernelMounter::new())),
        "mock" => Ok(Arc::new(crate::mock::MockMounter::new())),
        other => Err(MountError::Unavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_valid_mounters() {
        assert_eq!(select_mounter("kernel").unwrap().name(), "kernel");
        assert_eq!(select_mounter("mock").unwrap().name(), "mock");
    }

    #[test]
    fn select_invalid_mounter_fails() {
        assert!(matches!(
            select_mounter("fuse"),
            Err(MountError::Unavailable(name)) if name == "fuse"
        ));
    }
}
