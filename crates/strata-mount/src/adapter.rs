//! Idempotent read-only mounts.
//!
//! Layer mountpoints are shared between every checkout that uses the layer
//! and may be mounted concurrently by other processes. Mounting one is safe
//! to repeat and safe to race.

use crate::{Mounter, MountError};
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    /// This call performed the mount.
    Mounted,
    /// The target was already mounted, by us earlier or by someone else.
    AlreadyMounted,
}

/// Mount `image` read-only on `target` unless something is already mounted
/// there. The target directory is created `0700` if absent.
///
/// When the mount fails but the target turns out to be mounted afterwards,
/// a concurrent caller won the race and the result is `AlreadyMounted`.
pub fn mount_read_only(
    mounter: &dyn Mounter,
    image: &Path,
    target: &Path,
    fstype: &str,
) -> Result<MountOutcome, MountError> {
    if mounter.is_mounted(target)? {
        debug!("{} already mounted", target.display());
        return Ok(MountOutcome::AlreadyMounted);
    }

    DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(target)
        .map_err(|e| MountError::IoAt {
            path: target.to_path_buf(),
            source: e,
        })?;

    match mounter.mount_image(image, target, fstype) {
        Ok(()) => Ok(MountOutcome::Mounted),
        Err(e) => {
            if mounter.is_mounted(target)? {
                warn!(
                    "mount of {} lost a race, using existing mount: {e}",
                    target.display()
                );
                Ok(MountOutcome::AlreadyMounted)
            } else {
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockMounter;

    fn blob(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("layer.squashfs");
        std::fs::write(&path, b"squash").unwrap();
        path
    }

    #[test]
    fn second_mount_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let image = blob(dir.path());
        let target = dir.path().join("mnt/abc");
        let m = MockMounter::new();

        assert_eq!(
            mount_read_only(&m, &image, &target, "squashfs").unwrap(),
            MountOutcome::Mounted
        );
        assert_eq!(
            mount_read_only(&m, &image, &target, "squashfs").unwrap(),
            MountOutcome::AlreadyMounted
        );
        assert_eq!(m.image_mount_count(), 1);
        assert!(target.is_dir());
    }

    #[test]
    fn creates_private_target() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let image = blob(dir.path());
        let target = dir.path().join("mnt/new");
        mount_read_only(&MockMounter::new(), &image, &target, "squashfs").unwrap();
        let mode = std::fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[test]
    fn genuine_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let image = blob(dir.path());
        let m = MockMounter::new();
        m.set_fail_image(true);
        assert!(mount_read_only(&m, &image, &dir.path().join("mnt"), "squashfs").is_err());
    }

    /// A mounter whose mount always fails after someone else mounted the
    /// target, as happens when two processes race.
    struct RacingMounter {
        inner: MockMounter,
        image: std::path::PathBuf,
    }

    impl Mounter for RacingMounter {
        fn name(&self) -> &str {
            "racing"
        }
        fn is_mounted(&self, target: &Path) -> Result<bool, MountError> {
            self.inner.is_mounted(target)
        }
        fn mount_image(&self, _image: &Path, target: &Path, fstype: &str) -> Result<(), MountError> {
            self.inner.mount_image(&self.image, target, fstype)?;
            Err(MountError::Mount {
                device: "/dev/loop9".to_owned(),
                target: target.to_path_buf(),
                fstype: fstype.to_owned(),
                error: std::io::Error::from_raw_os_error(libc::EBUSY),
            })
        }
        fn mount_overlay(
            &self,
            options: &crate::OverlayOptions,
            target: &Path,
        ) -> Result<(), MountError> {
            self.inner.mount_overlay(options, target)
        }
        fn unmount(&self, target: &Path) -> Result<(), MountError> {
            self.inner.unmount(target)
        }
    }

    #[test]
    fn lost_race_is_already_mounted() {
        let dir = tempfile::tempdir().unwrap();
        let image = blob(dir.path());
        let m = RacingMounter {
            inner: MockMounter::new(),
            image: image.clone(),
        };
        assert_eq!(
            mount_read_only(&m, &image, &dir.path().join("mnt"), "squashfs").unwrap(),
            MountOutcome::AlreadyMounted
        );
    }
}
