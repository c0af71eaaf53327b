use crate::{Mounter, MountError, OverlayOptions};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// A mount operation observed by [`MockMounter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountCall {
    Image {
        image: PathBuf,
        target: PathBuf,
        fstype: String,
    },
    Overlay {
        options: OverlayOptions,
        target: PathBuf,
    },
    Unmount {
        target: PathBuf,
    },
}

#[derive(Debug, Default)]
struct MockState {
    mounted: BTreeMap<PathBuf, String>,
    calls: Vec<MountCall>,
    fail_image: bool,
    fail_overlay: bool,
}

/// In-memory mounter for tests and unprivileged runs.
///
/// Tracks what would be mounted where and records every call. Targets must
/// exist, as they would for the kernel. Failures can be injected per kind.
#[derive(Debug, Default)]
pub struct MockMounter {
    state: Mutex<MockState>,
}

impl MockMounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MockState>, MountError> {
        self.state
            .lock()
            .map_err(|e| MountError::Unavailable(format!("mock mounter mutex poisoned: {e}")))
    }

    pub fn calls(&self) -> Vec<MountCall> {
        self.state().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn image_mount_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MountCall::Image { .. }))
            .count()
    }

    /// Targets currently mounted, with the filesystem type of each.
    pub fn mounted(&self) -> Vec<(PathBuf, String)> {
        self.state()
            .map(|s| s.mounted.iter().map(|(p, t)| (p.clone(), t.clone())).collect())
            .unwrap_or_default()
    }

    pub fn set_fail_image(&self, fail: bool) {
        if let Ok(mut s) = self.state() {
            s.fail_image = fail;
        }
    }

    pub fn set_fail_overlay(&self, fail: bool) {
        if let Ok(mut s) = self.state() {
            s.fail_overlay = fail;
        }
    }
}

fn require_dir(target: &Path) -> Result<(), MountError> {
    if target.is_dir() {
        Ok(())
    } else {
        Err(MountError::IoAt {
            path: target.to_path_buf(),
            source: io::Error::from(io::ErrorKind::NotFound),
        })
    }
}

fn injected(device: &str, target: &Path, fstype: &str) -> MountError {
    MountError::Mount {
        device: device.to_owned(),
        target: target.to_path_buf(),
        fstype: fstype.to_owned(),
        error: io::Error::from(io::ErrorKind::PermissionDenied),
    }
}

impl Mounter for MockMounter {
    fn name(&self) -> &str {
        "mock"
    }

    fn is_mounted(&self, target: &Path) -> Result<bool, MountError> {
        Ok(self.state()?.mounted.contains_key(target))
    }

    fn mount_image(&self, image: &Path, target: &Path, fstype: &str) -> Result<(), MountError> {
        let mut state = self.state()?;
        state.calls.push(MountCall::Image {
            image: image.to_path_buf(),
            target: target.to_path_buf(),
            fstype: fstype.to_owned(),
        });
        if state.fail_image {
            return Err(injected(&image.display().to_string(), target, fstype));
        }
        if !image.is_file() {
            return Err(MountError::IoAt {
                path: image.to_path_buf(),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        require_dir(target)?;
        if state.mounted.contains_key(target) {
            return Err(MountError::Mount {
                device: image.display().to_string(),
                target: target.to_path_buf(),
                fstype: fstype.to_owned(),
                error: io::Error::from_raw_os_error(libc::EBUSY),
            });
        }
        state.mounted.insert(target.to_path_buf(), fstype.to_owned());
        Ok(())
    }

    fn mount_overlay(&self, options: &OverlayOptions, target: &Path) -> Result<(), MountError> {
        let mut state = self.state()?;
        state.calls.push(MountCall::Overlay {
            options: options.clone(),
            target: target.to_path_buf(),
        });
        if state.fail_overlay {
            return Err(injected("overlay", target, "overlay"));
        }
        options.to_mount_data()?;
        require_dir(target)?;
        require_dir(&options.upper)?;
        require_dir(&options.work)?;
        for lower in &options.lower {
            if !state.mounted.contains_key(lower) {
                return Err(MountError::IoAt {
                    path: lower.clone(),
                    source: io::Error::from(io::ErrorKind::NotFound),
                });
            }
        }
        state.mounted.insert(target.to_path_buf(), "overlay".to_owned());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<(), MountError> {
        let mut state = self.state()?;
        state.calls.push(MountCall::Unmount {
            target: target.to_path_buf(),
        });
        if state.mounted.remove(target).is_none() {
            return Err(MountError::Unmount {
                target: target.to_path_buf(),
                error: io::Error::from_raw_os_error(libc::EINVAL),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_mounts_and_unmounts() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("a.squashfs");
        std::fs::write(&blob, b"x").unwrap();
        let target = dir.path().join("mnt");
        std::fs::create_dir(&target).unwrap();

        let m = MockMounter::new();
        m.mount_image(&blob, &target, "squashfs").unwrap();
        assert!(m.is_mounted(&target).unwrap());
        assert_eq!(m.image_mount_count(), 1);

        m.unmount(&target).unwrap();
        assert!(!m.is_mounted(&target).unwrap());
        assert_eq!(m.calls().len(), 2);
    }

    #[test]
    fn double_mount_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join("a.squashfs");
        std::fs::write(&blob, b"x").unwrap();
        let m = MockMounter::new();
        m.mount_image(&blob, dir.path(), "squashfs").unwrap();
        assert!(m.mount_image(&blob, dir.path(), "squashfs").is_err());
    }

    #[test]
    fn overlay_requires_mounted_lowers() {
        let dir = tempfile::tempdir().unwrap();
        let opts = OverlayOptions {
            lower: vec![dir.path().join("missing")],
            upper: dir.path().to_path_buf(),
            work: dir.path().to_path_buf(),
        };
        let m = MockMounter::new();
        assert!(m.mount_overlay(&opts, dir.path()).is_err());
    }

    #[test]
    fn injected_overlay_failure() {
        let dir = tempfile::tempdir().unwrap();
        let m = MockMounter::new();
        m.set_fail_overlay(true);
        let opts = OverlayOptions {
            lower: Vec::new(),
            upper: dir.path().to_path_buf(),
            work: dir.path().to_path_buf(),
        };
        assert!(matches!(
            m.mount_overlay(&opts, dir.path()),
            Err(MountError::Mount { .. })
        ));
        assert!(m.mounted().is_empty());
    }

    #[test]
    fn unmount_of_unmounted_target_fails() {
        let m = MockMounter::new();
        assert!(m.unmount(Path::new("/nowhere")).is_err());
    }
}
