//! Real mounts through `mount(2)` and `umount2(2)`.

use crate::loopdev::{detach_device, is_loop_device, LoopDevice};
use crate::{Mounter, MountError, MountTable, OverlayOptions};
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct KernelMounter;

impl KernelMounter {
    pub fn new() -> Self {
        Self
    }
}

fn c_path(path: &Path) -> Result<CString, MountError> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| MountError::InvalidPath(path.to_path_buf()))
}

fn c_str(value: &str) -> Result<CString, MountError> {
    CString::new(value).map_err(|_| MountError::InvalidPath(value.into()))
}

#[allow(unsafe_code)]
fn sys_mount(
    source: &CString,
    target: &CString,
    fstype: &CString,
    flags: libc::c_ulong,
    data: Option<&CString>,
) -> io::Result<()> {
    let data_ptr = data.map_or(std::ptr::null(), |d| d.as_ptr().cast::<libc::c_void>());
    // SAFETY: every pointer comes from a live CString borrowed for the whole
    // call, and `data` is either null or a NUL-terminated option string.
    let ret = unsafe {
        libc::mount(
            source.as_ptr(),
            target.as_ptr(),
            fstype.as_ptr(),
            flags,
            data_ptr,
        )
    };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[allow(unsafe_code)]
fn sys_umount(target: &CString) -> io::Result<()> {
    // SAFETY: `target` is a valid NUL-terminated path that outlives the call.
    let ret = unsafe { libc::umount2(target.as_ptr(), 0) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

impl Mounter for KernelMounter {
    fn name(&self) -> &str {
        "kernel"
    }

    fn is_mounted(&self, target: &Path) -> Result<bool, MountError> {
        Ok(MountTable::read()?.contains(target))
    }

    fn mount_image(&self, image: &Path, target: &Path, fstype: &str) -> Result<(), MountError> {
        let device = LoopDevice::attach(image)?;
        let c_device = c_path(device.path())?;
        let c_target = c_path(target)?;
        let c_fstype = c_str(fstype)?;

        sys_mount(&c_device, &c_target, &c_fstype, libc::MS_RDONLY, None).map_err(|error| {
            MountError::Mount {
                device: device.path().display().to_string(),
                target: target.to_path_buf(),
                fstype: fstype.to_owned(),
                error,
            }
        })?;

        let device = device.into_mounted();
        info!(
            "mounted {} ({fstype}) at {} via {}",
            image.display(),
            target.display(),
            device.display()
        );
        Ok(())
    }

    fn mount_overlay(&self, options: &OverlayOptions, target: &Path) -> Result<(), MountError> {
        let source = c_str("overlay")?;
        let c_target = c_path(target)?;
        let data = options.to_mount_data()?;
        debug!("overlay data: {data}");
        let data = c_str(&data)?;

        sys_mount(&source, &c_target, &source, 0, Some(&data)).map_err(|error| {
            MountError::Mount {
                device: "overlay".to_owned(),
                target: target.to_path_buf(),
                fstype: "overlay".to_owned(),
                error,
            }
        })?;
        info!("mounted overlay at {}", target.display());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<(), MountError> {
        let source = MountTable::read()?
            .find(target)
            .map(|entry| entry.source.clone());

        let c_target = c_path(target)?;
        sys_umount(&c_target).map_err(|error| MountError::Unmount {
            target: target.to_path_buf(),
            error,
        })?;
        info!("unmounted {}", target.display());

        if let Some(source) = source.filter(|s| is_loop_device(s)) {
            if let Err(e) = detach_device(Path::new(&source)) {
                warn!("{e}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    #[test]
    fn interior_nul_is_invalid_path() {
        let bad = Path::new(OsStr::from_bytes(b"/r/mnt/a\0b"));
        assert!(matches!(c_path(bad), Err(MountError::InvalidPath(_))));
    }

    #[test]
    fn unmounted_tempdir_is_not_mounted() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!KernelMounter::new().is_mounted(dir.path()).unwrap());
    }

    #[test]
    fn unmount_of_plain_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            KernelMounter::new().unmount(dir.path()),
            Err(MountError::Unmount { .. })
        ));
    }
}
