//! Loop device attachment through `/dev/loop-control`.

use crate::MountError;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const LOOP_CONTROL: &str = "/dev/loop-control";

const LOOP_SET_FD: u32 = 0x4C00;
const LOOP_CLR_FD: u32 = 0x4C01;
const LOOP_SET_STATUS64: u32 = 0x4C04;
const LOOP_GET_STATUS64: u32 = 0x4C05;
const LOOP_CTL_GET_FREE: u32 = 0x4C82;
const LO_FLAGS_AUTOCLEAR: u32 = 4;

/// Another process may bind the index handed out by `LOOP_CTL_GET_FREE`
/// before we do; allocation is retried this many times.
const ATTACH_ATTEMPTS: usize = 8;

/// `struct loop_info64` from `<linux/loop.h>`.
#[repr(C)]
struct LoopInfo64 {
    lo_device: u64,
    lo_inode: u64,
    lo_rdevice: u64,
    lo_offset: u64,
    lo_sizelimit: u64,
    lo_number: u32,
    lo_encrypt_type: u32,
    lo_encrypt_key_size: u32,
    lo_flags: u32,
    lo_file_name: [u8; 64],
    lo_crypt_name: [u8; 64],
    lo_encrypt_key: [u8; 32],
    lo_init: [u64; 2],
}

impl LoopInfo64 {
    fn zeroed() -> Self {
        Self {
            lo_device: 0,
            lo_inode: 0,
            lo_rdevice: 0,
            lo_offset: 0,
            lo_sizelimit: 0,
            lo_number: 0,
            lo_encrypt_type: 0,
            lo_encrypt_key_size: 0,
            lo_flags: 0,
            lo_file_name: [0; 64],
            lo_crypt_name: [0; 64],
            lo_encrypt_key: [0; 32],
            lo_init: [0; 2],
        }
    }
}

#[allow(unsafe_code)]
fn ioctl_int(file: &File, request: u32, arg: libc::c_ulong) -> io::Result<libc::c_int> {
    // SAFETY: the fd is owned by `file` and stays open for the call; the loop
    // requests used with this helper take a plain integer argument.
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), request as _, arg) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

#[allow(unsafe_code)]
fn ioctl_status(file: &File, request: u32, info: &mut LoopInfo64) -> io::Result<()> {
    // SAFETY: `info` is an exclusively borrowed, correctly sized loop_info64
    // that outlives the call.
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), request as _, std::ptr::from_mut(info)) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// A loop device bound to a layer blob.
///
/// The binding is released when the value is dropped unless ownership is
/// handed to a kernel mount with [`into_mounted`](Self::into_mounted). Bound
/// devices are also marked autoclear, so the kernel detaches them once the
/// last mount referencing them goes away.
#[derive(Debug)]
pub struct LoopDevice {
    index: u32,
    path: PathBuf,
    device: File,
    armed: bool,
}

impl LoopDevice {
    /// Bind `backing` read-only to a free loop device.
    pub fn attach(backing: &Path) -> Result<Self, MountError> {
        let backing_file = File::open(backing).map_err(|e| MountError::IoAt {
            path: backing.to_path_buf(),
            source: e,
        })?;
        let control = OpenOptions::new()
            .read(true)
            .write(true)
            .open(LOOP_CONTROL)
            .map_err(MountError::NoFreeLoopDevice)?;

        let mut busy = None;
        for _ in 0..ATTACH_ATTEMPTS {
            let index = ioctl_int(&control, LOOP_CTL_GET_FREE, 0)
                .map_err(MountError::NoFreeLoopDevice)? as u32;
            let path = PathBuf::from(format!("/dev/loop{index}"));
            let device = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|e| MountError::IoAt {
                    path: path.clone(),
                    source: e,
                })?;

            match ioctl_int(&device, LOOP_SET_FD, backing_file.as_raw_fd() as libc::c_ulong) {
                Ok(_) => {
                    let dev = Self {
                        index,
                        path,
                        device,
                        armed: true,
                    };
                    if let Err(e) = dev.set_autoclear() {
                        warn!("could not mark {} autoclear: {e}", dev.path.display());
                    }
                    debug!("bound {} to {}", backing.display(), dev.path.display());
                    return Ok(dev);
                }
                Err(e) if e.raw_os_error() == Some(libc::EBUSY) => {
                    debug!("{} was claimed concurrently, retrying", path.display());
                    busy = Some((path, e));
                }
                Err(e) => {
                    return Err(MountError::LoopAttach {
                        device: path,
                        backing: backing.to_path_buf(),
                        error: e,
                    })
                }
            }
        }

        match busy {
            Some((device, error)) => Err(MountError::LoopAttach {
                device,
                backing: backing.to_path_buf(),
                error,
            }),
            None => Err(MountError::NoFreeLoopDevice(io::Error::from(
                io::ErrorKind::ResourceBusy,
            ))),
        }
    }

    fn set_autoclear(&self) -> io::Result<()> {
        let mut info = LoopInfo64::zeroed();
        ioctl_status(&self.device, LOOP_GET_STATUS64, &mut info)?;
        info.lo_flags |= LO_FLAGS_AUTOCLEAR;
        ioctl_status(&self.device, LOOP_SET_STATUS64, &mut info)
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the binding now.
    pub fn detach(mut self) -> Result<(), MountError> {
        self.armed = false;
        clear_fd(&self.device, &self.path)
    }

    /// Keep the binding alive for the mount that now references it.
    pub fn into_mounted(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for LoopDevice {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = clear_fd(&self.device, &self.path) {
                warn!("{e}");
            }
        }
    }
}

fn clear_fd(device: &File, path: &Path) -> Result<(), MountError> {
    match ioctl_int(device, LOOP_CLR_FD, 0) {
        Ok(_) => Ok(()),
        // Already unbound, e.g. by autoclear.
        Err(e) if e.raw_os_error() == Some(libc::ENXIO) => Ok(()),
        Err(e) => Err(MountError::LoopDetach {
            device: path.to_path_buf(),
            error: e,
        }),
    }
}

/// Detach the loop device at `path` if it is still bound.
pub fn detach_device(path: &Path) -> Result<(), MountError> {
    let device = OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|e| MountError::IoAt {
            path: path.to_path_buf(),
            source: e,
        })?;
    clear_fd(&device, path)
}

/// Whether a mount source names a loop device.
pub fn is_loop_device(source: &str) -> bool {
    source
        .strip_prefix("/dev/loop")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}
