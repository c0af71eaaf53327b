use crate::CoreError;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Exclusive advisory lock on a named file, shared across processes.
///
/// The lock file is removed before the lock is released. A waiter that was
/// blocked on the removed inode notices on wakeup that the path no longer
/// refers to the file it holds and retries on a fresh one, so removal never
/// lets two holders in at once.
#[derive(Debug)]
pub struct LayerLock {
    lock_file: File,
    path: PathBuf,
}

fn open_lock_file(lock_path: &Path) -> Result<File, CoreError> {
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)?)
}

/// Whether `path` still names the inode behind `file`.
fn still_linked(file: &File, path: &Path) -> io::Result<bool> {
    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(current) => Ok(current.dev() == held.dev() && current.ino() == held.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

impl LayerLock {
    /// Block until the lock at `lock_path` is held.
    pub fn acquire(lock_path: &Path) -> Result<Self, CoreError> {
        loop {
            let file = open_lock_file(lock_path)?;
            file.lock_exclusive()?;
            if still_linked(&file, lock_path)? {
                return Ok(Self {
                    lock_file: file,
                    path: lock_path.to_path_buf(),
                });
            }
            debug!("lock {} was released and removed, retrying", lock_path.display());
        }
    }

    /// Take the lock if nobody holds it.
    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        loop {
            let file = open_lock_file(lock_path)?;
            match file.try_lock_exclusive() {
                Ok(()) => {}
                Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
            if still_linked(&file, lock_path)? {
                return Ok(Some(Self {
                    lock_file: file,
                    path: lock_path.to_path_buf(),
                }));
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LayerLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove lock file {}: {e}", self.path.display());
            }
        }
        let _ = FileExt::unlock(&self.lock_file);
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(1);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, finishing current step...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
