//! Overlay checkout of an image into a writable root filesystem.
//!
//! Every layer of the image is mounted read-only (shared with other
//! checkouts), then one overlay is mounted on a fresh `merged-<token>`
//! directory with `upper-<token>` and `work-<token>` beside it in `tmp/`. The
//! merged directory is the container root: reads see the whole layer stack,
//! writes land in the upper directory and never reach a layer. The shared
//! random token lets a checkout be released knowing only its root.

use crate::repository::Repository;
use crate::CoreError;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use strata_mount::OverlayOptions;
use strata_schema::ManifestId;
use tempfile::TempDir;
use tracing::{debug, info};

/// A mounted, writable checkout of one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkout {
    pub image_id: ManifestId,
    /// Merged overlay view; the container root.
    pub root: PathBuf,
    pub upper: PathBuf,
    pub work: PathBuf,
    /// Layer mountpoints in overlay order, topmost first.
    pub lower: Vec<PathBuf>,
}

const MERGED_PREFIX: &str = "merged-";

/// Create exactly `path`, failing if it exists.
fn scratch_at(path: &Path) -> Result<TempDir, CoreError> {
    let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
        return Err(CoreError::Source(format!("bad scratch path {}", path.display())));
    };
    Ok(tempfile::Builder::new()
        .prefix(name)
        .rand_bytes(0)
        .tempdir_in(dir)?)
}

impl Checkout {
    /// Upper and work directories belonging to the checkout rooted at `root`.
    fn scratch_of(root: &Path) -> Result<(PathBuf, PathBuf), CoreError> {
        let token = root
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(MERGED_PREFIX))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CoreError::Source(format!("{} is not a checkout root", root.display())))?;
        let tmp = root.parent().unwrap_or(Path::new("."));
        Ok((tmp.join(format!("upper-{token}")), tmp.join(format!("work-{token}"))))
    }
}

fn remove_scratch(path: &Path) -> Result<(), CoreError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CoreError::Store(strata_store::StoreError::IoAt {
            path: path.to_path_buf(),
            source: e,
        })),
    }
}

impl Repository {
    /// Check out the image named by a manifest id or tag.
    ///
    /// On failure every scratch directory created by this call is removed.
    /// Layer mounts made along the way are kept; they are shared and
    /// reusable by later checkouts.
    pub fn checkout(&self, name: &str) -> Result<Checkout, CoreError> {
        let entry = self
            .manifests
            .get(name)?
            .ok_or_else(|| CoreError::ImageNotFound(name.to_owned()))?;
        let layers = entry.image.layers_for(&self.platform)?;
        if layers.is_empty() {
            return Err(CoreError::EmptyImage(name.to_owned()));
        }

        let mut lower = Vec::with_capacity(layers.len());
        for layer in layers {
            lower.push(self.mount(layer)?);
        }
        // Manifests list the base first; overlayfs wants the topmost first.
        lower.reverse();

        let tmp = self.layout.tmp_dir();
        let merged = tempfile::Builder::new()
            .prefix(MERGED_PREFIX)
            .tempdir_in(&tmp)?;
        let (upper_path, work_path) = Checkout::scratch_of(merged.path())?;
        let upper = scratch_at(&upper_path)?;
        let work = scratch_at(&work_path)?;

        let options = OverlayOptions {
            lower,
            upper: upper.path().to_path_buf(),
            work: work.path().to_path_buf(),
        };
        debug!("overlay lowerdir={:?}", options.lower);
        self.mounter.mount_overlay(&options, merged.path())?;

        let checkout = Checkout {
            image_id: entry.id,
            root: merged.keep(),
            upper: upper.keep(),
            work: work.keep(),
            lower: options.lower,
        };
        info!(
            "checked out {} at {}",
            checkout.image_id,
            checkout.root.display()
        );
        Ok(checkout)
    }

    /// Unmount a checkout and delete its scratch directories, discarding
    /// everything written to it.
    pub fn release(&self, checkout: &Checkout) -> Result<(), CoreError> {
        self.release_root(&checkout.root)
    }

    /// [`release`](Self::release) for a checkout known only by its root.
    pub fn release_root(&self, root: &Path) -> Result<(), CoreError> {
        let tmp = fs::canonicalize(self.layout.tmp_dir())?;
        let parent = root.parent().map(fs::canonicalize).transpose()?;
        if parent.as_deref() != Some(tmp.as_path()) {
            return Err(CoreError::Source(format!(
                "{} is not a checkout of this repository",
                root.display()
            )));
        }
        let (upper, work) = Checkout::scratch_of(root)?;
        if self.mounter.is_mounted(root)? {
            self.mounter.unmount(root)?;
        }
        for dir in [root, upper.as_path(), work.as_path()] {
            remove_scratch(dir)?;
        }
        info!("released checkout at {}", root.display());
        Ok(())
    }
}
