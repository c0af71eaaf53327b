//! External compression and archive extraction.
//!
//! Layer blobs are produced by an external squashfs compressor invoked as a
//! black box. Foreign image diffs are tar streams applied in order onto a
//! scratch directory, honouring overlay-style whiteouts.

use crate::{IoResultExt, StoreError};
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_MARKER: &str = ".wh..wh..opq";
const WHITEOUT_META_PREFIX: &str = ".wh..wh.";

/// Turns a directory tree into a compressed filesystem image.
pub trait Compressor: Send + Sync {
    fn name(&self) -> &str;

    /// Compress `source_dir` into the file at `dest`, replacing its content.
    fn compress(&self, source_dir: &Path, dest: &Path) -> Result<(), StoreError>;
}

/// Applies one archive stream onto a directory.
pub trait Extractor: Send + Sync {
    fn extract(&self, archive: &mut dyn Read, dest: &Path) -> Result<(), StoreError>;
}

/// Runs `mksquashfs <source> <dest> <args...>`.
#[derive(Debug, Clone)]
pub struct Mksquashfs {
    program: PathBuf,
    args: Vec<String>,
}

impl Default for Mksquashfs {
    fn default() -> Self {
        Self {
            program: PathBuf::from("mksquashfs"),
            args: vec!["-noappend".to_owned()],
        }
    }
}

impl Mksquashfs {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl Compressor for Mksquashfs {
    fn name(&self) -> &str {
        "mksquashfs"
    }

    fn compress(&self, source_dir: &Path, dest: &Path) -> Result<(), StoreError> {
        debug!(
            "compressing {} with {}",
            source_dir.display(),
            self.program.display()
        );
        let output = Command::new(&self.program)
            .arg(source_dir)
            .arg(dest)
            .args(&self.args)
            .output()
            .map_err(|e| StoreError::ToolFailed {
                tool: self.program.display().to_string(),
                status: "failed to start".to_owned(),
                output: e.to_string(),
            })?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(StoreError::ToolFailed {
                tool: self.program.display().to_string(),
                status: output.status.to_string(),
                output: combined.trim().to_owned(),
            });
        }
        Ok(())
    }
}

/// Tar extraction with whiteout handling.
///
/// `.wh.<name>` deletes `<name>` from the tree built so far and
/// `.wh..wh..opq` empties its directory. Other `.wh..wh.*` entries are
/// bookkeeping and are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarExtractor;

impl Extractor for TarExtractor {
    fn extract(&self, archive: &mut dyn Read, dest: &Path) -> Result<(), StoreError> {
        fs::create_dir_all(dest).with_path(dest)?;
        let mut ar = tar::Archive::new(archive);
        ar.set_preserve_permissions(true);
        ar.set_preserve_mtime(true);
        ar.set_unpack_xattrs(false);
        ar.set_overwrite(true);

        for entry in ar.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.into_owned();
            let Some(file_name) = path.file_name().and_then(|f| f.to_str()) else {
                entry.unpack_in(dest)?;
                continue;
            };

            if file_name == OPAQUE_MARKER {
                let dir = confined_join(dest, path.parent().unwrap_or(Path::new("")))?;
                clear_dir(&dir)?;
                continue;
            }
            if file_name.starts_with(WHITEOUT_META_PREFIX) {
                continue;
            }
            if let Some(hidden) = file_name.strip_prefix(WHITEOUT_PREFIX) {
                if hidden.is_empty() || hidden == "." || hidden == ".." {
                    return Err(StoreError::UnsafePath(path.display().to_string()));
                }
                let dir = confined_join(dest, path.parent().unwrap_or(Path::new("")))?;
                // The hidden entry itself may be a symlink; it is removed, not followed.
                remove_any(&dir.join(hidden))?;
                continue;
            }

            if !entry.unpack_in(dest)? {
                warn!("skipped archive entry outside target: {}", path.display());
            }
        }
        Ok(())
    }
}

/// Join an archive-relative directory path onto `root`, rejecting anything
/// that could escape it: `..`, absolute paths, and symlinks anywhere below
/// `root`, since an earlier entry of the same diff may have planted one.
fn confined_join(root: &Path, rel: &Path) -> Result<PathBuf, StoreError> {
    let escape = || StoreError::UnsafePath(rel.display().to_string());
    let mut out = root.to_path_buf();
    let mut exists = true;
    for component in rel.components() {
        match component {
            Component::Normal(c) => out.push(c),
            Component::CurDir => continue,
            _ => return Err(escape()),
        }
        if !exists {
            continue;
        }
        match fs::symlink_metadata(&out) {
            Ok(meta) if meta.file_type().is_symlink() => return Err(escape()),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => exists = false,
            Err(e) => return Err(StoreError::IoAt { path: out, source: e }),
        }
    }
    Ok(out)
}

fn remove_any(path: &Path) -> Result<(), StoreError> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => Err(e),
    };
    result.with_path(path)
}

fn clear_dir(dir: &Path) -> Result<(), StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StoreError::IoAt {
            path: dir.to_path_buf(),
            source: e,
        }),
    };
    for entry in entries {
        remove_any(&entry.with_path(dir)?.path())?;
    }
    Ok(())
}
