//! On-disk storage for strata: repository layout, content-addressed layer
//! blobs, manifests with tag symlinks, and the external compressor and archive
//! extraction seams.
//!
//! Nothing under `manifests/` or `layers/` is modified in place. New content is
//! staged in `tmp/` and renamed into its final location.

pub mod archive;
pub mod content;
pub mod layout;
pub mod manifests;

pub use archive::{Compressor, Extractor, Mksquashfs, TarExtractor};
pub use content::ContentStore;
pub use layout::{RepoLayout, STORE_FORMAT_VERSION};
pub use manifests::{ManifestEntry, ManifestStore};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), StoreError> {
    let f = std::fs::File::open(dir).with_path(dir)?;
    f.sync_all().with_path(dir)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Schema(#[from] strata_schema::SchemaError),
    #[error("layer not found: {0}")]
    LayerNotFound(String),
    #[error("manifest not found: {0}")]
    ManifestNotFound(String),
    #[error("corrupt manifest '{name}': {reason}")]
    CorruptManifest { name: String, reason: String },
    #[error("integrity check failed for '{name}': expected {expected}, got {actual}")]
    IntegrityFailure {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("{tool} failed ({status}): {output}")]
    ToolFailed {
        tool: String,
        status: String,
        output: String,
    },
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("refusing to write outside the target directory: {0}")]
    UnsafePath(String),
}

pub(crate) trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T, StoreError>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T, StoreError> {
        self.map_err(|source| StoreError::IoAt {
            path: path.into(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_io_at_includes_path() {
        let e = StoreError::IoAt {
            path: PathBuf::from("/r/layers/abc"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(e.to_string().contains("/r/layers/abc"));
    }

    #[test]
    fn store_error_display_tool_failed() {
        let e = StoreError::ToolFailed {
            tool: "mksquashfs".to_owned(),
            status: "exit status: 1".to_owned(),
            output: "no space left".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("mksquashfs"));
        assert!(msg.contains("no space left"));
    }

    #[test]
    fn store_error_display_integrity_failure() {
        let e = StoreError::IntegrityFailure {
            name: "m".to_owned(),
            expected: "exp".to_owned(),
            actual: "act".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("exp"));
        assert!(msg.contains("act"));
    }

    #[test]
    fn store_error_display_version_mismatch() {
        let e = StoreError::VersionMismatch {
            expected: 2,
            found: 1,
        };
        let msg = e.to_string();
        assert!(msg.contains('2'));
        assert!(msg.contains('1'));
    }
}
