use crate::{IoResultExt, StoreError};
use serde::{Deserialize, Serialize};
use std::fs::{self, DirBuilder};
use std::io::Write;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use strata_schema::{ChainId, Layer, LayerId};
use tempfile::NamedTempFile;

/// Current repository format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout of a strata repository.
///
/// ```text
/// <root>/manifests/   <manifest-id>.json files, <tag>.json symlinks
/// <root>/layers/      <sha512>.squashfs blobs
/// <root>/mnt/         <sha512>/ read-only layer mountpoints
/// <root>/tmp/         staging files, overlay scratch dirs, build cache and locks
/// ```
///
/// All four subtrees are created `0700` by [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct RepoLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl RepoLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    #[inline]
    pub fn layers_dir(&self) -> PathBuf {
        self.root.join("layers")
    }

    #[inline]
    pub fn mnt_dir(&self) -> PathBuf {
        self.root.join("mnt")
    }

    #[inline]
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Path of a manifest file or tag symlink.
    #[inline]
    pub fn manifest_path(&self, name: &str) -> PathBuf {
        self.manifests_dir().join(format!("{name}.json"))
    }

    #[inline]
    pub fn blob_path(&self, layer: &Layer) -> PathBuf {
        self.layers_dir().join(layer.blob_name())
    }

    #[inline]
    pub fn layer_mountpoint(&self, id: &LayerId) -> PathBuf {
        self.mnt_dir().join(id.as_str())
    }

    /// Build cache record for a foreign layer chain, keyed by its terminal id.
    #[inline]
    pub fn layer_cache_path(&self, terminal: &ChainId) -> PathBuf {
        self.tmp_dir().join(format!("layer-{terminal}.json"))
    }

    /// Lock file guarding [`layer_cache_path`](Self::layer_cache_path).
    #[inline]
    pub fn layer_lock_path(&self, terminal: &ChainId) -> PathBuf {
        self.tmp_dir().join(format!("layer-{terminal}.json.lock"))
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        let mut builder = DirBuilder::new();
        builder.recursive(true).mode(0o700);
        for dir in [
            self.root.clone(),
            self.manifests_dir(),
            self.layers_dir(),
            self.mnt_dir(),
            self.tmp_dir(),
        ] {
            builder.create(&dir).with_path(&dir)?;
        }

        let version_path = self.root.join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let mut tmp = NamedTempFile::new_in(self.tmp_dir())?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&self.root)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.root.join(VERSION_FILE);
        let content = fs::read_to_string(&version_path).with_path(&version_path)?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn layout_paths_are_correct() {
        let layout = RepoLayout::new("/r");
        assert_eq!(layout.manifests_dir(), PathBuf::from("/r/manifests"));
        assert_eq!(layout.layers_dir(), PathBuf::from("/r/layers"));
        assert_eq!(layout.mnt_dir(), PathBuf::from("/r/mnt"));
        assert_eq!(layout.tmp_dir(), PathBuf::from("/r/tmp"));
        assert_eq!(
            layout.manifest_path("v1"),
            PathBuf::from("/r/manifests/v1.json")
        );
        assert_eq!(
            layout.blob_path(&Layer::squashfs("abc", 1)),
            PathBuf::from("/r/layers/abc.squashfs")
        );
        assert_eq!(
            layout.layer_mountpoint(&LayerId::new("abc")),
            PathBuf::from("/r/mnt/abc")
        );
        assert_eq!(
            layout.layer_lock_path(&ChainId::new("c")),
            PathBuf::from("/r/tmp/layer-c.json.lock")
        );
    }

    #[test]
    fn initialize_creates_private_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RepoLayout::new(dir.path().join("repo"));
        layout.initialize().unwrap();

        for d in [
            layout.manifests_dir(),
            layout.layers_dir(),
            layout.mnt_dir(),
            layout.tmp_dir(),
        ] {
            assert!(d.is_dir());
            let mode = fs::metadata(&d).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700, "{} has mode {mode:o}", d.display());
        }
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RepoLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        layout.verify_version().unwrap();
    }

    #[test]
    fn newer_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RepoLayout::new(dir.path());
        layout.initialize().unwrap();
        fs::write(dir.path().join("version"), r#"{"format_version": 99}"#).unwrap();
        assert!(matches!(
            layout.initialize(),
            Err(StoreError::VersionMismatch { found: 99, .. })
        ));
    }
}
