use crate::layout::RepoLayout;
use crate::{fsync_dir, IoResultExt, StoreError};
use serde_json::Value;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use strata_schema::{
    decode_manifest, is_content_hash, manifest_id, validate_tag, Image, ManifestId, Platform,
};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// A manifest read back from disk together with its verified id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub id: ManifestId,
    pub image: Image,
}

/// Manifest files keyed by content id, plus tag symlinks.
///
/// `manifests/<id>.json` is written once and never modified. A tag is a
/// symlink `manifests/<tag>.json -> <id>.json` that may be repointed.
pub struct ManifestStore {
    layout: RepoLayout,
    platform: Platform,
}

impl ManifestStore {
    /// `platform` is assigned to single-platform manifests when they are decoded.
    pub fn new(layout: RepoLayout, platform: Platform) -> Self {
        Self { layout, platform }
    }

    /// Write `image` in the current schema and return its id. Idempotent:
    /// an existing manifest with the same id is left untouched.
    pub fn put(&self, image: &Image) -> Result<ManifestId, StoreError> {
        let document = image.to_document();
        let id = manifest_id(&document)?;
        let dest = self.layout.manifest_path(&id);

        if dest.exists() {
            debug!("manifest {id} already stored");
            return Ok(id);
        }

        let content = serde_json::to_string_pretty(&document)?;
        let mut tmp = NamedTempFile::with_prefix_in("manifest-", self.layout.tmp_dir())?;
        tmp.write_all(content.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::IoAt {
            path: dest.clone(),
            source: e.error,
        })?;
        fsync_dir(&self.layout.manifests_dir())?;
        info!("wrote manifest {id}");

        Ok(id)
    }

    /// Resolve a manifest id or tag to a manifest id. `Ok(None)` when no such
    /// manifest or tag exists.
    pub fn resolve(&self, name: &str) -> Result<Option<ManifestId>, StoreError> {
        let path = self.layout.manifest_path(name);
        let meta = match fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::IoAt { path, source: e }),
        };

        if !meta.file_type().is_symlink() {
            if is_content_hash(name) {
                return Ok(Some(ManifestId::new(name)));
            }
            return Err(StoreError::CorruptManifest {
                name: name.to_owned(),
                reason: "tag is a regular file, expected a symlink".to_owned(),
            });
        }

        let target = fs::read_link(&path).with_path(&path)?;
        let id = target
            .file_name()
            .and_then(|f| f.to_str())
            .and_then(|f| f.strip_suffix(".json"))
            .filter(|id| is_content_hash(id))
            .ok_or_else(|| StoreError::CorruptManifest {
                name: name.to_owned(),
                reason: format!("tag points at unexpected target {}", target.display()),
            })?;
        Ok(Some(ManifestId::new(id)))
    }

    /// Load a manifest by id or tag, verifying that its content matches its id.
    pub fn get(&self, name: &str) -> Result<Option<ManifestEntry>, StoreError> {
        let Some(id) = self.resolve(name)? else {
            return Ok(None);
        };
        let path = self.layout.manifest_path(&id);
        let content = match fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound && id.as_str() == name => {
                return Ok(None);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::CorruptManifest {
                    name: name.to_owned(),
                    reason: format!("tag points at missing manifest {id}"),
                });
            }
            Err(e) => return Err(StoreError::IoAt { path, source: e }),
        };

        let corrupt = |reason: String| StoreError::CorruptManifest {
            name: id.to_string(),
            reason,
        };
        let value: Value = serde_json::from_slice(&content).map_err(|e| corrupt(e.to_string()))?;

        let actual = manifest_id(&value)?;
        if actual != id {
            return Err(StoreError::IntegrityFailure {
                name: path.display().to_string(),
                expected: id.to_string(),
                actual: actual.to_string(),
            });
        }

        let image = decode_manifest(value, &self.platform).map_err(|e| corrupt(e.to_string()))?;
        Ok(Some(ManifestEntry { id, image }))
    }

    pub fn exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.resolve(name)?.is_some())
    }

    /// Point `tag` at manifest `id`, replacing any previous target atomically.
    pub fn tag(&self, tag: &str, id: &ManifestId) -> Result<(), StoreError> {
        validate_tag(tag)?;
        if !self.layout.manifest_path(id).is_file() {
            return Err(StoreError::ManifestNotFound(id.to_string()));
        }

        // Build the link in a private scratch dir, then rename it over the old tag.
        let scratch = tempfile::Builder::new()
            .prefix("tag-")
            .tempdir_in(self.layout.tmp_dir())?;
        let staged = scratch.path().join("link");
        std::os::unix::fs::symlink(format!("{id}.json"), &staged).with_path(&staged)?;

        let dest = self.layout.manifest_path(tag);
        fs::rename(&staged, &dest).with_path(&dest)?;
        fsync_dir(&self.layout.manifests_dir())?;
        info!("tagged {id} as {tag}");
        Ok(())
    }

    /// All stored manifest ids, sorted.
    pub fn list(&self) -> Result<Vec<ManifestId>, StoreError> {
        let mut ids = Vec::new();
        for (name, is_link) in self.entries()? {
            if !is_link && is_content_hash(&name) {
                ids.push(ManifestId::new(name));
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// All tags and the manifest each points at, sorted by tag.
    pub fn tags(&self) -> Result<Vec<(String, ManifestId)>, StoreError> {
        let mut tags = Vec::new();
        for (name, is_link) in self.entries()? {
            if is_link {
                if let Some(id) = self.resolve(&name)? {
                    tags.push((name, id));
                }
            }
        }
        tags.sort();
        Ok(tags)
    }

    fn entries(&self) -> Result<Vec<(String, bool)>, StoreError> {
        let dir = self.layout.manifests_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in fs::read_dir(&dir).with_path(&dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = Path::new(&file_name)
                .to_str()
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            out.push((name.to_owned(), entry.file_type()?.is_symlink()));
        }
        Ok(out)
    }
}
