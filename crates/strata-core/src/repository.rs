use crate::buildcache::BuildCache;
use crate::source::LayerSource;
use crate::CoreError;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use strata_mount::{mount_read_only, Mounter, MountOutcome};
use strata_schema::{validate_layer_id, validate_tag, Image, Layer, ManifestId, Platform};
use strata_store::{
    Compressor, ContentStore, ManifestEntry, ManifestStore, RepoLayout, StoreError, TarExtractor,
};
use tracing::{debug, info};

/// A strata image repository rooted at one directory.
///
/// Combines the content store, the manifest store, and a [`Mounter`]. Mount
/// state is never cached here; the mounter is asked every time.
pub struct Repository {
    pub(crate) layout: RepoLayout,
    pub(crate) content: ContentStore,
    pub(crate) manifests: ManifestStore,
    pub(crate) mounter: Arc<dyn Mounter>,
    compressor: Arc<dyn Compressor>,
    pub(crate) platform: Platform,
}

impl Repository {
    /// Open the repository at `root`, creating its layout on first use, for
    /// the host platform.
    pub fn open(
        root: impl Into<PathBuf>,
        mounter: Arc<dyn Mounter>,
        compressor: Arc<dyn Compressor>,
    ) -> Result<Self, CoreError> {
        Self::open_for(root, mounter, compressor, Platform::host())
    }

    pub fn open_for(
        root: impl Into<PathBuf>,
        mounter: Arc<dyn Mounter>,
        compressor: Arc<dyn Compressor>,
        platform: Platform,
    ) -> Result<Self, CoreError> {
        let layout = RepoLayout::new(root);
        layout.initialize()?;
        debug!(
            "opened repository at {} for {platform}",
            layout.root().display()
        );
        Ok(Self {
            content: ContentStore::new(layout.clone()),
            manifests: ManifestStore::new(layout.clone(), platform.clone()),
            layout,
            mounter,
            compressor,
            platform,
        })
    }

    pub fn layout(&self) -> &RepoLayout {
        &self.layout
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn mounter(&self) -> &dyn Mounter {
        self.mounter.as_ref()
    }

    /// Load an image by manifest id or tag. `Ok(None)` when absent.
    pub fn lookup(&self, name: &str) -> Result<Option<Image>, CoreError> {
        Ok(self.lookup_entry(name)?.map(|entry| entry.image))
    }

    pub fn lookup_entry(&self, name: &str) -> Result<Option<ManifestEntry>, CoreError> {
        Ok(self.manifests.get(name)?)
    }

    pub fn resolve(&self, name: &str) -> Result<Option<ManifestId>, CoreError> {
        Ok(self.manifests.resolve(name)?)
    }

    /// Mount `layer` read-only under `mnt/` if it is not already mounted, and
    /// return the directory holding the layer's root.
    pub fn mount(&self, layer: &Layer) -> Result<PathBuf, CoreError> {
        validate_layer_id(&layer.id)?;
        let blob = self.content.blob_path(layer)?;
        let target = self.layout.layer_mountpoint(&layer.id);
        match mount_read_only(self.mounter.as_ref(), &blob, &target, layer.kind.fstype())? {
            MountOutcome::Mounted => info!("mounted layer {}", layer.id),
            MountOutcome::AlreadyMounted => debug!("layer {} already mounted", layer.id),
        }
        layer_root(&target, &layer.mountpoint)
    }

    /// Unmount a layer mounted by [`mount`](Self::mount). A layer that is not
    /// mounted is left alone.
    pub fn unmount(&self, layer: &Layer) -> Result<(), CoreError> {
        validate_layer_id(&layer.id)?;
        let target = self.layout.layer_mountpoint(&layer.id);
        if !self.mounter.is_mounted(&target)? {
            debug!("layer {} is not mounted", layer.id);
            return Ok(());
        }
        self.mounter.unmount(&target)?;
        if let Err(e) = fs::remove_dir(&target) {
            debug!("leaving mountpoint {}: {e}", target.display());
        }
        Ok(())
    }

    /// Compress `source_dir` into a new layer, stack it on `parent`, store the
    /// resulting manifest and point `tag` at it.
    pub fn create_image(
        &self,
        source_dir: &Path,
        tag: Option<&str>,
        parent: Option<&Image>,
    ) -> Result<(ManifestId, Image), CoreError> {
        if let Some(tag) = tag {
            validate_tag(tag)?;
        }
        let meta = fs::metadata(source_dir).map_err(|e| StoreError::IoAt {
            path: source_dir.to_path_buf(),
            source: e,
        })?;
        if !meta.is_dir() {
            return Err(CoreError::Source(format!(
                "{} is not a directory",
                source_dir.display()
            )));
        }

        let layer = self
            .content
            .put_with(|dest| self.compressor.compress(source_dir, dest))?;
        info!("created layer {} from {}", layer.id, source_dir.display());

        let image = Image::with_layer(parent, &self.platform, layer);
        let id = self.store_image(&image, tag)?;
        Ok((id, image))
    }

    /// Write `image` and optionally tag it.
    pub fn store_image(&self, image: &Image, tag: Option<&str>) -> Result<ManifestId, CoreError> {
        let id = self.manifests.put(image)?;
        if let Some(tag) = tag {
            self.manifests.tag(tag, &id)?;
        }
        Ok(id)
    }

    /// Point `tag` at the manifest `target` (an id or another tag) resolves to.
    pub fn tag(&self, tag: &str, target: &str) -> Result<ManifestId, CoreError> {
        let id = self
            .resolve(target)?
            .ok_or_else(|| CoreError::ImageNotFound(target.to_owned()))?;
        self.manifests.tag(tag, &id)?;
        Ok(id)
    }

    pub fn list(&self) -> Result<Vec<ManifestId>, CoreError> {
        Ok(self.manifests.list()?)
    }

    pub fn tags(&self) -> Result<Vec<(String, ManifestId)>, CoreError> {
        Ok(self.manifests.tags()?)
    }

    /// A build cache that stores its layers in this repository.
    pub fn build_cache(&self, source: Arc<dyn LayerSource>) -> BuildCache {
        BuildCache::new(
            self.layout.clone(),
            source,
            Arc::new(TarExtractor),
            Arc::clone(&self.compressor),
        )
    }
}

/// Join a layer's declared mountpoint onto the directory it is mounted at.
fn layer_root(target: &Path, mountpoint: &str) -> Result<PathBuf, CoreError> {
    let mut root = target.to_path_buf();
    for component in Path::new(mountpoint).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(c) => root.push(c),
            _ => {
                return Err(CoreError::Store(StoreError::UnsafePath(
                    mountpoint.to_owned(),
                )))
            }
        }
    }
    Ok(root)
}
