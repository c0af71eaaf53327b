use crate::buildcache::BuildCache;
use crate::repository::Repository;
use crate::source::LayerSource;
use crate::CoreError;
use std::sync::Arc;
use strata_schema::{ChainId, Image, ManifestId, Platform};
use tracing::{info, warn};

/// Turns a foreign image into a strata image.
///
/// Walks the image history base first, collecting layer ids into a running
/// chain. Every tagged entry closes the chain: the chain is built into one
/// repository layer and a new chain starts. The final entry always closes the
/// chain, tagged or not.
pub struct ImageBuilder {
    source: Arc<dyn LayerSource>,
    cache: BuildCache,
    platform: Platform,
}

impl ImageBuilder {
    pub fn new(source: Arc<dyn LayerSource>, cache: BuildCache, platform: Platform) -> Self {
        Self {
            source,
            cache,
            platform,
        }
    }

    /// Builder whose layers land in `repo`.
    pub fn for_repository(repo: &Repository, source: Arc<dyn LayerSource>) -> Self {
        let cache = repo.build_cache(Arc::clone(&source));
        Self::new(source, cache, repo.platform().clone())
    }

    /// Convert the history of `image` into layers, base first.
    ///
    /// Each tagged history entry closes a layer built from the entries since
    /// the previous one. Untagged entries at the top of the history are not
    /// dropped: they form one final layer, and a warning is logged.
    pub fn build(&self, image: &str) -> Result<Image, CoreError> {
        let history = self.source.history(image)?;
        if history.is_empty() {
            return Err(CoreError::EmptyImage(image.to_owned()));
        }

        let mut layers = Vec::new();
        let mut chain: Vec<ChainId> = Vec::new();
        let mut parent: Option<ChainId> = None;
        let last = history.len() - 1;

        for (i, entry) in history.into_iter().enumerate() {
            let boundary = entry.is_boundary();
            chain.push(entry.id);
            if !boundary && i != last {
                continue;
            }
            if !boundary {
                warn!(
                    "{image}: closing untagged tail of {} layer(s) at the top of the history",
                    chain.len()
                );
            }
            layers.push(self.cache.build_layer_on(parent.as_ref(), &chain)?);
            parent = chain.pop();
            chain.clear();
        }

        info!("{image}: {} layer(s) for {}", layers.len(), self.platform);
        Ok(Image::new(self.platform.clone(), layers))
    }

    /// Build `image`, store its manifest in `repo` and optionally tag it.
    pub fn build_into(
        &self,
        repo: &Repository,
        image: &str,
        tag: Option<&str>,
    ) -> Result<(ManifestId, Image), CoreError> {
        let built = self.build(image)?;
        let id = repo.store_image(&built, tag)?;
        Ok((id, built))
    }
}
