//! Memoized conversion of foreign layer chains into repository layers.
//!
//! A chain is the ordered list of foreign layer ids whose diffs, applied in
//! sequence, reconstruct one filesystem tree. The result of compressing that
//! tree is recorded in `tmp/layer-<terminal>.json`, keyed by the last id of
//! the chain, and every build of a chain runs under the exclusive lock
//! `tmp/layer-<terminal>.json.lock`, so a chain is compressed at most once
//! across every process sharing the repository.

use crate::concurrency::{shutdown_requested, LayerLock};
use crate::lifecycle::{validate_transition, BuildPhase};
use crate::source::LayerSource;
use crate::CoreError;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use strata_schema::{is_content_hash, validate_chain_id, ChainId, Layer};
use strata_store::{Compressor, ContentStore, Extractor, RepoLayout};
use tempfile::NamedTempFile;
use tracing::{debug, info};

pub struct BuildCache {
    layout: RepoLayout,
    content: ContentStore,
    source: Arc<dyn LayerSource>,
    extractor: Arc<dyn Extractor>,
    compressor: Arc<dyn Compressor>,
    cancelled: fn() -> bool,
}

/// Current phase of one build, with every step checked.
struct Progress<'a> {
    terminal: &'a ChainId,
    phase: BuildPhase,
}

impl Progress<'_> {
    fn advance(&mut self, to: BuildPhase) -> Result<(), CoreError> {
        validate_transition(self.phase, to)?;
        debug!("layer {}: {} -> {to}", self.terminal, self.phase);
        self.phase = to;
        Ok(())
    }
}

impl BuildCache {
    pub fn new(
        layout: RepoLayout,
        source: Arc<dyn LayerSource>,
        extractor: Arc<dyn Extractor>,
        compressor: Arc<dyn Compressor>,
    ) -> Self {
        Self {
            content: ContentStore::new(layout.clone()),
            layout,
            source,
            extractor,
            compressor,
            cancelled: shutdown_requested,
        }
    }

    /// Replace the cancellation check consulted between diff applications.
    /// Defaults to the process-wide shutdown flag.
    #[must_use]
    pub fn with_cancel_check(mut self, cancelled: fn() -> bool) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Build, or fetch from the cache, the layer for `chain`.
    pub fn build_layer(&self, chain: &[ChainId]) -> Result<Layer, CoreError> {
        self.build_layer_on(None, chain)
    }

    /// As [`build_layer`](Self::build_layer), where the first diff of `chain`
    /// is taken relative to the foreign layer `parent`.
    pub fn build_layer_on(
        &self,
        parent: Option<&ChainId>,
        chain: &[ChainId],
    ) -> Result<Layer, CoreError> {
        let terminal = chain.last().ok_or(CoreError::EmptyChain)?;
        for id in chain {
            validate_chain_id(id)?;
        }
        let mut progress = Progress {
            terminal,
            phase: BuildPhase::Unbuilt,
        };

        progress.advance(BuildPhase::Locking)?;
        let _lock = LayerLock::acquire(&self.layout.layer_lock_path(terminal))?;

        if let Some(layer) = self.cached(terminal)? {
            progress.advance(BuildPhase::CacheHit)?;
            progress.advance(BuildPhase::Done)?;
            debug!("layer {terminal} served from cache as {}", layer.id);
            return Ok(layer);
        }
        progress.advance(BuildPhase::CacheMiss)?;

        progress.advance(BuildPhase::Extracting)?;
        let scratch = tempfile::Builder::new()
            .prefix("extract-")
            .tempdir_in(self.layout.tmp_dir())?;
        let mut previous = parent;
        for id in chain {
            if (self.cancelled)() {
                return Err(CoreError::Cancelled);
            }
            let mut diff = self.source.diff(id, previous)?;
            self.extractor.extract(&mut diff, scratch.path())?;
            previous = Some(id);
        }

        progress.advance(BuildPhase::Compressing)?;
        let layer = self
            .content
            .put_with(|dest| self.compressor.compress(scratch.path(), dest))?;

        progress.advance(BuildPhase::Caching)?;
        self.write_cache(terminal, &layer)?;
        progress.advance(BuildPhase::Done)?;
        info!(
            "built layer {} from {} diffs ending at {terminal}",
            layer.id,
            chain.len()
        );
        Ok(layer)
    }

    /// The cached layer for `terminal`. A cache file that cannot be decoded,
    /// or that names a blob missing from the store, is an error.
    fn cached(&self, terminal: &ChainId) -> Result<Option<Layer>, CoreError> {
        let path = self.layout.layer_cache_path(terminal);
        let content = match fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let layer: Layer = serde_json::from_slice(&content).map_err(|e| CoreError::CorruptCache {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        if !is_content_hash(&layer.id) {
            return Err(CoreError::CorruptCache {
                path,
                reason: format!("invalid layer id '{}'", layer.id),
            });
        }
        if !self.content.exists(&layer) {
            return Err(CoreError::CorruptCache {
                path,
                reason: format!("layer {} is not in the store", layer.id),
            });
        }
        Ok(Some(layer))
    }

    fn write_cache(&self, terminal: &ChainId, layer: &Layer) -> Result<(), CoreError> {
        let path = self.layout.layer_cache_path(terminal);
        let mut tmp = NamedTempFile::with_prefix_in("cache-", self.layout.tmp_dir())?;
        serde_json::to_writer(&mut tmp, layer)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Whether a cache record exists for `terminal`.
    pub fn is_cached(&self, terminal: &ChainId) -> bool {
        self.layout.layer_cache_path(terminal).is_file()
    }
}
