use crate::layout::RepoLayout;
use crate::{fsync_dir, IoResultExt, StoreError};
use sha2::{Digest, Sha512};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use strata_schema::{Layer, LayerId, LayerType};
use tempfile::NamedTempFile;
use tracing::debug;

/// Content-addressed store of compressed layer blobs.
///
/// Blobs are staged in `tmp/`, hashed with sha512, and renamed to
/// `layers/<sha512>.<ext>`. The final name is a function of the content only,
/// so storing the same bytes twice leaves exactly one blob.
pub struct ContentStore {
    layout: RepoLayout,
}

/// Writer adapter that hashes everything passing through it.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha512,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha512::new(),
            written: 0,
        }
    }

    fn finish(self) -> (W, String, u64) {
        (self.inner, hex::encode(self.hasher.finalize()), self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl ContentStore {
    pub fn new(layout: RepoLayout) -> Self {
        Self { layout }
    }

    /// Store a blob streamed from `reader`, hashing while it is written.
    pub fn put_stream(&self, reader: &mut dyn Read) -> Result<Layer, StoreError> {
        let tmp = NamedTempFile::with_prefix_in("blob-", self.layout.tmp_dir())?;
        let mut writer = HashingWriter::new(tmp);
        io::copy(reader, &mut writer)?;
        let (tmp, digest, length) = writer.finish();
        self.commit(tmp, &digest, length)
    }

    /// Store a blob produced by `produce`, which is handed a staging path in
    /// `tmp/` to write. External tools that insist on writing to a path use
    /// this form. The staging file is removed if `produce` fails.
    pub fn put_with<F>(&self, produce: F) -> Result<Layer, StoreError>
    where
        F: FnOnce(&Path) -> Result<(), StoreError>,
    {
        let tmp = NamedTempFile::with_prefix_in("squashfs-", self.layout.tmp_dir())?;
        produce(tmp.path())?;

        let mut file = File::open(tmp.path()).with_path(tmp.path())?;
        let mut writer = HashingWriter::new(io::sink());
        io::copy(&mut file, &mut writer).with_path(tmp.path())?;
        let (_, digest, length) = writer.finish();
        self.commit(tmp, &digest, length)
    }

    fn commit(&self, tmp: NamedTempFile, digest: &str, length: u64) -> Result<Layer, StoreError> {
        let layer = Layer::squashfs(digest, length);
        let dest = self.layout.blob_path(&layer);

        if dest.exists() {
            debug!("layer {} already stored, discarding staged copy", layer.id);
            return Ok(layer);
        }

        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| StoreError::IoAt {
            path: dest.clone(),
            source: e.error,
        })?;
        fsync_dir(&self.layout.layers_dir())?;
        debug!("stored layer {} ({length} bytes)", layer.id);

        Ok(layer)
    }

    pub fn exists(&self, layer: &Layer) -> bool {
        self.layout.blob_path(layer).exists()
    }

    /// Path of a stored blob, or `LayerNotFound` if it is absent.
    pub fn blob_path(&self, layer: &Layer) -> Result<PathBuf, StoreError> {
        let path = self.layout.blob_path(layer);
        match fs::metadata(&path) {
            Ok(_) => Ok(path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::LayerNotFound(layer.id.to_string()))
            }
            Err(e) => Err(StoreError::IoAt { path, source: e }),
        }
    }

    /// Re-hash a stored blob and compare against its id.
    pub fn verify(&self, layer: &Layer) -> Result<(), StoreError> {
        let path = self.blob_path(layer)?;
        let mut file = File::open(&path).with_path(&path)?;
        let mut writer = HashingWriter::new(io::sink());
        io::copy(&mut file, &mut writer).with_path(&path)?;
        let (_, actual, _) = writer.finish();
        if actual != layer.id.as_str() {
            return Err(StoreError::IntegrityFailure {
                name: layer.blob_name(),
                expected: layer.id.to_string(),
                actual,
            });
        }
        Ok(())
    }

    /// Ids of all stored blobs, sorted.
    pub fn list(&self) -> Result<Vec<LayerId>, StoreError> {
        let dir = self.layout.layers_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let suffix = format!(".{}", LayerType::Squashfs.extension());
        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir).with_path(&dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(id) = name.strip_suffix(&suffix) {
                    ids.push(LayerId::new(id));
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
