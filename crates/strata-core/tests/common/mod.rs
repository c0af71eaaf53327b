#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use strata_core::Repository;
use strata_mount::MockMounter;
use strata_schema::Platform;
use strata_store::{Compressor, StoreError};

/// Stands in for mksquashfs: writes every path of the source tree, sorted,
/// followed by file contents. Equal trees give equal bytes.
#[derive(Default)]
pub struct TreeCompressor {
    calls: AtomicUsize,
}

impl TreeCompressor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<(String, Option<Vec<u8>>)>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        let rel = path.strip_prefix(root).unwrap().to_string_lossy().into_owned();
        if path.is_dir() {
            out.push((rel, None));
            walk(root, &path, out);
        } else {
            out.push((rel, Some(fs::read(&path).unwrap())));
        }
    }
}

impl Compressor for TreeCompressor {
    fn name(&self) -> &str {
        "tree"
    }

    fn compress(&self, source_dir: &Path, dest: &Path) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut entries = Vec::new();
        walk(source_dir, source_dir, &mut entries);
        entries.sort();
        let mut bytes = Vec::new();
        for (path, content) in entries {
            bytes.extend_from_slice(path.as_bytes());
            bytes.push(b'\n');
            if let Some(content) = content {
                bytes.extend_from_slice(&content);
                bytes.push(b'\n');
            }
        }
        fs::write(dest, bytes)?;
        Ok(())
    }
}

pub fn amd64() -> Platform {
    Platform::new("amd64", "linux")
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub mounter: Arc<MockMounter>,
    pub compressor: Arc<TreeCompressor>,
    pub repo: Repository,
}

pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mounter = Arc::new(MockMounter::new());
    let compressor = Arc::new(TreeCompressor::default());
    let repo = Repository::open_for(
        dir.path().join("r"),
        mounter.clone(),
        compressor.clone(),
        amd64(),
    )
    .unwrap();
    Fixture {
        dir,
        mounter,
        compressor,
        repo,
    }
}

/// Create a source tree under `base/name` holding `files` (path, content).
pub fn tree(base: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let root = base.join(name);
    fs::create_dir_all(&root).unwrap();
    for (path, content) in files {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    root
}

/// Names in `tmp/` starting with `prefix`.
pub fn tmp_entries(repo: &Repository, prefix: &str) -> Vec<String> {
    fs::read_dir(repo.layout().tmp_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.starts_with(prefix))
        .collect()
}

/// A tar stream of regular files.
pub fn tar_of(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_size(content.len() as u64);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap()
}
