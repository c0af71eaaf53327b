//! Foreign image history and diffs.

use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use strata_schema::{validate_chain_id, ChainId};
use tracing::debug;

/// One entry of a foreign image's layer history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryLayer {
    pub id: ChainId,
    /// Non-empty when this entry closes a layer boundary.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl HistoryLayer {
    pub fn is_boundary(&self) -> bool {
        !self.tags.is_empty()
    }
}

/// Reader of a foreign image format.
pub trait LayerSource: Send + Sync {
    /// Layer history of `image`, base first.
    fn history(&self, image: &str) -> Result<Vec<HistoryLayer>, CoreError>;

    /// Tar stream of the changes `id` makes on top of `parent`.
    fn diff(
        &self,
        id: &ChainId,
        parent: Option<&ChainId>,
    ) -> Result<Box<dyn Read + Send>, CoreError>;
}

const HISTORY_FILE: &str = "history.json";

/// An exported image tree:
///
/// ```text
/// <root>/<image>/history.json   [{"id": "...", "tags": [...]}, ...] base first
/// <root>/<image>/<id>.tar       diff of each history entry
/// ```
///
/// Diffs are looked up by id across every exported image, so layers shared
/// between images need only be exported once.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn image_dir(&self, image: &str) -> Result<PathBuf, CoreError> {
        validate_chain_id(image)
            .map_err(|_| CoreError::Source(format!("invalid image name '{image}'")))?;
        Ok(self.root.join(image))
    }

    fn find_diff(&self, id: &ChainId) -> Result<Option<PathBuf>, CoreError> {
        let file_name = format!("{id}.tar");
        let mut dirs: Vec<PathBuf> = fs::read_dir(&self.root)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();
        Ok(dirs
            .into_iter()
            .map(|d| d.join(&file_name))
            .find(|p| p.is_file()))
    }
}

impl LayerSource for DirectorySource {
    fn history(&self, image: &str) -> Result<Vec<HistoryLayer>, CoreError> {
        let path = self.image_dir(image)?.join(HISTORY_FILE);
        let content = match fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CoreError::ImageNotFound(image.to_owned()));
            }
            Err(e) => return Err(e.into()),
        };
        let history: Vec<HistoryLayer> = serde_json::from_slice(&content)
            .map_err(|e| CoreError::Source(format!("{}: {e}", path.display())))?;
        for entry in &history {
            validate_chain_id(&entry.id)?;
        }
        debug!("{image}: {} history entries", history.len());
        Ok(history)
    }

    fn diff(
        &self,
        id: &ChainId,
        parent: Option<&ChainId>,
    ) -> Result<Box<dyn Read + Send>, CoreError> {
        validate_chain_id(id)?;
        let Some(path) = self.find_diff(id)? else {
            return Err(CoreError::Source(format!(
                "no diff for layer {id} under {}",
                self.root.display()
            )));
        };
        match parent {
            Some(parent) => debug!("diff {id} (parent {parent}) from {}", path.display()),
            None => debug!("diff {id} from {}", path.display()),
        }
        Ok(Box::new(File::open(&path)?))
    }
}

/// Whether `dir` looks like a [`DirectorySource`] export of `image`.
pub fn has_export(dir: &Path, image: &str) -> bool {
    dir.join(image).join(HISTORY_FILE).is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export(dir: &Path, image: &str, history: &str, diffs: &[&str]) {
        let image_dir = dir.join(image);
        fs::create_dir_all(&image_dir).unwrap();
        fs::write(image_dir.join(HISTORY_FILE), history).unwrap();
        for id in diffs {
            fs::write(image_dir.join(format!("{id}.tar")), id.as_bytes()).unwrap();
        }
    }

    #[test]
    fn reads_history_base_first() {
        let dir = tempfile::tempdir().unwrap();
        export(
            dir.path(),
            "alpine",
            r#"[{"id":"a"},{"id":"b","tags":["alpine:3"]}]"#,
            &[],
        );
        let source = DirectorySource::new(dir.path());
        let history = source.history("alpine").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, "a");
        assert!(!history[0].is_boundary());
        assert!(history[1].is_boundary());
        assert!(has_export(dir.path(), "alpine"));
    }

    #[test]
    fn missing_image_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectorySource::new(dir.path());
        assert!(matches!(
            source.history("ghost"),
            Err(CoreError::ImageNotFound(_))
        ));
    }

    #[test]
    fn image_name_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectorySource::new(dir.path());
        assert!(matches!(
            source.history("../etc"),
            Err(CoreError::Source(_))
        ));
    }

    #[test]
    fn diffs_are_found_across_exports() {
        let dir = tempfile::tempdir().unwrap();
        export(dir.path(), "one", r#"[{"id":"a"}]"#, &["a"]);
        export(dir.path(), "two", r#"[{"id":"a"},{"id":"b"}]"#, &["b"]);
        let source = DirectorySource::new(dir.path());

        let mut out = String::new();
        source
            .diff(&ChainId::new("a"), None)
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "a");
        assert!(source
            .diff(&ChainId::new("b"), Some(&ChainId::new("a")))
            .is_ok());
        assert!(matches!(
            source.diff(&ChainId::new("zzz"), None),
            Err(CoreError::Source(_))
        ));
    }

    #[test]
    fn malformed_history_is_a_source_error() {
        let dir = tempfile::tempdir().unwrap();
        export(dir.path(), "bad", "{", &[]);
        let source = DirectorySource::new(dir.path());
        assert!(matches!(source.history("bad"), Err(CoreError::Source(_))));
    }
}
