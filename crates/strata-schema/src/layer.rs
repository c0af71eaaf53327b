use crate::types::LayerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Digest algorithm recorded in [`Layer::hashes`] and used for layer ids.
pub const HASH_ALGORITHM: &str = "sha512";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    #[default]
    Squashfs,
}

impl LayerType {
    /// File name extension of blobs of this type under `layers/`.
    pub fn extension(self) -> &'static str {
        match self {
            LayerType::Squashfs => "squashfs",
        }
    }

    /// Filesystem type passed to `mount(2)`.
    pub fn fstype(self) -> &'static str {
        match self {
            LayerType::Squashfs => "squashfs",
        }
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.fstype())
    }
}

fn default_mountpoint() -> String {
    "/".to_owned()
}

/// An immutable, content-addressed compressed filesystem.
///
/// `id` is the sha512 of the compressed blob, so two layers with equal ids
/// always refer to byte-identical content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    #[serde(rename = "type", default)]
    pub kind: LayerType,
    #[serde(default)]
    pub length: u64,
    /// Path within the container filesystem at which the layer applies.
    #[serde(default = "default_mountpoint")]
    pub mountpoint: String,
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
}

impl Layer {
    /// Describe a whole-filesystem squashfs blob of `length` bytes whose sha512 is `digest`.
    pub fn squashfs(digest: impl Into<String>, length: u64) -> Self {
        let digest = digest.into();
        let mut hashes = BTreeMap::new();
        hashes.insert(HASH_ALGORITHM.to_owned(), digest.clone());
        Self {
            id: LayerId::new(digest),
            kind: LayerType::Squashfs,
            length,
            mountpoint: default_mountpoint(),
            hashes,
        }
    }

    /// File name of the blob under `layers/`.
    pub fn blob_name(&self) -> String {
        format!("{}.{}", self.id, self.kind.extension())
    }

    pub fn sha512(&self) -> Option<&str> {
        self.hashes.get(HASH_ALGORITHM).map(String::as_str)
    }
}
