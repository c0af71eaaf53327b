//! Image manifests and their on-disk schema revisions.
//!
//! Three document shapes exist on disk:
//!
//! - legacy: `{"version": "v1", "layers": [{"id", "type"}]}` with blob-name ids
//! - `schema = "strata/image.v1"`: a flat, fully described layer list
//! - `schema = "strata/image.v2"`: one layer list per platform (`rootfs`)
//!
//! Everything is decoded into the current [`Image`] through the pure `upgrade_*`
//! functions; new manifests are always written as v2. Layer lists are ordered
//! base first, topmost last.

use crate::identity::manifest_id;
use crate::layer::{Layer, LayerType, HASH_ALGORITHM};
use crate::types::{is_content_hash, LayerId, ManifestId};
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Value of the `version` field in legacy documents.
pub const LEGACY_VERSION: &str = "v1";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
}

impl Platform {
    pub fn new(architecture: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            architecture: architecture.into(),
            os: os.into(),
        }
    }

    /// The platform this binary was built for, using OCI architecture names.
    pub fn host() -> Self {
        Self::new(
            oci_architecture(std::env::consts::ARCH, cfg!(target_endian = "little")),
            std::env::consts::OS,
        )
    }
}

/// Map a Rust target architecture onto its OCI name.
fn oci_architecture(arch: &str, little_endian: bool) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" if little_endian => "ppc64le",
        "powerpc64" => "ppc64",
        other => other,
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::host()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rootfs {
    pub platform: Platform,
    pub layers: Vec<Layer>,
}

/// Current in-memory image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Image {
    pub rootfs: Vec<Rootfs>,
}

impl Image {
    pub fn new(platform: Platform, layers: Vec<Layer>) -> Self {
        Self {
            rootfs: vec![Rootfs { platform, layers }],
        }
    }

    /// Layers for `platform`, base first.
    pub fn layers_for(&self, platform: &Platform) -> Result<&[Layer], SchemaError> {
        self.rootfs
            .iter()
            .find(|r| r.platform == *platform)
            .map(|r| r.layers.as_slice())
            .ok_or_else(|| SchemaError::PlatformNotFound(platform.clone()))
    }

    /// A new image equal to `parent` (or empty) with `layer` stacked on top of
    /// the `platform` layer list. The parent is left untouched.
    pub fn with_layer(parent: Option<&Image>, platform: &Platform, layer: Layer) -> Self {
        let mut image = parent.cloned().unwrap_or_default();
        if let Some(rootfs) = image.rootfs.iter_mut().find(|r| r.platform == *platform) {
            rootfs.layers.push(layer);
        } else {
            image.rootfs.push(Rootfs {
                platform: platform.clone(),
                layers: vec![layer],
            });
        }
        image
    }

    pub fn to_document(&self) -> ManifestDocument {
        ManifestDocument::V2(self.clone())
    }

    /// Content id of this image when written in the current schema.
    pub fn id(&self) -> Result<ManifestId, SchemaError> {
        Ok(manifest_id(&self.to_document())?)
    }
}

/// Single-platform manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageV1 {
    pub layers: Vec<Layer>,
}

/// Tagged on-disk manifest. The `schema` field is the discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schema")]
pub enum ManifestDocument {
    #[serde(rename = "strata/image.v1")]
    V1(ImageV1),
    #[serde(rename = "strata/image.v2")]
    V2(Image),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyLayer {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: LayerType,
}

/// Untagged manifest written before the `schema` discriminator existed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyImage {
    pub version: String,
    pub layers: Vec<LegacyLayer>,
}

/// Translate a legacy document. Legacy ids are blob names and may carry the
/// type extension, which is stripped to recover the content hash.
pub fn upgrade_legacy(legacy: LegacyImage) -> Result<ImageV1, SchemaError> {
    if legacy.version != LEGACY_VERSION {
        return Err(SchemaError::UnknownSchema(format!(
            "legacy version '{}'",
            legacy.version
        )));
    }
    let layers = legacy
        .layers
        .into_iter()
        .map(|l| {
            let suffix = format!(".{}", l.kind.extension());
            let id = l.id.strip_suffix(&suffix).unwrap_or(&l.id).to_owned();
            let mut hashes = BTreeMap::new();
            if is_content_hash(&id) {
                hashes.insert(HASH_ALGORITHM.to_owned(), id.clone());
            }
            Layer {
                id: LayerId::new(id),
                kind: l.kind,
                length: 0,
                mountpoint: "/".to_owned(),
                hashes,
            }
        })
        .collect();
    Ok(ImageV1 { layers })
}

pub fn upgrade_v1(v1: ImageV1, platform: Platform) -> Image {
    Image::new(platform, v1.layers)
}

/// Express a single-platform image in the v1 schema.
pub fn downgrade_v2(image: &Image) -> Result<ImageV1, SchemaError> {
    match image.rootfs.as_slice() {
        [only] => Ok(ImageV1 {
            layers: only.layers.clone(),
        }),
        other => Err(SchemaError::UnsupportedDowngrade(other.len())),
    }
}

/// Decode any known manifest shape into the current [`Image`]. Single-platform
/// shapes are assigned `platform`.
pub fn decode_manifest(value: Value, platform: &Platform) -> Result<Image, SchemaError> {
    let Value::Object(ref map) = value else {
        return Err(SchemaError::UnknownSchema("not a JSON object".to_owned()));
    };
    if map.contains_key("schema") {
        return match serde_json::from_value::<ManifestDocument>(value)? {
            ManifestDocument::V1(v1) => Ok(upgrade_v1(v1, platform.clone())),
            ManifestDocument::V2(image) => Ok(image),
        };
    }
    if map.contains_key("version") {
        let legacy: LegacyImage = serde_json::from_value(value)?;
        return Ok(upgrade_v1(upgrade_legacy(legacy)?, platform.clone()));
    }
    Err(SchemaError::UnknownSchema(
        "missing 'schema' or 'version' field".to_owned(),
    ))
}
