//! Layer and image manifest schema for strata.
//!
//! This crate defines the data model shared by the store, mount, and core
//! crates: the immutable [`Layer`] descriptor, the current [`Image`] manifest
//! (ordered layer lists per platform), the versioned on-disk
//! [`ManifestDocument`] with pure translation between schema revisions, and
//! the canonical-JSON sha512 identity of a manifest.

pub mod identity;
pub mod layer;
pub mod manifest;
pub mod types;

pub use identity::{canonical_json, manifest_id, sha512_hex};
pub use layer::{Layer, LayerType, HASH_ALGORITHM};
pub use manifest::{
    decode_manifest, downgrade_v2, upgrade_legacy, upgrade_v1, Image, ImageV1, LegacyImage,
    LegacyLayer, ManifestDocument, Platform, Rootfs, LEGACY_VERSION,
};
pub use types::{
    is_content_hash, validate_chain_id, validate_layer_id, validate_tag, ChainId, LayerId,
    ManifestId,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to parse manifest: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unrecognised manifest document: {0}")]
    UnknownSchema(String),
    #[error("invalid tag '{tag}': {reason}")]
    InvalidTag { tag: String, reason: String },
    #[error("invalid layer id '{0}'")]
    InvalidLayerId(String),
    #[error("invalid layer chain id '{0}'")]
    InvalidChainId(String),
    #[error("image has no rootfs for platform {0}")]
    PlatformNotFound(Platform),
    #[error("cannot express image with {0} rootfs entries as a v1 manifest")]
    UnsupportedDowngrade(usize),
}
