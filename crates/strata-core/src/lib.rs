//! Core orchestration for strata.
//!
//! This crate ties the schema, store, and mount crates together into the
//! [`Repository`]: manifest lookup, lazily mounted read-only layers, image
//! creation from a directory, and overlay checkout. It also provides the
//! [`BuildCache`] that turns chains of foreign layer diffs into repository
//! layers under a cross-process lock, and the [`ImageBuilder`] that drives it
//! across a foreign image history.

pub mod buildcache;
pub mod builder;
pub mod checkout;
pub mod concurrency;
pub mod config;
pub mod lifecycle;
pub mod repository;
pub mod source;

pub use buildcache::BuildCache;
pub use builder::ImageBuilder;
pub use checkout::Checkout;
pub use concurrency::{install_signal_handler, shutdown_requested, LayerLock};
pub use config::{MksquashfsConfig, StrataConfig};
pub use lifecycle::{validate_transition, BuildPhase};
pub use repository::Repository;
pub use source::{DirectorySource, HistoryLayer, LayerSource};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("schema error: {0}")]
    Schema(#[from] strata_schema::SchemaError),
    #[error("store error: {0}")]
    Store(#[from] strata_store::StoreError),
    #[error("mount error: {0}")]
    Mount(#[from] strata_mount::MountError),
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("image '{0}' has no layers")]
    EmptyImage(String),
    #[error("empty layer chain")]
    EmptyChain,
    #[error("corrupt build cache {path}: {reason}")]
    CorruptCache { path: PathBuf, reason: String },
    #[error("layer source error: {0}")]
    Source(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("invalid build transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
