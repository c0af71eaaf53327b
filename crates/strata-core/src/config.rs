use crate::repository::Repository;
use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_mount::select_mounter;
use strata_store::Mksquashfs;
use tracing::debug;

pub const DEFAULT_ROOT: &str = "/var/lib/strata/image";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrataConfig {
    pub root: PathBuf,
    /// `"kernel"` or `"mock"`.
    pub mounter: String,
    pub mksquashfs: MksquashfsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MksquashfsConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            mounter: "kernel".to_owned(),
            mksquashfs: MksquashfsConfig::default(),
        }
    }
}

impl Default for MksquashfsConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("mksquashfs"),
            args: vec!["-noappend".to_owned()],
        }
    }
}

impl StrataConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, CoreError> {
        Ok(toml::from_str(content)?)
    }

    /// Load `path` if given (it must exist), else the per-user config file if
    /// present, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, CoreError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };
        debug!("loading config from {}", path.display());
        let content = std::fs::read_to_string(&path)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// `$XDG_CONFIG_HOME/strata/config.toml`, falling back to
    /// `~/.config/strata/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
            return Some(PathBuf::from(xdg).join("strata/config.toml"));
        }
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/strata/config.toml"))
    }

    pub fn compressor(&self) -> Mksquashfs {
        Mksquashfs::new(&self.mksquashfs.program, self.mksquashfs.args.clone())
    }

    pub fn open_repository(&self) -> Result<Repository, CoreError> {
        Repository::open(
            &self.root,
            select_mounter(&self.mounter)?,
            Arc::new(self.compressor()),
        )
    }
}
