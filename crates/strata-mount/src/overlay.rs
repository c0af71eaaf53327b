use crate::MountError;
use std::path::{Path, PathBuf};

/// Parameters of one overlay mount.
///
/// `lower` is in overlayfs order: the first entry is the topmost read-only
/// layer, the last entry the base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayOptions {
    pub lower: Vec<PathBuf>,
    pub upper: PathBuf,
    pub work: PathBuf,
}

/// `:` separates lower directories and `,` separates options in the mount
/// data, so neither may appear in a path.
fn option_path(path: &Path) -> Result<&str, MountError> {
    match path.to_str() {
        Some(s) if !s.is_empty() && !s.contains([':', ',']) => Ok(s),
        _ => Err(MountError::OverlayPath(path.to_path_buf())),
    }
}

impl OverlayOptions {
    /// `lowerdir` value: lower directories joined with `:`.
    pub fn lowerdir(&self) -> Result<String, MountError> {
        let lower = self
            .lower
            .iter()
            .map(PathBuf::as_path)
            .map(option_path)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lower.join(":"))
    }

    /// The data string passed to `mount(2)`.
    pub fn to_mount_data(&self) -> Result<String, MountError> {
        if self.lower.is_empty() {
            return Err(MountError::OverlayPath(PathBuf::new()));
        }
        Ok(format!(
            "lowerdir={},upperdir={},workdir={}",
            self.lowerdir()?,
            option_path(&self.upper)?,
            option_path(&self.work)?
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(lower: &[&str], upper: &str) -> OverlayOptions {
        OverlayOptions {
            lower: lower.iter().map(PathBuf::from).collect(),
            upper: PathBuf::from(upper),
            work: PathBuf::from("/r/tmp/work-x"),
        }
    }

    #[test]
    fn mount_data_lists_all_directories() {
        let opts = options(&["/r/mnt/c", "/r/mnt/a"], "/r/tmp/upper-x");
        assert_eq!(opts.lowerdir().unwrap(), "/r/mnt/c:/r/mnt/a");
        assert_eq!(
            opts.to_mount_data().unwrap(),
            "lowerdir=/r/mnt/c:/r/mnt/a,upperdir=/r/tmp/upper-x,workdir=/r/tmp/work-x"
        );
    }

    #[test]
    fn comma_in_upper_cannot_inject_options() {
        let opts = options(&["/r/mnt/a"], "/r/tmp/upper,index=off");
        assert!(matches!(
            opts.to_mount_data(),
            Err(MountError::OverlayPath(p)) if p == Path::new("/r/tmp/upper,index=off")
        ));
    }

    #[test]
    fn colon_in_lower_cannot_split_layers() {
        let opts = options(&["/r/mnt/a:/etc"], "/r/tmp/upper-x");
        assert!(opts.lowerdir().is_err());
        assert!(opts.to_mount_data().is_err());
    }

    #[test]
    fn no_lower_directories_is_rejected() {
        assert!(options(&[], "/r/tmp/upper-x").to_mount_data().is_err());
    }
}
