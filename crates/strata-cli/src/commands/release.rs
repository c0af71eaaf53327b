use super::EXIT_SUCCESS;
use std::path::Path;
use strata_core::Repository;

pub fn run(repo: &Repository, root: &Path) -> Result<u8, String> {
    repo.release_root(root).map_err(|e| e.to_string())?;
    Ok(EXIT_SUCCESS)
}
