use super::{json_pretty, EXIT_SUCCESS};
use strata_core::{CoreError, Repository};

/// Prints the manifest document exactly as it would be stored.
pub fn run(repo: &Repository, name: &str) -> Result<u8, String> {
    let entry = repo
        .lookup_entry(name)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| CoreError::ImageNotFound(name.to_owned()).to_string())?;
    println!("{}", json_pretty(&entry.image.to_document())?);
    Ok(EXIT_SUCCESS)
}
