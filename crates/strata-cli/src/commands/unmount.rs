use super::{require_image, EXIT_SUCCESS};
use strata_core::Repository;

pub fn run(repo: &Repository, name: &str) -> Result<u8, String> {
    let image = require_image(repo, name)?;
    let layers = image
        .layers_for(repo.platform())
        .map_err(|e| e.to_string())?;
    // Topmost first, the reverse of mount order.
    for layer in layers.iter().rev() {
        repo.unmount(layer).map_err(|e| e.to_string())?;
    }
    Ok(EXIT_SUCCESS)
}
