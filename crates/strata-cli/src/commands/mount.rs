use super::{json_pretty, require_image, EXIT_SUCCESS};
use strata_core::Repository;

pub fn run(repo: &Repository, name: &str, json: bool) -> Result<u8, String> {
    let image = require_image(repo, name)?;
    let layers = image
        .layers_for(repo.platform())
        .map_err(|e| e.to_string())?;
    let mut mounted = Vec::with_capacity(layers.len());
    for layer in layers {
        mounted.push(repo.mount(layer).map_err(|e| e.to_string())?);
    }
    if json {
        println!("{}", json_pretty(&mounted)?);
    } else {
        for path in &mounted {
            println!("{}", path.display());
        }
    }
    Ok(EXIT_SUCCESS)
}
