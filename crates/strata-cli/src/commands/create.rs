use super::{json_pretty, require_image, with_spinner, EXIT_SUCCESS};
use std::path::Path;
use strata_core::Repository;

pub fn run(
    repo: &Repository,
    dir: &Path,
    tag: Option<&str>,
    parent: Option<&str>,
    json: bool,
) -> Result<u8, String> {
    let parent = parent.map(|name| require_image(repo, name)).transpose()?;
    let (id, image) = with_spinner(json, "compressing layer...", "image created", || {
        repo.create_image(dir, tag, parent.as_ref())
    })?;
    let layers = image
        .layers_for(repo.platform())
        .map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "id": id,
            "tag": tag,
            "layers": layers.iter().map(|l| l.id.as_str()).collect::<Vec<_>>(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{id}");
    }
    Ok(EXIT_SUCCESS)
}
