use super::{json_pretty, EXIT_SUCCESS};
use strata_core::Repository;
use strata_store::STORE_FORMAT_VERSION;

pub fn run(repo: &Repository, json: bool) -> Result<u8, String> {
    let root = repo.layout().root();
    if json {
        let payload = serde_json::json!({
            "root": root,
            "format_version": STORE_FORMAT_VERSION,
            "mounter": repo.mounter().name(),
            "platform": repo.platform().to_string(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("repository ready at {}", root.display());
    }
    Ok(EXIT_SUCCESS)
}
