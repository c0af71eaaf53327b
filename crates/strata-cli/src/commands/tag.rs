use super::{json_pretty, EXIT_SUCCESS};
use strata_core::Repository;

pub fn run(repo: &Repository, tag: &str, target: &str, json: bool) -> Result<u8, String> {
    let id = repo.tag(tag, target).map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&serde_json::json!({ "tag": tag, "id": id }))?);
    } else {
        println!("{tag} -> {id}");
    }
    Ok(EXIT_SUCCESS)
}
