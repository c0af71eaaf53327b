use super::{json_pretty, with_spinner, EXIT_SUCCESS};
use strata_core::Repository;

pub fn run(repo: &Repository, name: &str, json: bool) -> Result<u8, String> {
    let checkout = with_spinner(json, "checking out...", "checked out", || {
        repo.checkout(name)
    })?;
    if json {
        println!("{}", json_pretty(&checkout)?);
    } else {
        println!("{}", checkout.root.display());
    }
    Ok(EXIT_SUCCESS)
}
