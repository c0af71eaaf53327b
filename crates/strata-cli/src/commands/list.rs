use super::{json_pretty, EXIT_SUCCESS};
use serde::Serialize;
use strata_core::Repository;
use strata_schema::ManifestId;

#[derive(Debug, Serialize)]
struct ManifestRow {
    id: ManifestId,
    tags: Vec<String>,
}

pub fn run(repo: &Repository, json: bool) -> Result<u8, String> {
    let ids = repo.list().map_err(|e| e.to_string())?;
    let tags = repo.tags().map_err(|e| e.to_string())?;
    let rows: Vec<ManifestRow> = ids
        .into_iter()
        .map(|id| ManifestRow {
            tags: tags
                .iter()
                .filter(|(_, target)| *target == id)
                .map(|(tag, _)| tag.clone())
                .collect(),
            id,
        })
        .collect();

    if json {
        println!("{}", json_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("no images found");
    } else {
        println!("{:<18} TAGS", "MANIFEST");
        for row in &rows {
            println!("{:<18} {}", &row.id[..16], row.tags.join(", "));
        }
    }
    Ok(EXIT_SUCCESS)
}
