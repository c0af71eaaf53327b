use super::{json_pretty, with_spinner, EXIT_SUCCESS};
use std::path::Path;
use std::sync::Arc;
use strata_core::source::has_export;
use strata_core::{DirectorySource, ImageBuilder, Repository};

/// Builds `image` from an export directory, stores and optionally tags the
/// manifest, and prints the manifest document on stdout.
pub fn run(
    repo: &Repository,
    image: &str,
    from: &Path,
    tag: Option<&str>,
    json: bool,
) -> Result<u8, String> {
    if !has_export(from, image) {
        return Err(format!(
            "no export of '{image}' under {} (expected {image}/history.json)",
            from.display()
        ));
    }
    let builder = ImageBuilder::for_repository(repo, Arc::new(DirectorySource::new(from)));
    let (id, built) = with_spinner(json, "building layers...", "image built", || {
        builder.build_into(repo, image, tag)
    })?;

    println!("{}", json_pretty(&built.to_document())?);
    eprintln!("stored manifest {id}");
    Ok(EXIT_SUCCESS)
}
