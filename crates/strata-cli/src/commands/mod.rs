pub mod build;
pub mod checkout;
pub mod completions;
pub mod create;
pub mod init;
pub mod list;
pub mod lookup;
pub mod mount;
pub mod release;
pub mod tag;
pub mod unmount;

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use strata_core::{CoreError, Repository};
use strata_schema::Image;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_NOT_FOUND: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✗ {msg}"));
}

/// Run `op` under a spinner on stderr unless JSON output was requested.
pub fn with_spinner<T>(
    json: bool,
    msg: &str,
    done: &str,
    op: impl FnOnce() -> Result<T, CoreError>,
) -> Result<T, String> {
    let pb = if json { None } else { Some(spinner(msg)) };
    let result = op();
    if let Some(pb) = pb {
        match &result {
            Ok(_) => spin_ok(&pb, done),
            Err(_) => spin_fail(&pb, &format!("{msg} failed")),
        }
    }
    result.map_err(|e| e.to_string())
}

/// Load an image that must exist.
pub fn require_image(repo: &Repository, name: &str) -> Result<Image, String> {
    repo.lookup(name)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| CoreError::ImageNotFound(name.to_owned()).to_string())
}
