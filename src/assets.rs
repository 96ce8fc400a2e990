//! Filesystem scanners for client-selectable assets: configuration
//! alternates and background images. Pure listing calls, no state.

use std::path::Path;
use tracing::warn;

const BACKGROUND_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// List configuration alternate files (TOML documents) in the given
/// directory. A missing directory lists as empty rather than failing.
pub fn scan_config_alts(dir: &str) -> Vec<String> {
    scan_by_extension(dir, &["toml"])
}

/// List background image files in the given directory.
pub fn scan_backgrounds(dir: &str) -> Vec<String> {
    scan_by_extension(dir, BACKGROUND_EXTENSIONS)
}

fn scan_by_extension(dir: &str, extensions: &[&str]) -> Vec<String> {
    let path = Path::new(dir);
    if !path.is_dir() {
        return Vec::new();
    }

    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir, error = %err, "Failed to scan asset directory");
            return Vec::new();
        }
    };

    let mut files: Vec<String> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let ext = path.extension()?.to_str()?.to_ascii_lowercase();
            if !extensions.contains(&ext.as_str()) {
                return None;
            }
            Some(path.file_name()?.to_str()?.to_string())
        })
        .collect();

    files.sort();
    files
}
