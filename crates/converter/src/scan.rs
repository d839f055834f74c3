use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use log::{debug, info, warn};

/// Media file extensions picked up when a directory is given
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "3gp", "avi", "dv", "flv", "m2ts", "m4v", "mkv", "mov", "mp4", "mpeg", "mpg", "mts", "ogv",
    "ts", "vob", "webm", "wmv",
];

/// Whether the path has one of the known media extensions
pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Expand the given paths into files to queue.
///
/// Files are passed through as given (the prober decides whether they are
/// usable); directories are walked recursively for known media extensions,
/// in sorted order.
pub fn collect_media_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }

        info!("Scanning directory: {}", path.display());
        let before = files.len();
        for entry in WalkDir::new(path).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error reading directory entry: {}", e);
                    continue;
                }
            };

            let file = entry.path();
            if file.is_file() && is_media_file(file) {
                debug!("Found media file: {}", file.display());
                files.push(file.to_path_buf());
            }
        }
        info!("Found {} media file(s) in {}", files.len() - before, path.display());
    }

    files
}
