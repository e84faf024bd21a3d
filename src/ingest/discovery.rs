use crate::error::{Result, VisearchError};
use glob::Pattern;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Recursively list files under `root` whose root-relative path matches
/// `pattern` (e.g. `**/*.jp*g`). The result is sorted.
pub fn discover(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(VisearchError::Config(format!(
            "Corpus root is not a directory: {:?}",
            root
        )));
    }

    let matcher = Pattern::new(pattern).map_err(|e| VisearchError::InvalidConfigValue {
        path: "corpus.pattern".to_string(),
        message: e.to_string(),
    })?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        if matcher.matches_path(relative) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}
