use std::collections::HashSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::BuildError;

/// Expand every glob pattern and return the matching files, deduplicated
/// across patterns and sorted so renders are deterministic.
pub fn get_files<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<PathBuf>, BuildError> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for pattern in patterns {
        let pattern = pattern.as_ref();
        let entries = glob::glob(pattern).map_err(|e| BuildError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        // unreadable entries are files that vanished mid-walk
        for path in entries.filter_map(Result::ok) {
            if path.is_file() && seen.insert(path.clone()) {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// `<dir>/**/*.<extension>` as a glob pattern.
pub fn pattern_for(dir: &Path, recursive: bool, extension: &str) -> String {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    if recursive {
        format!("{escaped}/**/*.{extension}")
    } else {
        format!("{escaped}/*.{extension}")
    }
}

/// Every file below `path`, recursively.
pub fn get_all_files<P: AsRef<Path>>(path: P) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect();

    paths.sort();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn test_get_files_dedupes_across_patterns() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "pages/index.tera");
        touch(dir.path(), "pages/about/index.tera");
        touch(dir.path(), "pages/about/style.scss");

        let files = get_files(&[
            pattern_for(&dir.path().join("pages"), true, "tera"),
            pattern_for(&dir.path().join("pages"), false, "tera"),
        ])
        .unwrap();

        assert_eq!(
            files,
            vec![
                dir.path().join("pages/about/index.tera"),
                dir.path().join("pages/index.tera"),
            ]
        );
    }

    #[test]
    fn test_get_files_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let files = get_files(&[pattern_for(&dir.path().join("nope"), true, "tera")]).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_invalid_pattern_errors() {
        assert!(matches!(get_files(&["[".to_string()]), Err(BuildError::Pattern { .. })));
    }

    #[test]
    fn test_get_all_files_walks_recursively() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.png");
        touch(dir.path(), "img/b.jpg");

        let files = get_all_files(dir.path());
        assert_eq!(files.len(), 2);
    }
}
