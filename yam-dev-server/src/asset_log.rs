use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{info, warn};
use yam_core::discovery::get_all_files;

/// Remembers every request path so unused public files can be reported
/// when the server stops.
#[derive(Debug, Default)]
pub struct AssetLog {
    requested: Mutex<BTreeSet<String>>,
}

impl AssetLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, path: &str) {
        if let Ok(mut requested) = self.requested.lock() {
            requested.insert(path.trim_start_matches('/').to_string());
        }
    }

    /// Files under `public` that no request asked for.
    pub fn extraneous(&self, public: &Path) -> Vec<PathBuf> {
        let Ok(requested) = self.requested.lock() else {
            return Vec::new();
        };

        get_all_files(public)
            .into_iter()
            .filter(|file| {
                let url = file
                    .strip_prefix(public)
                    .unwrap_or(file)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                !requested.contains(&url)
            })
            .collect()
    }

    pub fn report(&self, public: &Path) {
        let unused = self.extraneous(public);
        if unused.is_empty() {
            info!("every public asset was requested");
            return;
        }
        for file in &unused {
            warn!(path = %file.strip_prefix(public).unwrap_or(file).display(), "extraneous asset");
        }
        warn!(count = unused.len(), "public assets never requested this session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unrequested_assets_reported() {
        let dir = TempDir::new().unwrap();
        for rel in ["img/used.png", "img/unused.png", "robots.txt"] {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, "").unwrap();
        }

        let log = AssetLog::new();
        log.record("/img/used.png");
        log.record("/robots.txt");
        log.record("/about/");

        assert_eq!(log.extraneous(dir.path()), vec![dir.path().join("img/unused.png")]);
    }

    #[test]
    fn test_missing_public_dir() {
        let log = AssetLog::new();
        assert!(log.extraneous(Path::new("/nonexistent/public")).is_empty());
    }
}
