use std::io::ErrorKind;
use std::path::Path;

use tracing::info;

use crate::config::BuildConfig;
use crate::error::BuildError;

/// Remove the build directory, and the cache directory too when asked.
/// The cache holds compression results, so dropping it is opt-in.
pub fn clean(config: &BuildConfig, include_cache: bool) -> Result<(), BuildError> {
    remove_dir(config, &config.paths.build)?;
    if include_cache {
        remove_dir(config, &config.paths.cache)?;
    }
    Ok(())
}

fn remove_dir(config: &BuildConfig, path: &Path) -> Result<(), BuildError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            info!(path = %config.paths.pretty(path), "cleaned");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(BuildError::Clean {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use tempfile::TempDir;

    #[test]
    fn test_cache_kept_unless_requested() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::with_defaults(dir.path(), Mode::Production);
        std::fs::create_dir_all(&config.paths.build).unwrap();
        std::fs::create_dir_all(&config.paths.cache).unwrap();

        clean(&config, false).unwrap();
        assert!(!config.paths.build.exists());
        assert!(config.paths.cache.exists());

        clean(&config, true).unwrap();
        assert!(!config.paths.cache.exists());
    }

    #[test]
    fn test_missing_dirs_are_not_errors() {
        let dir = TempDir::new().unwrap();
        let config = BuildConfig::with_defaults(dir.path(), Mode::Production);
        clean(&config, true).unwrap();
    }
}
