use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::BuildConfig;
use crate::discovery::get_all_files;
use crate::error::BuildError;

/// Copy the whole public directory into the build directory. Returns the
/// destinations written.
pub fn copy_assets(config: &BuildConfig) -> Result<Vec<PathBuf>, BuildError> {
    let paths = &config.paths;
    if !paths.public.is_dir() {
        debug!(path = %paths.pretty(&paths.public), "no public directory to copy");
        return Ok(Vec::new());
    }

    let mut copied = Vec::new();
    for file in get_all_files(&paths.public) {
        if let Some(destination) = copy_asset(config, &file)? {
            copied.push(destination);
        }
    }

    info!(
        from = %paths.pretty(&paths.public),
        to = %paths.pretty(&paths.build),
        files = copied.len(),
        "copied assets"
    );
    Ok(copied)
}

/// Copy one public file to the same relative location under the build
/// directory. `None` when the file no longer exists.
pub fn copy_asset(config: &BuildConfig, file: &Path) -> Result<Option<PathBuf>, BuildError> {
    let paths = &config.paths;
    if !file.is_file() {
        return Ok(None);
    }

    let copy_error = |source| BuildError::CopyAssets {
        from: file.to_path_buf(),
        source,
    };

    let relative = file.strip_prefix(&paths.public).unwrap_or(file);
    let destination = paths.build.join(relative);
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent).map_err(copy_error)?;
    }
    std::fs::copy(file, &destination).map_err(copy_error)?;

    Ok(Some(destination))
}
