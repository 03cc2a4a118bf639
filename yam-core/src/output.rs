use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::config::Paths;
use crate::error::{CompileError, error_chain};

/// Outcome of one compiler run over a set of files.
#[derive(Debug, Default)]
pub struct CompileReport {
    pub written: Vec<PathBuf>,
    pub errors: Vec<CompileError>,
}

impl CompileReport {
    /// Record one unit's result and log it.
    pub fn record(&mut self, paths: &Paths, result: Result<PathBuf, CompileError>) {
        match result {
            Ok(destination) => {
                info!(path = %paths.pretty(&destination), "compiled");
                self.written.push(destination);
            }
            Err(e) => {
                error!(path = %paths.pretty(e.path()), "{}", error_chain(&e));
                self.errors.push(e);
            }
        }
    }
}

/// Write `contents` to `destination`, creating parent directories.
pub fn write_artifact(destination: &Path, contents: impl AsRef<[u8]>) -> Result<(), CompileError> {
    let write_error = |source| CompileError::Write {
        path: destination.to_path_buf(),
        source,
    };
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent).map_err(write_error)?;
    }
    std::fs::write(destination, contents).map_err(write_error)
}

/// `<build>/<dir of source relative to pages>/<stem>.<extension>`.
pub fn mirrored_destination(paths: &Paths, source: &Path, extension: &str) -> PathBuf {
    let relative = source.strip_prefix(&paths.pages).unwrap_or(source);
    paths.build.join(relative).with_extension(extension)
}

/// `.` for zero levels, otherwise `..` joined by `/`.
pub fn relative_up(levels: usize) -> String {
    if levels == 0 {
        ".".to_string()
    } else {
        vec![".."; levels].join("/")
    }
}
