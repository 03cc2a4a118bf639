use std::path::{Path, PathBuf};
use std::process::Command;

use rayon::prelude::*;
use tracing::warn;

use crate::config::BuildConfig;
use crate::discovery::{get_files, pattern_for};
use crate::error::{BuildError, CompileError};
use crate::output::{CompileReport, mirrored_destination, relative_up, write_artifact};
use crate::source::SourceFile;

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptOutput {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub js: String,
}

/// Path of the configured bundler binary, if it is enabled and installed.
pub fn locate_bundler(config: &BuildConfig) -> Option<PathBuf> {
    let bundler = config.options.scripts.bundler.trim();
    if bundler.is_empty() {
        return None;
    }
    which::which(bundler).ok()
}

/// Bundle one entry file without writing it. Without a bundler the entry is
/// passed through as is.
pub fn render_script(
    config: &BuildConfig,
    source: &Path,
    bundler: Option<&Path>,
) -> Result<ScriptOutput, CompileError> {
    let destination = mirrored_destination(&config.paths, source, "js");

    let js = match bundler {
        Some(bundler) => bundle(config, bundler, source, &destination)?,
        None => std::fs::read_to_string(source).map_err(|e| CompileError::Read {
            path: source.to_path_buf(),
            source: e,
        })?,
    };

    Ok(ScriptOutput {
        source: source.to_path_buf(),
        destination,
        js,
    })
}

fn bundle(
    config: &BuildConfig,
    bundler: &Path,
    source: &Path,
    destination: &Path,
) -> Result<String, CompileError> {
    let script_error = |message: String| CompileError::Script {
        path: source.to_path_buf(),
        message,
    };

    let output = Command::new(bundler)
        .current_dir(&config.paths.cwd)
        .args(bundler_args(config, source, destination))
        .output()
        .map_err(|e| script_error(format!("failed to spawn `{}`: {e}", bundler.display())))?;

    if !output.status.success() {
        return Err(script_error(String::from_utf8_lossy(&output.stderr).trim().to_string()));
    }

    String::from_utf8(output.stdout).map_err(|e| script_error(e.to_string()))
}

/// esbuild flags. The bundle is written to stdout.
fn bundler_args(config: &BuildConfig, source: &Path, destination: &Path) -> Vec<String> {
    let mut args = vec![
        source.to_string_lossy().to_string(),
        "--bundle".to_string(),
        "--format=esm".to_string(),
        format!("--target={}", config.options.scripts.target),
    ];

    if config.mode.is_production() {
        args.push("--minify".to_string());
    } else {
        args.push("--sourcemap=inline".to_string());
    }

    let root = relative_root(&config.paths.build, destination);
    args.push(format!("--define:RELATIVE_ROOT={}", json_string(&root)));
    for (key, value) in config.env.iter() {
        args.push(format!("--define:{key}={}", json_string(value)));
    }

    args
}

fn json_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// From the directory holding `destination` back up to `build`.
fn relative_root(build: &Path, destination: &Path) -> String {
    let levels = destination
        .parent()
        .and_then(|dir| dir.strip_prefix(build).ok())
        .map(|rel| rel.components().count())
        .unwrap_or(0);
    relative_up(levels)
}

/// Bundle `changed`, or every entry when `None` or when the changed file
/// lives outside the pages directory (a shared module).
pub fn compile_scripts(
    config: &BuildConfig,
    changed: Option<&Path>,
) -> Result<CompileReport, BuildError> {
    let sources = match changed {
        Some(path) if !path.is_file() => Vec::new(),
        Some(path) if !SourceFile::new(path).is_partial && path.starts_with(&config.paths.pages) => {
            vec![path.to_path_buf()]
        }
        _ => entry_scripts(config)?,
    };
    if sources.is_empty() {
        return Ok(CompileReport::default());
    }

    let bundler = locate_bundler(config);
    if bundler.is_none() {
        warn!(
            bundler = %config.options.scripts.bundler,
            "script bundler unavailable, copying entry files as they are"
        );
    }

    let results: Vec<_> = sources
        .par_iter()
        .map(|source| {
            let output = render_script(config, source, bundler.as_deref())?;
            write_artifact(&output.destination, &output.js)?;
            Ok(output.destination)
        })
        .collect();

    let mut report = CompileReport::default();
    for result in results {
        report.record(&config.paths, result);
    }
    Ok(report)
}

/// Non-partial `.js` files under the pages directory.
pub fn entry_scripts(config: &BuildConfig) -> Result<Vec<PathBuf>, BuildError> {
    Ok(get_files(&[pattern_for(&config.paths.pages, true, "js")])?
        .into_iter()
        .filter(|p| !SourceFile::new(p).is_partial)
        .collect())
}
