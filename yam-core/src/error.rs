use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read configuration")]
    Io(#[from] std::io::Error),
    #[error("configuration is not valid TOML")]
    Parsing(#[from] toml::de::Error),
    #[error("invalid option `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

/// Failure of a single compile unit. Siblings keep going.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("template error in {path}: {message}")]
    Template { path: PathBuf, message: String },
    #[error("stylesheet error in {path}: {message}")]
    Style { path: PathBuf, message: String },
    #[error("script bundling failed for {path}: {message}")]
    Script { path: PathBuf, message: String },
    #[error("markdown error in {path}: {message}")]
    Markdown { path: PathBuf, message: String },
    #[error("favicon generation failed for {path}: {message}")]
    Favicon { path: PathBuf, message: String },
    #[error("could not read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CompileError {
    pub fn path(&self) -> &PathBuf {
        match self {
            CompileError::Template { path, .. }
            | CompileError::Style { path, .. }
            | CompileError::Script { path, .. }
            | CompileError::Markdown { path, .. }
            | CompileError::Favicon { path, .. }
            | CompileError::Read { path, .. }
            | CompileError::Write { path, .. } => path,
        }
    }
}

/// Errors that abort a whole command.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("could not remove {path}")]
    Clean {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not create build directory {path}")]
    CreateBuildDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not copy assets from {from}")]
    CopyAssets {
        from: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid glob pattern `{pattern}`: {message}")]
    Pattern { pattern: String, message: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("could not persist cache {path}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not serialize cache")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum CompressError {
    #[error("could not read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no compressor handles {0}")]
    Unsupported(PathBuf),
    #[error("{format} compression failed for {path}: {message}")]
    Codec {
        format: &'static str,
        path: PathBuf,
        message: String,
    },
}

/// Render an error and every `source()` below it on one line. Variants with a
/// source leave it out of their own message, so each cause appears once.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut current = err.source();
    while let Some(source) = current {
        message.push_str(": ");
        message.push_str(&source.to_string());
        current = source.source();
    }
    message
}
