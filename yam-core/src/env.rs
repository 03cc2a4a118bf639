//! `.env` file loading and the client-visible environment.
//!
//! Files are read in precedence order `.env.<mode>.local`, `.env.<mode>`,
//! `.env`. A key set by an earlier file (or by the process environment) is
//! never overwritten by a later one. Only `PUBLIC_`-prefixed keys reach
//! templates and scripts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::Mode;

pub const PUBLIC_PREFIX: &str = "PUBLIC_";
pub const MODE_KEY: &str = "YAM_ENV";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ClientEnvironment {
    raw: BTreeMap<String, String>,
}

impl ClientEnvironment {
    /// Only the mode key.
    pub fn for_mode(mode: Mode) -> Self {
        let mut raw = BTreeMap::new();
        raw.insert(MODE_KEY.to_string(), mode.as_str().to_string());
        Self { raw }
    }

    /// Load env files from `cwd` for `file_mode` (the `--env` selector) and
    /// merge the process environment on top.
    pub fn load(cwd: &Path, file_mode: &str, mode: Mode) -> Self {
        let process: Vec<(String, String)> = std::env::vars().collect();
        Self::from_sources(cwd, file_mode, mode, process)
    }

    pub fn from_sources<I>(cwd: &Path, file_mode: &str, mode: Mode, process: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut env = Self::for_mode(mode);

        // process wins over every file
        for (key, value) in process {
            if key.to_ascii_uppercase().starts_with(PUBLIC_PREFIX) {
                env.raw.insert(key, value);
            }
        }

        for file in env_files(cwd, file_mode) {
            let iter = match dotenvy::from_path_iter(&file) {
                Ok(iter) => iter,
                Err(e) => {
                    warn!(path = %file.display(), "could not read env file: {e}");
                    continue;
                }
            };
            info!(path = %file.display(), "loaded env file");

            for item in iter {
                match item {
                    Ok((key, value)) => {
                        if key.to_ascii_uppercase().starts_with(PUBLIC_PREFIX) {
                            env.raw.entry(key).or_insert(value);
                        }
                    }
                    Err(e) => warn!(path = %file.display(), "skipping malformed line: {e}"),
                }
            }
        }

        env
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.raw.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.raw.iter()
    }
}

/// Existing env files for `file_mode`, highest precedence first.
pub fn env_files(cwd: &Path, file_mode: &str) -> Vec<PathBuf> {
    [
        cwd.join(format!(".env.{file_mode}.local")),
        cwd.join(format!(".env.{file_mode}")),
        cwd.join(".env"),
    ]
    .into_iter()
    .filter(|p| p.is_file())
    .collect()
}
