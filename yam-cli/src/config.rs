use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ArgMatches;
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use yam_core::config::{CONFIG_FILE_NAME, Options};
use yam_core::env::ClientEnvironment;
use yam_core::{BuildConfig, Mode};

/// Prefix for environment overrides, e.g. `YAM_BUILD_DIRECTORY=dist` or
/// `YAM_COMPRESS__JPEG__QUALITY=60`.
pub const ENV_PREFIX: &str = "YAM";

/// `--config`, or `yam.toml` in the working directory.
pub fn config_file(args: &ArgMatches, cwd: &Path) -> PathBuf {
    args.try_get_one::<String>("config")
        .ok()
        .flatten()
        .map(|file| cwd.join(file))
        .unwrap_or_else(|| cwd.join(CONFIG_FILE_NAME))
}

/// Load options with cascading precedence:
/// 1. CLI arguments (highest priority)
/// 2. Environment variables (YAM_*)
/// 3. Configuration file
/// 4. Defaults (lowest priority)
pub fn load_options(args: &ArgMatches, cwd: &Path) -> Result<Options> {
    load_options_from(
        args,
        cwd,
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    )
}

fn load_options_from(args: &ArgMatches, cwd: &Path, environment: Environment) -> Result<Options> {
    let file = config_file(args, cwd);
    let mut builder = ConfigBuilder::builder();

    builder = builder.add_source(ConfigBuilder::try_from(&Options::default())?);

    if file.is_file() {
        builder = builder.add_source(File::from(file.as_path()).format(FileFormat::Toml));
    } else if args.try_get_one::<String>("config").ok().flatten().is_some() {
        anyhow::bail!("configuration file {} does not exist", file.display());
    }

    builder = builder.add_source(environment);

    // Only override with CLI args that are actually defined for this command
    let mut cli_overrides = HashMap::new();
    if let Some(source) = args.try_get_one::<String>("source").ok().flatten() {
        cli_overrides.insert("source_directory".to_string(), source.clone());
    }
    if let Some(output) = args.try_get_one::<String>("output").ok().flatten() {
        cli_overrides.insert("build_directory".to_string(), output.clone());
    }
    if args.try_get_one::<bool>("verbose").ok().flatten() == Some(&true) {
        cli_overrides.insert("verbose".to_string(), "true".to_string());
    }
    if !cli_overrides.is_empty() {
        builder = builder.add_source(ConfigBuilder::try_from(&cli_overrides)?);
    }

    let options: Options = builder
        .build()
        .and_then(|config| config.try_deserialize())
        .with_context(|| format!("invalid configuration (from {})", file.display()))?;
    options.validate()?;

    Ok(options)
}

/// Resolve options into the immutable config every component receives.
/// `file_mode` picks which `.env.<mode>` files are read.
pub fn build_config(cwd: &Path, options: Options, mode: Mode, file_mode: &str) -> BuildConfig {
    let env = ClientEnvironment::load(cwd, file_mode, mode);
    BuildConfig::new(cwd, options, mode, env)
}
