use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing::info;
use yam_core::{Mode, Options, build_all};

use crate::config::build_config;

pub fn make_subcommand() -> Command {
    Command::new("build")
        .about("Clean, then build the whole site for production")
        .arg(
            Arg::new("env")
                .short('e')
                .long("env")
                .value_name("MODE")
                .help("Load .env.<MODE> and .env.<MODE>.local")
                .default_value("production"),
        )
        .arg(
            Arg::new("clean-cache")
                .long("clean-cache")
                .help("Also delete the cache directory, forcing every image to be recompressed")
                .action(ArgAction::SetTrue),
        )
}

pub async fn execute(args: &ArgMatches, cwd: &Path, options: Options) -> Result<()> {
    let file_mode = args
        .get_one::<String>("env")
        .map(String::as_str)
        .unwrap_or("production");
    let config = build_config(cwd, options, Mode::Production, file_mode);
    let build_dir = config.paths.build.clone();
    let clean_cache = args.get_flag("clean-cache");

    let report = tokio::task::spawn_blocking(move || build_all(&config, clean_cache))
        .await
        .context("build task failed")?
        .context("build failed")?;

    if !report.is_ok() {
        bail!("{} file(s) failed to compile", report.error_count());
    }

    info!("site built in {}", build_dir.display());
    Ok(())
}
