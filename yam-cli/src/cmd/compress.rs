use std::path::Path;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use tracing::{debug, info, warn};
use yam_core::compress::Compressor;
use yam_core::error::error_chain;
use yam_core::{Mode, Options};

use crate::config::build_config;

pub fn make_subcommand() -> Command {
    Command::new("compress")
        .about("Compress images in place, skipping files already compressed")
        .arg(
            Arg::new("directory")
                .short('d')
                .long("directory")
                .value_name("DIR")
                .help("Directory to compress [default: the public directory]"),
        )
}

pub fn execute(args: &ArgMatches, cwd: &Path, options: Options) -> Result<()> {
    let config = build_config(cwd, options, Mode::Production, Mode::Production.as_str());
    let directory = args
        .get_one::<String>("directory")
        .map(|dir| cwd.join(dir))
        .unwrap_or_else(|| config.paths.public.clone());

    let mut compressor = Compressor::new(&config)?;
    let files = compressor.collect(&directory);
    if files.is_empty() {
        info!(path = %config.paths.pretty(&directory), "no images to compress");
        return Ok(());
    }

    let report = compressor
        .compress_batch(&files)
        .context("could not save the compression cache")?;

    for result in &report.results {
        let path = config.paths.pretty(&result.path);
        if result.skipped {
            debug!(%path, "unchanged");
        } else {
            info!(
                %path,
                before = result.before,
                after = result.after,
                "saved {:.1}%",
                result.savings_percent()
            );
        }
    }
    for error in &report.errors {
        warn!("{}", error_chain(error));
    }

    let skipped = report.results.iter().filter(|r| r.skipped).count();
    info!(
        files = report.results.len(),
        skipped,
        failed = report.errors.len(),
        bytes_saved = report.bytes_saved(),
        "compression finished"
    );
    Ok(())
}
