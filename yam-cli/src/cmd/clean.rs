use std::path::Path;

use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use yam_core::clean::clean;
use yam_core::{Mode, Options};

use crate::config::build_config;

pub fn make_subcommand() -> Command {
    Command::new("clean")
        .about("Remove the build directory")
        .arg(
            Arg::new("cache")
                .long("cache")
                .help("Also remove the cache directory (compression and favicon results)")
                .action(ArgAction::SetTrue),
        )
}

pub fn execute(args: &ArgMatches, cwd: &Path, options: Options) -> Result<()> {
    let config = build_config(cwd, options, Mode::Production, Mode::Production.as_str());
    clean(&config, args.get_flag("cache"))?;
    Ok(())
}
