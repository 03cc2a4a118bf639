mod cmd;
mod config;

use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("yam")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Compile templates, stylesheets and scripts into a static site")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level: error, warn, info, debug, trace")
                .default_value("info")
                .global(true),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file [default: ./yam.toml]")
                .global(true),
        )
        .arg(
            Arg::new("source")
                .short('s')
                .long("source")
                .value_name("DIR")
                .help("Source directory holding pages/, public/ and locales/")
                .global(true),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Build directory")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log at debug level")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(cmd::build::make_subcommand())
        .subcommand(cmd::start::make_subcommand())
        .subcommand(cmd::clean::make_subcommand())
        .subcommand(cmd::compress::make_subcommand())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let Some((name, args)) = matches.subcommand() else {
        bail!("no command given");
    };
    let cwd = std::env::current_dir().context("cannot read the working directory")?;

    // global flags propagate down, so the subcommand matches carry them
    let options = config::load_options(args, &cwd)?;
    init_tracing(args, options.verbose);

    match name {
        "build" => cmd::build::execute(args, &cwd, options).await,
        "start" => cmd::start::execute(args, &cwd, options).await,
        "clean" => cmd::clean::execute(args, &cwd, options),
        "compress" => cmd::compress::execute(args, &cwd, options),
        _ => bail!("unknown command `{name}`"),
    }
}

/// `RUST_LOG` wins, then `verbose`, then `--log-level`.
fn init_tracing(matches: &ArgMatches, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        matches
            .get_one::<String>("log-level")
            .map(String::as_str)
            .unwrap_or("info")
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn test_global_flags_reach_subcommands() {
        let matches = cli()
            .try_get_matches_from(["yam", "start", "--port", "9000", "--output", "dist"])
            .unwrap();
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "start");
        assert_eq!(args.get_one::<u16>("port"), Some(&9000));
        assert_eq!(args.get_one::<String>("output").map(String::as_str), Some("dist"));
    }
}
