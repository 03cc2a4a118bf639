use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use tracing::warn;
use yam_core::{Mode, Options, build_all};
use yam_dev_server::{DevServer, ServerOptions};

use crate::config::build_config;

pub fn make_subcommand() -> Command {
    Command::new("start")
        .about("Start the development server with live reload")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Port to serve on, the next two are tried if it is taken")
                .value_parser(value_parser!(u16))
                .default_value("8080"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Host to bind to")
                .default_value("localhost"),
        )
        .arg(
            Arg::new("open")
                .long("open")
                .help("Open browser automatically")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("asset-logger")
                .long("asset-logger")
                .help("On exit, list public assets that were never requested")
                .action(ArgAction::SetTrue),
        )
}

pub async fn execute(args: &ArgMatches, cwd: &Path, options: Options) -> Result<()> {
    let config = Arc::new(build_config(
        cwd,
        options,
        Mode::Development,
        Mode::Development.as_str(),
    ));

    // a dev build up front so assets and generated files exist; pages are
    // compiled again on request
    let build = config.clone();
    let report = tokio::task::spawn_blocking(move || build_all(&build, false))
        .await
        .context("build task failed")?
        .context("initial build failed")?;
    if !report.is_ok() {
        warn!(errors = report.error_count(), "initial build had errors, serving anyway");
    }

    let server_options = ServerOptions {
        host: args
            .get_one::<String>("host")
            .cloned()
            .unwrap_or_else(|| ServerOptions::default().host),
        port: args.get_one::<u16>("port").copied().unwrap_or(8080),
        open: args.get_flag("open"),
        asset_logger: args.get_flag("asset-logger"),
    };

    DevServer::new(config, server_options)
        .run()
        .await
        .context("dev server stopped")?;
    Ok(())
}
