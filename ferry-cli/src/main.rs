mod cli;
mod config;
mod logging;
mod output;

use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ferry_engine::Uploader;
use storage_driver::{Destination, DriverRegistry};
use tracing::{error, warn};

use crate::cli::Args;
use crate::config::FileConfig;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let guard = match logging::init_logging(
        args.verbose,
        args.quiet,
        args.log_format,
        args.log_file.as_deref(),
    ) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    };

    let code = match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            error!("{e:#}");
            1
        }
    };

    // process::exit skips destructors; flush the file writer first.
    drop(guard);
    process::exit(code);
}

async fn run(args: Args) -> Result<()> {
    let registry = Arc::new(DriverRegistry::new());

    if args.describe {
        return output::print_line(&output::render_drivers(&registry.describe())?);
    }

    let raw = args
        .destination
        .as_deref()
        .context("a destination URI is required")?;
    let destination = Destination::parse(raw).context("invalid destination URI")?;

    let file = FileConfig::load(args.config.as_deref())?;
    let settings = config::resolve(&args, file)?;

    let uploader = Uploader::new(registry, settings.upload);
    let result = uploader
        .upload(tokio::io::stdin(), &destination)
        .await
        .with_context(|| format!("failed to upload to {}", destination.redacted()))?;

    output::print_line(&output::render_result(&result)?)?;

    if !uploader
        .wait_for_background(settings.background_wait)
        .await
    {
        warn!(
            wait = ?settings.background_wait,
            "Background thumbnail work did not finish before exit"
        );
    }
    Ok(())
}
