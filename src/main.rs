use anyhow::{anyhow, Result};
use book_replay::cli::{Command, RootArgs};
use book_replay::workflow;
use clap::Parser;

fn main() {
    if let Err(error) = run() {
        eprintln!("breplay error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = RootArgs::parse();
    init_tracing(args.quiet, args.verbose)?;

    match &args.command {
        Command::Run(run) => workflow::run_replay(run),
        Command::Listings(listings) => workflow::run_listings(listings),
        Command::Validate(validate) => workflow::run_validate(validate),
    }
}

fn init_tracing(quiet: bool, verbose: bool) -> Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("BOOK_REPLAY_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow!("failed to initialize tracing subscriber: {error}"))?;
    Ok(())
}
