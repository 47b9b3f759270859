//! CLI argument parsing for chapter replay.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "breplay",
    version,
    about = "Replay a book chapter's listings against its sample project",
    after_help = "Examples:\n  breplay validate --config chapters/chapter_03.json\n  breplay listings --config chapters/chapter_03.json\n  breplay run --config chapters/chapter_03.json --out reports/chapter_03.json\n  breplay run --config chapters/chapter_03.json --start-at 27 --start-ref ch03l009",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Only log errors
    #[arg(long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log every listing and sandbox call
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    Listings(ListingsArgs),
    Validate(ValidateArgs),
}

#[derive(Parser, Debug)]
#[command(about = "Replay a chapter in a fresh sandbox and verify the result")]
pub struct RunArgs {
    /// Chapter config JSON
    #[arg(long, value_name = "FILE")]
    pub config: PathBuf,

    /// Resume at this listing position instead of the chapter start
    #[arg(long, value_name = "N", requires = "start_ref")]
    pub start_at: Option<usize>,

    /// Commit label whose tree stands in for the skipped listings
    #[arg(long, value_name = "LABEL", requires = "start_at")]
    pub start_ref: Option<String>,

    /// Clone the sample project here and keep it afterwards
    #[arg(long, value_name = "DIR")]
    pub sandbox_dir: Option<PathBuf>,

    /// Write a JSON replay report
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Print the classified listing sequence")]
pub struct ListingsArgs {
    /// Chapter config JSON
    #[arg(long, value_name = "FILE")]
    pub config: PathBuf,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Check config, listings, and skip directives without a sandbox")]
pub struct ValidateArgs {
    /// Chapter config JSON
    #[arg(long, value_name = "FILE")]
    pub config: PathBuf,
}
