use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keel")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative single-host deployment orchestrator", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Stack file (defaults to ./keel.toml, ./keel.json, then the config dir)
    #[arg(short, long, global = true, env = "KEEL_FILE")]
    pub file: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the actions apply would run, without changing anything
    Plan(PlanArgs),

    /// Bring the host to the declared state
    Apply(ApplyArgs),

    /// Show observed containers, volumes, health and certificates
    Status(StatusArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct PlanArgs {
    /// Also show the reverse proxy configuration diff
    #[arg(long)]
    pub diff: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Services applied concurrently (overrides the stack's workers)
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Print machine-readable JSON
    #[arg(long)]
    pub json: bool,
}
