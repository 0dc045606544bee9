mod cli;
mod commands;
mod config;
mod engine;
mod host;
mod paths;
mod ui;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub file: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        file: cli.file,
    };

    let result = match cli.command {
        Command::Plan(args) => commands::plan::run(&ctx, &args),
        Command::Apply(args) => commands::apply::run(&ctx, &args),
        Command::Status(args) => commands::status::run(&ctx, &args),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "keel", &mut io::stdout());
            Ok(commands::Outcome::Success)
        }
    };

    let code = match result {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            ui::error(&format!("{:#}", err));
            if let Some(category) = commands::root_category(&err) {
                ui::dim(&format!("{}: {}", category.description(), category.advice()));
            }
            commands::error_exit_code(&err)
        }
    };
    std::process::exit(code);
}
