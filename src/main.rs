mod channel;
mod cli;
mod commands;
mod config;
mod paths;
mod profiles;
mod progress;
mod report;
mod topology;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub json: bool,
    pub settings: config::Settings,
}

fn main() -> Result<ExitCode> {
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

    if let Command::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "fleetward", &mut io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let file = config::AppConfig::load()?;
    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        json: cli.json,
        settings: config::Settings::resolve(&file, &cli),
    };

    match cli.command {
        Command::Audit(args) => commands::run::run(&ctx, convergence::RunMode::Audit, &args),
        Command::DryRun(args) => commands::run::run(&ctx, convergence::RunMode::DryRun, &args),
        Command::Config(args) => commands::run::run(&ctx, convergence::RunMode::Config, &args),
        Command::Units { host } => commands::inspect::units(&ctx, &host),
        Command::Script { host, mode } => commands::inspect::script(&ctx, &host, mode.into()),
        Command::Validate => commands::inspect::validate(&ctx),
        Command::Completions { .. } => Ok(ExitCode::SUCCESS),
    }
}
