//! Power Platform Developer Suite E2E harness - Main Entry Point
//!
//! `install` fetches VS Code, `smoke`/`integration`/`all` run scenario
//! projects, `report` renders the last results as HTML.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{install, report, run};

/// End-to-end tests for the Power Platform Developer Suite extension
#[derive(Parser)]
#[command(name = "ppds-e2e")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Harness configuration file
    #[arg(long, default_value = "e2e/e2e.toml", global = true, env = "PPDS_E2E_CONFIG")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Run VS Code without a visible window
    #[arg(long, global = true)]
    headless: bool,

    /// Directory holding the extension's package.json
    #[arg(long, global = true)]
    extension_path: Option<PathBuf>,

    /// VS Code executable to use instead of the cached download
    #[arg(long, global = true, env = "VSCODE_EXECUTABLE")]
    executable: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download VS Code into the cache without running tests
    Install,

    /// Run the smoke project
    Smoke,

    /// Run the integration project
    Integration,

    /// Run every configured project
    All,

    /// Render the last results as HTML and open them
    Report(report::ReportArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::from(run::HARNESS_ERROR)
        }
    }
}

async fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let overrides = run::Overrides {
        headless: cli.headless,
        extension_path: cli.extension_path,
        executable: cli.executable,
    };
    let config = run::load_config(&cli.config, &overrides)?;

    match cli.command {
        Commands::Install => install::execute(&config).await,
        Commands::Smoke => run::execute(config, &["smoke"]).await,
        Commands::Integration => run::execute(config, &["integration"]).await,
        Commands::All => run::execute(config, &[]).await,
        Commands::Report(args) => report::execute(&config, args),
    }
}
