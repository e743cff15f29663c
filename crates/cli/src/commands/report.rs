//! `report`: render the last results document as HTML

use std::path::Path;
use std::process::{Command, ExitCode};

use anyhow::Context;
use clap::Args;
use ppds_e2e::{html, ClaudeTestResult, HarnessConfig};
use tracing::{info, warn};

use crate::output;

#[derive(Args)]
pub struct ReportArgs {
    /// Write the report without opening it
    #[arg(long)]
    pub no_open: bool,
}

pub fn execute(config: &HarnessConfig, args: ReportArgs) -> anyhow::Result<ExitCode> {
    let results_path = config.results_path();
    let result = ClaudeTestResult::load(&results_path).with_context(|| {
        format!(
            "no results at {}; run `ppds-e2e smoke` first",
            results_path.display()
        )
    })?;

    let report_path = config.report_path();
    html::write_report(&result, &report_path)
        .with_context(|| format!("failed to write {}", report_path.display()))?;
    output::print_success(&format!("Report written to {}", report_path.display()));

    if !args.no_open {
        open(&report_path);
    }
    Ok(ExitCode::SUCCESS)
}

fn open(path: &Path) {
    let mut command = if cfg!(target_os = "macos") {
        Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", ""]);
        command
    } else {
        Command::new("xdg-open")
    };

    match command.arg(path).spawn() {
        Ok(_) => info!("Opened {}", path.display()),
        Err(e) => warn!("Could not open {}: {}", path.display(), e),
    }
}
