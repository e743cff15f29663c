//! `install`: resolve VS Code into the cache

use std::process::ExitCode;

use ppds_e2e::download::resolve_executable;
use ppds_e2e::HarnessConfig;
use tracing::info;

use crate::output;

pub async fn execute(config: &HarnessConfig) -> anyhow::Result<ExitCode> {
    let options = config.launch.resolve_options();
    info!(
        "Resolving VS Code {} into {}",
        options.version,
        options.cache_dir.display()
    );

    match resolve_executable(&options).await {
        Ok(executable) => {
            output::print_success(&format!("VS Code ready: {}", executable.display()));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            output::print_error(&format!("VS Code install failed: {}", e));
            Ok(ExitCode::FAILURE)
        }
    }
}
