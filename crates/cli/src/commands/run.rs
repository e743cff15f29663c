//! `smoke`, `integration` and `all`: run scenario projects

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use ppds_e2e::{ClaudeJsonReporter, HarnessConfig, ListReporter, TestRunner, VsCodeLauncher};
use tracing::{debug, info};

use crate::output;

/// Exit code when the harness itself could not run
pub const HARNESS_ERROR: u8 = 2;

/// Command-line settings that win over the config file
#[derive(Debug, Default)]
pub struct Overrides {
    pub headless: bool,
    pub extension_path: Option<PathBuf>,
    pub executable: Option<PathBuf>,
}

pub fn load_config(path: &Path, overrides: &Overrides) -> anyhow::Result<HarnessConfig> {
    let mut config = HarnessConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    if overrides.headless {
        config.launch.headless = true;
    }
    if let Some(extension_path) = &overrides.extension_path {
        config.launch.extension_path = extension_path.clone();
    }
    if let Some(executable) = &overrides.executable {
        config.launch.executable = Some(executable.clone());
    }

    debug!("Configuration: {:?}", config);
    Ok(config)
}

pub async fn execute(config: HarnessConfig, projects: &[&str]) -> anyhow::Result<ExitCode> {
    let projects: Vec<String> = projects.iter().map(|p| p.to_string()).collect();
    let launcher = Arc::new(VsCodeLauncher::new(config.launch.to_options()));
    let results_path = config.results_path();

    info!(
        "Running {} against {}",
        if projects.is_empty() {
            "all projects".to_string()
        } else {
            projects.join(", ")
        },
        config.launch.extension_path.display()
    );

    let mut runner = TestRunner::new(config, launcher)
        .with_reporter(Box::new(ListReporter::new()))
        .with_reporter(Box::new(ClaudeJsonReporter::new(results_path)));

    let summary = runner.run(&projects).await.context("test run aborted")?;

    output::print_summary(&summary);

    if summary.passed() {
        output::print_success(&format!("All {} test(s) passed", summary.total));
        Ok(ExitCode::SUCCESS)
    } else {
        output::print_error(&format!(
            "{} failed, {} skipped of {} test(s)",
            summary.failed, summary.skipped, summary.total
        ));
        Ok(ExitCode::FAILURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e2e.toml");
        std::fs::write(&path, "[launch]\nheadless = false\nextension_path = \"ext\"\n").unwrap();

        let config = load_config(
            &path,
            &Overrides {
                headless: true,
                extension_path: None,
                executable: Some(PathBuf::from("/opt/code/code")),
            },
        )
        .unwrap();

        assert!(config.launch.headless);
        assert_eq!(config.launch.extension_path, PathBuf::from("ext"));
        assert_eq!(config.launch.executable, Some(PathBuf::from("/opt/code/code")));
    }

    #[test]
    fn test_bad_config_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e2e.toml");
        std::fs::write(&path, "workers = 3\n").unwrap();

        let err = load_config(&path, &Overrides::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("e2e.toml"));
    }
}
