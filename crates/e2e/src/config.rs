//! Harness configuration (`e2e/e2e.toml`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::download::ResolveOptions;
use crate::error::{E2eError, E2eResult};
use crate::launcher::LaunchOptions;

/// File the JSON reporter writes inside `results_dir`
pub const RESULTS_FILE: &str = "claude-test-results.json";

/// File the HTML report is rendered to inside `results_dir`
pub const REPORT_FILE: &str = "report.html";

/// When the runner captures screenshots on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScreenshotPolicy {
    Off,
    #[default]
    OnlyOnFailure,
}

/// Top-level harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Extension whose activation gates every suite; defaults to the manifest id
    pub extension_id: Option<String>,

    /// Root the project globs are matched against
    pub specs_dir: PathBuf,

    pub screenshot_dir: PathBuf,

    pub results_dir: PathBuf,

    pub screenshot: ScreenshotPolicy,

    pub activation_timeout_ms: u64,

    pub palette_timeout_ms: u64,

    pub panel_timeout_ms: u64,

    pub element_timeout_ms: u64,

    /// Tests share one VS Code per file, so only one worker is supported
    pub workers: usize,

    pub launch: LaunchConfig,

    pub projects: Vec<ProjectConfig>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            extension_id: None,
            specs_dir: PathBuf::from("e2e/specs"),
            screenshot_dir: PathBuf::from("e2e/screenshots"),
            results_dir: PathBuf::from("e2e/results"),
            screenshot: ScreenshotPolicy::OnlyOnFailure,
            activation_timeout_ms: 30_000,
            palette_timeout_ms: 5_000,
            panel_timeout_ms: 10_000,
            element_timeout_ms: 5_000,
            workers: 1,
            launch: LaunchConfig::default(),
            projects: vec![ProjectConfig::smoke(), ProjectConfig::integration()],
        }
    }
}

/// How VS Code is launched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Directory holding the extension's `package.json`
    pub extension_path: PathBuf,

    pub user_data_dir: Option<PathBuf>,

    pub headless: bool,

    pub timeout_ms: u64,

    /// Use this VS Code instead of resolving one
    pub executable: Option<PathBuf>,

    /// `stable` or a pinned release
    pub version: String,

    /// Where downloaded VS Code builds are kept
    pub cache_dir: PathBuf,

    pub workspace: Option<PathBuf>,

    pub extra_args: Vec<String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            extension_path: PathBuf::from("."),
            user_data_dir: None,
            headless: false,
            timeout_ms: 30_000,
            executable: None,
            version: "stable".to_string(),
            cache_dir: PathBuf::from(".vscode-test"),
            workspace: None,
            extra_args: Vec::new(),
        }
    }
}

impl LaunchConfig {
    pub fn to_options(&self) -> LaunchOptions {
        LaunchOptions {
            extension_path: self.extension_path.clone(),
            user_data_dir: self.user_data_dir.clone(),
            headless: self.headless,
            timeout: Duration::from_millis(self.timeout_ms),
            executable: self.executable.clone(),
            version: self.version.clone(),
            cache_dir: self.cache_dir.clone(),
            workspace: self.workspace.clone(),
            extra_args: self.extra_args.clone(),
        }
    }

    /// Where `install` looks for, or downloads, VS Code
    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            executable: self.executable.clone(),
            version: self.version.clone(),
            cache_dir: self.cache_dir.clone(),
        }
    }
}

/// A named group of scenario files sharing a timeout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,

    /// Globs relative to `specs_dir`
    pub test_match: Vec<String>,

    /// Per-test timeout
    pub timeout_ms: u64,

    #[serde(default)]
    pub retries: u32,
}

impl ProjectConfig {
    /// Fast checks that the extension starts and its panels open
    pub fn smoke() -> Self {
        Self {
            name: "smoke".to_string(),
            test_match: vec!["smoke/**/*.yaml".to_string()],
            timeout_ms: 30_000,
            retries: 0,
        }
    }

    /// End-to-end workflows
    pub fn integration() -> Self {
        Self {
            name: "integration".to_string(),
            test_match: vec!["integration/**/*.yaml".to_string()],
            timeout_ms: 120_000,
            retries: 0,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults when it is absent
    pub fn load(path: &Path) -> E2eResult<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> E2eResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| E2eError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> E2eResult<()> {
        if self.workers != 1 {
            return Err(E2eError::Config(format!(
                "workers must be 1 (got {}); suites share one VS Code instance",
                self.workers
            )));
        }

        let mut names = std::collections::HashSet::new();
        for project in &self.projects {
            if project.name.is_empty() || !names.insert(project.name.as_str()) {
                return Err(E2eError::Config(format!(
                    "project names must be unique and non-empty: '{}'",
                    project.name
                )));
            }
            if project.test_match.is_empty() {
                return Err(E2eError::Config(format!("project '{}' matches no files", project.name)));
            }
            if project.timeout_ms == 0 {
                return Err(E2eError::Config(format!("project '{}' has a zero timeout", project.name)));
            }
        }

        Ok(())
    }

    pub fn project(&self, name: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|p| p.name == name)
    }

    /// Path of the JSON results document
    pub fn results_path(&self) -> PathBuf {
        self.results_dir.join(RESULTS_FILE)
    }

    /// Path of the HTML report
    pub fn report_path(&self) -> PathBuf {
        self.results_dir.join(REPORT_FILE)
    }

    pub fn activation_timeout(&self) -> Duration {
        Duration::from_millis(self.activation_timeout_ms)
    }

    pub fn palette_timeout(&self) -> Duration {
        Duration::from_millis(self.palette_timeout_ms)
    }

    pub fn panel_timeout(&self) -> Duration {
        Duration::from_millis(self.panel_timeout_ms)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }
}
