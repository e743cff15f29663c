//! Declarative YAML scenario files
//!
//! One file is one suite: it gets its own VS Code instance, and its tests
//! run in the order they are written.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};

/// A suite parsed from one YAML file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteSpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Tags for filtering suites
    #[serde(default)]
    pub tags: Vec<String>,

    /// Extension whose activation gates the suite; defaults to the configured one
    #[serde(default)]
    pub extension_id: Option<String>,

    pub tests: Vec<TestCaseSpec>,

    /// File the suite was loaded from
    #[serde(skip)]
    pub source: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseSpec {
    pub name: String,

    #[serde(default)]
    pub skip: bool,

    pub steps: Vec<TestStep>,
}

/// A single step in a test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Run a command by its palette title
    ExecuteCommand {
        command: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    OpenPalette,

    /// Type into the open palette
    Search { text: String },

    SelectResult { index: usize },

    /// Press a key chord such as `Escape` or `Control+Shift+P`
    Press { key: String },

    WaitForPanel {
        view_type: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Wait for a visible element inside a webview
    WaitForElement {
        view_type: String,
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Assert on an element in the window, or in a webview when `view_type` is set
    AssertElement {
        #[serde(default)]
        view_type: Option<String>,
        selector: String,
        #[serde(default)]
        exists: Option<bool>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        text_contains: Option<String>,
    },

    /// Capture the window, an element (`selector`) or a panel (`view_type`)
    Screenshot {
        name: String,
        #[serde(default)]
        full_page: bool,
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        view_type: Option<String>,
    },

    Log { message: String },
}

impl SuiteSpec {
    /// Parse a suite from a YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let suite: Self = serde_yaml::from_str(yaml)?;
        suite.validate()?;
        Ok(suite)
    }

    /// Parse a suite from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut suite = Self::from_yaml(&content)
            .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))?;
        suite.source = path.to_path_buf();
        Ok(suite)
    }

    /// Load every file under `root` matching any of `patterns`, in path order
    pub fn load_matching(root: &Path, patterns: &[String]) -> E2eResult<Vec<Self>> {
        let mut files = BTreeSet::new();

        for pattern in patterns {
            let full = root.join(pattern);
            for path in glob::glob(&full.to_string_lossy())?.filter_map(|p| p.ok()) {
                if path.is_file() {
                    files.insert(path);
                }
            }
        }

        files.iter().map(|path| Self::from_file(path)).collect()
    }

    /// Filter suites by tag
    pub fn filter_by_tag<'a>(suites: &'a [Self], tag: &str) -> Vec<&'a Self> {
        suites.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    fn validate(&self) -> E2eResult<()> {
        if self.tests.is_empty() {
            return Err(E2eError::SpecParse(format!("suite '{}' has no tests", self.name)));
        }

        let mut seen = HashSet::new();
        for test in &self.tests {
            if !seen.insert(test.name.as_str()) {
                return Err(E2eError::SpecParse(format!(
                    "suite '{}' has two tests named '{}'",
                    self.name, test.name
                )));
            }

            for step in &test.steps {
                if let TestStep::Screenshot {
                    selector: Some(_),
                    view_type: Some(_),
                    name,
                    ..
                } = step
                {
                    return Err(E2eError::SpecParse(format!(
                        "screenshot '{}' takes a selector or a view_type, not both",
                        name
                    )));
                }
            }
        }

        Ok(())
    }
}
