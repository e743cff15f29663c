//! Result reporting
//!
//! [`ClaudeJsonReporter`] turns a run into one JSON document that a parent
//! process (CI, or an agent driving the harness) can read without parsing
//! logs. It is written to `claude-test-results.json` and echoed to stdout
//! between [`BEGIN_MARKER`] and [`END_MARKER`].

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{E2eError, E2eResult};

pub const BEGIN_MARKER: &str = "=== CLAUDE TEST RESULTS ===";
pub const END_MARKER: &str = "=== END CLAUDE TEST RESULTS ===";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Skipped => "skipped",
        }
    }
}

/// Handed to reporters before the first test
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub projects: Vec<String>,
    pub total_tests: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestFailure {
    pub message: String,
    /// Steps that ran, ending at the one that failed
    pub stack_trace: Option<String>,
}

/// One finished attempt of one test
#[derive(Debug, Clone)]
pub struct TestOutcome {
    /// Stable across retries: `project > file > test`
    pub id: String,
    pub title: String,
    pub suite: String,
    pub status: TestStatus,
    pub duration: Duration,
    pub attachments: Vec<PathBuf>,
    pub error: Option<TestFailure>,
    pub retry: u32,
}

#[derive(Debug, Clone)]
pub struct RunEnd {
    pub duration: Duration,
}

/// Receives run events; reporters never fail the run
pub trait Reporter: Send {
    fn on_begin(&mut self, info: &RunInfo);

    fn on_test_end(&mut self, outcome: &TestOutcome);

    fn on_end(&mut self, end: &RunEnd);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaudeTestCase {
    pub name: String,
    pub status: TestStatus,
    /// Seconds
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaudeTestResult {
    /// True iff every test passed
    pub passed: bool,
    /// Seconds
    pub duration: f64,
    pub tests: Vec<ClaudeTestCase>,
    pub screenshots: Vec<String>,
    pub errors: Vec<String>,
    /// RFC 3339
    pub timestamp: String,
}

impl ClaudeTestResult {
    /// Assemble a result, deriving `passed` from the cases
    pub fn new(
        tests: Vec<ClaudeTestCase>,
        duration: Duration,
        screenshots: Vec<String>,
        errors: Vec<String>,
    ) -> Self {
        Self {
            passed: tests.iter().all(|t| t.status == TestStatus::Passed),
            duration: duration.as_secs_f64(),
            tests,
            screenshots,
            errors,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn load(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn count(&self, status: TestStatus) -> usize {
        self.tests.iter().filter(|t| t.status == status).count()
    }

    /// The document framed by the sentinel lines
    pub fn framed(&self) -> E2eResult<String> {
        Ok(frame(&serde_json::to_string_pretty(self)?))
    }

    /// Pull a result back out of mixed console output
    pub fn extract(output: &str) -> Option<Self> {
        let start = output.find(BEGIN_MARKER)? + BEGIN_MARKER.len();
        let end = start + output[start..].find(END_MARKER)?;
        serde_json::from_str(output[start..end].trim()).ok()
    }
}

fn frame(json: &str) -> String {
    format!("{}\n{}\n{}\n", BEGIN_MARKER, json, END_MARKER)
}

fn push_unique(items: &mut Vec<String>, item: String) {
    if !items.contains(&item) {
        items.push(item);
    }
}

/// Builds the [`ClaudeTestResult`] for a run
pub struct ClaudeJsonReporter {
    output_path: PathBuf,
    console: Box<dyn Write + Send>,
    started: Option<Instant>,
    tests: Vec<ClaudeTestCase>,
    // outcome id -> index in `tests`
    positions: HashMap<String, usize>,
    screenshots: Vec<String>,
    errors: Vec<String>,
    result: Option<ClaudeTestResult>,
}

impl ClaudeJsonReporter {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self::with_console(output_path, Box::new(std::io::stdout()))
    }

    pub fn with_console(output_path: impl Into<PathBuf>, console: Box<dyn Write + Send>) -> Self {
        Self {
            output_path: output_path.into(),
            console,
            started: None,
            tests: Vec::new(),
            positions: HashMap::new(),
            screenshots: Vec::new(),
            errors: Vec::new(),
            result: None,
        }
    }

    /// The document assembled by the last `on_end`
    pub fn result(&self) -> Option<&ClaudeTestResult> {
        self.result.as_ref()
    }

    fn write_file(&self, json: &str) -> E2eResult<()> {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.output_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&self.output_path, json)
        };
        write().map_err(|e| E2eError::ReporterWrite {
            path: self.output_path.clone(),
            reason: e.to_string(),
        })
    }
}

impl Reporter for ClaudeJsonReporter {
    fn on_begin(&mut self, _info: &RunInfo) {
        self.started = Some(Instant::now());
        self.tests.clear();
        self.positions.clear();
        self.screenshots.clear();
        self.errors.clear();
        self.result = None;
    }

    fn on_test_end(&mut self, outcome: &TestOutcome) {
        let case = ClaudeTestCase {
            name: outcome.title.clone(),
            status: outcome.status,
            duration: outcome.duration.as_secs_f64(),
            screenshot: outcome
                .attachments
                .last()
                .map(|p| p.display().to_string()),
            error: outcome.error.as_ref().map(|f| f.message.clone()),
            stack_trace: outcome.error.as_ref().and_then(|f| f.stack_trace.clone()),
        };

        for attachment in &outcome.attachments {
            push_unique(&mut self.screenshots, attachment.display().to_string());
        }
        if let Some(failure) = &outcome.error {
            push_unique(&mut self.errors, failure.message.clone());
        }

        // A retried test keeps its first position and its last attempt
        match self.positions.get(&outcome.id) {
            Some(&index) => self.tests[index] = case,
            None => {
                self.positions.insert(outcome.id.clone(), self.tests.len());
                self.tests.push(case);
            }
        }
    }

    fn on_end(&mut self, end: &RunEnd) {
        let duration = self.started.map(|s| s.elapsed()).unwrap_or(end.duration);
        let result = ClaudeTestResult::new(
            self.tests.clone(),
            duration,
            self.screenshots.clone(),
            self.errors.clone(),
        );

        match serde_json::to_string_pretty(&result) {
            Ok(json) => {
                match self.write_file(&json) {
                    Ok(()) => info!("Results written to: {}", self.output_path.display()),
                    Err(e) => error!("{}", e),
                }

                let framed = frame(&json);
                if let Err(e) = self
                    .console
                    .write_all(framed.as_bytes())
                    .and_then(|_| self.console.flush())
                {
                    warn!("Could not print results: {}", e);
                }
            }
            Err(e) => error!("Could not serialize results: {}", e),
        }

        self.result = Some(result);
    }
}

/// Console lines per test plus a closing summary
#[derive(Default)]
pub struct ListReporter {
    started: Option<Instant>,
    // outcome id -> final status
    statuses: HashMap<String, TestStatus>,
}

impl ListReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reporter for ListReporter {
    fn on_begin(&mut self, info: &RunInfo) {
        self.started = Some(Instant::now());
        self.statuses.clear();
        info!(
            "Running {} test(s) from project(s): {}",
            info.total_tests,
            info.projects.join(", ")
        );
    }

    fn on_test_end(&mut self, outcome: &TestOutcome) {
        let millis = outcome.duration.as_millis();
        let retry = if outcome.retry > 0 {
            format!(" (retry #{})", outcome.retry)
        } else {
            String::new()
        };

        match outcome.status {
            TestStatus::Passed => info!("✓ {} ({} ms){}", outcome.id, millis, retry),
            TestStatus::Failed => error!(
                "✗ {} - {}{}",
                outcome.id,
                outcome
                    .error
                    .as_ref()
                    .map(|f| f.message.as_str())
                    .unwrap_or("unknown error"),
                retry
            ),
            TestStatus::Skipped => info!("- {} (skipped)", outcome.id),
        }

        self.statuses.insert(outcome.id.clone(), outcome.status);
    }

    fn on_end(&mut self, end: &RunEnd) {
        let count = |status: TestStatus| self.statuses.values().filter(|s| **s == status).count();
        let duration = self.started.map(|s| s.elapsed()).unwrap_or(end.duration);

        info!("");
        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            count(TestStatus::Passed),
            count(TestStatus::Failed),
            count(TestStatus::Skipped),
            duration.as_millis()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Console sink tests can read back
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn outcome(id: &str, status: TestStatus, retry: u32) -> TestOutcome {
        TestOutcome {
            id: format!("smoke > data-explorer.yaml > {}", id),
            title: id.to_string(),
            suite: "data-explorer".to_string(),
            status,
            duration: Duration::from_millis(250),
            attachments: Vec::new(),
            error: (status == TestStatus::Failed).then(|| TestFailure {
                message: format!("{} failed", id),
                stack_trace: Some("at step 1: log".to_string()),
            }),
            retry,
        }
    }

    fn run(reporter: &mut ClaudeJsonReporter, outcomes: &[TestOutcome]) {
        reporter.on_begin(&RunInfo {
            projects: vec!["smoke".to_string()],
            total_tests: outcomes.len(),
        });
        for o in outcomes {
            reporter.on_test_end(o);
        }
        reporter.on_end(&RunEnd {
            duration: Duration::from_secs(1),
        });
    }

    #[test]
    fn test_all_passed() {
        let dir = tempfile::tempdir().unwrap();
        let console = Captured::default();
        let mut reporter = ClaudeJsonReporter::with_console(
            dir.path().join("results/claude-test-results.json"),
            Box::new(console.clone()),
        );

        let mut first = outcome("opens", TestStatus::Passed, 0);
        first.attachments.push(PathBuf::from("/shots/data-explorer-loaded.png"));
        run(&mut reporter, &[first, outcome("closes", TestStatus::Passed, 0)]);

        let result = reporter.result().unwrap();
        assert!(result.passed);
        assert_eq!(result.tests.len(), 2);
        assert_eq!(result.screenshots, vec!["/shots/data-explorer-loaded.png"]);
        assert!(result.errors.is_empty());
        assert!(result.duration >= 0.0);

        let written = ClaudeTestResult::load(&dir.path().join("results/claude-test-results.json")).unwrap();
        assert_eq!(&written, result);

        let printed = console.text();
        assert!(printed.starts_with(BEGIN_MARKER));
        assert!(printed.trim_end().ends_with(END_MARKER));
        assert_eq!(ClaudeTestResult::extract(&printed).as_ref(), Some(result));
    }

    #[test]
    fn test_one_failure_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter =
            ClaudeJsonReporter::with_console(dir.path().join("r.json"), Box::new(Captured::default()));

        run(
            &mut reporter,
            &[
                outcome("opens", TestStatus::Passed, 0),
                outcome("queries", TestStatus::Failed, 0),
            ],
        );

        let result = reporter.result().unwrap();
        assert!(!result.passed);
        assert_eq!(result.errors, vec!["queries failed"]);
        assert_eq!(result.tests[1].stack_trace.as_deref(), Some("at step 1: log"));
    }

    #[test]
    fn test_skipped_is_not_passed() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter =
            ClaudeJsonReporter::with_console(dir.path().join("r.json"), Box::new(Captured::default()));
        run(&mut reporter, &[outcome("later", TestStatus::Skipped, 0)]);
        assert!(!reporter.result().unwrap().passed);
    }

    #[test]
    fn test_empty_run_passes() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter =
            ClaudeJsonReporter::with_console(dir.path().join("r.json"), Box::new(Captured::default()));
        run(&mut reporter, &[]);
        let result = reporter.result().unwrap();
        assert!(result.passed);
        assert!(result.tests.is_empty());
    }

    #[test]
    fn test_retry_keeps_final_attempt_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter =
            ClaudeJsonReporter::with_console(dir.path().join("r.json"), Box::new(Captured::default()));

        let mut first = outcome("flaky", TestStatus::Failed, 0);
        first.attachments.push(PathBuf::from("/shots/flaky.png"));
        let mut second = outcome("flaky", TestStatus::Failed, 1);
        second.attachments.push(PathBuf::from("/shots/flaky.png"));
        let third = outcome("flaky", TestStatus::Passed, 2);

        run(&mut reporter, &[first, second, third]);

        let result = reporter.result().unwrap();
        assert_eq!(result.tests.len(), 1);
        assert_eq!(result.tests[0].status, TestStatus::Passed);
        assert!(result.passed);
        assert_eq!(result.screenshots, vec!["/shots/flaky.png"]);
        assert_eq!(result.errors, vec!["flaky failed"]);
    }

    #[test]
    fn test_write_failure_still_prints() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let console = Captured::default();
        let mut reporter =
            ClaudeJsonReporter::with_console(blocker.join("r.json"), Box::new(console.clone()));
        run(&mut reporter, &[outcome("opens", TestStatus::Passed, 0)]);

        assert!(console.text().contains(BEGIN_MARKER));
        assert!(reporter.result().unwrap().passed);
    }

    #[test]
    fn test_camel_case_and_optional_fields() {
        let case = ClaudeTestCase {
            name: "queries".to_string(),
            status: TestStatus::Failed,
            duration: 1.5,
            screenshot: None,
            error: Some("boom".to_string()),
            stack_trace: Some("at step 2".to_string()),
        };
        let json = serde_json::to_value(&case).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["stackTrace"], "at step 2");
        assert!(json.get("screenshot").is_none());
    }
}
