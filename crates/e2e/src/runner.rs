//! Test runner: one VS Code per scenario file, tests in order, results fanned
//! out to reporters

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::{HarnessConfig, ProjectConfig, ScreenshotPolicy};
use crate::error::{E2eError, E2eResult};
use crate::executor::{StepExecutor, TestContext};
use crate::launcher::{Instance, Launch};
use crate::reporter::{Reporter, RunEnd, RunInfo, TestFailure, TestOutcome, TestStatus};
use crate::screenshot::{ScreenshotHelper, ScreenshotOptions};
use crate::spec::{SuiteSpec, TestCaseSpec};

/// Bound on the automatic failure screenshot
const FAILURE_CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Aggregate of a run; one entry per test, retries collapsed
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration: Duration,
    pub outcomes: Vec<TestOutcome>,
}

impl RunSummary {
    /// True iff every test passed
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.status == TestStatus::Passed)
    }

    fn record(&mut self, outcome: TestOutcome) {
        match outcome.status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Skipped => self.skipped += 1,
        }
        self.total += 1;
        self.outcomes.push(outcome);
    }
}

struct Fanout(Vec<Box<dyn Reporter>>);

impl Fanout {
    fn begin(&mut self, info: &RunInfo) {
        self.0.iter_mut().for_each(|r| r.on_begin(info));
    }

    fn test_end(&mut self, outcome: &TestOutcome) {
        self.0.iter_mut().for_each(|r| r.on_test_end(outcome));
    }

    fn end(&mut self, end: &RunEnd) {
        self.0.iter_mut().for_each(|r| r.on_end(end));
    }
}

/// One scenario file scheduled under a project
struct Scheduled<'a> {
    project: &'a ProjectConfig,
    suite: SuiteSpec,
}

impl Scheduled<'_> {
    fn file_name(&self) -> String {
        self.suite
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.suite.name.clone())
    }

    fn outcome(&self, test: &TestCaseSpec, status: TestStatus, duration: Duration) -> TestOutcome {
        TestOutcome {
            id: format!("{} > {} > {}", self.project.name, self.file_name(), test.name),
            title: test.name.clone(),
            suite: self.suite.name.clone(),
            status,
            duration,
            attachments: Vec::new(),
            error: None,
            retry: 0,
        }
    }
}

/// Main E2E test runner
pub struct TestRunner {
    config: HarnessConfig,
    launcher: Arc<dyn Launch>,
    reporters: Vec<Box<dyn Reporter>>,
}

impl TestRunner {
    pub fn new(config: HarnessConfig, launcher: Arc<dyn Launch>) -> Self {
        Self {
            config,
            launcher,
            reporters: Vec::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run the named projects (all of them when empty)
    pub async fn run(&mut self, projects: &[String]) -> E2eResult<RunSummary> {
        let mut fanout = Fanout(std::mem::take(&mut self.reporters));
        let result = self.run_with(&mut fanout, projects).await;
        self.reporters = fanout.0;
        result
    }

    async fn run_with(&self, reporters: &mut Fanout, names: &[String]) -> E2eResult<RunSummary> {
        self.config.validate()?;

        let projects: Vec<&ProjectConfig> = if names.is_empty() {
            self.config.projects.iter().collect()
        } else {
            names
                .iter()
                .map(|name| {
                    self.config
                        .project(name)
                        .ok_or_else(|| E2eError::Config(format!("unknown project '{}'", name)))
                })
                .collect::<E2eResult<_>>()?
        };

        let mut scheduled = Vec::new();
        for project in &projects {
            let suites = SuiteSpec::load_matching(&self.config.specs_dir, &project.test_match)?;
            if suites.is_empty() {
                warn!(
                    "Project '{}' matched no scenario files under {}",
                    project.name,
                    self.config.specs_dir.display()
                );
            }
            scheduled.extend(suites.into_iter().map(|suite| Scheduled { project, suite }));
        }

        let start = Instant::now();
        reporters.begin(&RunInfo {
            projects: projects.iter().map(|p| p.name.clone()).collect(),
            total_tests: scheduled.iter().map(|s| s.suite.tests.len()).sum(),
        });

        let mut summary = RunSummary::default();
        for item in &scheduled {
            self.run_suite(item, reporters, &mut summary).await;
        }

        summary.duration = start.elapsed();
        reporters.end(&RunEnd {
            duration: summary.duration,
        });

        Ok(summary)
    }

    async fn run_suite(&self, item: &Scheduled<'_>, reporters: &mut Fanout, summary: &mut RunSummary) {
        let suite = &item.suite;
        info!(
            "Running suite '{}' ({}) in project '{}'",
            suite.name,
            item.file_name(),
            item.project.name
        );

        if suite.tests.iter().all(|t| t.skip) {
            for test in &suite.tests {
                let outcome = item.outcome(test, TestStatus::Skipped, Duration::ZERO);
                reporters.test_end(&outcome);
                summary.record(outcome);
            }
            return;
        }

        let setup_start = Instant::now();
        let mut instance = match self.before_all(item).await {
            Ok(instance) => instance,
            Err(e) => {
                error!("Suite '{}' could not start: {}", suite.name, e);
                let elapsed = setup_start.elapsed();
                for test in &suite.tests {
                    let outcome = if test.skip {
                        item.outcome(test, TestStatus::Skipped, Duration::ZERO)
                    } else {
                        let mut outcome = item.outcome(test, TestStatus::Failed, elapsed);
                        outcome.error = Some(TestFailure {
                            message: e.to_string(),
                            stack_trace: None,
                        });
                        outcome
                    };
                    reporters.test_end(&outcome);
                    summary.record(outcome);
                }
                return;
            }
        };

        for test in &suite.tests {
            if test.skip {
                let outcome = item.outcome(test, TestStatus::Skipped, Duration::ZERO);
                reporters.test_end(&outcome);
                summary.record(outcome);
                continue;
            }

            let mut retry = 0;
            let outcome = loop {
                let outcome = self.run_attempt(instance.as_ref(), item, test, retry).await;
                reporters.test_end(&outcome);

                if outcome.status == TestStatus::Passed || retry >= item.project.retries {
                    break outcome;
                }
                retry += 1;
                info!("Retrying '{}' (attempt {})", test.name, retry + 1);
            };
            summary.record(outcome);
        }

        if let Err(e) = instance.close().await {
            warn!("Failed to close VS Code after suite '{}': {}", suite.name, e);
        }
    }

    /// Launch VS Code and wait for the extension under test
    async fn before_all(&self, item: &Scheduled<'_>) -> E2eResult<Box<dyn Instance>> {
        let mut instance = self.launcher.launch().await?;

        let extension_id = item
            .suite
            .extension_id
            .clone()
            .or_else(|| self.config.extension_id.clone())
            .unwrap_or_else(|| instance.extension_id().to_string());

        if let Err(e) = instance
            .wait_for_extension_activation(&extension_id, self.config.activation_timeout())
            .await
        {
            if let Err(close_error) = instance.close().await {
                warn!("Failed to close VS Code: {}", close_error);
            }
            return Err(e);
        }

        Ok(instance)
    }

    async fn run_attempt(
        &self,
        instance: &dyn Instance,
        item: &Scheduled<'_>,
        test: &TestCaseSpec,
        retry: u32,
    ) -> TestOutcome {
        debug!("Running test: {}", test.name);

        let start = Instant::now();
        let mut context = TestContext::default();
        let executor = StepExecutor::new(instance.window(), &self.config);
        let timeout = item.project.timeout();

        let result = match tokio::time::timeout(timeout, executor.run_test(test, &mut context)).await {
            Ok(result) => result,
            Err(_) => Err(E2eError::Timeout {
                waiting_for: format!("test '{}' to finish", test.name),
                elapsed: timeout,
            }),
        };

        let mut outcome = item.outcome(test, TestStatus::Passed, Duration::ZERO);
        outcome.retry = retry;

        if let Err(e) = result {
            outcome.status = TestStatus::Failed;
            if self.config.screenshot == ScreenshotPolicy::OnlyOnFailure {
                let name = format!("{}-{}-failure", item.suite.name, test.name);
                if let Some(path) = capture_failure(instance, &self.config.screenshot_dir, &name).await {
                    context.attachments.push(path);
                }
            }
            let trail = context.trail();
            outcome.error = Some(TestFailure {
                message: e.to_string(),
                stack_trace: (!trail.is_empty()).then_some(trail),
            });
        }

        outcome.attachments = context.attachments;
        outcome.duration = start.elapsed();
        outcome
    }
}

async fn capture_failure(instance: &dyn Instance, dir: &Path, name: &str) -> Option<std::path::PathBuf> {
    let helper = ScreenshotHelper::new(instance.window(), dir);
    match tokio::time::timeout(FAILURE_CAPTURE_TIMEOUT, helper.capture(&ScreenshotOptions::named(name))).await {
        Ok(Ok(path)) => Some(path),
        Ok(Err(e)) => {
            warn!("Failure screenshot not captured: {}", e);
            None
        }
        Err(_) => {
            warn!("Failure screenshot timed out");
            None
        }
    }
}
