//! Step execution against a workbench window

use std::path::PathBuf;
use std::time::{Duration, Instant};

use ppds_common::KeyChord;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::HarnessConfig;
use crate::error::{E2eError, E2eResult};
use crate::palette::CommandPaletteHelper;
use crate::screenshot::{ScreenshotHelper, ScreenshotOptions};
use crate::spec::{TestCaseSpec, TestStep};
use crate::wait::{Polled, Poller};
use crate::webview::WebviewHelper;
use crate::window::{query_as, DomQuery, Scope, Window};

/// Result of executing a test step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub step_name: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub screenshot_path: Option<PathBuf>,
}

/// What a test leaves behind, kept outside the test future so a timeout
/// does not lose it
#[derive(Debug, Default)]
pub struct TestContext {
    pub attachments: Vec<PathBuf>,
    pub steps: Vec<StepResult>,
}

impl TestContext {
    /// Steps in order, ending at the one that failed
    pub fn trail(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let mark = if step.success { "ok" } else { "FAILED" };
                format!("    at step {}: {} [{}]", i + 1, step.step_name, mark)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Runs scenario steps through the palette, webview and screenshot helpers
pub struct StepExecutor<'a> {
    window: &'a dyn Window,
    config: &'a HarnessConfig,
}

impl<'a> StepExecutor<'a> {
    pub fn new(window: &'a dyn Window, config: &'a HarnessConfig) -> Self {
        Self { window, config }
    }

    /// Run every step of a test, stopping at the first failure
    pub async fn run_test(&self, test: &TestCaseSpec, context: &mut TestContext) -> E2eResult<()> {
        for step in &test.steps {
            let start = Instant::now();
            let result = self.execute_step(step).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(screenshot_path) => {
                    if let Some(path) = &screenshot_path {
                        context.attachments.push(path.clone());
                    }
                    context.steps.push(StepResult {
                        success: true,
                        step_name: step_name(step),
                        duration_ms,
                        error: None,
                        screenshot_path,
                    });
                }
                Err(e) => {
                    context.steps.push(StepResult {
                        success: false,
                        step_name: step_name(step),
                        duration_ms,
                        error: Some(e.to_string()),
                        screenshot_path: None,
                    });
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Execute a single step; returns the screenshot it wrote, if any
    pub async fn execute_step(&self, step: &TestStep) -> E2eResult<Option<PathBuf>> {
        debug!("Executing step: {}", step_name(step));

        match step {
            TestStep::ExecuteCommand { command, timeout_ms } => {
                self.palette(*timeout_ms).execute_command(command).await.map(|_| None)
            }
            TestStep::OpenPalette => self.palette(None).open().await.map(|_| None),
            TestStep::Search { text } => self.palette(None).search(text).await.map(|_| None),
            TestStep::SelectResult { index } => {
                self.palette(None).select_result(*index).await.map(|_| None)
            }
            TestStep::Press { key } => self.execute_press(key).await.map(|_| None),
            TestStep::WaitForPanel {
                view_type,
                timeout_ms,
            } => {
                let timeout = timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| self.config.panel_timeout());
                self.webview()
                    .wait_for_panel(view_type, timeout)
                    .await
                    .map(|_| None)
            }
            TestStep::WaitForElement {
                view_type,
                selector,
                timeout_ms,
            } => self
                .execute_wait_for_element(view_type, selector, *timeout_ms)
                .await
                .map(|_| None),
            TestStep::AssertElement {
                view_type,
                selector,
                exists,
                text,
                text_contains,
            } => {
                let expectation = Expectation::new(*exists, text.as_deref(), text_contains.as_deref());
                self.execute_assert(view_type.as_deref(), selector, &expectation)
                    .await
                    .map(|_| None)
            }
            TestStep::Screenshot {
                name,
                full_page,
                selector,
                view_type,
            } => self
                .execute_screenshot(name, *full_page, selector.as_deref(), view_type.as_deref())
                .await
                .map(Some),
            TestStep::Log { message } => {
                info!("[TEST LOG] {}", message);
                Ok(None)
            }
        }
    }

    fn palette(&self, timeout_ms: Option<u64>) -> CommandPaletteHelper<'a> {
        let timeout = timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.palette_timeout());
        CommandPaletteHelper::new(self.window).with_timeout(timeout)
    }

    fn webview(&self) -> WebviewHelper<'a> {
        WebviewHelper::new(self.window).with_panel_timeout(self.config.panel_timeout())
    }

    async fn execute_press(&self, key: &str) -> E2eResult<()> {
        let chord: KeyChord = key.parse()?;
        self.window.press(&chord).await
    }

    async fn execute_wait_for_element(
        &self,
        view_type: &str,
        selector: &str,
        timeout_ms: Option<u64>,
    ) -> E2eResult<()> {
        let timeout = timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.config.element_timeout());
        let webview = self.webview();
        let frame = webview.get_webview_frame(view_type).await?;
        webview.wait_for_element(&frame, selector, timeout).await
    }

    /// Retries until the expectation holds or the element timeout passes
    async fn execute_assert(
        &self,
        view_type: Option<&str>,
        selector: &str,
        expectation: &Expectation<'_>,
    ) -> E2eResult<()> {
        let webview = self.webview();
        let frame = match view_type {
            Some(view_type) => Some(webview.get_webview_frame(view_type).await?),
            None => None,
        };
        let scope = match &frame {
            Some(frame) => Scope::Frame(&frame.handle),
            None => Scope::Window,
        };
        let location = match view_type {
            Some(view_type) => format!("webview '{}'", view_type),
            None => "the window".to_string(),
        };

        let window = self.window;
        let polled = Poller::new(self.config.element_timeout())
            .poll(move || async move {
                let observed = observe(window, scope, selector).await?;
                Ok::<_, E2eError>(expectation.check(&observed).is_ok().then_some(()))
            })
            .await
            .map_err(|e| match (e, view_type) {
                (E2eError::StaleFrame(_), Some(view_type)) => E2eError::StaleFrame(view_type.to_string()),
                (e, _) => e,
            })?;

        if let Polled::Ready(()) = polled {
            return Ok(());
        }

        let observed = observe(window, scope, selector).await?;
        match expectation.check(&observed) {
            Ok(()) => Ok(()),
            Err(reason) => Err(E2eError::AssertionFailed(format!(
                "element '{}' in {} {}",
                selector, location, reason
            ))),
        }
    }

    async fn execute_screenshot(
        &self,
        name: &str,
        full_page: bool,
        selector: Option<&str>,
        view_type: Option<&str>,
    ) -> E2eResult<PathBuf> {
        let helper = ScreenshotHelper::new(self.window, self.config.screenshot_dir.clone())
            .with_panel_timeout(self.config.panel_timeout());
        let options = ScreenshotOptions {
            name: name.to_string(),
            full_page,
        };

        match (selector, view_type) {
            (Some(selector), _) => helper.capture_element(selector, &options).await,
            (None, Some(view_type)) => helper.capture_webview(view_type, &options).await,
            (None, None) => helper.capture(&options).await,
        }
    }
}

/// What an element looked like at one instant
#[derive(Debug, Clone, Default)]
struct Observation {
    count: u64,
    text: Option<String>,
}

async fn observe(window: &dyn Window, scope: Scope<'_>, selector: &str) -> E2eResult<Observation> {
    let count: u64 = query_as(window, scope, &DomQuery::Count(selector.to_string())).await?;
    let text: Option<String> = if count > 0 {
        query_as(window, scope, &DomQuery::Text(selector.to_string())).await?
    } else {
        None
    };
    Ok(Observation { count, text })
}

#[derive(Debug, Clone)]
struct Expectation<'a> {
    exists: bool,
    text: Option<&'a str>,
    text_contains: Option<&'a str>,
}

impl<'a> Expectation<'a> {
    /// With nothing else asked, an assertion means "exists"
    fn new(exists: Option<bool>, text: Option<&'a str>, text_contains: Option<&'a str>) -> Self {
        Self {
            exists: exists.unwrap_or(true),
            text,
            text_contains,
        }
    }

    fn check(&self, observed: &Observation) -> Result<(), String> {
        if !self.exists {
            return match observed.count {
                0 => Ok(()),
                n => Err(format!("should not exist, found {}", n)),
            };
        }

        if observed.count == 0 {
            return Err("not found".to_string());
        }

        let actual = observed.text.as_deref().unwrap_or("").trim();
        if let Some(expected) = self.text {
            if actual != expected.trim() {
                return Err(format!("has text '{}', expected '{}'", actual, expected));
            }
        }
        if let Some(fragment) = self.text_contains {
            if !actual.contains(fragment) {
                return Err(format!("has text '{}', expected it to contain '{}'", actual, fragment));
            }
        }
        Ok(())
    }
}

/// Short label for a step, used in logs and failure trails
pub fn step_name(step: &TestStep) -> String {
    match step {
        TestStep::ExecuteCommand { command, .. } => format!("execute_command:{}", command),
        TestStep::OpenPalette => "open_palette".to_string(),
        TestStep::Search { text } => format!("search:{}", text),
        TestStep::SelectResult { index } => format!("select_result:{}", index),
        TestStep::Press { key } => format!("press:{}", key),
        TestStep::WaitForPanel { view_type, .. } => format!("wait_for_panel:{}", view_type),
        TestStep::WaitForElement {
            view_type, selector, ..
        } => format!("wait_for_element:{}:{}", view_type, selector),
        TestStep::AssertElement { selector, .. } => format!("assert_element:{}", selector),
        TestStep::Screenshot { name, .. } => format!("screenshot:{}", name),
        TestStep::Log { message } => {
            format!("log:{}", message.chars().take(30).collect::<String>())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seen(count: u64, text: &str) -> Observation {
        Observation {
            count,
            text: Some(text.to_string()),
        }
    }

    #[test]
    fn test_default_expectation_is_existence() {
        let expectation = Expectation::new(None, None, None);
        assert!(expectation.check(&seen(1, "")).is_ok());
        assert_eq!(expectation.check(&Observation::default()), Err("not found".to_string()));
    }

    #[test]
    fn test_absence() {
        let expectation = Expectation::new(Some(false), None, None);
        assert!(expectation.check(&Observation::default()).is_ok());
        assert!(expectation.check(&seen(2, "x")).is_err());
    }

    #[test]
    fn test_text_and_contains() {
        let exact = Expectation::new(None, Some("Execute"), None);
        assert!(exact.check(&seen(1, "  Execute \n")).is_ok());
        assert!(exact.check(&seen(1, "Run")).is_err());

        let partial = Expectation::new(None, None, Some("rows"));
        assert!(partial.check(&seen(1, "42 rows returned")).is_ok());
        assert!(partial.check(&seen(1, "no results")).is_err());
    }

    #[test]
    fn test_step_names() {
        let step = TestStep::ExecuteCommand {
            command: "Power Platform Developer Suite: Data Explorer".to_string(),
            timeout_ms: None,
        };
        assert_eq!(step_name(&step), "execute_command:Power Platform Developer Suite: Data Explorer");

        let long = TestStep::Log {
            message: "ünïcödé message that is well over thirty characters".to_string(),
        };
        assert_eq!(step_name(&long).chars().count(), "log:".len() + 30);
    }

    #[test]
    fn test_trail_marks_failure() {
        let context = TestContext {
            attachments: Vec::new(),
            steps: vec![
                StepResult {
                    success: true,
                    step_name: "open_palette".to_string(),
                    duration_ms: 3,
                    error: None,
                    screenshot_path: None,
                },
                StepResult {
                    success: false,
                    step_name: "search:x".to_string(),
                    duration_ms: 1,
                    error: Some("boom".to_string()),
                    screenshot_path: None,
                },
            ],
        };
        assert_eq!(
            context.trail(),
            "    at step 1: open_palette [ok]\n    at step 2: search:x [FAILED]"
        );
    }
}
