//! E2E test harness for the Power Platform Developer Suite VS Code extension
//!
//! Launches a real VS Code with the extension loaded, drives it over the
//! DevTools protocol and reports results in a form both people and agents
//! can consume.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    E2E Test Runner (Rust)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                 │
//! │    ├── VsCodeLauncher::launch() -> VsCodeInstance           │
//! │    ├── wait_for_extension_activation(id)                    │
//! │    ├── StepExecutor::run_test(test)                         │
//! │    │     ├── CommandPaletteHelper                           │
//! │    │     ├── WebviewHelper                                  │
//! │    │     └── ScreenshotHelper                               │
//! │    └── Reporter (ClaudeJsonReporter, ListReporter)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SuiteSpec (YAML, one VS Code per file)                     │
//! │    ├── name, tags, extension_id?                            │
//! │    └── tests: [{ name, skip?, steps: [Step] }]              │
//! │          ├── execute_command { command }                    │
//! │          ├── wait_for_panel { view_type }                   │
//! │          ├── wait_for_element { view_type, selector }       │
//! │          ├── assert_element { selector, exists?, text? }    │
//! │          └── screenshot { name, selector? | view_type? }    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod activation;
pub mod config;
pub mod download;
pub mod error;
pub mod executor;
pub mod html;
pub mod launcher;
pub mod manifest;
pub mod palette;
pub mod reporter;
pub mod runner;
pub mod screenshot;
pub mod spec;
pub mod wait;
pub mod webview;
pub mod window;

pub use config::{HarnessConfig, ProjectConfig, ScreenshotPolicy};
pub use error::{E2eError, E2eResult};
pub use launcher::{Instance, Launch, LaunchOptions, VsCodeInstance, VsCodeLauncher};
pub use palette::CommandPaletteHelper;
pub use reporter::{ClaudeJsonReporter, ClaudeTestResult, ListReporter, Reporter, TestStatus};
pub use runner::{RunSummary, TestRunner};
pub use screenshot::{ScreenshotHelper, ScreenshotOptions};
pub use spec::{SuiteSpec, TestCaseSpec, TestStep};
pub use webview::{WebviewFrame, WebviewHelper};
pub use window::{CdpWindow, Window};
