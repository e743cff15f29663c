//! In-process VS Code workbench model for driving the harness without a
//! real editor

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ppds_common::{Key, KeyChord, Rect, SessionId};
use serde_json::{json, Value};

use ppds_e2e::config::HarnessConfig;
use ppds_e2e::window::{CaptureRequest, DomQuery, FrameHandle, Scope, Window};
use ppds_e2e::{E2eError, E2eResult, Instance, Launch};

pub const EXTENSION_ID: &str = "JoshSmithXRM.power-platform-developer-suite";
pub const DATA_EXPLORER: &str = "powerPlatformDevSuite.dataExplorer";
pub const OPEN_DATA_EXPLORER: &str = "Power Platform Developer Suite: Data Explorer";

/// Eight-byte PNG signature followed by a marker
pub const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake";

/// An element inside a panel
#[derive(Debug, Clone)]
pub struct Element {
    pub selector: String,
    pub text: String,
    pub visible: bool,
}

impl Element {
    pub fn new(selector: &str, text: &str) -> Self {
        Self {
            selector: selector.to_string(),
            text: text.to_string(),
            visible: true,
        }
    }
}

/// What a command does when it runs
#[derive(Debug, Clone)]
pub struct PanelTemplate {
    pub view_type: String,
    pub elements: Vec<Element>,
    /// Time between the command running and the iframe appearing
    pub delay: Duration,
}

#[derive(Debug, Clone)]
struct Panel {
    id: String,
    view_type: String,
    elements: Vec<Element>,
    visible_at: Instant,
}

impl Panel {
    fn src(&self) -> String {
        format!(
            "vscode-webview://fake/index.html?id={}&extensionId={}&purpose=webviewView&viewType={}",
            self.id, EXTENSION_ID, self.view_type
        )
    }

    fn shown(&self) -> bool {
        Instant::now() >= self.visible_at
    }

    fn find(&self, selector: &str) -> Vec<&Element> {
        self.elements.iter().filter(|e| e.selector == selector).collect()
    }
}

#[derive(Default)]
struct State {
    commands: Vec<(String, Option<PanelTemplate>)>,
    palette_open: bool,
    filter: String,
    selected: usize,
    panels: Vec<Panel>,
    next_panel: u32,
    executed: Vec<String>,
    pressed: Vec<String>,
}

impl State {
    fn rows(&self) -> Vec<String> {
        if !self.palette_open {
            return Vec::new();
        }
        let filter = self.filter.trim_start_matches('>').trim().to_lowercase();
        self.commands
            .iter()
            .map(|(title, _)| title.clone())
            .filter(|title| title.to_lowercase().contains(&filter))
            .collect()
    }

    fn accept(&mut self) {
        let rows = self.rows();
        self.palette_open = false;
        self.filter.clear();

        let Some(title) = rows.get(self.selected).cloned() else {
            return;
        };
        self.executed.push(title.clone());

        let template = self
            .commands
            .iter()
            .find(|(t, _)| *t == title)
            .and_then(|(_, template)| template.clone());
        if let Some(template) = template {
            self.open_panel(template);
        }
    }

    fn open_panel(&mut self, template: PanelTemplate) {
        // VS Code reveals an existing panel of the same type
        if self.panels.iter().any(|p| p.view_type == template.view_type) {
            return;
        }
        self.next_panel += 1;
        self.panels.push(Panel {
            id: format!("panel-{}", self.next_panel),
            view_type: template.view_type,
            elements: template.elements,
            visible_at: Instant::now() + template.delay,
        });
    }

    fn shown_panel(&self, key: &str) -> Option<&Panel> {
        self.panels.iter().find(|p| p.shown() && p.id == key)
    }
}

/// A workbench that understands the palette, panels and screenshots
#[derive(Default)]
pub struct FakeWorkbench {
    state: Mutex<State>,
    captures: AtomicUsize,
}

impl FakeWorkbench {
    pub fn new() -> Self {
        Self::default()
    }

    /// The Power Platform extension with Data Explorer and a couple of
    /// neighbouring commands
    pub fn power_platform() -> Self {
        let workbench = Self::new();
        workbench.register(
            OPEN_DATA_EXPLORER,
            Some(PanelTemplate {
                view_type: DATA_EXPLORER.to_string(),
                elements: vec![
                    Element::new("textarea#sql-query-editor", "SELECT * FROM account"),
                    Element::new("button#execute-query", "Execute"),
                    Element::new(".results-summary", "0 rows"),
                ],
                delay: Duration::from_millis(200),
            }),
        );
        workbench.register("Power Platform: Refresh Environments", None);
        workbench.register("Developer: Reload Window", None);
        workbench
    }

    pub fn register(&self, title: &str, opens: Option<PanelTemplate>) {
        self.state().commands.push((title.to_string(), opens));
    }

    /// A new window: no panels, palette closed. Commands and history stay.
    pub fn restart(&self) {
        let mut state = self.state();
        state.panels.clear();
        state.palette_open = false;
        state.filter.clear();
        state.selected = 0;
    }

    /// Close a panel; frames resolved from it go stale
    pub fn dispose_panel(&self, view_type: &str) {
        self.state().panels.retain(|p| p.view_type != view_type);
    }

    pub fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    pub fn pressed(&self) -> Vec<String> {
        self.state().pressed.clone()
    }

    pub fn palette_open(&self) -> bool {
        self.state().palette_open
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

fn chord_name(chord: &KeyChord) -> String {
    let mut parts = Vec::new();
    if chord.modifiers.control {
        parts.push("Control".to_string());
    }
    if chord.modifiers.meta {
        parts.push("Meta".to_string());
    }
    if chord.modifiers.alt {
        parts.push("Alt".to_string());
    }
    if chord.modifiers.shift {
        parts.push("Shift".to_string());
    }
    parts.push(match chord.key {
        Key::Char(c) => c.to_ascii_uppercase().to_string(),
        Key::Enter => "Enter".to_string(),
        Key::Escape => "Escape".to_string(),
        Key::ArrowDown => "ArrowDown".to_string(),
        Key::ArrowUp => "ArrowUp".to_string(),
        other => format!("{:?}", other),
    });
    parts.join("+")
}

const WINDOW_RECT: Rect = Rect {
    x: 0.0,
    y: 0.0,
    width: 1280.0,
    height: 800.0,
};

fn panel_rect() -> Value {
    json!({ "x": 300.0, "y": 35.0, "width": 980.0, "height": 740.0 })
}

#[async_trait]
impl Window for FakeWorkbench {
    async fn press(&self, chord: &KeyChord) -> E2eResult<()> {
        let mut state = self.state();
        state.pressed.push(chord_name(chord));

        if *chord == KeyChord::command_palette() {
            state.palette_open = true;
            state.filter = ">".to_string();
            state.selected = 0;
            return Ok(());
        }

        match chord.key {
            Key::Escape => {
                state.palette_open = false;
                state.filter.clear();
            }
            Key::ArrowDown if state.palette_open => state.selected += 1,
            Key::Enter if state.palette_open => state.accept(),
            _ => {}
        }
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> E2eResult<()> {
        let mut state = self.state();
        if state.palette_open {
            state.filter.push_str(text);
            state.selected = 0;
        }
        Ok(())
    }

    async fn query(&self, scope: Scope<'_>, query: &DomQuery) -> E2eResult<Value> {
        let state = self.state();

        if let Scope::Frame(handle) = scope {
            let panel = state
                .panels
                .iter()
                .find(|p| p.id == handle.target_id)
                .ok_or_else(|| E2eError::StaleFrame(handle.url.clone()))?;
            return Ok(match query {
                DomQuery::Count(selector) => json!(panel.find(selector).len()),
                DomQuery::Visible(selector) => json!(panel.find(selector).first().map_or(false, |e| e.visible)),
                DomQuery::Text(selector) => json!(panel.find(selector).first().map(|e| e.text.clone())),
                DomQuery::BoundingBox(selector) => match panel.find(selector).first() {
                    Some(_) => json!({ "x": 10.0, "y": 10.0, "width": 200.0, "height": 40.0 }),
                    None => Value::Null,
                },
                DomQuery::DocumentSize => panel_rect(),
                _ => Value::Null,
            });
        }

        Ok(match query {
            DomQuery::QuickInputOpen => json!(state.palette_open),
            DomQuery::QuickInputRows => json!(state.rows()),
            DomQuery::IframeSources => json!(state
                .panels
                .iter()
                .filter(|p| p.shown())
                .map(Panel::src)
                .collect::<Vec<_>>()),
            DomQuery::IframeBoundingBox(fragment) => {
                match state.panels.iter().find(|p| p.shown() && p.src().contains(fragment.as_str())) {
                    Some(_) => panel_rect(),
                    None => Value::Null,
                }
            }
            DomQuery::Count(selector) if selector == ".monaco-workbench" => json!(1),
            DomQuery::Count(_) => json!(0),
            DomQuery::Visible(selector) => json!(selector == ".monaco-workbench"),
            DomQuery::BoundingBox(selector) if selector == ".monaco-workbench" => {
                serde_json::to_value(WINDOW_RECT)?
            }
            DomQuery::DocumentSize => serde_json::to_value(WINDOW_RECT)?,
            _ => Value::Null,
        })
    }

    async fn frame_for(&self, url_fragment: &str) -> E2eResult<Option<FrameHandle>> {
        let state = self.state();
        Ok(state.shown_panel(url_fragment).map(|panel| FrameHandle {
            target_id: panel.id.clone(),
            session: SessionId(format!("session-{}", panel.id)),
            url: panel.src(),
        }))
    }

    async fn screenshot(&self, _request: &CaptureRequest) -> E2eResult<Vec<u8>> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(FAKE_PNG.to_vec())
    }
}

/// How a fake launch behaves
#[derive(Debug, Clone, Default)]
pub enum LaunchBehavior {
    #[default]
    Ready,
    FailLaunch(String),
    FailActivation(String),
}

/// Hands out instances backed by one shared workbench
pub struct FakeLauncher {
    workbench: Arc<FakeWorkbench>,
    behavior: LaunchBehavior,
    launches: AtomicUsize,
    closes: Arc<AtomicUsize>,
    activated: Arc<Mutex<Vec<String>>>,
}

impl FakeLauncher {
    pub fn new(workbench: Arc<FakeWorkbench>) -> Self {
        Self::with_behavior(workbench, LaunchBehavior::Ready)
    }

    pub fn with_behavior(workbench: Arc<FakeWorkbench>, behavior: LaunchBehavior) -> Self {
        Self {
            workbench,
            behavior,
            launches: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            activated: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Extension ids activation was awaited for, in order
    pub fn activated(&self) -> Vec<String> {
        self.activated.lock().unwrap().clone()
    }
}

#[async_trait]
impl Launch for FakeLauncher {
    async fn launch(&self) -> E2eResult<Box<dyn Instance>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if let LaunchBehavior::FailLaunch(reason) = &self.behavior {
            return Err(E2eError::Launch(reason.clone()));
        }
        self.workbench.restart();
        Ok(Box::new(FakeInstance {
            workbench: Arc::clone(&self.workbench),
            activation_error: match &self.behavior {
                LaunchBehavior::FailActivation(reason) => Some(reason.clone()),
                _ => None,
            },
            closes: Arc::clone(&self.closes),
            activated: Arc::clone(&self.activated),
        }))
    }
}

pub struct FakeInstance {
    workbench: Arc<FakeWorkbench>,
    activation_error: Option<String>,
    closes: Arc<AtomicUsize>,
    activated: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Instance for FakeInstance {
    fn window(&self) -> &dyn Window {
        self.workbench.as_ref()
    }

    fn extension_id(&self) -> &str {
        EXTENSION_ID
    }

    async fn wait_for_extension_activation(&self, extension_id: &str, _timeout: Duration) -> E2eResult<()> {
        self.activated.lock().unwrap().push(extension_id.to_string());
        match &self.activation_error {
            Some(reason) => Err(E2eError::ActivationFailed {
                extension_id: extension_id.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> E2eResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Route harness logs through the test harness's capture
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("ppds_e2e=debug"))
        .with_test_writer()
        .try_init();
}

/// Config rooted in a scratch directory with short waits
pub fn config_in(root: &Path) -> HarnessConfig {
    HarnessConfig {
        specs_dir: root.join("specs"),
        screenshot_dir: root.join("screenshots"),
        results_dir: root.join("results"),
        palette_timeout_ms: 1_000,
        panel_timeout_ms: 2_000,
        element_timeout_ms: 500,
        ..Default::default()
    }
}

/// Write a scenario file under `<root>/specs/<relative>`
pub fn write_spec(root: &Path, relative: &str, yaml: &str) {
    let path = root.join("specs").join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, yaml).unwrap();
}

/// Sink for reporter console output
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}
