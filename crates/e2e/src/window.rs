//! The page/frame seam every helper drives
//!
//! Helpers never build DevTools commands themselves. They ask a [`Window`]
//! to press keys, type, capture, or answer a [`DomQuery`] in a [`Scope`].
//! [`CdpWindow`] answers over the DevTools protocol; tests answer with an
//! in-process workbench model.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ppds_common::{CdpClient, KeyChord, Rect, SessionId};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::{E2eError, E2eResult};

/// Selector for the quick input rows rendered by the command palette
pub const QUICK_INPUT_ROWS: &str = ".quick-input-widget .quick-input-list .monaco-list-row";

/// Root element of a rendered workbench
pub const WORKBENCH_SELECTOR: &str = ".monaco-workbench";

/// An attached webview frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHandle {
    pub target_id: String,
    pub session: SessionId,
    pub url: String,
}

/// Which document a query runs against
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    /// The outer workbench document
    Window,
    /// A webview's content document
    Frame(&'a FrameHandle),
}

/// A read-only question about the DOM
#[derive(Debug, Clone, PartialEq)]
pub enum DomQuery {
    /// Number of elements matching the selector
    Count(String),
    /// Whether the first match is rendered and visible
    Visible(String),
    /// `textContent` of the first match, or null
    Text(String),
    /// Viewport rectangle of the first match, or null
    BoundingBox(String),
    /// Whether the quick input widget is showing
    QuickInputOpen,
    /// Labels of the visible quick input rows
    QuickInputRows,
    /// `src` of every iframe in the document
    IframeSources,
    /// Rectangle of the first iframe whose `src` contains the fragment
    IframeBoundingBox(String),
    /// Scrollable size of the document as a rectangle at the origin
    DocumentSize,
    /// Arbitrary expression; `doc` is bound to the scoped document
    Evaluate(String),
}

fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

fn document_expr(scope: &Scope<'_>) -> &'static str {
    match scope {
        Scope::Window => "document",
        // Webview hosts render the extension's HTML into an inner #active-frame
        Scope::Frame(_) => {
            "((() => { const f = document.getElementById('active-frame'); \
             return (f && f.contentDocument) || document; })())"
        }
    }
}

const RECT_OF: &str = "(el) => { if (!el) return null; const r = el.getBoundingClientRect(); \
                       return { x: r.x, y: r.y, width: r.width, height: r.height }; }";

const IS_VISIBLE: &str = "(el) => { if (!el) return false; const s = getComputedStyle(el); \
                          if (s.display === 'none' || s.visibility === 'hidden') return false; \
                          const r = el.getBoundingClientRect(); return r.width > 0 && r.height > 0; }";

impl DomQuery {
    /// Render the query as a self-contained JavaScript expression
    pub fn script(&self, scope: &Scope<'_>) -> String {
        let doc = document_expr(scope);
        match self {
            DomQuery::Count(selector) => format!(
                "((doc) => doc.querySelectorAll({}).length)({})",
                js_string(selector),
                doc
            ),
            DomQuery::Visible(selector) => format!(
                "((doc) => ({})(doc.querySelector({})))({})",
                IS_VISIBLE,
                js_string(selector),
                doc
            ),
            DomQuery::Text(selector) => format!(
                "((doc) => {{ const el = doc.querySelector({}); return el ? el.textContent : null; }})({})",
                js_string(selector),
                doc
            ),
            DomQuery::BoundingBox(selector) => format!(
                "((doc) => ({})(doc.querySelector({})))({})",
                RECT_OF,
                js_string(selector),
                doc
            ),
            DomQuery::QuickInputOpen => format!(
                "((doc) => ({})(doc.querySelector('.quick-input-widget')))({})",
                IS_VISIBLE, doc
            ),
            DomQuery::QuickInputRows => format!(
                "((doc) => Array.from(doc.querySelectorAll({}))\
                 .map((row) => row.getAttribute('aria-label') || (row.textContent || '').trim()))({})",
                js_string(QUICK_INPUT_ROWS),
                doc
            ),
            DomQuery::IframeSources => format!(
                "((doc) => Array.from(doc.querySelectorAll('iframe')).map((f) => f.src))({})",
                doc
            ),
            DomQuery::IframeBoundingBox(fragment) => format!(
                "((doc) => ({})(Array.from(doc.querySelectorAll('iframe'))\
                 .find((f) => f.src.includes({}))))({})",
                RECT_OF,
                js_string(fragment),
                doc
            ),
            DomQuery::DocumentSize => format!(
                "((doc) => {{ const e = doc.documentElement; return {{ x: 0, y: 0, \
                 width: Math.max(e.scrollWidth, e.clientWidth), \
                 height: Math.max(e.scrollHeight, e.clientHeight) }}; }})({})",
                doc
            ),
            DomQuery::Evaluate(expression) => format!("((doc) => ({}))({})", expression, doc),
        }
    }
}

/// What to capture
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CaptureRequest {
    /// Region of the window in CSS pixels
    pub clip: Option<Rect>,
    /// Capture the whole scrollable document instead of the viewport
    pub full_page: bool,
}

/// A running workbench window
#[async_trait]
pub trait Window: Send + Sync {
    async fn press(&self, chord: &KeyChord) -> E2eResult<()>;

    async fn insert_text(&self, text: &str) -> E2eResult<()>;

    async fn query(&self, scope: Scope<'_>, query: &DomQuery) -> E2eResult<Value>;

    /// Attach to the webview frame whose URL contains `url_fragment`
    async fn frame_for(&self, url_fragment: &str) -> E2eResult<Option<FrameHandle>>;

    /// PNG bytes
    async fn screenshot(&self, request: &CaptureRequest) -> E2eResult<Vec<u8>>;
}

/// Run a query and deserialize its value
pub async fn query_as<T: DeserializeOwned>(
    window: &dyn Window,
    scope: Scope<'_>,
    query: &DomQuery,
) -> E2eResult<T> {
    let value = window.query(scope, query).await?;
    Ok(serde_json::from_value(value)?)
}

/// [`Window`] backed by a DevTools session on the workbench page
pub struct CdpWindow {
    client: Arc<CdpClient>,
    target_id: String,
    session: SessionId,
    // target id -> attached frame session
    frames: Mutex<HashMap<String, SessionId>>,
}

impl CdpWindow {
    /// Attach to a page target
    pub async fn attach(client: Arc<CdpClient>, target_id: &str) -> E2eResult<Self> {
        let session = client.attach_to_target(target_id).await?;
        debug!("Attached to workbench target {} ({})", target_id, session);

        Ok(Self {
            client,
            target_id: target_id.to_string(),
            session,
            frames: Mutex::new(HashMap::new()),
        })
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn client(&self) -> &Arc<CdpClient> {
        &self.client
    }

    /// Focus the window so key events reach it
    pub async fn bring_to_front(&self) -> E2eResult<()> {
        self.client.bring_to_front(&self.session).await?;
        Ok(())
    }
}

#[async_trait]
impl Window for CdpWindow {
    async fn press(&self, chord: &KeyChord) -> E2eResult<()> {
        trace!("Pressing {}", chord);
        self.client.press(&self.session, chord).await?;
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> E2eResult<()> {
        self.client.insert_text(&self.session, text).await?;
        Ok(())
    }

    async fn query(&self, scope: Scope<'_>, query: &DomQuery) -> E2eResult<Value> {
        let script = query.script(&scope);
        match scope {
            Scope::Window => Ok(self.client.evaluate(&self.session, &script).await?),
            Scope::Frame(frame) => match self.client.evaluate(&frame.session, &script).await {
                Ok(value) => Ok(value),
                Err(ppds_common::Error::SessionDetached(_)) => {
                    Err(E2eError::StaleFrame(frame.url.clone()))
                }
                Err(e) => Err(e.into()),
            },
        }
    }

    async fn frame_for(&self, url_fragment: &str) -> E2eResult<Option<FrameHandle>> {
        let targets = self.client.get_targets().await?;
        let Some(target) = targets
            .into_iter()
            .find(|t| t.is_iframe() && t.url.contains(url_fragment))
        else {
            return Ok(None);
        };

        let mut frames = self.frames.lock().await;
        frames.retain(|_, session| !self.client.is_detached(session));

        let session = match frames.get(&target.target_id) {
            Some(session) => session.clone(),
            None => {
                let session = self.client.attach_to_target(&target.target_id).await?;
                debug!("Attached to webview frame {} ({})", target.url, session);
                frames.insert(target.target_id.clone(), session.clone());
                session
            }
        };

        Ok(Some(FrameHandle {
            target_id: target.target_id,
            session,
            url: target.url,
        }))
    }

    async fn screenshot(&self, request: &CaptureRequest) -> E2eResult<Vec<u8>> {
        let clip = match (request.clip, request.full_page) {
            (Some(clip), _) => Some(clip),
            (None, true) => Some(query_as::<Rect>(self, Scope::Window, &DomQuery::DocumentSize).await?),
            (None, false) => None,
        };

        Ok(self
            .client
            .capture_screenshot(&self.session, clip, request.full_page)
            .await?)
    }
}
