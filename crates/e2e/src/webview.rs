//! Webview panel lookup and frame-scoped element access

use std::time::Duration;

use tracing::debug;

use crate::error::{E2eError, E2eResult};
use crate::wait::Poller;
use crate::window::{query_as, DomQuery, FrameHandle, Scope, Window};

pub const DEFAULT_PANEL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_ELEMENT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long an iframe may exist before its frame target shows up
const FRAME_ATTACH_TIMEOUT: Duration = Duration::from_secs(5);

/// A webview panel's content frame.
///
/// Resolved fresh on every [`WebviewHelper::get_webview_frame`] call; once the
/// panel is closed or recreated, queries through an old value fail with
/// [`E2eError::StaleFrame`].
#[derive(Debug, Clone, PartialEq)]
pub struct WebviewFrame {
    pub view_type: String,
    /// `src` of the outer iframe the panel is hosted in
    pub src: String,
    pub handle: FrameHandle,
}

impl WebviewFrame {
    fn scope(&self) -> Scope<'_> {
        Scope::Frame(&self.handle)
    }
}

/// The key a webview frame target is found by: the iframe's `id` query
/// parameter, which is unique per panel instance
pub fn frame_key(src: &str) -> Option<&str> {
    let query = src.split_once('?')?.1;
    let query = query.split('#').next().unwrap_or(query);
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "id")
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

pub struct WebviewHelper<'a> {
    window: &'a dyn Window,
    panel_timeout: Duration,
}

impl<'a> WebviewHelper<'a> {
    pub fn new(window: &'a dyn Window) -> Self {
        Self {
            window,
            panel_timeout: DEFAULT_PANEL_TIMEOUT,
        }
    }

    pub fn with_panel_timeout(mut self, timeout: Duration) -> Self {
        self.panel_timeout = timeout;
        self
    }

    /// Wait for an iframe whose `src` contains `view_type`; returns that `src`
    pub async fn wait_for_panel(&self, view_type: &str, timeout: Duration) -> E2eResult<String> {
        let window = self.window;
        let polled = Poller::new(timeout)
            .poll(move || async move {
                let sources: Vec<String> = query_as(window, Scope::Window, &DomQuery::IframeSources).await?;
                Ok::<_, E2eError>(sources.into_iter().find(|src| src.contains(view_type)))
            })
            .await?;

        let src = polled.ready_or(|elapsed| E2eError::PanelNotFound {
            view_type: view_type.to_string(),
            elapsed,
        })?;

        debug!("Webview panel '{}' is hosted at {}", view_type, src);
        Ok(src)
    }

    /// Wait for the panel, then attach to its content frame
    pub async fn get_webview_frame(&self, view_type: &str) -> E2eResult<WebviewFrame> {
        let src = self.wait_for_panel(view_type, self.panel_timeout).await?;
        let key = frame_key(&src).unwrap_or(view_type).to_string();

        let window = self.window;
        let key_ref = key.as_str();
        let polled = Poller::new(FRAME_ATTACH_TIMEOUT.min(self.panel_timeout))
            .poll(move || window.frame_for(key_ref))
            .await
            .map_err(|e| E2eError::FrameUnavailable {
                view_type: view_type.to_string(),
                reason: e.to_string(),
            })?;

        let handle = polled.ready_or(|elapsed| E2eError::FrameUnavailable {
            view_type: view_type.to_string(),
            reason: format!(
                "no frame target matched '{}' within {}ms",
                key,
                elapsed.as_millis()
            ),
        })?;

        Ok(WebviewFrame {
            view_type: view_type.to_string(),
            src,
            handle,
        })
    }

    /// Wait for a visible element inside the webview
    pub async fn wait_for_element(
        &self,
        frame: &WebviewFrame,
        selector: &str,
        timeout: Duration,
    ) -> E2eResult<()> {
        let query = DomQuery::Visible(selector.to_string());
        let window = self.window;
        let query_ref = &query;
        let polled = Poller::new(timeout)
            .poll(move || async move {
                let visible: bool = query_as(window, frame.scope(), query_ref)
                    .await
                    .map_err(|e| restale(e, frame))?;
                Ok::<_, E2eError>(visible.then_some(()))
            })
            .await?;

        polled.ready_or(|elapsed| E2eError::Timeout {
            waiting_for: format!(
                "element '{}' in webview '{}'",
                selector, frame.view_type
            ),
            elapsed,
        })
    }

    /// Whether any element inside the webview matches
    pub async fn element_exists(&self, frame: &WebviewFrame, selector: &str) -> E2eResult<bool> {
        let count: u64 = query_as(self.window, frame.scope(), &DomQuery::Count(selector.to_string()))
            .await
            .map_err(|e| restale(e, frame))?;
        Ok(count > 0)
    }

    /// `textContent` of the first match, `None` when nothing matches
    pub async fn get_text_content(&self, frame: &WebviewFrame, selector: &str) -> E2eResult<Option<String>> {
        query_as(self.window, frame.scope(), &DomQuery::Text(selector.to_string()))
            .await
            .map_err(|e| restale(e, frame))
    }
}

fn restale(error: E2eError, frame: &WebviewFrame) -> E2eError {
    match error {
        E2eError::StaleFrame(_) => E2eError::StaleFrame(frame.view_type.clone()),
        other => other,
    }
}
