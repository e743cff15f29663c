//! Screenshot capture to PNG files

use std::path::{Path, PathBuf};
use std::time::Duration;

use ppds_common::Rect;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{E2eError, E2eResult};
use crate::webview::{WebviewHelper, DEFAULT_PANEL_TIMEOUT};
use crate::window::{query_as, CaptureRequest, DomQuery, Scope, Window};

#[derive(Debug, Clone, Default)]
pub struct ScreenshotOptions {
    /// File stem; sanitized before use
    pub name: String,
    pub full_page: bool,
}

impl ScreenshotOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            full_page: false,
        }
    }
}

/// Turn a free-form name into a safe file stem
pub fn sanitize_name(name: &str) -> String {
    let name = name.trim();
    let name = name.strip_suffix(".png").unwrap_or(name);
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    let sanitized = sanitized.trim_matches('.').to_string();

    if sanitized.is_empty() {
        "screenshot".to_string()
    } else {
        sanitized
    }
}

pub struct ScreenshotHelper<'a> {
    window: &'a dyn Window,
    dir: PathBuf,
    panel_timeout: Duration,
}

impl<'a> ScreenshotHelper<'a> {
    pub fn new(window: &'a dyn Window, dir: impl Into<PathBuf>) -> Self {
        Self {
            window,
            dir: dir.into(),
            panel_timeout: DEFAULT_PANEL_TIMEOUT,
        }
    }

    pub fn with_panel_timeout(mut self, timeout: Duration) -> Self {
        self.panel_timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Capture the whole window
    pub async fn capture(&self, options: &ScreenshotOptions) -> E2eResult<PathBuf> {
        let png = self
            .window
            .screenshot(&CaptureRequest {
                clip: None,
                full_page: options.full_page,
            })
            .await?;
        self.write(&options.name, &png).await
    }

    /// Capture the region of the first element matching `selector`
    pub async fn capture_element(&self, selector: &str, options: &ScreenshotOptions) -> E2eResult<PathBuf> {
        let rect: Option<Rect> =
            query_as(self.window, Scope::Window, &DomQuery::BoundingBox(selector.to_string())).await?;
        let rect = rect
            .filter(|r| !r.is_empty())
            .ok_or_else(|| E2eError::ElementNotFound(selector.to_string()))?;

        self.capture_clip(rect, options).await
    }

    /// Capture the region occupied by a webview panel
    pub async fn capture_webview(&self, view_type: &str, options: &ScreenshotOptions) -> E2eResult<PathBuf> {
        let src = WebviewHelper::new(self.window)
            .wait_for_panel(view_type, self.panel_timeout)
            .await?;

        let rect: Option<Rect> = query_as(self.window, Scope::Window, &DomQuery::IframeBoundingBox(src)).await?;
        let rect = rect.filter(|r| !r.is_empty()).ok_or_else(|| E2eError::FrameUnavailable {
            view_type: view_type.to_string(),
            reason: "panel iframe has no visible area".to_string(),
        })?;

        self.capture_clip(rect, options).await
    }

    async fn capture_clip(&self, clip: Rect, options: &ScreenshotOptions) -> E2eResult<PathBuf> {
        let png = self
            .window
            .screenshot(&CaptureRequest {
                clip: Some(clip),
                full_page: false,
            })
            .await?;
        self.write(&options.name, &png).await
    }

    async fn write(&self, name: &str, png: &[u8]) -> E2eResult<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.dir.join(format!("{}.png", sanitize_name(name)));
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!("Overwriting screenshot {}", path.display());
        }

        {
            let mut file = tokio::fs::File::create(&path).await?;
            file.write_all(png).await?;
            file.sync_all().await?;
        }

        let path = tokio::fs::canonicalize(&path).await?;
        debug!("Screenshot saved: {} ({} bytes)", path.display(), png.len());
        Ok(path)
    }
}
