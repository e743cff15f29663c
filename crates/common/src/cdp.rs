//! Chrome DevTools Protocol client
//!
//! Speaks the browser-level DevTools WebSocket of an Electron/Chromium
//! process. Page and iframe targets are reached through flattened sessions
//! (`Target.attachToTarget { flatten: true }`), so one socket serves every
//! target.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::input::KeyChord;
use crate::protocol::{
    AttachResponse, CaptureScreenshotParams, CaptureScreenshotResponse, Clip, CommandFrame,
    EvaluateResponse, GetTargetsResponse, IncomingFrame, ProtocolError, Rect, SessionId,
    TargetInfo,
};
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Reply = std::result::Result<serde_json::Value, ProtocolError>;

/// Default deadline for a single protocol command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// State shared between callers and the reader task
#[derive(Default)]
struct Shared {
    pending: parking_lot::Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    detached: parking_lot::Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl Shared {
    fn dispatch(&self, text: &str) {
        let frame: IncomingFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Ignoring malformed DevTools frame: {}", e);
                return;
            }
        };

        if let Some(id) = frame.id {
            let Some(sender) = self.pending.lock().remove(&id) else {
                trace!("Response for unknown id {}", id);
                return;
            };
            let reply = match frame.error {
                Some(error) => Err(error),
                None => Ok(frame.result.unwrap_or(serde_json::Value::Null)),
            };
            let _ = sender.send(reply);
            return;
        }

        match frame.method.as_deref() {
            Some("Target.detachedFromTarget") => {
                if let Some(session) = frame.params.get("sessionId").and_then(|s| s.as_str()) {
                    debug!("Session {} detached", session);
                    self.detached.lock().insert(session.to_string());
                }
            }
            Some(method) => trace!("DevTools event {} (session {:?})", method, frame.session_id),
            None => {}
        }
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders wakes every waiter with a receive error
        self.pending.lock().clear();
    }
}

/// DevTools client over a single WebSocket
pub struct CdpClient {
    ws_url: String,
    sink: Mutex<SplitSink<WsStream, Message>>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    command_timeout: Duration,
}

impl CdpClient {
    /// Connect to a browser-level `ws://.../devtools/browser/<id>` URL
    pub async fn connect(ws_url: &str) -> Result<Self> {
        let (stream, _) = tokio_tungstenite::connect_async(ws_url).await?;
        let (sink, mut stream) = stream.split();
        let shared = Arc::new(Shared::default());

        let reader_shared = Arc::clone(&shared);
        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => reader_shared.dispatch(&text),
                    Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                        Ok(text) => reader_shared.dispatch(text),
                        Err(_) => warn!("Ignoring non UTF-8 DevTools frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("DevTools socket error: {}", e);
                        break;
                    }
                }
            }
            reader_shared.shutdown();
        });

        debug!("Connected to DevTools endpoint: {}", ws_url);

        Ok(Self {
            ws_url: ws_url.to_string(),
            sink: Mutex::new(sink),
            shared,
            next_id: AtomicU64::new(1),
            reader,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        })
    }

    /// Override the per-command deadline
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Whether the socket is still open
    pub fn is_connected(&self) -> bool {
        !self.shared.closed.load(Ordering::SeqCst)
    }

    /// Whether the browser reported this session as detached
    pub fn is_detached(&self, session: &SessionId) -> bool {
        self.shared.detached.lock().contains(session.as_str())
    }

    /// Send a command and wait for its response
    pub async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        session: Option<&SessionId>,
        method: &str,
        params: P,
    ) -> Result<R> {
        if let Some(session) = session {
            if self.is_detached(session) {
                return Err(Error::SessionDetached(session.to_string()));
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);

        if !self.is_connected() {
            self.shared.pending.lock().remove(&id);
            return Err(Error::Disconnected);
        }

        let frame = serde_json::to_string(&CommandFrame {
            id,
            method,
            params,
            session_id: session.map(SessionId::as_str),
        })?;
        trace!("DevTools command: {}", frame);

        if let Err(e) = self.sink.lock().await.send(Message::Text(frame)).await {
            self.shared.pending.lock().remove(&id);
            return Err(e.into());
        }

        let reply = match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(Error::Disconnected),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                return Err(Error::CommandTimeout {
                    method: method.to_string(),
                    millis: self.command_timeout.as_millis() as u64,
                });
            }
        };

        match reply {
            Ok(value) => Ok(serde_json::from_value(value)?),
            Err(error) => match session {
                Some(session) if error.message.contains("No session with given id") => {
                    Err(Error::SessionDetached(session.to_string()))
                }
                _ => Err(Error::Protocol {
                    method: method.to_string(),
                    code: error.code,
                    message: error.message,
                }),
            },
        }
    }

    /// Send a command whose result is ignored
    pub async fn call_void<P: Serialize>(
        &self,
        session: Option<&SessionId>,
        method: &str,
        params: P,
    ) -> Result<()> {
        let _: serde_json::Value = self.call(session, method, params).await?;
        Ok(())
    }

    /// List every known target
    pub async fn get_targets(&self) -> Result<Vec<TargetInfo>> {
        let response: GetTargetsResponse = self.call(None, "Target.getTargets", json!({})).await?;
        Ok(response.target_infos)
    }

    /// Ask the browser to track target creation (including out-of-process iframes)
    pub async fn set_discover_targets(&self, discover: bool) -> Result<()> {
        self.call_void(None, "Target.setDiscoverTargets", json!({ "discover": discover }))
            .await
    }

    /// Attach to a target with a flattened session
    pub async fn attach_to_target(&self, target_id: &str) -> Result<SessionId> {
        let response: AttachResponse = self
            .call(
                None,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        Ok(SessionId(response.session_id))
    }

    /// Evaluate an expression and return its JSON value
    pub async fn evaluate(&self, session: &SessionId, expression: &str) -> Result<serde_json::Value> {
        let response: EvaluateResponse = self
            .call(
                Some(session),
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                    "userGesture": true,
                }),
            )
            .await?;

        if let Some(exception) = &response.exception_details {
            return Err(Error::Evaluation(exception.message()));
        }

        Ok(response.into_value())
    }

    /// Press and release a key chord
    pub async fn press(&self, session: &SessionId, chord: &KeyChord) -> Result<()> {
        for event in chord.to_events() {
            self.call_void(Some(session), "Input.dispatchKeyEvent", &event).await?;
        }
        Ok(())
    }

    /// Insert text into the focused element as if typed
    pub async fn insert_text(&self, session: &SessionId, text: &str) -> Result<()> {
        self.call_void(Some(session), "Input.insertText", json!({ "text": text }))
            .await
    }

    pub async fn bring_to_front(&self, session: &SessionId) -> Result<()> {
        self.call_void(Some(session), "Page.bringToFront", json!({})).await
    }

    /// Capture a PNG of the page, optionally clipped to a region
    pub async fn capture_screenshot(
        &self,
        session: &SessionId,
        clip: Option<Rect>,
        beyond_viewport: bool,
    ) -> Result<Vec<u8>> {
        let params = CaptureScreenshotParams {
            format: "png",
            clip: clip.map(Clip::from),
            capture_beyond_viewport: beyond_viewport,
            from_surface: true,
        };
        let response: CaptureScreenshotResponse = self
            .call(Some(session), "Page.captureScreenshot", params)
            .await?;

        base64::engine::general_purpose::STANDARD
            .decode(response.data.as_bytes())
            .map_err(|e| Error::InvalidPayload(format!("screenshot data: {}", e)))
    }

    /// Ask the browser process to exit
    pub async fn close_browser(&self) -> Result<()> {
        self.call_void(None, "Browser.close", json!({})).await
    }

    /// Close the socket
    pub async fn close(&self) {
        let _ = self.sink.lock().await.close().await;
        self.reader.abort();
        self.shared.shutdown();
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
