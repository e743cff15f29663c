//! DevTools protocol message and domain types

use serde::{Deserialize, Serialize};

/// Flattened session identifier returned by `Target.attachToTarget`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outgoing command frame
#[derive(Debug, Serialize)]
pub(crate) struct CommandFrame<'a, P> {
    pub id: u64,
    pub method: &'a str,
    pub params: P,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a str>,
}

/// Incoming frame: either a response (has `id`) or an event (has `method`)
#[derive(Debug, Deserialize)]
pub(crate) struct IncomingFrame {
    pub id: Option<u64>,
    pub method: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<ProtocolError>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProtocolError {
    pub code: i64,
    pub message: String,
}

/// A debuggable target (page, iframe, worker, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub target_id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub attached: bool,
}

impl TargetInfo {
    pub fn is_page(&self) -> bool {
        self.target_type == "page"
    }

    pub fn is_iframe(&self) -> bool {
        self.target_type == "iframe"
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetTargetsResponse {
    pub target_infos: Vec<TargetInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AttachResponse {
    pub session_id: String,
}

/// Rectangle in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Screenshot clip region (`Page.Viewport`)
#[derive(Debug, Clone, Copy, Serialize)]
pub(crate) struct Clip {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub scale: f64,
}

impl From<Rect> for Clip {
    fn from(rect: Rect) -> Self {
        Self {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CaptureScreenshotParams {
    pub format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip: Option<Clip>,
    pub capture_beyond_viewport: bool,
    pub from_surface: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CaptureScreenshotResponse {
    pub data: String,
}

/// `Runtime.RemoteObject`, restricted to what by-value evaluation needs
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RemoteObject {
    #[serde(rename = "type")]
    pub object_type: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExceptionDetails {
    pub text: String,
    #[serde(default)]
    pub exception: Option<RemoteObject>,
}

impl ExceptionDetails {
    pub fn message(&self) -> String {
        self.exception
            .as_ref()
            .and_then(|e| e.description.clone())
            .unwrap_or_else(|| self.text.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EvaluateResponse {
    pub result: RemoteObject,
    #[serde(default)]
    pub exception_details: Option<ExceptionDetails>,
}

impl EvaluateResponse {
    /// `undefined` has no `value`; map it to JSON null
    pub fn into_value(self) -> serde_json::Value {
        match self.result.object_type.as_str() {
            "undefined" => serde_json::Value::Null,
            _ => self.result.value.unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Response of `GET /json/version`
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserVersion {
    #[serde(rename = "Browser", default)]
    pub browser: String,
    #[serde(rename = "Protocol-Version", default)]
    pub protocol_version: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_frame_serialization() {
        let frame = CommandFrame {
            id: 7,
            method: "Runtime.evaluate",
            params: serde_json::json!({ "expression": "1 + 1" }),
            session_id: Some("S1"),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"id\":7"));
        assert!(json.contains("\"sessionId\":\"S1\""));

        let browser_level = CommandFrame {
            id: 8,
            method: "Target.getTargets",
            params: serde_json::json!({}),
            session_id: None,
        };
        let json = serde_json::to_string(&browser_level).unwrap();
        assert!(!json.contains("sessionId"));
    }

    #[test]
    fn test_target_info_parsing() {
        let json = r#"{"targetInfos":[
            {"targetId":"A","type":"page","title":"Welcome - Visual Studio Code","url":"vscode-file://vscode-app/workbench.html","attached":false},
            {"targetId":"B","type":"iframe","title":"","url":"vscode-webview://abc/index.html?id=1","attached":true}
        ]}"#;
        let response: GetTargetsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.target_infos.len(), 2);
        assert!(response.target_infos[0].is_page());
        assert!(response.target_infos[1].is_iframe());
    }

    #[test]
    fn test_evaluate_exception_message() {
        let json = r#"{
            "result": {"type":"object","subtype":"error","description":"TypeError: x is undefined"},
            "exceptionDetails": {"exceptionId":1,"text":"Uncaught","lineNumber":0,"columnNumber":0,
                "exception":{"type":"object","description":"TypeError: x is undefined"}}
        }"#;
        let response: EvaluateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            response.exception_details.unwrap().message(),
            "TypeError: x is undefined"
        );
    }

    #[test]
    fn test_evaluate_undefined_is_null() {
        let json = r#"{"result":{"type":"undefined"}}"#;
        let response: EvaluateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.into_value(), serde_json::Value::Null);
    }
}
