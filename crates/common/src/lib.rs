//! PPDS E2E common library
//!
//! DevTools protocol plumbing used by the harness: the WebSocket
//! client, endpoint discovery and the keyboard model.

pub mod cdp;
pub mod endpoint;
pub mod error;
pub mod input;
pub mod protocol;

pub use cdp::CdpClient;
pub use endpoint::{find_free_port, wait_for_endpoint, DevToolsEndpoint};
pub use error::{Error, Result};
pub use input::{Key, KeyChord, Modifiers};
pub use protocol::{BrowserVersion, Rect, SessionId, TargetInfo};
