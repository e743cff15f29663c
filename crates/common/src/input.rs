//! Keyboard input model
//!
//! Chords are written the way Playwright writes them (`Control+Shift+P`,
//! `ArrowDown`, `F1`) and turned into `Input.dispatchKeyEvent` parameters.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// A non-modifier key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Escape,
    Tab,
    Backspace,
    Delete,
    Space,
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    Home,
    End,
    PageUp,
    PageDown,
    /// Function key F1..F12
    F(u8),
    Char(char),
}

impl Key {
    fn name(&self) -> String {
        match self {
            Key::Enter => "Enter".into(),
            Key::Escape => "Escape".into(),
            Key::Tab => "Tab".into(),
            Key::Backspace => "Backspace".into(),
            Key::Delete => "Delete".into(),
            Key::Space => " ".into(),
            Key::ArrowUp => "ArrowUp".into(),
            Key::ArrowDown => "ArrowDown".into(),
            Key::ArrowLeft => "ArrowLeft".into(),
            Key::ArrowRight => "ArrowRight".into(),
            Key::Home => "Home".into(),
            Key::End => "End".into(),
            Key::PageUp => "PageUp".into(),
            Key::PageDown => "PageDown".into(),
            Key::F(n) => format!("F{}", n),
            Key::Char(c) => c.to_string(),
        }
    }

    fn code(&self) -> String {
        match self {
            Key::Space => "Space".into(),
            Key::Char(c) if c.is_ascii_alphabetic() => format!("Key{}", c.to_ascii_uppercase()),
            Key::Char(c) if c.is_ascii_digit() => format!("Digit{}", c),
            Key::Char(_) => String::new(),
            other => other.name(),
        }
    }

    fn virtual_key_code(&self) -> u32 {
        match self {
            Key::Enter => 13,
            Key::Escape => 27,
            Key::Tab => 9,
            Key::Backspace => 8,
            Key::Delete => 46,
            Key::Space => 32,
            Key::ArrowUp => 38,
            Key::ArrowDown => 40,
            Key::ArrowLeft => 37,
            Key::ArrowRight => 39,
            Key::Home => 36,
            Key::End => 35,
            Key::PageUp => 33,
            Key::PageDown => 34,
            Key::F(n) => 111 + *n as u32,
            Key::Char(c) if c.is_ascii_alphanumeric() => c.to_ascii_uppercase() as u32,
            Key::Char(_) => 0,
        }
    }

    fn text(&self, modifiers: Modifiers) -> Option<String> {
        if modifiers.control || modifiers.alt || modifiers.meta {
            return None;
        }
        match self {
            Key::Enter => Some("\r".into()),
            Key::Space => Some(" ".into()),
            Key::Char(c) if modifiers.shift => Some(c.to_uppercase().collect()),
            Key::Char(c) => Some(c.to_string()),
            _ => None,
        }
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let key = match s {
            "Enter" | "Return" => Key::Enter,
            "Escape" | "Esc" => Key::Escape,
            "Tab" => Key::Tab,
            "Backspace" => Key::Backspace,
            "Delete" => Key::Delete,
            "Space" | " " => Key::Space,
            "ArrowUp" | "Up" => Key::ArrowUp,
            "ArrowDown" | "Down" => Key::ArrowDown,
            "ArrowLeft" | "Left" => Key::ArrowLeft,
            "ArrowRight" | "Right" => Key::ArrowRight,
            "Home" => Key::Home,
            "End" => Key::End,
            "PageUp" => Key::PageUp,
            "PageDown" => Key::PageDown,
            _ => {
                if let Some(n) = s.strip_prefix('F').and_then(|n| n.parse::<u8>().ok()) {
                    if (1..=12).contains(&n) {
                        return Ok(Key::F(n));
                    }
                }
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Key::Char(c),
                    _ => return Err(Error::InvalidKey(s.to_string())),
                }
            }
        };
        Ok(key)
    }
}

/// Modifier keys held during a key press
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub alt: bool,
    pub control: bool,
    pub meta: bool,
    pub shift: bool,
}

impl Modifiers {
    /// DevTools modifier bitmask (Alt=1, Ctrl=2, Meta=4, Shift=8)
    pub fn bits(&self) -> u32 {
        (self.alt as u32) | (self.control as u32) << 1 | (self.meta as u32) << 2 | (self.shift as u32) << 3
    }

    fn is_empty(&self) -> bool {
        self.bits() == 0
    }
}

/// A key plus modifiers, e.g. `Control+Shift+P`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyChord {
    pub key: Key,
    pub modifiers: Modifiers,
}

impl KeyChord {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            modifiers: Modifiers::default(),
        }
    }

    /// The chord that opens "Show All Commands" on this platform
    pub fn command_palette() -> Self {
        let modifiers = if cfg!(target_os = "macos") {
            Modifiers { meta: true, shift: true, ..Default::default() }
        } else {
            Modifiers { control: true, shift: true, ..Default::default() }
        };
        Self {
            key: Key::Char('p'),
            modifiers,
        }
    }

    /// `keyDown` followed by `keyUp`
    pub fn to_events(&self) -> [KeyEventParams; 2] {
        let key = match self.key {
            Key::Char(c) if self.modifiers.shift => c.to_uppercase().collect(),
            _ => self.key.name(),
        };
        let code = self.key.code();
        let vk = self.key.virtual_key_code();
        let modifiers = self.modifiers.bits();
        let text = self.key.text(self.modifiers);

        [
            KeyEventParams {
                event_type: if text.is_some() { "keyDown" } else { "rawKeyDown" },
                modifiers,
                key: key.clone(),
                code: code.clone(),
                windows_virtual_key_code: vk,
                native_virtual_key_code: vk,
                unmodified_text: text.clone(),
                text,
            },
            KeyEventParams {
                event_type: "keyUp",
                modifiers,
                key,
                code,
                windows_virtual_key_code: vk,
                native_virtual_key_code: vk,
                text: None,
                unmodified_text: None,
            },
        ]
    }
}

impl FromStr for KeyChord {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidKey(s.to_string()));
        }

        // "Control++" names the plus key itself
        let (prefix, key_part) = if let Some(prefix) = s.strip_suffix("++") {
            (Some(prefix), "+")
        } else {
            match s.rsplit_once('+') {
                Some((prefix, key)) => (Some(prefix), key),
                None => (None, s),
            }
        };

        let mut modifiers = Modifiers::default();
        for part in prefix.into_iter().flat_map(|p| p.split('+')).filter(|p| !p.is_empty()) {
            match part {
                "Control" | "Ctrl" => modifiers.control = true,
                "Shift" => modifiers.shift = true,
                "Alt" | "Option" => modifiers.alt = true,
                "Meta" | "Cmd" | "Command" => modifiers.meta = true,
                "ControlOrMeta" | "CtrlOrCmd" => {
                    if cfg!(target_os = "macos") {
                        modifiers.meta = true;
                    } else {
                        modifiers.control = true;
                    }
                }
                other => return Err(Error::InvalidKey(format!("unknown modifier '{}' in '{}'", other, s))),
            }
        }

        Ok(Self {
            key: key_part.parse()?,
            modifiers,
        })
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.modifiers.is_empty() {
            for (held, name) in [
                (self.modifiers.control, "Control"),
                (self.modifiers.alt, "Alt"),
                (self.modifiers.meta, "Meta"),
                (self.modifiers.shift, "Shift"),
            ] {
                if held {
                    write!(f, "{}+", name)?;
                }
            }
        }
        match self.key {
            Key::Space => f.write_str("Space"),
            Key::Char(c) => write!(f, "{}", c.to_ascii_uppercase()),
            other => f.write_str(&other.name()),
        }
    }
}

/// Parameters of `Input.dispatchKeyEvent`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEventParams {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub modifiers: u32,
    pub key: String,
    pub code: String,
    pub windows_virtual_key_code: u32,
    pub native_virtual_key_code: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unmodified_text: Option<String>,
}
