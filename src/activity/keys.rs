//! `${KEY_NAME}` key sequences in recorded `type`/`sendKeys` values.

use thiserror::Error;

/// W3C WebDriver key code points by recorder name
const KEY_CODES: &[(&str, char)] = &[
    ("NULL", '\u{E000}'),
    ("CANCEL", '\u{E001}'),
    ("HELP", '\u{E002}'),
    ("BACKSPACE", '\u{E003}'),
    ("BACK_SPACE", '\u{E003}'),
    ("TAB", '\u{E004}'),
    ("CLEAR", '\u{E005}'),
    ("RETURN", '\u{E006}'),
    ("ENTER", '\u{E007}'),
    ("SHIFT", '\u{E008}'),
    ("LEFT_SHIFT", '\u{E008}'),
    ("CONTROL", '\u{E009}'),
    ("CTRL", '\u{E009}'),
    ("LEFT_CONTROL", '\u{E009}'),
    ("ALT", '\u{E00A}'),
    ("LEFT_ALT", '\u{E00A}'),
    ("PAUSE", '\u{E00B}'),
    ("ESCAPE", '\u{E00C}'),
    ("ESC", '\u{E00C}'),
    ("SPACE", '\u{E00D}'),
    ("PAGE_UP", '\u{E00E}'),
    ("PAGE_DOWN", '\u{E00F}'),
    ("END", '\u{E010}'),
    ("HOME", '\u{E011}'),
    ("LEFT", '\u{E012}'),
    ("ARROW_LEFT", '\u{E012}'),
    ("UP", '\u{E013}'),
    ("ARROW_UP", '\u{E013}'),
    ("RIGHT", '\u{E014}'),
    ("ARROW_RIGHT", '\u{E014}'),
    ("DOWN", '\u{E015}'),
    ("ARROW_DOWN", '\u{E015}'),
    ("INSERT", '\u{E016}'),
    ("DELETE", '\u{E017}'),
    ("SEMICOLON", '\u{E018}'),
    ("EQUALS", '\u{E019}'),
    ("NUMPAD0", '\u{E01A}'),
    ("NUMPAD1", '\u{E01B}'),
    ("NUMPAD2", '\u{E01C}'),
    ("NUMPAD3", '\u{E01D}'),
    ("NUMPAD4", '\u{E01E}'),
    ("NUMPAD5", '\u{E01F}'),
    ("NUMPAD6", '\u{E020}'),
    ("NUMPAD7", '\u{E021}'),
    ("NUMPAD8", '\u{E022}'),
    ("NUMPAD9", '\u{E023}'),
    ("MULTIPLY", '\u{E024}'),
    ("ADD", '\u{E025}'),
    ("SEPARATOR", '\u{E026}'),
    ("SUBTRACT", '\u{E027}'),
    ("DECIMAL", '\u{E028}'),
    ("DIVIDE", '\u{E029}'),
    ("F1", '\u{E031}'),
    ("F2", '\u{E032}'),
    ("F3", '\u{E033}'),
    ("F4", '\u{E034}'),
    ("F5", '\u{E035}'),
    ("F6", '\u{E036}'),
    ("F7", '\u{E037}'),
    ("F8", '\u{E038}'),
    ("F9", '\u{E039}'),
    ("F10", '\u{E03A}'),
    ("F11", '\u{E03B}'),
    ("F12", '\u{E03C}'),
    ("META", '\u{E03D}'),
    ("COMMAND", '\u{E03D}'),
];

pub const ENTER: char = '\u{E007}';

/// Code point for a key name such as `ENTER` (without the `KEY_` prefix)
pub fn key_code(name: &str) -> Option<char> {
    KEY_CODES
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, code)| *code)
}

/// One keystroke batch sent with a single `send_keys`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySegment {
    Text(String),
    Key(char),
}

impl KeySegment {
    pub fn to_keys(&self) -> String {
        match self {
            KeySegment::Text(text) => text.clone(),
            KeySegment::Key(code) => code.to_string(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Key {0} not found.")]
pub struct UnknownKey(pub String);

/// Split `o${KEY_CTRL}${KEY_LEFT}g` into text and key segments
pub fn parse_key_sequence(value: &str) -> Result<Vec<KeySegment>, UnknownKey> {
    let normalized = value.replace("${", "}");
    let mut segments = Vec::new();
    for part in normalized.split('}') {
        if part.is_empty() {
            continue;
        }
        match part.strip_prefix("KEY_") {
            Some(name) => {
                let code = key_code(name).ok_or_else(|| UnknownKey(part.to_string()))?;
                segments.push(KeySegment::Key(code));
            }
            None => segments.push(KeySegment::Text(part.to_string())),
        }
    }
    Ok(segments)
}

#[cfg(test)]
#[path = "keys_test.rs"]
mod keys_test;
