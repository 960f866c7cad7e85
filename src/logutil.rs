//! Logging helpers for chat text.
//!
//! Chat messages are user-controlled: they may span lines, carry control
//! characters or be arbitrarily long. Everything user-supplied goes through
//! [`escape_log`] before reaching a log line.

use std::fmt::Write;

/// Characters kept from a chat message before the preview is cut.
pub const CHAT_PREVIEW_CHARS: usize = 120;

/// Escape `s` onto a single line and cap it at [`CHAT_PREVIEW_CHARS`] characters.
///
/// Backslash, `\n`, `\r` and `\t` become two-character escapes; other control
/// characters become `\xNN`. A cut preview ends with `…`.
pub fn escape_log(s: &str) -> String {
    escape_preview(s, CHAT_PREVIEW_CHARS)
}

pub fn escape_preview(s: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max_chars * 4) + 4);
    let mut chars = s.chars();
    for ch in chars.by_ref().take(max_chars) {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    if chars.next().is_some() {
        out.push('…');
    }
    out
}
