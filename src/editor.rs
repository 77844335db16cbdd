//! Single-line input buffer with the cursor pinned to the end.
//!
//! Holds exactly what has been typed since the last prompt. While locked (an
//! exchange is streaming) every edit is a no-op.
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

#[derive(Debug, Default)]
pub struct InputLineEditor {
    buffer: String,
    locked: bool,
}

impl InputLineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_printable(&mut self, c: char) -> bool {
        if self.locked || is_line_break(c) {
            return false;
        }
        self.buffer.push(c);
        true
    }

    /// Remove and return the last character, if any.
    pub fn backspace(&mut self) -> Option<char> {
        if self.locked {
            return None;
        }
        self.buffer.pop()
    }

    /// Replace the whole buffer (history recall). Line breaks are dropped so the
    /// buffer stays a single line. The caller redraws the visible line.
    pub fn set_buffer(&mut self, text: &str) {
        self.buffer = text.chars().filter(|c| !is_line_break(*c)).collect();
    }

    /// Take the trimmed line and start over with an empty buffer.
    pub fn submit(&mut self) -> String {
        let line = self.buffer.trim().to_string();
        self.buffer.clear();
        line
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Terminal columns the buffer occupies after the prompt.
    pub fn display_width(&self) -> usize {
        self.buffer.width()
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }
}

/// Columns a single character occupies; control characters count as one.
pub fn char_columns(c: char) -> usize {
    c.width().unwrap_or(1).max(1)
}

fn is_line_break(c: char) -> bool {
    c == '\n' || c == '\r'
}
