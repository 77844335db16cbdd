//! Command history for one terminal session.
//!
//! The log is append-only and oldest-first. The cursor counts back from the most
//! recent entry while the user browses with ↑/↓; `None` means the line on screen
//! is live input rather than a recalled entry.

// ── History navigator ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct HistoryNavigator {
    entries: Vec<String>,
    cursor: Option<usize>,
}

impl HistoryNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a submitted command. Blank text is ignored; the cursor always
    /// returns to the live line.
    pub fn record(&mut self, command: &str) {
        let command = command.trim();
        if !command.is_empty() {
            self.entries.push(command.to_string());
        }
        self.cursor = None;
    }

    /// Step one entry further into the past.
    ///
    /// Stepping past the oldest entry is a no-op that returns the oldest entry
    /// again. `None` only when nothing has been recorded yet.
    pub fn recall_older(&mut self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        let oldest = self.entries.len() - 1;
        let next = match self.cursor {
            None => 0,
            Some(c) => (c + 1).min(oldest),
        };
        self.cursor = Some(next);
        Some(self.entry_at(next).to_string())
    }

    /// Step one entry towards the present. An empty string means the cursor is
    /// back on the live line.
    pub fn recall_newer(&mut self) -> String {
        match self.cursor {
            Some(c) if c > 0 => {
                self.cursor = Some(c - 1);
                self.entry_at(c - 1).to_string()
            }
            _ => {
                self.cursor = None;
                String::new()
            }
        }
    }

    /// Leave browsing mode without recording anything (used on direct edits).
    pub fn reset_cursor(&mut self) {
        self.cursor = None;
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// All recorded commands, oldest first.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_at(&self, offset_from_newest: usize) -> &str {
        &self.entries[self.entries.len() - 1 - offset_from_newest]
    }
}
