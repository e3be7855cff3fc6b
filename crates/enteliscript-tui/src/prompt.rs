//! Editable command line with history recall.

/// Oldest entries are dropped past this many
const MAX_HISTORY: usize = 500;

#[derive(Debug, Default)]
pub struct Prompt {
    buffer: String,
    /// Cursor position in chars, not bytes
    cursor: usize,
    history: Vec<String>,
    /// Index into `history` while browsing with Up/Down
    browsing: Option<usize>,
    /// What was typed before browsing started
    draft: String,
}

impl Prompt {
    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.buffer = text.into();
        self.cursor = self.buffer.chars().count();
        self.browsing = None;
    }

    pub fn insert(&mut self, c: char) {
        let at = self.byte_offset(self.cursor);
        self.buffer.insert(at, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor -= 1;
        let at = self.byte_offset(self.cursor);
        self.buffer.remove(at);
    }

    pub fn delete(&mut self) {
        if self.cursor < self.buffer.chars().count() {
            let at = self.byte_offset(self.cursor);
            self.buffer.remove(at);
        }
    }

    pub fn left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.buffer.chars().count());
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.buffer.chars().count();
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.browsing = None;
    }

    /// Take the current line, leaving the prompt empty.
    pub fn take(&mut self) -> String {
        self.cursor = 0;
        self.browsing = None;
        std::mem::take(&mut self.buffer)
    }

    /// Remember an entered line. Consecutive duplicates are kept once.
    pub fn remember(&mut self, entry: String) {
        if entry.trim().is_empty() || self.history.last() == Some(&entry) {
            return;
        }
        self.history.push(entry);
        if self.history.len() > MAX_HISTORY {
            self.history.remove(0);
        }
    }

    /// Step back through history (Up).
    pub fn history_up(&mut self) {
        if self.history.is_empty() {
            return;
        }
        let idx = match self.browsing {
            None => {
                self.draft = self.buffer.clone();
                self.history.len() - 1
            }
            Some(idx) => idx.saturating_sub(1),
        };
        self.browsing = Some(idx);
        let entry = self.history[idx].clone();
        self.show(entry);
    }

    /// Step forward through history (Down), ending at the draft.
    pub fn history_down(&mut self) {
        let Some(idx) = self.browsing else {
            return;
        };
        if idx + 1 < self.history.len() {
            self.browsing = Some(idx + 1);
            let entry = self.history[idx + 1].clone();
            self.show(entry);
        } else {
            self.browsing = None;
            let draft = std::mem::take(&mut self.draft);
            self.show(draft);
        }
    }

    fn show(&mut self, text: String) {
        self.buffer = text;
        self.cursor = self.buffer.chars().count();
    }

    fn byte_offset(&self, chars: usize) -> usize {
        self.buffer
            .char_indices()
            .nth(chars)
            .map(|(i, _)| i)
            .unwrap_or(self.buffer.len())
    }
}
