/// Rebuilds one answer from its chunks.
///
/// Starts idle (`is_complete() == true`) so a stray terminal signal between
/// requests is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseAssembler {
    text: String,
    complete: bool,
}

impl Default for ResponseAssembler {
    fn default() -> Self {
        Self {
            text: String::new(),
            complete: true,
        }
    }
}

fn joins_without_space(chunk: &str) -> bool {
    chunk.starts_with([' ', '.', ',', '!', '?'])
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new response: empty text, not complete.
    pub fn reset(&mut self) {
        self.text.clear();
        self.complete = false;
    }

    /// Append a chunk, inserting a single space unless the text is empty,
    /// already ends with a space, or the chunk starts with a space or
    /// `. , ! ?`.
    pub fn append(&mut self, chunk: &str) {
        if !self.text.is_empty() && !self.text.ends_with(' ') && !joins_without_space(chunk) {
            self.text.push(' ');
        }
        self.text.push_str(chunk);
    }

    /// Mark the response finished. Returns `true` only on the transition, so
    /// callers fire their completion signal once.
    pub fn finish(&mut self) -> bool {
        !std::mem::replace(&mut self.complete, true)
    }

    /// Error path: drop whatever arrived and finish.
    pub fn fail(&mut self) -> bool {
        self.text.clear();
        self.finish()
    }

    /// Drop the text without touching completion.
    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }
}
