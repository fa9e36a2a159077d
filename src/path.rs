//! Element path tracking
//!
//! [`PathStack`] keeps the slash-joined path from the document root to the
//! innermost open element in a single buffer. Opening an element appends
//! `/name`; closing truncates back to the recorded offset, so neither
//! operation re-walks the stack.

#[derive(Debug, Default, Clone)]
pub struct PathStack {
    path: String,
    /// Buffer length before each open element was appended
    offsets: Vec<usize>,
}

impl PathStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str) {
        self.offsets.push(self.path.len());
        if !self.path.is_empty() {
            self.path.push('/');
        }
        self.path.push_str(name);
    }

    /// Close the innermost element. Returns false if nothing was open.
    pub fn pop(&mut self) -> bool {
        match self.offsets.pop() {
            Some(offset) => {
                self.path.truncate(offset);
                true
            }
            None => false,
        }
    }

    /// Full path of the innermost open element (empty at depth 0)
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Name of the innermost open element
    pub fn current(&self) -> Option<&str> {
        let offset = *self.offsets.last()?;
        let start = if offset == 0 { 0 } else { offset + 1 };
        Some(&self.path[start..])
    }

    pub fn depth(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn clear(&mut self) {
        self.path.clear();
        self.offsets.clear();
    }
}
