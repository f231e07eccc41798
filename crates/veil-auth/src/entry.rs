//! Auto-submitting code entry buffer.
//!
//! Collects digits as the user types or pastes. The complete code is
//! handed out exactly once per fill; any edit that leaves the buffer
//! incomplete (or changes the code) re-arms it.

/// Digit buffer for an OTP input field.
#[derive(Debug, Clone)]
pub struct CodeEntry {
    length: usize,
    digits: String,
    armed: bool,
}

impl CodeEntry {
    /// Buffer for codes of `length` digits.
    pub fn new(length: usize) -> Self {
        Self {
            length,
            digits: String::with_capacity(length),
            armed: true,
        }
    }

    /// Current contents.
    pub fn value(&self) -> &str {
        &self.digits
    }

    /// Whether the buffer holds a full code.
    pub fn is_complete(&self) -> bool {
        self.digits.len() == self.length
    }

    /// Type one character. Returns the code when this keystroke completes it.
    ///
    /// Non-digits and keystrokes past the code length are ignored.
    pub fn push(&mut self, ch: char) -> Option<String> {
        if ch.is_ascii_digit() && self.digits.len() < self.length {
            self.digits.push(ch);
        }
        self.take_if_ready()
    }

    /// Delete the last digit.
    pub fn backspace(&mut self) {
        if self.digits.pop().is_some() {
            self.armed = true;
        }
    }

    /// Empty the buffer.
    pub fn clear(&mut self) {
        self.digits.clear();
        self.armed = true;
    }

    /// Replace the contents, e.g. from a paste or SMS autofill.
    ///
    /// Keeps the first `length` digits of `text`. Returns the code if the
    /// result is complete and differs from what was last handed out.
    pub fn set(&mut self, text: &str) -> Option<String> {
        let next: String = text
            .chars()
            .filter(char::is_ascii_digit)
            .take(self.length)
            .collect();
        if next != self.digits {
            self.digits = next;
            self.armed = true;
        }
        self.take_if_ready()
    }

    fn take_if_ready(&mut self) -> Option<String> {
        if self.armed && self.is_complete() {
            self.armed = false;
            Some(self.digits.clone())
        } else {
            None
        }
    }
}
