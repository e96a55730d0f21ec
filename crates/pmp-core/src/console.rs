//! Line-oriented console output for verdicts and diagnostics.

/// Text sink for human-readable harness output.
pub trait Console {
    /// Emits `text` verbatim; callers supply their own newlines.
    fn puts(&mut self, text: &str);

    /// Emits `value` as eight zero-padded hexadecimal digits.
    fn puthex(&mut self, value: u32) {
        self.puts(&format_hex(value));
    }
}

/// Formats `value` as eight zero-padded lowercase hexadecimal digits.
#[must_use]
pub fn format_hex(value: u32) -> String {
    format!("{value:08x}")
}

/// In-memory console that keeps everything written to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    text: String,
}

impl Transcript {
    /// Returns everything written so far.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Consumes the transcript, returning its text.
    #[must_use]
    pub fn into_string(self) -> String {
        self.text
    }
}

impl Console for Transcript {
    fn puts(&mut self, text: &str) {
        self.text.push_str(text);
    }
}
