//! The typed result of a stage.

use serde::{Deserialize, Serialize};

/// Text produced by one stage.
///
/// The core never parses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    /// The generated text.
    pub text: String,
}

impl StageResult {
    /// Creates a new stage result.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Consumes the result, returning the text.
    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }
}

impl From<String> for StageResult {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl From<&str> for StageResult {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}
