//! Run input: the goal text and the optional depth hint.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How thorough the first stage is asked to be.
///
/// Depth only changes the text rendered through `{depth}`; it never changes
/// which stages run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    /// A short overview.
    Brief,
    /// The default.
    #[default]
    Comprehensive,
    /// As deep as the stages can go.
    Exhaustive,
}

impl Depth {
    /// Returns the lowercase label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Brief => "brief",
            Self::Comprehensive => "comprehensive",
            Self::Exhaustive => "exhaustive",
        }
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Depth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "brief" => Ok(Self::Brief),
            "comprehensive" => Ok(Self::Comprehensive),
            "exhaustive" => Ok(Self::Exhaustive),
            other => Err(format!("unknown depth '{other}'")),
        }
    }
}

/// The initial input of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineInput {
    /// Free-text goal, topic or model path.
    pub goal: String,
    /// Optional depth hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<Depth>,
}

impl PipelineInput {
    /// Creates an input without a depth hint.
    #[must_use]
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            depth: None,
        }
    }

    /// Sets the depth hint.
    #[must_use]
    pub fn with_depth(mut self, depth: Depth) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Returns the depth, falling back to the default.
    #[must_use]
    pub fn depth_or_default(&self) -> Depth {
        self.depth.unwrap_or_default()
    }
}

impl From<&str> for PipelineInput {
    fn from(goal: &str) -> Self {
        Self::new(goal)
    }
}

impl From<String> for PipelineInput {
    fn from(goal: String) -> Self {
        Self::new(goal)
    }
}
