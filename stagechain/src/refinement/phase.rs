//! Refinement phases and their context keys.

use crate::context::Context;
use std::fmt;

/// Context key of the analysis phase.
pub const ANALYZE_KEY: &str = "ANALYZE";
/// Context key of the generation phase.
pub const GENERATE_KEY: &str = "GENERATE";
/// Prefix of refinement round keys (`REFINE_1`, `REFINE_2`, ...).
pub const REFINE_PREFIX: &str = "REFINE_";

/// One step of the refinement state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Study the goal.
    Analyze,
    /// Produce the first artifact.
    Generate,
    /// Improve the previous artifact; rounds count from 1.
    Refine(u32),
}

impl Phase {
    /// Returns the key the phase output is stored under.
    #[must_use]
    pub fn key(self) -> String {
        match self {
            Self::Analyze => ANALYZE_KEY.to_string(),
            Self::Generate => GENERATE_KEY.to_string(),
            Self::Refine(round) => format!("{REFINE_PREFIX}{round}"),
        }
    }

    /// Parses a context key.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            ANALYZE_KEY => Some(Self::Analyze),
            GENERATE_KEY => Some(Self::Generate),
            other => other
                .strip_prefix(REFINE_PREFIX)?
                .parse::<u32>()
                .ok()
                .filter(|round| *round > 0)
                .map(Self::Refine),
        }
    }

    /// Returns the phase that follows this one.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::Analyze => Self::Generate,
            Self::Generate => Self::Refine(1),
            Self::Refine(round) => Self::Refine(round.saturating_add(1)),
        }
    }

    /// Whether the phase output is an artifact.
    #[must_use]
    pub fn produces_artifact(self) -> bool {
        !matches!(self, Self::Analyze)
    }

    /// Whether the phase falls within a loop of `rounds` refinements.
    #[must_use]
    pub fn within(self, rounds: u32) -> bool {
        match self {
            Self::Analyze | Self::Generate => true,
            Self::Refine(round) => round <= rounds,
        }
    }

    /// Returns the first phase whose output `results` does not hold.
    #[must_use]
    pub fn resume_point(results: &Context) -> Self {
        let mut phase = Self::Analyze;
        while results.contains(&phase.key()) {
            phase = phase.next();
        }
        phase
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
