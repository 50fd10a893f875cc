//! Capability tiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One capability level in the escalation chain
///
/// Ordering follows escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Deterministic code
    Code,
    /// Single generative call
    Generative,
    /// Multi-step agentic call
    Agentic,
    /// Human in the loop
    Human,
}

impl Tier {
    /// All tiers in escalation order
    pub const ALL: [Tier; 4] = [Tier::Code, Tier::Generative, Tier::Agentic, Tier::Human];

    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Generative => "generative",
            Self::Agentic => "agentic",
            Self::Human => "human",
        }
    }

    /// Per-attempt timeout used when a tier has no override
    #[inline]
    #[must_use]
    pub const fn default_timeout(self) -> Duration {
        match self {
            Self::Code => Duration::from_secs(5),
            Self::Generative => Duration::from_secs(30),
            Self::Agentic => Duration::from_secs(5 * 60),
            Self::Human => Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
