//! Priority tiers for dashboard sections and tracked queries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How important a section is to the page it lives on.
///
/// Ordering follows importance: `Essential < Secondary < Optional`, so
/// sorting ascending puts the most important work first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// The page is useless without it
    Essential,
    /// The page still works without it
    Secondary,
    /// Decorative or nice-to-have
    Optional,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Self::Essential, Self::Secondary, Self::Optional];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Essential => "essential",
            Self::Secondary => "secondary",
            Self::Optional => "optional",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "essential" => Ok(Self::Essential),
            "secondary" => Ok(Self::Secondary),
            "optional" => Ok(Self::Optional),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}
