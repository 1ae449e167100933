//! Priority bands for scheduled tasks.

use serde::{Deserialize, Serialize};

/// Scheduling priority of a task.
///
/// Bands are totally ordered: `Min < Low < Medium < High < Max`. Among
/// queued tasks the highest band is always handed to a worker first; tasks
/// within the same band run in submission order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Lowest band, for work nobody is waiting on.
    Min,
    /// Below-default band.
    Low,
    /// Default band.
    #[default]
    Medium,
    /// Above-default band.
    High,
    /// Highest band.
    Max,
}

impl Priority {
    /// All bands in ascending order.
    pub const ALL: [Self; 5] = [Self::Min, Self::Low, Self::Medium, Self::High, Self::Max];

    /// Short lowercase label used in log fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Max => "max",
        }
    }
}

impl core::fmt::Display for Priority {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
