use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Half-width of the rating window around each band's representative rating.
const BAND_HALF_WIDTH: u32 = 200;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown difficulty band: {0}")]
pub struct BandParseError(pub String);

/// Coarse difficulty bucket used to reach the puzzle catalog.
///
/// The catalog cannot be sampled by exact rating, only by band, so the set
/// composer approximates a continuous target with these discrete steps. Each
/// band covers `[representative - 200, representative + 200)`; the lowest band
/// is open below and the highest band is open above, so every rating falls in
/// exactly one band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyBand {
    Beginner,
    Casual,
    Intermediate,
    Advanced,
    Expert,
    Master,
}

impl DifficultyBand {
    /// Every band, ordered from easiest to hardest.
    pub const ALL: [DifficultyBand; 6] = [
        DifficultyBand::Beginner,
        DifficultyBand::Casual,
        DifficultyBand::Intermediate,
        DifficultyBand::Advanced,
        DifficultyBand::Expert,
        DifficultyBand::Master,
    ];

    /// Rating the composer books for a puzzle drawn from this band.
    #[must_use]
    pub fn representative_rating(self) -> u32 {
        match self {
            DifficultyBand::Beginner => 600,
            DifficultyBand::Casual => 1000,
            DifficultyBand::Intermediate => 1400,
            DifficultyBand::Advanced => 1800,
            DifficultyBand::Expert => 2200,
            DifficultyBand::Master => 2600,
        }
    }

    /// Inclusive lower rating bound of the band.
    #[must_use]
    pub fn min_rating(self) -> u32 {
        match self {
            DifficultyBand::Beginner => 0,
            other => other.representative_rating() - BAND_HALF_WIDTH,
        }
    }

    /// Exclusive upper rating bound, `None` for the open-ended top band.
    #[must_use]
    pub fn max_rating(self) -> Option<u32> {
        match self {
            DifficultyBand::Master => None,
            other => Some(other.representative_rating() + BAND_HALF_WIDTH),
        }
    }

    /// Classify a puzzle rating into its band.
    #[must_use]
    pub fn for_rating(rating: u32) -> Self {
        Self::ALL
            .into_iter()
            .find(|band| band.contains(rating))
            .unwrap_or(DifficultyBand::Master)
    }

    #[must_use]
    pub fn contains(self, rating: u32) -> bool {
        rating >= self.min_rating() && self.max_rating().is_none_or(|max| rating < max)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DifficultyBand::Beginner => "beginner",
            DifficultyBand::Casual => "casual",
            DifficultyBand::Intermediate => "intermediate",
            DifficultyBand::Advanced => "advanced",
            DifficultyBand::Expert => "expert",
            DifficultyBand::Master => "master",
        }
    }
}

impl fmt::Display for DifficultyBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for DifficultyBand {
    type Err = BandParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|band| band.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| BandParseError(s.to_string()))
    }
}
