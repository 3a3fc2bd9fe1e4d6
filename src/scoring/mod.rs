//! Evaluation dimensions and validated score records.
//!
//! A `DimensionScores` value always holds all five dimensions with an integer
//! score in `1..=5`. Partial or out-of-range records cannot be constructed,
//! including through deserialization.

pub mod parser;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use parser::{parse_judge_response, ParseError, ANCHOR_KEY};

/// Lowest score on the rubric scale.
pub const SCORE_MIN: u8 = 1;
/// Highest score on the rubric scale.
pub const SCORE_MAX: u8 = 5;

// =============================================================================
// Dimension
// =============================================================================

/// One fixed evaluation axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Correctness,
    Completeness,
    Conciseness,
    Naturalness,
    Safety,
}

impl Dimension {
    /// All dimensions in canonical order.
    pub const ALL: [Dimension; 5] = [
        Dimension::Correctness,
        Dimension::Completeness,
        Dimension::Conciseness,
        Dimension::Naturalness,
        Dimension::Safety,
    ];

    /// Key used in judge output and persisted documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Correctness => "correctness",
            Dimension::Completeness => "completeness",
            Dimension::Conciseness => "conciseness",
            Dimension::Naturalness => "naturalness",
            Dimension::Safety => "safety",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|d| d.as_str() == key)
    }

    fn index(self) -> usize {
        match self {
            Dimension::Correctness => 0,
            Dimension::Completeness => 1,
            Dimension::Conciseness => 2,
            Dimension::Naturalness => 3,
            Dimension::Safety => 4,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// DimensionScores
// =============================================================================

/// Why a dimension -> score mapping is not a valid score record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScoreError {
    #[error("missing dimension '{0}'")]
    Missing(Dimension),
    #[error("score for '{dimension}' out of range [1,5]: {value}")]
    OutOfRange { dimension: Dimension, value: i64 },
}

/// Complete, validated dimension -> score mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<Dimension, i64>",
    into = "BTreeMap<Dimension, u8>"
)]
pub struct DimensionScores {
    scores: [u8; 5],
}

impl DimensionScores {
    /// Build from scores in canonical dimension order.
    pub fn new(
        correctness: u8,
        completeness: u8,
        conciseness: u8,
        naturalness: u8,
        safety: u8,
    ) -> Result<Self, ScoreError> {
        let mut map = BTreeMap::new();
        map.insert(Dimension::Correctness, i64::from(correctness));
        map.insert(Dimension::Completeness, i64::from(completeness));
        map.insert(Dimension::Conciseness, i64::from(conciseness));
        map.insert(Dimension::Naturalness, i64::from(naturalness));
        map.insert(Dimension::Safety, i64::from(safety));
        Self::try_from(map)
    }

    /// Same score on every dimension.
    pub fn uniform(score: u8) -> Result<Self, ScoreError> {
        Self::new(score, score, score, score, score)
    }

    pub fn get(&self, dimension: Dimension) -> u8 {
        self.scores[dimension.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Dimension, u8)> + '_ {
        Dimension::ALL.iter().map(move |d| (*d, self.get(*d)))
    }
}

impl TryFrom<BTreeMap<Dimension, i64>> for DimensionScores {
    type Error = ScoreError;

    fn try_from(map: BTreeMap<Dimension, i64>) -> Result<Self, Self::Error> {
        let mut scores = [0u8; 5];
        for dimension in Dimension::ALL {
            let value = *map.get(&dimension).ok_or(ScoreError::Missing(dimension))?;
            if value < i64::from(SCORE_MIN) || value > i64::from(SCORE_MAX) {
                return Err(ScoreError::OutOfRange { dimension, value });
            }
            scores[dimension.index()] = value as u8;
        }
        Ok(Self { scores })
    }
}

impl From<DimensionScores> for BTreeMap<Dimension, u8> {
    fn from(scores: DimensionScores) -> Self {
        scores.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_keys_round_trip() {
        for d in Dimension::ALL {
            assert_eq!(Dimension::from_key(d.as_str()), Some(d));
        }
        assert_eq!(Dimension::from_key("helpfulness"), None);
    }

    #[test]
    fn scores_reject_out_of_range() {
        let err = DimensionScores::new(5, 4, 0, 5, 5).unwrap_err();
        assert_eq!(
            err,
            ScoreError::OutOfRange {
                dimension: Dimension::Conciseness,
                value: 0
            }
        );
        assert!(DimensionScores::uniform(6).is_err());
    }

    #[test]
    fn deserialize_requires_every_dimension() {
        let missing = r#"{"correctness":5,"completeness":4,"conciseness":3,"naturalness":5}"#;
        assert!(serde_json::from_str::<DimensionScores>(missing).is_err());

        let full = r#"{"correctness":5,"completeness":4,"conciseness":3,"naturalness":5,"safety":1}"#;
        let scores: DimensionScores = serde_json::from_str(full).unwrap();
        assert_eq!(scores.get(Dimension::Safety), 1);
        assert_eq!(scores.get(Dimension::Conciseness), 3);
    }

    #[test]
    fn serializes_as_named_map() {
        let scores = DimensionScores::new(5, 4, 3, 2, 1).unwrap();
        let value = serde_json::to_value(scores).unwrap();
        assert_eq!(value["correctness"], 5);
        assert_eq!(value["safety"], 1);
    }
}
