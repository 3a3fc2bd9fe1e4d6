//! Extraction of a score record from free-text judge output.
//!
//! Judges wrap their scores in prose, markdown fences or step-by-step
//! reasoning. The scanner looks for innermost brace-delimited spans (no nested
//! braces inside) that contain the quoted anchor key. Exactly one such span
//! must exist: zero is `NoScoreBlock`, more than one is `AmbiguousScoreBlock`.
//! The span is then parsed as flat JSON and validated strictly.

use serde_json::{Map, Value};

use super::{Dimension, DimensionScores, SCORE_MAX, SCORE_MIN};

/// Literal key that marks a candidate score block.
pub const ANCHOR_KEY: &str = "\"correctness\"";

/// Why a judge reply did not yield a score record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("no score block containing \"correctness\" found")]
    NoScoreBlock,
    #[error("ambiguous output: {candidates} candidate score blocks")]
    AmbiguousScoreBlock { candidates: usize },
    #[error("score block is not a flat JSON object: {0}")]
    MalformedBlock(String),
    #[error("missing dimension '{0}'")]
    MissingDimension(Dimension),
    #[error("non-numeric score for '{dimension}': {value}")]
    NonNumericScore { dimension: Dimension, value: String },
    #[error("non-integer score for '{dimension}': {value}")]
    NonIntegerScore { dimension: Dimension, value: f64 },
    #[error("score for '{dimension}' out of range [1,5]: {value}")]
    ScoreOutOfRange { dimension: Dimension, value: i64 },
}

impl ParseError {
    /// Short stable code for persisted documents and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoScoreBlock => "no_score_block",
            Self::AmbiguousScoreBlock { .. } => "ambiguous_score_block",
            Self::MalformedBlock(_) => "malformed_block",
            Self::MissingDimension(_) => "missing_dimension",
            Self::NonNumericScore { .. } => "non_numeric_score",
            Self::NonIntegerScore { .. } => "non_integer_score",
            Self::ScoreOutOfRange { .. } => "score_out_of_range",
        }
    }
}

/// Parse a judge reply into a complete score record.
pub fn parse_judge_response(raw: &str) -> Result<DimensionScores, ParseError> {
    let block = locate_score_block(raw)?;

    let object: Map<String, Value> =
        serde_json::from_str(block).map_err(|e| ParseError::MalformedBlock(e.to_string()))?;

    validate_scores(&object)
}

/// Find the unique innermost `{...}` span containing the anchor key.
fn locate_score_block(raw: &str) -> Result<&str, ParseError> {
    let mut candidates: Vec<&str> = Vec::new();
    let mut open: Option<usize> = None;

    for (i, c) in raw.char_indices() {
        match c {
            // A later '{' supersedes the pending one: only innermost spans count.
            '{' => open = Some(i),
            '}' => {
                if let Some(start) = open.take() {
                    let span = &raw[start..=i];
                    if span.contains(ANCHOR_KEY) {
                        candidates.push(span);
                    }
                }
            }
            _ => {}
        }
    }

    match candidates.len() {
        0 => Err(ParseError::NoScoreBlock),
        1 => Ok(candidates[0]),
        n => Err(ParseError::AmbiguousScoreBlock { candidates: n }),
    }
}

fn validate_scores(object: &Map<String, Value>) -> Result<DimensionScores, ParseError> {
    let mut values = [0u8; 5];

    for (slot, dimension) in values.iter_mut().zip(Dimension::ALL) {
        let value = object
            .get(dimension.as_str())
            .ok_or(ParseError::MissingDimension(dimension))?;
        *slot = integer_score(dimension, value)?;
    }

    let [correctness, completeness, conciseness, naturalness, safety] = values;
    DimensionScores::new(correctness, completeness, conciseness, naturalness, safety)
        .map_err(|e| ParseError::MalformedBlock(e.to_string()))
}

fn integer_score(dimension: Dimension, value: &Value) -> Result<u8, ParseError> {
    let Value::Number(number) = value else {
        return Err(ParseError::NonNumericScore {
            dimension,
            value: value.to_string(),
        });
    };

    let integer = match number.as_i64() {
        Some(v) => v,
        None => {
            let float = number.as_f64().unwrap_or(f64::NAN);
            if !float.is_finite() || float.fract() != 0.0 {
                return Err(ParseError::NonIntegerScore {
                    dimension,
                    value: float,
                });
            }
            if float.abs() > i64::MAX as f64 {
                return Err(ParseError::ScoreOutOfRange {
                    dimension,
                    value: if float > 0.0 { i64::MAX } else { i64::MIN },
                });
            }
            float as i64
        }
    };

    if integer < i64::from(SCORE_MIN) || integer > i64::from(SCORE_MAX) {
        return Err(ParseError::ScoreOutOfRange {
            dimension,
            value: integer,
        });
    }

    Ok(integer as u8)
}
