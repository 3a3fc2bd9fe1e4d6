//! Human-labeled test cases.
//!
//! Every case carries ground truth for all five dimensions. Loading validates
//! each case up front; a malformed case is a data-integrity failure that stops
//! the run before any judge call is made.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::scoring::{Dimension, DimensionScores, SCORE_MAX, SCORE_MIN};

/// Labeled dataset bundled with the crate.
const BUILTIN_CASES: &str = include_str!("../data/test_cases.json");

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("data integrity failure in case '{case_id}': {reason}")]
    DataIntegrity { case_id: String, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid dataset json: {0}")]
    Json(#[from] serde_json::Error),
}

impl DatasetError {
    fn integrity(case_id: &str, reason: impl Into<String>) -> Self {
        Self::DataIntegrity {
            case_id: case_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// One query/response pair with human ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTestCase")]
pub struct TestCase {
    pub id: String,
    pub category: String,
    pub query: String,
    pub response: String,
    pub ground_truth: DimensionScores,
    #[serde(default)]
    pub notes: String,
}

/// Unvalidated wire form of a test case.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTestCase {
    pub id: String,
    pub category: String,
    pub query: String,
    pub response: String,
    pub ground_truth: BTreeMap<String, Value>,
    #[serde(default)]
    pub notes: String,
}

impl TryFrom<RawTestCase> for TestCase {
    type Error = DatasetError;

    fn try_from(raw: RawTestCase) -> Result<Self, Self::Error> {
        if raw.id.trim().is_empty() {
            return Err(DatasetError::integrity(&raw.id, "empty case id"));
        }
        if raw.category.trim().is_empty() {
            return Err(DatasetError::integrity(&raw.id, "empty category"));
        }

        for key in raw.ground_truth.keys() {
            if Dimension::from_key(key).is_none() {
                return Err(DatasetError::integrity(
                    &raw.id,
                    format!("unknown ground-truth dimension '{key}'"),
                ));
            }
        }

        let mut truth: BTreeMap<Dimension, i64> = BTreeMap::new();
        for dimension in Dimension::ALL {
            let value = raw.ground_truth.get(dimension.as_str()).ok_or_else(|| {
                DatasetError::integrity(&raw.id, format!("missing ground truth for '{dimension}'"))
            })?;
            let score = value.as_i64().ok_or_else(|| {
                DatasetError::integrity(
                    &raw.id,
                    format!("ground truth for '{dimension}' is not an integer: {value}"),
                )
            })?;
            if score < i64::from(SCORE_MIN) || score > i64::from(SCORE_MAX) {
                return Err(DatasetError::integrity(
                    &raw.id,
                    format!("ground truth for '{dimension}' out of range [1,5]: {score}"),
                ));
            }
            truth.insert(dimension, score);
        }

        let ground_truth = DimensionScores::try_from(truth)
            .map_err(|e| DatasetError::integrity(&raw.id, e.to_string()))?;

        Ok(Self {
            id: raw.id,
            category: raw.category,
            query: raw.query,
            response: raw.response,
            ground_truth,
            notes: raw.notes,
        })
    }
}

/// A validated, closed list of test cases.
#[derive(Debug, Clone)]
pub struct Dataset {
    cases: Vec<TestCase>,
}

impl Dataset {
    /// Validate raw cases; ids must be unique.
    pub fn from_raw(raw: Vec<RawTestCase>) -> Result<Self, DatasetError> {
        let mut seen = BTreeSet::new();
        let mut cases = Vec::with_capacity(raw.len());
        for case in raw {
            if !seen.insert(case.id.clone()) {
                return Err(DatasetError::integrity(&case.id, "duplicate case id"));
            }
            cases.push(TestCase::try_from(case)?);
        }
        Ok(Self { cases })
    }

    pub fn from_json(json: &str) -> Result<Self, DatasetError> {
        let raw: Vec<RawTestCase> = serde_json::from_str(json)?;
        Self::from_raw(raw)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// The 23 labeled cases shipped with the crate.
    pub fn builtin() -> Result<Self, DatasetError> {
        Self::from_json(BUILTIN_CASES)
    }

    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    pub fn into_cases(self) -> Vec<TestCase> {
        self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Distinct categories in first-seen order.
    pub fn categories(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for case in &self.cases {
            if !out.contains(&case.category.as_str()) {
                out.push(&case.category);
            }
        }
        out
    }

    pub fn by_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a TestCase> {
        self.cases.iter().filter(move |c| c.category == category)
    }

    /// Keep only the given case ids (unknown ids are an error).
    pub fn select(self, ids: &[String]) -> Result<Self, DatasetError> {
        for id in ids {
            if !self.cases.iter().any(|c| &c.id == id) {
                return Err(DatasetError::integrity(id, "unknown case id"));
            }
        }
        let cases = self
            .cases
            .into_iter()
            .filter(|c| ids.contains(&c.id))
            .collect();
        Ok(Self { cases })
    }
}
