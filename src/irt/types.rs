use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::irt::error::{EngineError, EngineResult};

pub const THETA_MIN: f64 = -3.0;
pub const THETA_MAX: f64 = 3.0;
pub const MAX_DISCRIMINATION: f64 = 4.0;
pub const MULTIPLE_CHOICE_GUESSING: f64 = 0.25;
pub const OVERALL_KEY: &str = "overall";

/// Chapter, subject and overall records share one shape; the key says which.
pub type AbilitySnapshot = BTreeMap<String, AbilityRecord>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(Default)]
pub enum ItemFormat {
    #[default]
    MultipleChoice,
    Numerical,
}

impl ItemFormat {
    pub fn default_guessing(&self) -> f64 {
        match self {
            Self::MultipleChoice => MULTIPLE_CHOICE_GUESSING,
            Self::Numerical => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemParams {
    #[serde(alias = "a")]
    pub discrimination: f64,
    #[serde(alias = "b")]
    pub difficulty: f64,
    #[serde(alias = "c", default, skip_serializing_if = "Option::is_none")]
    pub guessing: Option<f64>,
    #[serde(default)]
    pub format: ItemFormat,
}

impl ItemParams {
    pub fn new(discrimination: f64, difficulty: f64, guessing: f64) -> Self {
        Self {
            discrimination,
            difficulty,
            guessing: Some(guessing),
            format: ItemFormat::MultipleChoice,
        }
    }

    pub fn numerical(discrimination: f64, difficulty: f64) -> Self {
        Self {
            discrimination,
            difficulty,
            guessing: None,
            format: ItemFormat::Numerical,
        }
    }

    /// Guessing floor, falling back to the format default when absent.
    pub fn resolved_guessing(&self) -> f64 {
        self.guessing.unwrap_or_else(|| self.format.default_guessing())
    }

    pub fn validate(&self) -> EngineResult<()> {
        let a = self.discrimination;
        if !a.is_finite() || a <= 0.0 || a > MAX_DISCRIMINATION {
            return Err(EngineError::InvalidItemParameters {
                field: "discrimination",
                value: a,
            });
        }
        let b = self.difficulty;
        if !b.is_finite() || !(THETA_MIN..=THETA_MAX).contains(&b) {
            return Err(EngineError::InvalidItemParameters {
                field: "difficulty",
                value: b,
            });
        }
        let c = self.resolved_guessing();
        if !c.is_finite() || !(0.0..1.0).contains(&c) {
            return Err(EngineError::InvalidItemParameters {
                field: "guessing",
                value: c,
            });
        }
        Ok(())
    }

    pub fn band(&self) -> DifficultyBand {
        DifficultyBand::from_difficulty(self.difficulty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum DifficultyBand {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl DifficultyBand {
    pub fn from_difficulty(b: f64) -> Self {
        if b < -0.5 {
            Self::Easy
        } else if b > 0.5 {
            Self::Hard
        } else {
            Self::Medium
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedFrom {
    pub broad_key: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilityRecord {
    pub key: String,
    pub theta: f64,
    pub standard_error: f64,
    pub attempts: u32,
    pub correct_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_from: Option<DerivedFrom>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl AbilityRecord {
    pub fn new(key: impl Into<String>, theta: f64, standard_error: f64) -> Self {
        Self {
            key: key.into(),
            theta,
            standard_error,
            attempts: 0,
            correct_count: 0,
            derived_from: None,
            last_attempt_at: None,
        }
    }

    pub fn is_derived(&self) -> bool {
        self.derived_from.is_some()
    }

    pub fn is_attempted(&self) -> bool {
        self.attempts > 0
    }

    /// Reporting only; never feeds back into theta.
    pub fn accuracy(&self) -> Option<f64> {
        if self.attempts == 0 {
            return None;
        }
        Some(self.correct_count as f64 / self.attempts as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEvent {
    pub question_id: String,
    pub chapter_key: String,
    pub is_correct: bool,
    pub time_taken_seconds: f64,
    pub item_params: ItemParams,
    pub answered_at: DateTime<Utc>,
    /// Cumulative session number the response belongs to.
    #[serde(default)]
    pub session_index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub chapter_key: String,
    pub item_params: ItemParams,
    #[serde(default)]
    pub difficulty_band: Option<DifficultyBand>,
    #[serde(default)]
    pub last_shown_at: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Question {
    pub fn band(&self) -> DifficultyBand {
        self.difficulty_band.unwrap_or_else(|| self.item_params.band())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterTaxonomyEntry {
    pub broad_key: String,
    pub specific_keys: Vec<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterWeight {
    pub subject: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// Static importance weights and subject membership, supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Curriculum {
    pub chapters: BTreeMap<String, ChapterWeight>,
    #[serde(default)]
    pub subject_weights: BTreeMap<String, f64>,
    /// Exploration-phase share per subject.
    #[serde(default)]
    pub subject_balance: BTreeMap<String, f64>,
}

impl Curriculum {
    pub fn with_chapter(mut self, chapter: &str, subject: &str, weight: f64) -> Self {
        self.chapters.insert(
            chapter.to_string(),
            ChapterWeight {
                subject: subject.to_string(),
                weight,
            },
        );
        self
    }

    pub fn subject_of(&self, chapter: &str) -> Option<&str> {
        self.chapters.get(chapter).map(|c| c.subject.as_str())
    }

    pub fn chapter_weight(&self, chapter: &str) -> Option<f64> {
        self.chapters.get(chapter).map(|c| c.weight)
    }

    pub fn subject_weight(&self, subject: &str) -> f64 {
        self.subject_weights.get(subject).copied().unwrap_or(1.0)
    }

    pub fn subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self.chapters.values().map(|c| c.subject.clone()).collect();
        subjects.sort();
        subjects.dedup();
        subjects
    }

    /// Balance weights normalised to sum to 1.0; subjects without an entry
    /// share equally when no balance is configured.
    pub fn normalized_balance(&self) -> BTreeMap<String, f64> {
        let subjects = self.subjects();
        let raw: BTreeMap<String, f64> = subjects
            .iter()
            .map(|s| {
                let w = if self.subject_balance.is_empty() {
                    1.0
                } else {
                    self.subject_balance.get(s).copied().unwrap_or(0.0)
                };
                (s.clone(), w.max(0.0))
            })
            .collect();
        let total: f64 = raw.values().sum();
        if total <= 0.0 {
            let n = subjects.len().max(1) as f64;
            return subjects.into_iter().map(|s| (s, 1.0 / n)).collect();
        }
        raw.into_iter().map(|(s, w)| (s, w / total)).collect()
    }

    pub fn validate(&self) -> EngineResult<()> {
        for (key, chapter) in &self.chapters {
            if !chapter.weight.is_finite() || chapter.weight < 0.0 {
                return Err(EngineError::Validation(format!(
                    "chapter {key} has invalid weight {}",
                    chapter.weight
                )));
            }
        }
        for (subject, weight) in self.subject_weights.iter().chain(self.subject_balance.iter()) {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(EngineError::Validation(format!(
                    "subject {subject} has invalid weight {weight}"
                )));
            }
        }
        Ok(())
    }
}
