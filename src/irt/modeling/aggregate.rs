//! Chapter → subject → overall roll-up.
//!
//! subject θ = Σ(θ_i · w_i) / Σ(w_i) over attempted chapters only; overall θ
//! is the same combination over subjects. Results are recomputed from scratch
//! on every call.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::irt::error::{EngineError, EngineResult};
use crate::irt::types::{AbilityRecord, AbilitySnapshot, Curriculum, OVERALL_KEY};

pub const SUBJECT_KEY_PREFIX: &str = "subject:";

pub fn subject_key(subject: &str) -> String {
    format!("{SUBJECT_KEY_PREFIX}{subject}")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub subjects: BTreeMap<String, AbilityRecord>,
    pub overall: Option<AbilityRecord>,
}

impl AggregateResult {
    pub fn subject_theta(&self, subject: &str) -> Option<f64> {
        self.subjects.get(subject).map(|r| r.theta)
    }

    pub fn overall_theta(&self) -> Option<f64> {
        self.overall.as_ref().map(|r| r.theta)
    }

    /// Replaces every subject and overall entry in `snapshot` with this result.
    pub fn merge_into(&self, snapshot: &mut AbilitySnapshot) {
        snapshot.retain(|key, _| !key.starts_with(SUBJECT_KEY_PREFIX) && key != OVERALL_KEY);
        for (subject, record) in &self.subjects {
            snapshot.insert(subject_key(subject), record.clone());
        }
        if let Some(overall) = &self.overall {
            snapshot.insert(OVERALL_KEY.to_string(), overall.clone());
        }
    }
}

#[derive(Default)]
struct WeightedSum {
    theta: f64,
    se: f64,
    weight: f64,
    attempts: u32,
    correct: u32,
    last_attempt_at: Option<DateTime<Utc>>,
}

impl WeightedSum {
    fn add(&mut self, record: &AbilityRecord, weight: f64) {
        self.theta += record.theta * weight;
        self.se += record.standard_error * weight;
        self.weight += weight;
        self.attempts += record.attempts;
        self.correct += record.correct_count;
        self.last_attempt_at = self.last_attempt_at.max(record.last_attempt_at);
    }

    fn finish(self, key: String) -> Option<AbilityRecord> {
        if self.weight <= 0.0 || self.attempts == 0 {
            return None;
        }
        Some(AbilityRecord {
            key,
            theta: self.theta / self.weight,
            standard_error: self.se / self.weight,
            attempts: self.attempts,
            correct_count: self.correct,
            derived_from: None,
            last_attempt_at: self.last_attempt_at,
        })
    }
}

pub fn aggregate(chapter_estimates: &AbilitySnapshot, curriculum: &Curriculum) -> EngineResult<AggregateResult> {
    curriculum.validate()?;

    let mut by_subject: BTreeMap<String, WeightedSum> = BTreeMap::new();
    for (key, record) in chapter_estimates {
        if !record.is_attempted() || record.is_derived() {
            continue;
        }
        let Some(chapter) = curriculum.chapters.get(key) else {
            if !key.starts_with(SUBJECT_KEY_PREFIX) && key != OVERALL_KEY {
                tracing::debug!(chapter = %key, "chapter has no configured weight, excluded from aggregation");
            }
            continue;
        };
        if !record.theta.is_finite() || !record.standard_error.is_finite() {
            return Err(EngineError::Validation(format!(
                "chapter {key} has a non-finite estimate"
            )));
        }
        by_subject
            .entry(chapter.subject.clone())
            .or_default()
            .add(record, chapter.weight);
    }

    let subjects: BTreeMap<String, AbilityRecord> = by_subject
        .into_iter()
        .filter_map(|(subject, sum)| {
            let key = subject_key(&subject);
            sum.finish(key).map(|record| (subject, record))
        })
        .collect();

    let mut overall = WeightedSum::default();
    for (subject, record) in &subjects {
        overall.add(record, curriculum.subject_weight(subject));
    }

    Ok(AggregateResult {
        overall: overall.finish(OVERALL_KEY.to_string()),
        subjects,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, theta: f64, attempts: u32) -> AbilityRecord {
        AbilityRecord {
            attempts,
            correct_count: attempts / 2,
            ..AbilityRecord::new(key, theta, 0.4)
        }
    }

    fn curriculum() -> Curriculum {
        Curriculum::default()
            .with_chapter("kinematics", "physics", 2.0)
            .with_chapter("optics", "physics", 1.0)
            .with_chapter("organic", "chemistry", 1.0)
            .with_chapter("algebra", "maths", 1.0)
    }

    #[test]
    fn test_weighted_subject_theta() {
        let mut snapshot = AbilitySnapshot::new();
        snapshot.insert("kinematics".into(), record("kinematics", 1.0, 4));
        snapshot.insert("optics".into(), record("optics", -0.5, 2));
        let result = aggregate(&snapshot, &curriculum()).unwrap();
        let physics = result.subject_theta("physics").unwrap();
        assert!((physics - 0.5).abs() < 1e-12);
        assert_eq!(result.subjects["physics"].attempts, 6);
    }

    #[test]
    fn test_unattempted_chapters_excluded_not_zero_filled() {
        let mut snapshot = AbilitySnapshot::new();
        snapshot.insert("kinematics".into(), record("kinematics", 1.2, 3));
        snapshot.insert("optics".into(), record("optics", 0.0, 0));
        let result = aggregate(&snapshot, &curriculum()).unwrap();
        assert!((result.subject_theta("physics").unwrap() - 1.2).abs() < 1e-12);
        assert_eq!(result.subject_theta("chemistry"), None);
        assert!((result.overall_theta().unwrap() - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_empty_snapshot_has_no_overall() {
        let result = aggregate(&AbilitySnapshot::new(), &curriculum()).unwrap();
        assert!(result.subjects.is_empty());
        assert!(result.overall.is_none());
    }

    #[test]
    fn test_overall_uses_subject_weights() {
        let mut snapshot = AbilitySnapshot::new();
        snapshot.insert("kinematics".into(), record("kinematics", 1.0, 2));
        snapshot.insert("organic".into(), record("organic", -1.0, 2));
        let mut weights = curriculum();
        weights.subject_weights.insert("physics".into(), 3.0);
        let result = aggregate(&snapshot, &weights).unwrap();
        assert!((result.overall_theta().unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut snapshot = AbilitySnapshot::new();
        snapshot.insert("kinematics".into(), record("kinematics", 1.0, 2));
        let weights = curriculum();
        let first = aggregate(&snapshot, &weights).unwrap();
        first.merge_into(&mut snapshot);
        let second = aggregate(&snapshot, &weights).unwrap();
        assert_eq!(first, second);
        assert!(snapshot.contains_key("subject:physics"));
        assert!(snapshot.contains_key(OVERALL_KEY));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let weights = Curriculum::default().with_chapter("kinematics", "physics", -1.0);
        assert!(aggregate(&AbilitySnapshot::new(), &weights).is_err());
    }
}
