//! Review ladder for previously-correct questions.
//!
//! A first correct answer enters the question at the bottom rung. Each correct
//! answer given once the review is due climbs one rung; the top rung repeats.
//! Any incorrect answer drops the question back to the bottom rung. Questions
//! never answered correctly are not tracked.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::irt::config::{ReviewConfig, MAX_INTERVAL_DAYS};
use crate::irt::types::ResponseEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEntry {
    pub question_id: String,
    pub chapter_key: String,
    pub stage: usize,
    pub last_reviewed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub lapses: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCandidate {
    pub question_id: String,
    pub chapter_key: String,
    pub stage: usize,
    pub overdue_days: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewSchedule {
    entries: BTreeMap<String, ReviewEntry>,
}

fn interval(config: &ReviewConfig, stage: usize) -> Duration {
    let days = config
        .ladder_days
        .get(stage)
        .or_else(|| config.ladder_days.last())
        .copied()
        .unwrap_or(1);
    Duration::days(days.clamp(1, MAX_INTERVAL_DAYS))
}

impl ReviewSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the schedule from a response log in answer order.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a ResponseEvent>, config: &ReviewConfig) -> Self {
        let mut ordered: Vec<&ResponseEvent> = events.into_iter().collect();
        ordered.sort_by_key(|e| e.answered_at);

        let mut schedule = Self::new();
        for event in ordered {
            schedule.record(event, config);
        }
        schedule
    }

    pub fn record(&mut self, event: &ResponseEvent, config: &ReviewConfig) {
        let top = config.ladder_days.len().saturating_sub(1);
        let at = event.answered_at;

        match self.entries.get_mut(&event.question_id) {
            Some(entry) if event.is_correct => {
                if at >= entry.due_at {
                    entry.stage = (entry.stage + 1).min(top);
                    entry.due_at = at + interval(config, entry.stage);
                }
                entry.last_reviewed_at = at;
            }
            Some(entry) => {
                entry.stage = 0;
                entry.lapses += 1;
                entry.last_reviewed_at = at;
                entry.due_at = at + interval(config, 0);
            }
            None if event.is_correct => {
                self.entries.insert(
                    event.question_id.clone(),
                    ReviewEntry {
                        question_id: event.question_id.clone(),
                        chapter_key: event.chapter_key.clone(),
                        stage: 0,
                        last_reviewed_at: at,
                        due_at: at + interval(config, 0),
                        lapses: 0,
                    },
                );
            }
            None => {}
        }
    }

    pub fn get(&self, question_id: &str) -> Option<&ReviewEntry> {
        self.entries.get(question_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most overdue first, then question id.
    pub fn due_for_review(&self, now: DateTime<Utc>, max: usize) -> Vec<ReviewCandidate> {
        let mut due: Vec<ReviewCandidate> = self
            .entries
            .values()
            .filter(|e| e.due_at <= now)
            .map(|e| ReviewCandidate {
                question_id: e.question_id.clone(),
                chapter_key: e.chapter_key.clone(),
                stage: e.stage,
                overdue_days: (now - e.due_at).num_seconds() as f64 / 86_400.0,
            })
            .collect();
        due.sort_by(|a, b| {
            b.overdue_days
                .partial_cmp(&a.overdue_days)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.question_id.cmp(&b.question_id))
        });
        due.truncate(max);
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irt::types::ItemParams;
    use chrono::TimeZone;

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap() + Duration::days(n)
    }

    fn answer(id: &str, correct: bool, at: DateTime<Utc>) -> ResponseEvent {
        ResponseEvent {
            question_id: id.into(),
            chapter_key: "kinematics".into(),
            is_correct: correct,
            time_taken_seconds: 30.0,
            item_params: ItemParams::new(1.0, 0.0, 0.25),
            answered_at: at,
            session_index: 0,
        }
    }

    #[test]
    fn test_incorrect_first_answer_not_tracked() {
        let config = ReviewConfig::default();
        let schedule = ReviewSchedule::from_events(&[answer("q1", false, day(0))], &config);
        assert!(schedule.is_empty());
    }

    #[test]
    fn test_ladder_climbs_on_due_reviews() {
        let config = ReviewConfig::default();
        let events = vec![
            answer("q1", true, day(0)),
            answer("q1", true, day(1)),
            answer("q1", true, day(4)),
        ];
        let schedule = ReviewSchedule::from_events(&events, &config);
        let entry = schedule.get("q1").unwrap();
        assert_eq!(entry.stage, 2);
        assert_eq!(entry.due_at, day(11));
    }

    #[test]
    fn test_early_correct_does_not_climb() {
        let config = ReviewConfig::default();
        let events = vec![answer("q1", true, day(0)), answer("q1", true, day(0))];
        let schedule = ReviewSchedule::from_events(&events, &config);
        assert_eq!(schedule.get("q1").unwrap().stage, 0);
    }

    #[test]
    fn test_incorrect_resets_to_shortest_interval() {
        let config = ReviewConfig::default();
        let events = vec![
            answer("q1", true, day(0)),
            answer("q1", true, day(1)),
            answer("q1", true, day(4)),
            answer("q1", false, day(11)),
        ];
        let schedule = ReviewSchedule::from_events(&events, &config);
        let entry = schedule.get("q1").unwrap();
        assert_eq!(entry.stage, 0);
        assert_eq!(entry.lapses, 1);
        assert_eq!(entry.due_at, day(12));
    }

    #[test]
    fn test_top_rung_repeats() {
        let config = ReviewConfig::default();
        let mut events = vec![answer("q1", true, day(0))];
        let mut t = 0;
        for gap in [1, 3, 7, 14, 30, 30] {
            t += gap;
            events.push(answer("q1", true, day(t)));
        }
        let schedule = ReviewSchedule::from_events(&events, &config);
        assert_eq!(schedule.get("q1").unwrap().stage, 4);
    }

    #[test]
    fn test_oversized_rung_is_capped() {
        let config = ReviewConfig {
            ladder_days: vec![1, 200_000_000_000],
            max_due: 5,
        };
        let events = vec![answer("q1", true, day(0)), answer("q1", true, day(1))];
        let schedule = ReviewSchedule::from_events(&events, &config);
        let entry = schedule.get("q1").unwrap();
        assert_eq!(entry.stage, 1);
        assert_eq!(entry.due_at, day(1 + MAX_INTERVAL_DAYS));
        assert!(schedule.due_for_review(day(400), 5).is_empty());
    }

    #[test]
    fn test_due_ordering() {
        let config = ReviewConfig::default();
        let events = vec![
            answer("q2", true, day(0)),
            answer("q1", true, day(0)),
            answer("q3", true, day(2)),
            answer("q4", true, day(5)),
        ];
        let schedule = ReviewSchedule::from_events(&events, &config);
        let due = schedule.due_for_review(day(4), 10);
        let ids: Vec<&str> = due.iter().map(|c| c.question_id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "q2", "q3"]);
        assert_eq!(schedule.due_for_review(day(4), 1).len(), 1);
    }
}
