//! Per-chapter ability estimator.
//!
//! Each graded response moves θ by `η · (y - P(θ)) · a` and shrinks the
//! standard error by a fixed factor toward its floor. The first response on a
//! chapter starts from the configured prior (θ = 0, SE = 0.6).

use serde::{Deserialize, Serialize};

use crate::irt::config::EstimatorConfig;
use crate::irt::error::{EngineError, EngineResult};
use crate::irt::modeling::aggregate::SUBJECT_KEY_PREFIX;
use crate::irt::modeling::irt::item_probability;
use crate::irt::types::{AbilityRecord, AbilitySnapshot, ResponseEvent, OVERALL_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimationState {
    Unseen,
    Estimating,
    Confident,
}

impl EstimationState {
    pub fn of(record: Option<&AbilityRecord>, config: &EstimatorConfig) -> Self {
        match record {
            None => Self::Unseen,
            Some(r) if r.attempts == 0 && !r.is_derived() => Self::Unseen,
            Some(r) if r.standard_error <= config.confidence_threshold => Self::Confident,
            Some(_) => Self::Estimating,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbilityUpdate {
    pub record: AbilityRecord,
    pub probability: f64,
    pub delta: f64,
    pub state: EstimationState,
}

pub fn initial_record(key: &str, config: &EstimatorConfig) -> AbilityRecord {
    AbilityRecord::new(key, config.initial_theta, config.initial_se)
}

fn validate_event(event: &ResponseEvent) -> EngineResult<()> {
    event.item_params.validate()?;
    if event.chapter_key.is_empty() {
        return Err(EngineError::Validation("response has an empty chapter key".into()));
    }
    // Subject and overall records are owned by the aggregator.
    if event.chapter_key == OVERALL_KEY || event.chapter_key.starts_with(SUBJECT_KEY_PREFIX) {
        return Err(EngineError::Validation(format!(
            "response targets aggregate key {}",
            event.chapter_key
        )));
    }
    if !event.time_taken_seconds.is_finite() || event.time_taken_seconds < 0.0 {
        return Err(EngineError::Validation(format!(
            "time taken must be a non-negative number, got {}",
            event.time_taken_seconds
        )));
    }
    Ok(())
}

fn validate_record(record: &AbilityRecord, event: &ResponseEvent, config: &EstimatorConfig) -> EngineResult<()> {
    if record.key != event.chapter_key {
        return Err(EngineError::Validation(format!(
            "record {} does not match response chapter {}",
            record.key, event.chapter_key
        )));
    }
    if !record.theta.is_finite() || record.theta < config.theta_min || record.theta > config.theta_max {
        return Err(EngineError::Validation(format!(
            "record {} has out-of-range theta {}",
            record.key, record.theta
        )));
    }
    if !record.standard_error.is_finite()
        || record.standard_error < config.se_floor
        || record.standard_error > config.se_ceiling
    {
        return Err(EngineError::Validation(format!(
            "record {} has out-of-range standard error {}",
            record.key, record.standard_error
        )));
    }
    Ok(())
}

/// Computes the next chapter record. The input is never touched; on error
/// the caller keeps its prior state.
pub fn update_ability(
    current: Option<&AbilityRecord>,
    event: &ResponseEvent,
    config: &EstimatorConfig,
) -> EngineResult<AbilityUpdate> {
    validate_event(event)?;
    if let Some(record) = current {
        validate_record(record, event, config)?;
    }

    let mut record = match current {
        Some(r) => r.clone(),
        None => initial_record(&event.chapter_key, config),
    };
    // A synthesized estimate becomes an observed one once answered directly.
    record.derived_from = None;

    let item = &event.item_params;
    let p = item_probability(record.theta, item);
    let y = if event.is_correct { 1.0 } else { 0.0 };
    let delta = config.learning_rate * (y - p) * item.discrimination;

    record.theta = (record.theta + delta).clamp(config.theta_min, config.theta_max);
    record.standard_error =
        (record.standard_error * config.se_decay).clamp(config.se_floor, config.se_ceiling);
    record.attempts += 1;
    if event.is_correct {
        record.correct_count += 1;
    }
    record.last_attempt_at = Some(event.answered_at);

    let state = EstimationState::of(Some(&record), config);
    Ok(AbilityUpdate {
        record,
        probability: p,
        delta,
        state,
    })
}

/// Applies one response to the chapter entry of a snapshot.
pub fn apply_response(
    snapshot: &mut AbilitySnapshot,
    event: &ResponseEvent,
    config: &EstimatorConfig,
) -> EngineResult<AbilityUpdate> {
    let update = update_ability(snapshot.get(&event.chapter_key), event, config)?;
    snapshot.insert(event.chapter_key.clone(), update.record.clone());
    Ok(update)
}

/// Folds a response sequence over a copy of `start`.
pub fn replay<'a>(
    start: &AbilitySnapshot,
    events: impl IntoIterator<Item = &'a ResponseEvent>,
    config: &EstimatorConfig,
) -> EngineResult<AbilitySnapshot> {
    let mut snapshot = start.clone();
    for event in events {
        apply_response(&mut snapshot, event, config)?;
    }
    Ok(snapshot)
}
