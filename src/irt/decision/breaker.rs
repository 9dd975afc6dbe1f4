//! Failure-streak circuit breaker.
//!
//! Status is recomputed from the response log on every call. The log is
//! replayed in session order: a streak of incorrect answers trips the breaker
//! once it reaches the global threshold (counted inside the rolling window)
//! or the in-session threshold. After tripping in session `s` no new trip can
//! happen until session `s + cooldown_sessions + 1`. The breaker stays open
//! until the next correct answer or the end of the session it tripped in.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::irt::config::{BreakerConfig, EstimatorConfig, RankingStrategy, SelectorConfig};
use crate::irt::decision::selector::{
    index_pool, rank_candidates, Eligibility, SelectedQuestion, SelectionConstraints, SelectionSource,
};
use crate::irt::modeling::aggregate::SUBJECT_KEY_PREFIX;
use crate::irt::modeling::irt::{item_probability, probability};
use crate::irt::taxonomy::ChapterTaxonomy;
use crate::irt::types::{
    AbilitySnapshot, Curriculum, DifficultyBand, Question, ResponseEvent, MULTIPLE_CHOICE_GUESSING,
    OVERALL_KEY, THETA_MAX, THETA_MIN,
};

const BAND_SHIFT_STEP: f64 = 0.5;
const MAX_BAND_SHIFTS: usize = 6;
const REFERENCE_DISCRIMINATION: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BandRequest {
    pub chapter_key: String,
    pub band: DifficultyBand,
    pub count: usize,
    pub min_difficulty: f64,
    pub max_difficulty: f64,
}

impl BandRequest {
    pub fn midpoint(&self) -> f64 {
        (self.min_difficulty + self.max_difficulty) / 2.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryBundleSpec {
    pub weak_chapters: Vec<String>,
    pub requests: Vec<BandRequest>,
    pub review_question_id: Option<String>,
    /// Mean predicted success of the items in the failing run.
    pub failing_run_success_rate: f64,
    /// Mean predicted success of the requested bands.
    pub target_success_rate: f64,
}

impl RecoveryBundleSpec {
    pub fn total_items(&self) -> usize {
        self.requests.iter().map(|r| r.count).sum::<usize>() + usize::from(self.review_question_id.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStatus {
    pub should_trigger: bool,
    pub consecutive_failures: u32,
    pub session_failures: u32,
    pub in_cooldown: bool,
    pub last_triggered_session: Option<u32>,
    pub recovery_bundle: Option<RecoveryBundleSpec>,
}

/// Consecutive incorrect answers counted back from the latest response.
pub fn consecutive_failures(events: &[ResponseEvent]) -> u32 {
    events.iter().rev().take_while(|e| !e.is_correct).count() as u32
}

pub fn check_circuit_breaker(
    recent: &[ResponseEvent],
    snapshot: &AbilitySnapshot,
    taxonomy: &ChapterTaxonomy,
    config: &BreakerConfig,
    estimator: &EstimatorConfig,
) -> BreakerStatus {
    let mut ordered: Vec<&ResponseEvent> = recent.iter().collect();
    ordered.sort_by_key(|e| (e.session_index, e.answered_at));

    let mut streak = 0u32;
    let mut session_streak = 0u32;
    let mut current_session: Option<u32> = None;
    let mut last_fire: Option<u32> = None;
    let mut open = false;
    let mut streak_start = 0usize;

    for (idx, event) in ordered.iter().enumerate() {
        if current_session != Some(event.session_index) {
            current_session = Some(event.session_index);
            session_streak = 0;
            open = false;
        }
        if event.is_correct {
            streak = 0;
            session_streak = 0;
            open = false;
            streak_start = idx + 1;
            continue;
        }

        streak += 1;
        session_streak += 1;
        let windowed = streak.min(config.window as u32);
        let tripped = windowed >= config.global_threshold || session_streak >= config.session_threshold;
        if !tripped || open {
            continue;
        }

        let suppressed = last_fire.is_some_and(|s| event.session_index <= s + config.cooldown_sessions);
        if suppressed {
            tracing::debug!(
                session = event.session_index,
                streak,
                "breaker condition met during cooldown, suppressed"
            );
            continue;
        }
        last_fire = Some(event.session_index);
        open = true;
    }

    let last_session = current_session.unwrap_or(0);
    let in_cooldown = last_fire
        .is_some_and(|s| last_session > s && last_session <= s + config.cooldown_sessions);
    let consecutive = streak.min(config.window as u32);

    let recovery_bundle = if open {
        let failing_run: Vec<&ResponseEvent> = ordered[streak_start..].to_vec();
        tracing::info!(
            consecutive_failures = streak,
            session = last_session,
            "failure streak tripped circuit breaker"
        );
        Some(build_recovery_bundle(&ordered, &failing_run, snapshot, taxonomy, config, estimator))
    } else {
        None
    };

    BreakerStatus {
        should_trigger: open,
        consecutive_failures: consecutive,
        session_failures: session_streak,
        in_cooldown,
        last_triggered_session: last_fire,
        recovery_bundle,
    }
}

fn theta_for(chapter: &str, snapshot: &AbilitySnapshot, estimator: &EstimatorConfig) -> f64 {
    snapshot
        .get(chapter)
        .map_or(estimator.initial_theta, |r| r.theta)
}

fn weak_chapters(
    failing_run: &[&ResponseEvent],
    snapshot: &AbilitySnapshot,
    taxonomy: &ChapterTaxonomy,
    limit: usize,
) -> Vec<String> {
    let mut estimated: Vec<(&str, f64)> = snapshot
        .iter()
        .filter(|(key, record)| {
            key.as_str() != OVERALL_KEY
                && !key.starts_with(SUBJECT_KEY_PREFIX)
                && taxonomy.is_schedulable(key)
                && (record.is_attempted() || record.is_derived())
        })
        .map(|(key, record)| (key.as_str(), record.theta))
        .collect();
    estimated.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    let mut chapters: Vec<String> = estimated
        .into_iter()
        .take(limit)
        .map(|(k, _)| k.to_string())
        .collect();

    if chapters.is_empty() {
        let mut seen = HashSet::new();
        for event in failing_run.iter().rev() {
            if chapters.len() == limit {
                break;
            }
            if taxonomy.is_schedulable(&event.chapter_key) && seen.insert(event.chapter_key.as_str()) {
                chapters.push(event.chapter_key.clone());
            }
        }
    }
    chapters
}

fn split(total: usize, parts: usize) -> Vec<usize> {
    if parts == 0 {
        return Vec::new();
    }
    (0..parts)
        .map(|i| total / parts + usize::from(i < total % parts))
        .collect()
}

fn band_request(chapter: &str, band: DifficultyBand, count: usize, theta: f64, offset: (f64, f64), shift: f64) -> BandRequest {
    let lo = (theta + offset.0 - shift).clamp(THETA_MIN, THETA_MAX);
    let hi = (theta + offset.1 - shift).clamp(THETA_MIN, THETA_MAX);
    BandRequest {
        chapter_key: chapter.to_string(),
        band,
        count,
        min_difficulty: lo.min(hi),
        max_difficulty: hi.max(lo),
    }
}

fn target_rate(requests: &[BandRequest], snapshot: &AbilitySnapshot, estimator: &EstimatorConfig) -> f64 {
    let mut total = 0.0;
    let mut count = 0usize;
    for request in requests {
        let theta = theta_for(&request.chapter_key, snapshot, estimator);
        let p = probability(theta, REFERENCE_DISCRIMINATION, request.midpoint(), MULTIPLE_CHOICE_GUESSING);
        total += p * request.count as f64;
        count += request.count;
    }
    if count == 0 {
        return 0.0;
    }
    total / count as f64
}

fn build_recovery_bundle(
    history: &[&ResponseEvent],
    failing_run: &[&ResponseEvent],
    snapshot: &AbilitySnapshot,
    taxonomy: &ChapterTaxonomy,
    config: &BreakerConfig,
    estimator: &EstimatorConfig,
) -> RecoveryBundleSpec {
    let chapters = weak_chapters(failing_run, snapshot, taxonomy, config.weak_chapters.max(1));

    let failing_rate = if failing_run.is_empty() {
        0.0
    } else {
        failing_run
            .iter()
            .map(|e| item_probability(theta_for(&e.chapter_key, snapshot, estimator), &e.item_params))
            .sum::<f64>()
            / failing_run.len() as f64
    };

    let easy_split = split(config.easy_count, chapters.len());
    let medium_split = split(config.medium_count, chapters.len());
    let build = |shift: f64| -> Vec<BandRequest> {
        let mut requests = Vec::new();
        for (i, chapter) in chapters.iter().enumerate() {
            let theta = theta_for(chapter, snapshot, estimator);
            if easy_split[i] > 0 {
                requests.push(band_request(chapter, DifficultyBand::Easy, easy_split[i], theta, config.easy_band_offset, shift));
            }
            if medium_split[i] > 0 {
                requests.push(band_request(chapter, DifficultyBand::Medium, medium_split[i], theta, config.medium_band_offset, shift));
            }
        }
        requests
    };

    // Shift the bands easier until the bundle clearly beats the failing run.
    let mut requests = build(0.0);
    let mut target = target_rate(&requests, snapshot, estimator);
    let mut shifts = 0;
    while target < failing_rate + config.min_success_gain && shifts < MAX_BAND_SHIFTS {
        shifts += 1;
        requests = build(shifts as f64 * BAND_SHIFT_STEP);
        target = target_rate(&requests, snapshot, estimator);
    }
    if target < failing_rate + config.min_success_gain {
        tracing::warn!(target_success = target, failing_rate, "recovery bundle could not reach the requested success margin");
    }

    let review_question_id = history
        .iter()
        .rev()
        .find(|e| e.is_correct)
        .map(|e| e.question_id.clone());

    RecoveryBundleSpec {
        weak_chapters: chapters,
        requests,
        review_question_id,
        failing_run_success_rate: failing_rate,
        target_success_rate: target,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryFill {
    pub selected: Vec<SelectedQuestion>,
    pub shortfall: usize,
}

/// Resolves a recovery bundle against the question pool. Band requests honour the
/// usual freshness and lock rules; the review item only has to be active.
pub fn fill_recovery_bundle(
    spec: &RecoveryBundleSpec,
    pool: &[Question],
    constraints: &SelectionConstraints,
    config: &SelectorConfig,
    curriculum: &Curriculum,
    taxonomy: &ChapterTaxonomy,
) -> RecoveryFill {
    let eligibility = Eligibility::new(constraints, config, taxonomy);
    let pools = index_pool(pool, &eligibility);
    let mut taken: HashSet<String> = HashSet::new();
    let mut selected = Vec::new();
    let mut shortfall = 0;

    for request in &spec.requests {
        let mut candidates: Vec<&Question> = pools
            .get(request.chapter_key.as_str())
            .map(|p| {
                p.eligible
                    .iter()
                    .copied()
                    .filter(|q| {
                        let b = q.item_params.difficulty;
                        b >= request.min_difficulty && b <= request.max_difficulty && !taken.contains(&q.id)
                    })
                    .collect()
            })
            .unwrap_or_default();
        let scores = rank_candidates(&mut candidates, request.midpoint(), RankingStrategy::DifficultyDistance);
        let picked = candidates.len().min(request.count);
        shortfall += request.count - picked;
        for (question, score) in candidates.into_iter().zip(scores).take(picked) {
            taken.insert(question.id.clone());
            selected.push(SelectedQuestion {
                question_id: question.id.clone(),
                chapter_key: question.chapter_key.clone(),
                subject: curriculum.subject_of(&question.chapter_key).map(str::to_string),
                band: question.band(),
                source: SelectionSource::Recovery,
                score,
            });
        }
    }

    if let Some(review_id) = &spec.review_question_id {
        match pool.iter().find(|q| &q.id == review_id && q.active && !taken.contains(&q.id)) {
            Some(question) => selected.push(SelectedQuestion {
                question_id: question.id.clone(),
                chapter_key: question.chapter_key.clone(),
                subject: curriculum.subject_of(&question.chapter_key).map(str::to_string),
                band: question.band(),
                source: SelectionSource::Review,
                score: 0.0,
            }),
            None => shortfall += 1,
        }
    }

    RecoveryFill { selected, shortfall }
}
