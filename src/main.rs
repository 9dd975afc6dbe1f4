use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use adaptive_irt::config::{self, Config, ConfigError};
use adaptive_irt::irt::decision::{
    completed_sessions, BreakerStatus, RecoveryFill, SelectedQuestion, SelectionConstraints, SelectionPhase, SelectionResult,
};
use adaptive_irt::irt::memory::ReviewCandidate;
use adaptive_irt::irt::modeling::{expected_score, AggregateResult};
use adaptive_irt::irt::{AbilitySnapshot, EngineError, IrtEngine, Question, ResponseEvent};
use adaptive_irt::logging;

const DEFAULT_SESSION_SIZE: usize = 10;

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to read stdin: {0}")]
    Stdin(#[from] std::io::Error),
    #[error("invalid input: {0}")]
    Input(#[from] serde_json::Error),
}

/// Student history plus the pool to select from.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionInput {
    #[serde(default)]
    events: Vec<ResponseEvent>,
    #[serde(default)]
    questions: Vec<Question>,
    #[serde(default)]
    completed_sessions: Option<u32>,
    #[serde(default)]
    session_size: Option<usize>,
    #[serde(default)]
    target_chapters: Option<Vec<String>>,
    #[serde(default)]
    now: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionReport {
    phase: SelectionPhase,
    rejected_events: usize,
    snapshot: AbilitySnapshot,
    aggregate: AggregateResult,
    breaker: BreakerStatus,
    due_reviews: Vec<ReviewCandidate>,
    selection: Option<SelectionResult>,
    recovery: Option<RecoveryFill>,
    /// Mean predicted success over the served questions at overall θ.
    expected_success: Option<f64>,
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config.log_level);

    let input_path = std::env::args().nth(1).map(PathBuf::from);
    let report = match run(&config, input_path) {
        Ok(report) => report,
        Err(err) => {
            tracing::error!(error = %err, "session report failed");
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&report) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to serialise report");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &Config, input_path: Option<PathBuf>) -> Result<SessionReport, RunError> {
    let engine = IrtEngine::new(
        config.load_engine_config()?,
        config.load_curriculum()?,
        &config.load_taxonomy()?,
    )?;
    let input: SessionInput = match input_path {
        Some(path) => config::load_json(&path)?,
        None => {
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw)?;
            serde_json::from_str(&raw)?
        }
    };

    let mut events = input.events;
    events.sort_by_key(|e| (e.session_index, e.answered_at));

    let mut snapshot = AbilitySnapshot::new();
    let mut rejected_events = 0;
    for event in &events {
        if let Err(err) = engine.grade(&mut snapshot, event) {
            rejected_events += 1;
            tracing::warn!(question = %event.question_id, error = %err, "response rejected");
        }
    }
    let aggregate = engine.aggregate(&snapshot)?;

    let now = input
        .now
        .or_else(|| events.last().map(|e| e.answered_at))
        .unwrap_or_else(Utc::now);
    let finished_sessions = input
        .completed_sessions
        .unwrap_or_else(|| completed_sessions(&events));
    let phase = engine.phase_for(finished_sessions);
    let breaker = engine.check_circuit_breaker(&events, &snapshot);
    let due_reviews = engine.due_reviews(&events, now);

    let mut constraints = SelectionConstraints::new(input.session_size.unwrap_or(DEFAULT_SESSION_SIZE), now);
    constraints.target_chapters = input.target_chapters;
    constraints.recent_question_ids = events
        .iter()
        .rev()
        .take(engine.config().selector.recent_window)
        .map(|e| e.question_id.clone())
        .collect();
    constraints.review_candidates = due_reviews.clone();

    let (selection, recovery) = match (breaker.should_trigger, breaker.recovery_bundle.as_ref()) {
        (true, Some(bundle)) => {
            tracing::info!(
                failures = breaker.consecutive_failures,
                items = bundle.total_items(),
                "serving recovery bundle"
            );
            (None, Some(engine.fill_recovery_bundle(bundle, &input.questions, &constraints)))
        }
        _ => (
            Some(engine.select_questions(&snapshot, &input.questions, phase, &constraints)),
            None,
        ),
    };

    let served: &[SelectedQuestion] = match (&selection, &recovery) {
        (Some(result), _) => &result.selected,
        (None, Some(fill)) => &fill.selected,
        (None, None) => &[],
    };
    let overall_theta = aggregate
        .overall_theta()
        .unwrap_or(engine.config().estimator.initial_theta);
    let expected_success = expected_score(
        overall_theta,
        served
            .iter()
            .filter_map(|s| input.questions.iter().find(|q| q.id == s.question_id))
            .map(|q| &q.item_params),
    );

    tracing::info!(
        phase = phase.as_str(),
        events = events.len(),
        rejected = rejected_events,
        chapters = snapshot.len(),
        "session report ready"
    );

    Ok(SessionReport {
        phase,
        rejected_events,
        snapshot,
        aggregate,
        breaker,
        due_reviews,
        selection,
        recovery,
        expected_success,
    })
}
