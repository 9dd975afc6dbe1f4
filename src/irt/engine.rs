use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::irt::config::EngineConfig;
use crate::irt::decision::{
    self, BreakerStatus, RecoveryBundleSpec, RecoveryFill, SelectionConstraints, SelectionContext,
    SelectionPhase, SelectionResult,
};
use crate::irt::error::EngineResult;
use crate::irt::memory::{ReviewCandidate, ReviewSchedule};
use crate::irt::modeling::{self, AbilityUpdate, AggregateResult};
use crate::irt::taxonomy::ChapterTaxonomy;
use crate::irt::types::{
    AbilityRecord, AbilitySnapshot, ChapterTaxonomyEntry, Curriculum, Question, ResponseEvent,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeOutcome {
    pub update: AbilityUpdate,
    pub aggregate: AggregateResult,
}

/// Bundles the static inputs (tunables, curriculum weights, taxonomy) so
/// callers do not have to thread them through every call. Holds no
/// per-student state; every method is a pure function of its arguments.
#[derive(Debug, Clone)]
pub struct IrtEngine {
    config: EngineConfig,
    curriculum: Curriculum,
    taxonomy: ChapterTaxonomy,
}

impl IrtEngine {
    pub fn new(
        config: EngineConfig,
        curriculum: Curriculum,
        taxonomy: &[ChapterTaxonomyEntry],
    ) -> EngineResult<Self> {
        let taxonomy = ChapterTaxonomy::from_entries(taxonomy)?;
        Self::with_taxonomy(config, curriculum, taxonomy)
    }

    pub fn with_taxonomy(
        config: EngineConfig,
        curriculum: Curriculum,
        taxonomy: ChapterTaxonomy,
    ) -> EngineResult<Self> {
        config.validate()?;
        curriculum.validate()?;
        Ok(Self {
            config,
            curriculum,
            taxonomy,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn curriculum(&self) -> &Curriculum {
        &self.curriculum
    }

    pub fn taxonomy(&self) -> &ChapterTaxonomy {
        &self.taxonomy
    }

    pub fn update_ability(
        &self,
        current: Option<&AbilityRecord>,
        event: &ResponseEvent,
    ) -> EngineResult<AbilityUpdate> {
        modeling::update_ability(current, event, &self.config.estimator)
    }

    /// Updates the chapter record and recomputes subject and overall records.
    /// `snapshot` is only written once every step has succeeded.
    pub fn grade(&self, snapshot: &mut AbilitySnapshot, event: &ResponseEvent) -> EngineResult<GradeOutcome> {
        let mut next = snapshot.clone();
        let update = modeling::apply_response(&mut next, event, &self.config.estimator)?;
        let aggregate = modeling::aggregate(&next, &self.curriculum)?;
        aggregate.merge_into(&mut next);
        *snapshot = next;

        tracing::debug!(
            chapter = %event.chapter_key,
            theta = update.record.theta,
            se = update.record.standard_error,
            state = ?update.state,
            "ability updated"
        );
        Ok(GradeOutcome { update, aggregate })
    }

    pub fn aggregate(&self, chapter_estimates: &AbilitySnapshot) -> EngineResult<AggregateResult> {
        modeling::aggregate(chapter_estimates, &self.curriculum)
    }

    pub fn expand_broad_chapters(&self, estimates: &AbilitySnapshot) -> AbilitySnapshot {
        self.taxonomy.expand_broad_chapters(estimates)
    }

    pub fn phase_for(&self, completed_sessions: u32) -> SelectionPhase {
        SelectionPhase::for_sessions(
            completed_sessions,
            self.config.selector.exploration_session_threshold,
        )
    }

    /// Selects from the broad-expanded view of `snapshot`; `snapshot` itself is
    /// left as is.
    pub fn select_questions(
        &self,
        snapshot: &AbilitySnapshot,
        pool: &[Question],
        phase: SelectionPhase,
        constraints: &SelectionConstraints,
    ) -> SelectionResult {
        let expanded = self.taxonomy.expand_broad_chapters(snapshot);
        decision::select_questions(&expanded, pool, phase, constraints, &self.selection_context())
    }

    pub fn check_circuit_breaker(&self, recent: &[ResponseEvent], snapshot: &AbilitySnapshot) -> BreakerStatus {
        let expanded = self.taxonomy.expand_broad_chapters(snapshot);
        decision::check_circuit_breaker(
            recent,
            &expanded,
            &self.taxonomy,
            &self.config.breaker,
            &self.config.estimator,
        )
    }

    pub fn fill_recovery_bundle(
        &self,
        spec: &RecoveryBundleSpec,
        pool: &[Question],
        constraints: &SelectionConstraints,
    ) -> RecoveryFill {
        decision::fill_recovery_bundle(
            spec,
            pool,
            constraints,
            &self.config.selector,
            &self.curriculum,
            &self.taxonomy,
        )
    }

    pub fn review_schedule(&self, events: &[ResponseEvent]) -> ReviewSchedule {
        ReviewSchedule::from_events(events, &self.config.review)
    }

    pub fn due_reviews(&self, events: &[ResponseEvent], now: DateTime<Utc>) -> Vec<ReviewCandidate> {
        self.review_schedule(events)
            .due_for_review(now, self.config.review.max_due)
    }

    fn selection_context(&self) -> SelectionContext<'_> {
        SelectionContext {
            config: &self.config.selector,
            estimator: &self.config.estimator,
            curriculum: &self.curriculum,
            taxonomy: &self.taxonomy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irt::error::EngineError;
    use crate::irt::types::{ItemParams, OVERALL_KEY};
    use chrono::TimeZone;

    fn engine() -> IrtEngine {
        let curriculum = Curriculum::default()
            .with_chapter("kinematics", "physics", 1.0)
            .with_chapter("organic", "chemistry", 1.0);
        IrtEngine::new(EngineConfig::default(), curriculum, &[]).unwrap()
    }

    fn event(chapter: &str, correct: bool, item: ItemParams) -> ResponseEvent {
        ResponseEvent {
            question_id: "q1".into(),
            chapter_key: chapter.into(),
            is_correct: correct,
            time_taken_seconds: 20.0,
            item_params: item,
            answered_at: Utc.with_ymd_and_hms(2024, 2, 2, 10, 0, 0).unwrap(),
            session_index: 1,
        }
    }

    #[test]
    fn test_grade_updates_chapter_and_rollups() {
        let engine = engine();
        let mut snapshot = AbilitySnapshot::new();
        let outcome = engine
            .grade(&mut snapshot, &event("kinematics", true, ItemParams::new(1.5, 0.0, 0.25)))
            .unwrap();
        assert!(outcome.update.record.theta > 0.0);
        assert!(snapshot.contains_key("kinematics"));
        assert!(snapshot.contains_key("subject:physics"));
        assert!(!snapshot.contains_key("subject:chemistry"));
        assert!((snapshot[OVERALL_KEY].theta - snapshot["kinematics"].theta).abs() < 1e-12);
    }

    #[test]
    fn test_grade_rejects_without_mutation() {
        let engine = engine();
        let mut snapshot = AbilitySnapshot::new();
        engine
            .grade(&mut snapshot, &event("kinematics", true, ItemParams::new(1.0, 0.0, 0.25)))
            .unwrap();
        let before = snapshot.clone();
        let err = engine
            .grade(&mut snapshot, &event("kinematics", true, ItemParams::new(-0.5, 0.0, 0.25)))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidItemParameters { .. }));
        assert_eq!(snapshot, before);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.estimator.learning_rate = 0.0;
        assert!(IrtEngine::new(config, Curriculum::default(), &[]).is_err());
    }

    #[test]
    fn test_phase_for() {
        let engine = engine();
        assert_eq!(engine.phase_for(3), SelectionPhase::Exploration);
        assert_eq!(engine.phase_for(14), SelectionPhase::Exploitation);
    }
}
