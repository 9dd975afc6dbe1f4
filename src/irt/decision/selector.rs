//! Question selection over a point-in-time ability snapshot.
//!
//! Exploration spreads a session across subjects by balance weight and across
//! the least-attempted chapters inside each subject. Exploitation targets the
//! weakest chapters and ranks their questions by distance from θ (or by
//! information at θ). Due reviews are appended after chapter picks. Chapters
//! that cannot supply a question are reported as gaps.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::irt::config::{EstimatorConfig, RankingStrategy, SelectorConfig, MAX_INTERVAL_DAYS};
use crate::irt::decision::phase::SelectionPhase;
use crate::irt::memory::ReviewCandidate;
use crate::irt::modeling::aggregate::SUBJECT_KEY_PREFIX;
use crate::irt::modeling::irt::item_information;
use crate::irt::taxonomy::ChapterTaxonomy;
use crate::irt::types::{
    AbilitySnapshot, Curriculum, DifficultyBand, Question, OVERALL_KEY,
};

const UNASSIGNED_SUBJECT: &str = "unassigned";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionSource {
    Exploration,
    Target,
    Review,
    Recovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    NoActiveQuestions,
    AllRecentlySeen,
    Locked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedQuestion {
    pub question_id: String,
    pub chapter_key: String,
    pub subject: Option<String>,
    pub band: DifficultyBand,
    pub source: SelectionSource,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionGap {
    pub chapter_key: String,
    pub reason: GapReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionResult {
    pub phase: SelectionPhase,
    pub requested: usize,
    pub selected: Vec<SelectedQuestion>,
    pub gaps: Vec<SelectionGap>,
}

impl SelectionResult {
    pub fn is_short(&self) -> bool {
        self.selected.len() < self.requested
    }

    pub fn chapters(&self) -> BTreeSet<&str> {
        self.selected.iter().map(|s| s.chapter_key.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionConstraints {
    pub session_size: usize,
    #[serde(default)]
    pub target_chapters: Option<Vec<String>>,
    #[serde(default)]
    pub unlocked_chapters: Option<BTreeSet<String>>,
    /// Most recent first.
    #[serde(default)]
    pub recent_question_ids: Vec<String>,
    pub now: DateTime<Utc>,
    #[serde(default)]
    pub review_candidates: Vec<ReviewCandidate>,
}

impl SelectionConstraints {
    pub fn new(session_size: usize, now: DateTime<Utc>) -> Self {
        Self {
            session_size,
            target_chapters: None,
            unlocked_chapters: None,
            recent_question_ids: Vec::new(),
            now,
            review_candidates: Vec::new(),
        }
    }
}

/// Static inputs shared by every selection call.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub config: &'a SelectorConfig,
    pub estimator: &'a EstimatorConfig,
    pub curriculum: &'a Curriculum,
    pub taxonomy: &'a ChapterTaxonomy,
}

pub(crate) struct Eligibility<'a> {
    recent: HashSet<&'a str>,
    unlocked: Option<&'a BTreeSet<String>>,
    taxonomy: &'a ChapterTaxonomy,
    now: DateTime<Utc>,
    freshness: Duration,
}

impl<'a> Eligibility<'a> {
    pub(crate) fn new(
        constraints: &'a SelectionConstraints,
        config: &SelectorConfig,
        taxonomy: &'a ChapterTaxonomy,
    ) -> Self {
        Self {
            recent: constraints
                .recent_question_ids
                .iter()
                .take(config.recent_window)
                .map(String::as_str)
                .collect(),
            unlocked: constraints.unlocked_chapters.as_ref(),
            taxonomy,
            now: constraints.now,
            freshness: Duration::days(config.freshness_days.clamp(0, MAX_INTERVAL_DAYS)),
        }
    }

    pub(crate) fn chapter_open(&self, chapter: &str) -> bool {
        self.taxonomy.is_schedulable(chapter)
            && self.unlocked.map_or(true, |set| set.contains(chapter))
    }

    pub(crate) fn recently_seen(&self, question_id: &str) -> bool {
        self.recent.contains(question_id)
    }

    pub(crate) fn is_fresh(&self, question: &Question) -> bool {
        if self.recently_seen(&question.id) {
            return false;
        }
        match question.last_shown_at {
            Some(shown) => self.now - shown >= self.freshness,
            None => true,
        }
    }
}

#[derive(Default)]
pub(crate) struct ChapterPool<'a> {
    pub(crate) active: usize,
    pub(crate) eligible: Vec<&'a Question>,
}

pub(crate) fn index_pool<'a>(pool: &'a [Question], eligibility: &Eligibility<'_>) -> BTreeMap<&'a str, ChapterPool<'a>> {
    let mut chapters: BTreeMap<&str, ChapterPool<'_>> = BTreeMap::new();
    for question in pool {
        if !question.active {
            continue;
        }
        if let Err(err) = question.item_params.validate() {
            tracing::debug!(question = %question.id, error = %err, "skipping question with malformed parameters");
            continue;
        }
        let entry = chapters.entry(question.chapter_key.as_str()).or_default();
        entry.active += 1;
        if eligibility.chapter_open(&question.chapter_key) && eligibility.is_fresh(question) {
            entry.eligible.push(question);
        }
    }
    chapters
}

fn gap_reason(chapter: &str, pools: &BTreeMap<&str, ChapterPool<'_>>, eligibility: &Eligibility<'_>) -> Option<GapReason> {
    if !eligibility.chapter_open(chapter) {
        return Some(GapReason::Locked);
    }
    match pools.get(chapter) {
        None => Some(GapReason::NoActiveQuestions),
        Some(p) if p.active == 0 => Some(GapReason::NoActiveQuestions),
        Some(p) if p.eligible.is_empty() => Some(GapReason::AllRecentlySeen),
        Some(_) => None,
    }
}

/// Ranks candidates for one chapter. Ties go to higher discrimination, then id.
pub(crate) fn rank_candidates(candidates: &mut [&Question], theta: f64, ranking: RankingStrategy) -> Vec<f64> {
    let tie_break = |x: &Question, y: &Question| {
        y.item_params
            .discrimination
            .total_cmp(&x.item_params.discrimination)
            .then_with(|| x.id.cmp(&y.id))
    };
    match ranking {
        RankingStrategy::DifficultyDistance => {
            let distance = |q: &Question| (q.item_params.difficulty - theta).abs();
            candidates.sort_by(|x, y| distance(*x).total_cmp(&distance(*y)).then_with(|| tie_break(*x, *y)));
            candidates.iter().map(|q| -distance(*q)).collect()
        }
        RankingStrategy::FisherInformation => {
            let info = |q: &Question| item_information(theta, &q.item_params);
            candidates.sort_by(|x, y| info(*y).total_cmp(&info(*x)).then_with(|| tie_break(*x, *y)));
            candidates.iter().map(|q| info(*q)).collect()
        }
    }
}

struct ChapterQueue<'a> {
    chapter: String,
    subject: Option<String>,
    attempts: u32,
    ranked: Vec<(&'a Question, f64)>,
    cursor: usize,
}

impl<'a> ChapterQueue<'a> {
    fn new(
        chapter: &str,
        mut candidates: Vec<&'a Question>,
        theta: f64,
        attempts: u32,
        ranking: RankingStrategy,
        curriculum: &Curriculum,
    ) -> Self {
        let scores = rank_candidates(&mut candidates, theta, ranking);
        Self {
            chapter: chapter.to_string(),
            subject: curriculum.subject_of(chapter).map(str::to_string),
            attempts,
            ranked: candidates.into_iter().zip(scores).collect(),
            cursor: 0,
        }
    }

    fn next(&mut self, taken: &HashSet<String>) -> Option<(&'a Question, f64)> {
        while let Some(&(question, score)) = self.ranked.get(self.cursor) {
            self.cursor += 1;
            if !taken.contains(&question.id) {
                return Some((question, score));
            }
        }
        None
    }

    fn has_more(&self) -> bool {
        self.cursor < self.ranked.len()
    }
}

struct Picker {
    selected: Vec<SelectedQuestion>,
    taken: HashSet<String>,
}

impl Picker {
    fn new() -> Self {
        Self {
            selected: Vec::new(),
            taken: HashSet::new(),
        }
    }

    fn push(&mut self, question: &Question, subject: Option<String>, source: SelectionSource, score: f64) {
        self.taken.insert(question.id.clone());
        self.selected.push(SelectedQuestion {
            question_id: question.id.clone(),
            chapter_key: question.chapter_key.clone(),
            subject,
            band: question.band(),
            source,
            score,
        });
    }

    /// One pick per queue per round, in queue order, until `limit` picks.
    fn round_robin(&mut self, queues: &mut [&mut ChapterQueue<'_>], limit: usize, source: SelectionSource) -> usize {
        let mut taken = 0;
        while taken < limit {
            let mut progressed = false;
            for queue in queues.iter_mut() {
                if taken == limit {
                    break;
                }
                if let Some((question, score)) = queue.next(&self.taken) {
                    let subject = queue.subject.clone();
                    self.push(question, subject, source, score);
                    taken += 1;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        taken
    }
}

/// Largest-remainder apportionment of `total` slots by weight.
fn apportion(weights: &[(String, f64)], total: usize) -> Vec<(String, usize)> {
    let sum: f64 = weights.iter().map(|(_, w)| w.max(0.0)).sum();
    let normalized: Vec<(String, f64)> = if sum <= 0.0 {
        let n = weights.len().max(1) as f64;
        weights.iter().map(|(s, _)| (s.clone(), 1.0 / n)).collect()
    } else {
        weights.iter().map(|(s, w)| (s.clone(), w.max(0.0) / sum)).collect()
    };

    let mut shares: Vec<(String, usize, f64, f64)> = normalized
        .iter()
        .map(|(s, w)| {
            let exact = w * total as f64;
            (s.clone(), exact.floor() as usize, exact - exact.floor(), *w)
        })
        .collect();
    let assigned: usize = shares.iter().map(|s| s.1).sum();
    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|&i, &j| {
        shares[j]
            .2
            .total_cmp(&shares[i].2)
            .then_with(|| shares[j].3.total_cmp(&shares[i].3))
            .then_with(|| shares[i].0.cmp(&shares[j].0))
    });
    for &i in order.iter().take(total.saturating_sub(assigned)) {
        shares[i].1 += 1;
    }
    shares.into_iter().map(|(s, n, _, _)| (s, n)).collect()
}

fn is_chapter_key(key: &str) -> bool {
    key != OVERALL_KEY && !key.starts_with(SUBJECT_KEY_PREFIX)
}

/// Explicit targets with broad chapters replaced by their specific chapters.
fn explicit_targets(targets: &[String], taxonomy: &ChapterTaxonomy) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for target in targets {
        let expanded: Vec<String> = if taxonomy.is_broad_chapter(target) {
            taxonomy.get_specific_chapters(target).to_vec()
        } else {
            vec![target.clone()]
        };
        for key in expanded {
            if seen.insert(key.clone()) {
                out.push(key);
            }
        }
    }
    out
}

fn known_chapters<'a>(
    snapshot: &'a AbilitySnapshot,
    pools: &BTreeMap<&'a str, ChapterPool<'a>>,
    curriculum: &'a Curriculum,
) -> BTreeSet<&'a str> {
    curriculum
        .chapters
        .keys()
        .map(String::as_str)
        .chain(pools.keys().copied())
        .chain(snapshot.keys().map(String::as_str).filter(|k| is_chapter_key(k)))
        .collect()
}

fn weakest_chapters(
    snapshot: &AbilitySnapshot,
    eligibility: &Eligibility<'_>,
    max: usize,
) -> Vec<String> {
    let mut estimated: Vec<(&str, f64)> = snapshot
        .iter()
        .filter(|(key, record)| {
            is_chapter_key(key)
                && eligibility.chapter_open(key)
                && (record.is_attempted() || record.is_derived())
        })
        .map(|(key, record)| (key.as_str(), record.theta))
        .collect();
    estimated.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    estimated.into_iter().take(max).map(|(k, _)| k.to_string()).collect()
}

pub fn select_questions(
    snapshot: &AbilitySnapshot,
    pool: &[Question],
    phase: SelectionPhase,
    constraints: &SelectionConstraints,
    ctx: &SelectionContext<'_>,
) -> SelectionResult {
    let eligibility = Eligibility::new(constraints, ctx.config, ctx.taxonomy);
    let pools = index_pool(pool, &eligibility);

    let reviews_available = constraints
        .review_candidates
        .iter()
        .filter(|r| review_eligible(r, pool, &eligibility))
        .count();
    let reserved = reviews_available
        .min(ctx.config.review_slots)
        .min(constraints.session_size);
    let chapter_slots = constraints.session_size - reserved;

    let mut picker = Picker::new();
    let mut gaps = Vec::new();

    match phase {
        SelectionPhase::Exploration => {
            explore(snapshot, &pools, &eligibility, constraints, ctx, chapter_slots, &mut picker, &mut gaps)
        }
        SelectionPhase::Exploitation => {
            exploit(snapshot, &pools, &eligibility, constraints, ctx, chapter_slots, &mut picker, &mut gaps)
        }
    }

    let review_room = constraints.session_size.saturating_sub(picker.selected.len());
    append_reviews(&mut picker, constraints, pool, &eligibility, ctx.curriculum, review_room);

    for gap in &gaps {
        tracing::debug!(chapter = %gap.chapter_key, reason = ?gap.reason, "no eligible questions for chapter");
    }

    SelectionResult {
        phase,
        requested: constraints.session_size,
        selected: picker.selected,
        gaps,
    }
}

#[allow(clippy::too_many_arguments)]
fn explore<'a>(
    snapshot: &AbilitySnapshot,
    pools: &BTreeMap<&'a str, ChapterPool<'a>>,
    eligibility: &Eligibility<'_>,
    constraints: &SelectionConstraints,
    ctx: &SelectionContext<'_>,
    slots: usize,
    picker: &mut Picker,
    gaps: &mut Vec<SelectionGap>,
) {
    let chapters: Vec<String> = match &constraints.target_chapters {
        Some(targets) => explicit_targets(targets, ctx.taxonomy),
        None => known_chapters(snapshot, pools, ctx.curriculum)
            .into_iter()
            .filter(|c| eligibility.chapter_open(c))
            .map(str::to_string)
            .collect(),
    };

    let mut by_subject: BTreeMap<String, Vec<ChapterQueue<'a>>> = BTreeMap::new();
    for chapter in &chapters {
        if let Some(reason) = gap_reason(chapter, pools, eligibility) {
            gaps.push(SelectionGap {
                chapter_key: chapter.clone(),
                reason,
            });
            continue;
        }
        let Some(chapter_pool) = pools.get(chapter.as_str()) else {
            continue;
        };
        let record = snapshot.get(chapter);
        let theta = record.map_or(ctx.estimator.initial_theta, |r| r.theta);
        let attempts = record.map_or(0, |r| r.attempts);
        let queue = ChapterQueue::new(
            chapter,
            chapter_pool.eligible.clone(),
            theta,
            attempts,
            RankingStrategy::DifficultyDistance,
            ctx.curriculum,
        );
        let subject = queue
            .subject
            .clone()
            .unwrap_or_else(|| UNASSIGNED_SUBJECT.to_string());
        by_subject.entry(subject).or_default().push(queue);
    }
    for queues in by_subject.values_mut() {
        queues.sort_by(|a, b| a.attempts.cmp(&b.attempts).then_with(|| a.chapter.cmp(&b.chapter)));
    }

    let balance = ctx.curriculum.normalized_balance();
    let weights: Vec<(String, f64)> = by_subject
        .keys()
        .map(|s| (s.clone(), balance.get(s).copied().unwrap_or(0.0)))
        .collect();

    for (subject, quota) in apportion(&weights, slots) {
        if let Some(queues) = by_subject.get_mut(&subject) {
            let mut refs: Vec<&mut ChapterQueue<'a>> = queues.iter_mut().collect();
            picker.round_robin(&mut refs, quota, SelectionSource::Exploration);
        }
    }

    // Subjects that ran dry hand their share to whatever is left.
    let remaining = slots.saturating_sub(picker.selected.len());
    if remaining > 0 {
        let mut leftovers: Vec<&mut ChapterQueue<'a>> = by_subject
            .values_mut()
            .flat_map(|queues| queues.iter_mut())
            .filter(|q| q.has_more())
            .collect();
        leftovers.sort_by(|a, b| a.attempts.cmp(&b.attempts).then_with(|| a.chapter.cmp(&b.chapter)));
        picker.round_robin(&mut leftovers, remaining, SelectionSource::Exploration);
    }

    for selected in &mut picker.selected {
        if let Some(record) = snapshot.get(&selected.chapter_key) {
            selected.score = 1.0 / (1.0 + record.attempts as f64);
        } else {
            selected.score = 1.0;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn exploit<'a>(
    snapshot: &AbilitySnapshot,
    pools: &BTreeMap<&'a str, ChapterPool<'a>>,
    eligibility: &Eligibility<'_>,
    constraints: &SelectionConstraints,
    ctx: &SelectionContext<'_>,
    slots: usize,
    picker: &mut Picker,
    gaps: &mut Vec<SelectionGap>,
) {
    let mut targets = match &constraints.target_chapters {
        Some(targets) => explicit_targets(targets, ctx.taxonomy),
        None => weakest_chapters(snapshot, eligibility, ctx.config.max_target_chapters),
    };
    if targets.is_empty() && constraints.target_chapters.is_none() {
        targets = known_chapters(snapshot, pools, ctx.curriculum)
            .into_iter()
            .filter(|c| eligibility.chapter_open(c))
            .take(ctx.config.max_target_chapters)
            .map(str::to_string)
            .collect();
    }

    let mut queues = Vec::with_capacity(targets.len());
    for chapter in &targets {
        if let Some(reason) = gap_reason(chapter, pools, eligibility) {
            gaps.push(SelectionGap {
                chapter_key: chapter.clone(),
                reason,
            });
            continue;
        }
        let Some(chapter_pool) = pools.get(chapter.as_str()) else {
            continue;
        };
        let record = snapshot.get(chapter);
        let theta = record.map_or(ctx.estimator.initial_theta, |r| r.theta);
        let attempts = record.map_or(0, |r| r.attempts);
        queues.push(ChapterQueue::new(
            chapter,
            chapter_pool.eligible.clone(),
            theta,
            attempts,
            ctx.config.ranking,
            ctx.curriculum,
        ));
    }

    let mut refs: Vec<&mut ChapterQueue<'a>> = queues.iter_mut().collect();
    picker.round_robin(&mut refs, slots, SelectionSource::Target);
}

fn review_eligible(review: &ReviewCandidate, pool: &[Question], eligibility: &Eligibility<'_>) -> bool {
    if eligibility.recently_seen(&review.question_id) || !eligibility.chapter_open(&review.chapter_key) {
        return false;
    }
    pool.iter()
        .any(|q| q.id == review.question_id && q.active && q.item_params.validate().is_ok())
}

fn append_reviews(
    picker: &mut Picker,
    constraints: &SelectionConstraints,
    pool: &[Question],
    eligibility: &Eligibility<'_>,
    curriculum: &Curriculum,
    room: usize,
) {
    let mut added = 0;
    for review in &constraints.review_candidates {
        if added == room {
            break;
        }
        if picker.taken.contains(&review.question_id) || !review_eligible(review, pool, eligibility) {
            continue;
        }
        let Some(question) = pool.iter().find(|q| q.id == review.question_id) else {
            continue;
        };
        let subject = curriculum.subject_of(&question.chapter_key).map(str::to_string);
        picker.push(question, subject, SelectionSource::Review, review.overdue_days);
        added += 1;
    }
}
