//! Benchmark suite for adaptive-irt
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use adaptive_irt::irt::decision::{SelectionConstraints, SelectionPhase};
use adaptive_irt::irt::{
    AbilityRecord, AbilitySnapshot, Curriculum, EngineConfig, IrtEngine, ItemParams, Question,
    ResponseEvent,
};
use chrono::{TimeZone, Utc};

fn engine() -> IrtEngine {
    let mut curriculum = Curriculum::default();
    for subject in ["physics", "chemistry", "math"] {
        for i in 0..10 {
            curriculum = curriculum.with_chapter(&format!("{subject}-{i}"), subject, 1.0);
        }
    }
    IrtEngine::new(EngineConfig::default(), curriculum, &[]).unwrap()
}

fn pool(engine: &IrtEngine) -> Vec<Question> {
    engine
        .curriculum()
        .chapters
        .keys()
        .flat_map(|chapter| {
            (0..20).map(move |i| Question {
                id: format!("{chapter}-q{i}"),
                chapter_key: chapter.clone(),
                item_params: ItemParams::new(0.5 + (i % 5) as f64 * 0.3, -2.5 + i as f64 * 0.25, 0.25),
                difficulty_band: None,
                last_shown_at: None,
                active: true,
            })
        })
        .collect()
}

fn bench_grade(c: &mut Criterion) {
    let engine = engine();
    let event = ResponseEvent {
        question_id: "physics-0-q3".into(),
        chapter_key: "physics-0".into(),
        is_correct: true,
        time_taken_seconds: 30.0,
        item_params: ItemParams::new(1.2, 0.3, 0.25),
        answered_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        session_index: 1,
    };
    c.bench_function("IrtEngine::grade", |b| {
        b.iter(|| {
            let mut snapshot = AbilitySnapshot::new();
            engine.grade(&mut snapshot, black_box(&event)).unwrap()
        })
    });
}

fn bench_select(c: &mut Criterion) {
    let engine = engine();
    let pool = pool(&engine);
    let mut snapshot = AbilitySnapshot::new();
    for (i, chapter) in engine.curriculum().chapters.keys().enumerate() {
        snapshot.insert(
            chapter.clone(),
            AbilityRecord {
                attempts: 5,
                ..AbilityRecord::new(chapter.as_str(), -1.5 + (i % 7) as f64 * 0.4, 0.4)
            },
        );
    }
    let constraints = SelectionConstraints::new(20, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

    c.bench_function("select_questions/exploration", |b| {
        b.iter(|| engine.select_questions(black_box(&snapshot), &pool, SelectionPhase::Exploration, &constraints))
    });
    c.bench_function("select_questions/exploitation", |b| {
        b.iter(|| engine.select_questions(black_box(&snapshot), &pool, SelectionPhase::Exploitation, &constraints))
    });
}

criterion_group!(benches, bench_grade, bench_select);
criterion_main!(benches);
