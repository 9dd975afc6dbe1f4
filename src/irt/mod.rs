//! Adaptive practice engine.
//!
//! - `modeling` - 3PL primitives, per-chapter θ estimator, subject/overall roll-up
//! - `taxonomy` - broad ↔ specific chapter resolution
//! - `decision` - exploration/exploitation selection, failure-streak breaker
//! - `memory` - review ladder for previously-correct questions
//! - `engine` - `IrtEngine`, one entry point over the above
//!
//! Everything here is synchronous and free of shared state. Callers own
//! persistence and must serialise grade-and-update per student.

pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod memory;
pub mod modeling;
pub mod taxonomy;
pub mod types;

pub use config::EngineConfig;
pub use engine::{GradeOutcome, IrtEngine};
pub use error::{EngineError, EngineResult, TaxonomyError};
pub use taxonomy::ChapterTaxonomy;
pub use types::*;
