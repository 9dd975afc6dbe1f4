pub mod config;
pub mod irt;
pub mod logging;

pub use config::{Config, ConfigError};
pub use irt::decision::{
    BreakerStatus, RecoveryBundleSpec, SelectionConstraints, SelectionPhase, SelectionResult,
};
pub use irt::{
    AbilityRecord, AbilitySnapshot, ChapterTaxonomy, ChapterTaxonomyEntry, Curriculum,
    EngineConfig, EngineError, EngineResult, IrtEngine, ItemParams, Question, ResponseEvent,
};
