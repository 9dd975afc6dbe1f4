use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid item parameter {field}: {value}")]
    InvalidItemParameters { field: &'static str, value: f64 },
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaxonomyError {
    #[error("specific chapter {specific} under {broad} is itself a broad chapter")]
    NestedBroad { broad: String, specific: String },
    #[error("broad chapter {0} lists itself as a specific chapter")]
    SelfReference(String),
    #[error("broad chapter {broad} has invalid weight {weight}")]
    InvalidWeight { broad: String, weight: f64 },
    #[error("broad chapter {0} is defined more than once")]
    DuplicateBroad(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
