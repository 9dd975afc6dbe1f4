pub mod aggregate;
pub mod estimator;
pub mod irt;

pub use aggregate::{aggregate, subject_key, AggregateResult};
pub use estimator::{
    apply_response, initial_record, replay, update_ability, AbilityUpdate, EstimationState,
};
pub use irt::{
    expected_score, fisher_information, item_information, item_probability, probability,
    LOGISTIC_SCALE,
};
