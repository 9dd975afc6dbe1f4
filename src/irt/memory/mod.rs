//! Review scheduling for previously-correct questions.

pub mod review;

pub use review::{ReviewCandidate, ReviewEntry, ReviewSchedule};
