pub mod breaker;
pub mod phase;
pub mod selector;

pub use breaker::{
    check_circuit_breaker, consecutive_failures, fill_recovery_bundle, BandRequest, BreakerStatus,
    RecoveryBundleSpec, RecoveryFill,
};
pub use phase::{completed_sessions, SelectionPhase};
pub use selector::{
    select_questions, GapReason, SelectedQuestion, SelectionConstraints, SelectionContext,
    SelectionGap, SelectionResult, SelectionSource,
};
