use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::irt::types::ResponseEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum SelectionPhase {
    #[default]
    Exploration,
    Exploitation,
}

impl SelectionPhase {
    pub fn for_sessions(completed_sessions: u32, threshold: u32) -> Self {
        if completed_sessions < threshold {
            Self::Exploration
        } else {
            Self::Exploitation
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exploration => "exploration",
            Self::Exploitation => "exploitation",
        }
    }
}

/// Distinct sessions in the log before the latest one; the latest session is
/// the one in progress.
pub fn completed_sessions(events: &[ResponseEvent]) -> u32 {
    let sessions: BTreeSet<u32> = events.iter().map(|e| e.session_index).collect();
    sessions.len().saturating_sub(1) as u32
}
