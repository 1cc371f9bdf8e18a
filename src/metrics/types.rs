use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FocusError;

/// Point-in-time view of a user's focus time for the current day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_minutes: u64,
    pub display_value: String,
    /// Every record observed, including ones skipped as malformed.
    pub session_count: usize,
    pub completed_count: usize,
    pub ongoing_count: usize,
    pub interruption_count: usize,
    /// Evaluation time used for the elapsed minutes of unfinished sessions.
    pub computed_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    pub fn empty(computed_at: DateTime<Utc>) -> Self {
        Self {
            total_minutes: 0,
            display_value: format_focus_time(0),
            session_count: 0,
            completed_count: 0,
            ongoing_count: 0,
            interruption_count: 0,
            computed_at,
        }
    }
}

/// What a live subscriber receives for every feed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusUpdate {
    Metrics(MetricsSnapshot),
    Error(FocusError),
}

impl FocusUpdate {
    pub fn metrics(&self) -> Option<&MetricsSnapshot> {
        match self {
            FocusUpdate::Metrics(snapshot) => Some(snapshot),
            FocusUpdate::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, FocusUpdate::Error(_))
    }
}

pub fn format_focus_time(total_minutes: u64) -> String {
    format!("{}h {}m", total_minutes / 60, total_minutes % 60)
}
