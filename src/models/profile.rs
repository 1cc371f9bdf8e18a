use serde::{Deserialize, Serialize};

/// Per-user dashboard attributes kept next to the session records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub daily_goal_hours: Option<u32>,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub focus_score: u32,
    pub peak_performance_time: Option<String>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }
}
