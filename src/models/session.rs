use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Interruption {
    pub occurred_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A focus session as stored by the record store.
///
/// `duration` is in whole minutes and only meaningful once `completed` is set.
/// An unfinished session has no `end_time`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<u32>,
    pub completed: bool,
    #[serde(default)]
    pub interruptions: Vec<Interruption>,
}

impl SessionRecord {
    pub fn completed(
        id: impl Into<String>,
        user_id: impl Into<String>,
        start_time: DateTime<Utc>,
        duration: u32,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            start_time: Some(start_time),
            end_time: Some(start_time + chrono::Duration::minutes(i64::from(duration))),
            duration: Some(duration),
            completed: true,
            interruptions: Vec::new(),
        }
    }

    pub fn in_progress(
        id: impl Into<String>,
        user_id: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            start_time: Some(start_time),
            end_time: None,
            duration: None,
            completed: false,
            interruptions: Vec::new(),
        }
    }

    pub fn is_ongoing(&self) -> bool {
        !self.completed && self.start_time.is_some() && self.end_time.is_none()
    }
}
