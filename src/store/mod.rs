//! Seam to the external record store: one-shot queries, live feeds and
//! profile lookups, plus two implementations.

mod feed;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::{
    error::FocusError,
    models::{SessionRecord, UserProfile},
};

pub use feed::{Feed, FeedCancel, FeedEvent, WatchRegistry};
pub use memory::MemoryStore;
pub use sqlite::SqliteSessionStore;

/// Records of one user whose start falls on or after `day_start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodayQuery {
    pub user_id: String,
    pub day_start: DateTime<Utc>,
}

impl TodayQuery {
    pub fn new(user_id: impl Into<String>, day_start: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            day_start,
        }
    }

    /// Query for the local calendar day containing `now`.
    pub fn today(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(user_id, local_day_start(now))
    }

    pub fn matches(&self, record: &SessionRecord) -> bool {
        record.user_id == self.user_id
            && record
                .start_time
                .map_or(false, |start| start >= self.day_start)
    }
}

/// Local midnight of the day containing `now`, as UTC.
pub fn local_day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = now
        .with_timezone(&Local)
        .date_naive()
        .and_time(NaiveTime::MIN);

    resolve_day_start(midnight, now, |local| {
        Local
            .from_local_datetime(&local)
            .earliest()
            .map(|start| start.with_timezone(&Utc))
    })
}

// A DST jump can skip midnight; the day then starts an hour later.
fn resolve_day_start<F>(midnight: NaiveDateTime, now: DateTime<Utc>, resolve: F) -> DateTime<Utc>
where
    F: Fn(NaiveDateTime) -> Option<DateTime<Utc>>,
{
    resolve(midnight)
        .or_else(|| resolve(midnight + Duration::hours(1)))
        .unwrap_or(now)
}

#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Records for `user_id` that started at or after `day_start`.
    async fn query_today(
        &self,
        user_id: &str,
        day_start: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>, FocusError>;

    /// Opens a live feed for `query`. The first event carries the records
    /// matching at registration time; later events follow every change.
    fn watch(&self, query: TodayQuery) -> Result<Feed, FocusError>;

    async fn user_profile(&self, _user_id: &str) -> Result<Option<UserProfile>, FocusError> {
        Ok(None)
    }
}
