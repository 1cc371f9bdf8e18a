use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    db::Database,
    error::FocusError,
    models::{Interruption, SessionRecord, UserProfile},
};

use super::{Feed, FeedEvent, RecordStore, TodayQuery, WatchRegistry};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Record store persisted in SQLite. Writes made through this handle are
/// pushed to open feeds of the affected user.
#[derive(Clone)]
pub struct SqliteSessionStore {
    db: Database,
    watchers: WatchRegistry,
    // Held across query + send so a newer snapshot never lands before an older one.
    publish_lock: Arc<Mutex<()>>,
}

impl SqliteSessionStore {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        Ok(Self::from_database(Database::new(db_path)?))
    }

    pub fn from_database(db: Database) -> Self {
        Self {
            db,
            watchers: WatchRegistry::new(),
            publish_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn open_feed_count(&self) -> usize {
        self.watchers.open_count()
    }

    pub async fn insert_session(&self, session: &SessionRecord) -> Result<()> {
        self.db.insert_session(session).await?;
        self.publish(&session.user_id).await;
        Ok(())
    }

    pub async fn start_session(
        &self,
        user_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<SessionRecord> {
        let session = SessionRecord::in_progress(Uuid::new_v4().to_string(), user_id, start_time);
        self.insert_session(&session).await?;
        Ok(session)
    }

    pub async fn complete_session(&self, session_id: &str, end_time: DateTime<Utc>) -> Result<()> {
        let user_id = self.db.complete_session(session_id, end_time).await?;
        self.publish(&user_id).await;
        Ok(())
    }

    pub async fn record_interruption(
        &self,
        session_id: &str,
        interruption: Interruption,
    ) -> Result<()> {
        let user_id = self.db.append_interruption(session_id, interruption).await?;
        self.publish(&user_id).await;
        Ok(())
    }

    pub async fn upsert_user_profile(&self, profile: &UserProfile) -> Result<()> {
        self.db.upsert_user_profile(profile).await
    }

    async fn publish(&self, user_id: &str) {
        let _guard = self.publish_lock.lock().await;
        for (query, sender) in self.watchers.watchers_for(user_id) {
            let event = load_event(&self.db, &query).await;
            if sender.send(event).is_err() {
                log_debug!("feed for {} closed before delivery", user_id);
            }
        }
    }
}

async fn load_event(db: &Database, query: &TodayQuery) -> FeedEvent {
    match db.sessions_since(&query.user_id, query.day_start).await {
        Ok(records) => FeedEvent::Records(records),
        Err(err) => {
            log_warn!("feed query for {} failed: {err:#}", query.user_id);
            FeedEvent::Error(FocusError::upstream(err))
        }
    }
}

#[async_trait]
impl RecordStore for SqliteSessionStore {
    async fn query_today(
        &self,
        user_id: &str,
        day_start: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>, FocusError> {
        self.db
            .sessions_since(user_id, day_start)
            .await
            .map_err(FocusError::upstream)
    }

    fn watch(&self, query: TodayQuery) -> Result<Feed, FocusError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|err| {
            FocusError::UpstreamUnavailable(format!("no async runtime for feed: {err}"))
        })?;

        let (feed, sender) = self.watchers.open(query.clone());
        let db = self.db.clone();
        let publish_lock = self.publish_lock.clone();
        runtime.spawn(async move {
            let _guard = publish_lock.lock().await;
            let _ = sender.send(load_event(&db, &query).await);
        });

        Ok(feed)
    }

    async fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>, FocusError> {
        self.db
            .get_user_profile(user_id)
            .await
            .map_err(FocusError::upstream)
    }
}
