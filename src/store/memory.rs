use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::FocusError,
    models::{Interruption, SessionRecord, UserProfile},
};

use super::{Feed, FeedEvent, RecordStore, TodayQuery, WatchRegistry};

#[derive(Default)]
struct MemoryState {
    records: Vec<SessionRecord>,
    profiles: HashMap<String, UserProfile>,
}

impl MemoryState {
    fn matching(&self, query: &TodayQuery) -> Vec<SessionRecord> {
        self.records
            .iter()
            .filter(|record| query.matches(record))
            .cloned()
            .collect()
    }
}

/// In-process record store. Every write is pushed synchronously to the open
/// feeds of the affected user.
///
/// Snapshots are taken and sent while the state lock is held, so feeds see
/// writes in the order they were applied.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    watchers: WatchRegistry,
    unavailable: Arc<AtomicBool>,
    queries: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `record`, replacing any record with the same id.
    pub fn upsert(&self, record: SessionRecord) {
        let user_id = record.user_id.clone();
        let mut state = self.lock();
        match state.records.iter_mut().find(|existing| existing.id == record.id) {
            Some(existing) => *existing = record,
            None => state.records.push(record),
        }
        self.publish(&state, &user_id);
    }

    /// Marks an unfinished session complete. Returns `false` for unknown ids.
    pub fn complete(&self, session_id: &str, end_time: DateTime<Utc>) -> bool {
        let mut state = self.lock();
        let Some(record) = state.records.iter_mut().find(|r| r.id == session_id) else {
            return false;
        };
        let minutes = record
            .start_time
            .map_or(0, |start| (end_time - start).num_minutes().max(0));
        record.end_time = Some(end_time);
        record.duration = Some(u32::try_from(minutes).unwrap_or(u32::MAX));
        record.completed = true;
        let user_id = record.user_id.clone();
        self.publish(&state, &user_id);
        true
    }

    pub fn add_interruption(&self, session_id: &str, interruption: Interruption) -> bool {
        let mut state = self.lock();
        let Some(record) = state.records.iter_mut().find(|r| r.id == session_id) else {
            return false;
        };
        record.interruptions.push(interruption);
        let user_id = record.user_id.clone();
        self.publish(&state, &user_id);
        true
    }

    pub fn set_profile(&self, profile: UserProfile) {
        self.lock().profiles.insert(profile.user_id.clone(), profile);
    }

    /// While unavailable, queries and new watches fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Pushes an error event to every open feed of `user_id`.
    pub fn fail_feeds(&self, user_id: &str, message: &str) {
        for (_, sender) in self.watchers.watchers_for(user_id) {
            let _ = sender.send(FeedEvent::Error(FocusError::UpstreamUnavailable(
                message.to_string(),
            )));
        }
    }

    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn watch_count(&self) -> u64 {
        self.watchers.opened_total()
    }

    pub fn open_feed_count(&self) -> usize {
        self.watchers.open_count()
    }

    fn publish(&self, state: &MemoryState, user_id: &str) {
        for (query, sender) in self.watchers.watchers_for(user_id) {
            let _ = sender.send(FeedEvent::Records(state.matching(&query)));
        }
    }

    fn check_available(&self) -> Result<(), FocusError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(FocusError::UpstreamUnavailable(
                "memory store marked unavailable".into(),
            ));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn query_today(
        &self,
        user_id: &str,
        day_start: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>, FocusError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.lock().matching(&TodayQuery::new(user_id, day_start)))
    }

    fn watch(&self, query: TodayQuery) -> Result<Feed, FocusError> {
        self.check_available()?;
        let state = self.lock();
        let (feed, sender) = self.watchers.open(query.clone());
        let _ = sender.send(FeedEvent::Records(state.matching(&query)));
        Ok(feed)
    }

    async fn user_profile(&self, user_id: &str) -> Result<Option<UserProfile>, FocusError> {
        self.check_available()?;
        Ok(self.lock().profiles.get(user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn query_filters_by_user_and_day() {
        let store = MemoryStore::new();
        let day_start = Utc::now() - Duration::hours(2);
        store.upsert(SessionRecord::completed("a", "u1", day_start, 10));
        store.upsert(SessionRecord::completed("b", "u1", day_start - Duration::hours(1), 10));
        store.upsert(SessionRecord::completed("c", "u2", day_start, 10));

        let records = store.query_today("u1", day_start).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "a");
        assert_eq!(store.query_count(), 1);
    }

    #[tokio::test]
    async fn writes_reach_open_feeds() {
        let store = MemoryStore::new();
        let day_start = Utc::now() - Duration::hours(2);
        let (mut events, _cancel) = store
            .watch(TodayQuery::new("u1", day_start))
            .unwrap()
            .into_parts();

        assert_eq!(events.recv().await, Some(FeedEvent::Records(Vec::new())));

        store.upsert(SessionRecord::in_progress("a", "u1", day_start));
        store.upsert(SessionRecord::in_progress("z", "u2", day_start));
        assert!(store.complete("a", day_start + Duration::minutes(25)));

        match events.recv().await {
            Some(FeedEvent::Records(records)) => assert!(!records[0].completed),
            other => panic!("unexpected event {other:?}"),
        }
        match events.recv().await {
            Some(FeedEvent::Records(records)) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].duration, Some(25));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unavailable_store_fails_queries_and_watches() {
        let store = MemoryStore::new();
        store.set_unavailable(true);

        assert!(matches!(
            store.query_today("u1", Utc::now()).await,
            Err(FocusError::UpstreamUnavailable(_))
        ));
        assert!(store.watch(TodayQuery::new("u1", Utc::now())).is_err());
        assert_eq!(store.watch_count(), 0);
    }

    #[test]
    fn concurrent_writers_end_on_latest_snapshot() {
        let store = MemoryStore::new();
        let day_start = Utc::now() - Duration::hours(2);
        let (mut events, _cancel) = store
            .watch(TodayQuery::new("u1", day_start))
            .unwrap()
            .into_parts();

        let writers: Vec<_> = (0..4)
            .map(|writer| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for n in 0..25 {
                        let id = format!("w{writer}-{n}");
                        store.upsert(SessionRecord::completed(id, "u1", day_start, 1));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let mut sizes = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                FeedEvent::Records(records) => sizes.push(records.len()),
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(sizes.len(), 101);
        assert!(sizes.windows(2).all(|pair| pair[0] < pair[1]), "{sizes:?}");
        assert_eq!(sizes.last(), Some(&100));
    }
}
