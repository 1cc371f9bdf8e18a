use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::mpsc;

use crate::{error::FocusError, models::SessionRecord};

use super::TodayQuery;

/// One push from a store's change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Full set of records currently matching the watched query.
    Records(Vec<SessionRecord>),
    Error(FocusError),
}

/// Releases a store-side watcher. Runs at most once; dropping it cancels too.
pub struct FeedCancel(Option<Box<dyn FnOnce() + Send + 'static>>);

impl FeedCancel {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(cancel)))
    }

    pub fn cancel(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(cancel) = self.0.take() {
            cancel();
        }
    }
}

impl Drop for FeedCancel {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for FeedCancel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedCancel")
            .field("pending", &self.0.is_some())
            .finish()
    }
}

/// Receiving end of a live query plus the means to close it.
#[derive(Debug)]
pub struct Feed {
    events: mpsc::UnboundedReceiver<FeedEvent>,
    cancel: FeedCancel,
}

impl Feed {
    pub fn new(events: mpsc::UnboundedReceiver<FeedEvent>, cancel: FeedCancel) -> Self {
        Self { events, cancel }
    }

    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<FeedEvent>, FeedCancel) {
        (self.events, self.cancel)
    }
}

struct Watcher {
    query: TodayQuery,
    sender: mpsc::UnboundedSender<FeedEvent>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    opened: u64,
    watchers: HashMap<u64, Watcher>,
}

/// Bookkeeping shared by store implementations for their open feeds.
#[derive(Clone, Default)]
pub struct WatchRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a watcher. The returned sender feeds the new watcher only,
    /// for delivering its initial snapshot.
    pub fn open(&self, query: TodayQuery) -> (Feed, mpsc::UnboundedSender<FeedEvent>) {
        let (sender, events) = mpsc::unbounded_channel();
        let initial_sender = sender.clone();

        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.opened += 1;
            inner.watchers.insert(id, Watcher { query, sender });
            id
        };

        let registry = Arc::downgrade(&self.inner);
        let cancel = FeedCancel::new(move || {
            if let Some(inner) = registry.upgrade() {
                inner
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .watchers
                    .remove(&id);
            }
        });

        (Feed::new(events, cancel), initial_sender)
    }

    /// Queries and senders of every open watcher for `user_id`.
    pub fn watchers_for(
        &self,
        user_id: &str,
    ) -> Vec<(TodayQuery, mpsc::UnboundedSender<FeedEvent>)> {
        let mut inner = self.lock();
        inner.watchers.retain(|_, watcher| !watcher.sender.is_closed());
        inner
            .watchers
            .values()
            .filter(|watcher| watcher.query.user_id == user_id)
            .map(|watcher| (watcher.query.clone(), watcher.sender.clone()))
            .collect()
    }

    /// Watchers currently registered.
    pub fn open_count(&self) -> usize {
        self.lock().watchers.len()
    }

    /// Watchers ever registered.
    pub fn opened_total(&self) -> u64 {
        self.lock().opened
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn query(user_id: &str) -> TodayQuery {
        TodayQuery::new(user_id, Utc::now())
    }

    #[test]
    fn initial_sender_reaches_only_the_new_watcher() {
        let registry = WatchRegistry::new();
        let (first, _) = registry.open(query("u1"));
        let (second, initial) = registry.open(query("u1"));
        initial.send(FeedEvent::Records(Vec::new())).unwrap();

        let (mut first_events, _first_cancel) = first.into_parts();
        let (mut second_events, _second_cancel) = second.into_parts();
        assert!(first_events.try_recv().is_err());
        assert_eq!(second_events.try_recv().unwrap(), FeedEvent::Records(Vec::new()));
    }

    #[test]
    fn cancel_removes_watcher_immediately() {
        let registry = WatchRegistry::new();
        let (feed, _) = registry.open(query("u1"));
        let _other = registry.open(query("u2"));
        assert_eq!(registry.open_count(), 2);

        let (_events, cancel) = feed.into_parts();
        cancel.cancel();

        assert_eq!(registry.open_count(), 1);
        assert!(registry.watchers_for("u1").is_empty());
        assert_eq!(registry.watchers_for("u2").len(), 1);
        assert_eq!(registry.opened_total(), 2);
    }

    #[test]
    fn dropping_feed_releases_watcher() {
        let registry = WatchRegistry::new();
        let (feed, initial) = registry.open(query("u1"));
        drop(feed);
        assert!(initial.is_closed());
        assert_eq!(registry.open_count(), 0);
    }
}
