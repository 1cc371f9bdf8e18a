use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{validate_user_id, FocusError},
    metrics::{build_dashboard, compute_metrics, DashboardStats, FocusUpdate, MetricsSnapshot},
    settings::DashboardSettings,
    store::{FeedCancel, FeedEvent, RecordStore, TodayQuery},
};

use super::SubscriptionHandle;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Source of the evaluation time for unfinished sessions and day windows.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

type SharedSnapshot = Arc<Mutex<Option<MetricsSnapshot>>>;

struct Subscription {
    handle: SubscriptionHandle,
    latest: SharedSnapshot,
    feed_cancel: FeedCancel,
    _task: JoinHandle<()>,
}

impl Subscription {
    fn close(self) {
        self.handle.token().cancel();
        self.feed_cancel.cancel();
    }
}

struct TrackerInner<S> {
    store: S,
    subscriptions: Mutex<HashMap<String, Subscription>>,
    clock: Clock,
    dashboard: DashboardSettings,
}

impl<S> TrackerInner<S> {
    fn lock_subscriptions(&self) -> MutexGuard<'_, HashMap<String, Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

impl<S> Drop for TrackerInner<S> {
    fn drop(&mut self) {
        let subscriptions = std::mem::take(
            self.subscriptions
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (_, subscription) in subscriptions {
            subscription.close();
        }
    }
}

pub struct TrackerBuilder<S> {
    store: S,
    clock: Clock,
    dashboard: DashboardSettings,
}

impl<S: RecordStore> TrackerBuilder<S> {
    pub fn clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn dashboard_settings(mut self, dashboard: DashboardSettings) -> Self {
        self.dashboard = dashboard;
        self
    }

    pub fn build(self) -> LiveFocusTracker<S> {
        LiveFocusTracker {
            inner: Arc::new(TrackerInner {
                store: self.store,
                subscriptions: Mutex::new(HashMap::new()),
                clock: self.clock,
                dashboard: self.dashboard,
            }),
        }
    }
}

/// Per-user live view of today's focus metrics over a [`RecordStore`].
///
/// At most one feed is open per user. Feed updates are turned into
/// [`MetricsSnapshot`]s on a spawned task and handed to the subscriber's
/// callback in feed order. Cloning shares the same subscription map; dropping
/// the last clone closes every feed.
pub struct LiveFocusTracker<S> {
    inner: Arc<TrackerInner<S>>,
}

impl<S> Clone for LiveFocusTracker<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: RecordStore> LiveFocusTracker<S> {
    pub fn new(store: S) -> Self {
        Self::builder(store).build()
    }

    pub fn builder(store: S) -> TrackerBuilder<S> {
        TrackerBuilder {
            store,
            clock: Arc::new(Utc::now),
            dashboard: DashboardSettings::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// One-shot metrics for `user_id`'s current day. Store failures are
    /// returned as-is; nothing is retried.
    pub async fn get_snapshot(&self, user_id: &str) -> Result<MetricsSnapshot, FocusError> {
        let user_id = validate_user_id(user_id)?;
        let query = TodayQuery::today(user_id, self.inner.now());

        let records = self
            .inner
            .store
            .query_today(&query.user_id, query.day_start)
            .await
            .map_err(|err| {
                log_error!("Error getting today's focus for {}: {}", user_id, err);
                err
            })?;

        Ok(compute_metrics(&records, self.inner.now()))
    }

    /// Today's metrics combined with the user's profile, falling back to the
    /// configured defaults when no profile exists.
    pub async fn get_dashboard(&self, user_id: &str) -> Result<DashboardStats, FocusError> {
        let user_id = validate_user_id(user_id)?;
        let profile = self.inner.store.user_profile(user_id).await?;
        let metrics = self.get_snapshot(user_id).await?;
        Ok(build_dashboard(
            profile.as_ref(),
            &metrics,
            &self.inner.dashboard,
        ))
    }

    /// Opens the live feed for `user_id`, or returns the existing handle if
    /// one is already open.
    ///
    /// The day window is fixed when the feed opens. Feed errors, including a
    /// failure to open the feed, reach `on_update` as [`FocusUpdate::Error`];
    /// only an empty `user_id` is returned as an error. Outside a Tokio
    /// runtime the feed cannot be driven, so that also arrives as an error
    /// update.
    pub fn subscribe<F>(
        &self,
        user_id: &str,
        on_update: F,
    ) -> Result<SubscriptionHandle, FocusError>
    where
        F: FnMut(FocusUpdate) + Send + 'static,
    {
        let user_id = validate_user_id(user_id)?;
        let mut on_update = on_update;

        let (handle, err) = {
            let mut subscriptions = self.inner.lock_subscriptions();
            if let Some(existing) = subscriptions.get(user_id) {
                log_warn!("Subscription already exists for user {}", user_id);
                return Ok(existing.handle.clone());
            }

            let query = TodayQuery::today(user_id, self.inner.now());
            let handle = SubscriptionHandle::new(user_id);

            let opened = tokio::runtime::Handle::try_current()
                .map_err(|err| {
                    FocusError::UpstreamUnavailable(format!(
                        "no async runtime for focus feed: {err}"
                    ))
                })
                .and_then(|runtime| Ok((runtime, self.inner.store.watch(query)?)));

            match opened {
                Ok((runtime, feed)) => {
                    let (events, feed_cancel) = feed.into_parts();
                    let latest: SharedSnapshot = Arc::new(Mutex::new(None));
                    let task = runtime.spawn(forward_updates(
                        user_id.to_string(),
                        events,
                        handle.token().clone(),
                        Arc::clone(&latest),
                        Arc::clone(&self.inner.clock),
                        on_update,
                    ));

                    subscriptions.insert(
                        user_id.to_string(),
                        Subscription {
                            handle: handle.clone(),
                            latest,
                            feed_cancel,
                            _task: task,
                        },
                    );
                    log_info!("Opened focus feed for user {}", user_id);
                    return Ok(handle);
                }
                Err(err) => {
                    handle.token().cancel();
                    (handle, err)
                }
            }
        };

        // The map lock is released so the callback may call back into the tracker.
        log_error!("Error in focus subscription for {}: {}", user_id, err);
        on_update(FocusUpdate::Error(err));
        Ok(handle)
    }

    /// Closes `user_id`'s feed. The store-side watcher is released before this
    /// returns. Returns `false` when nothing was open.
    pub fn unsubscribe(&self, user_id: &str) -> bool {
        let removed = self.inner.lock_subscriptions().remove(user_id);
        match removed {
            Some(subscription) => {
                subscription.close();
                log_info!("Closed focus feed for user {}", user_id);
                true
            }
            None => false,
        }
    }

    /// Closes every open feed and returns how many there were.
    pub fn unsubscribe_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.inner.lock_subscriptions());
        let count = drained.len();
        for (_, subscription) in drained {
            subscription.close();
        }
        if count > 0 {
            log_info!("Closed {} focus feeds", count);
        }
        count
    }

    pub fn is_subscribed(&self, user_id: &str) -> bool {
        self.inner.lock_subscriptions().contains_key(user_id)
    }

    pub fn active_subscription_count(&self) -> usize {
        self.inner.lock_subscriptions().len()
    }

    /// Most recent snapshot delivered to `user_id`'s subscriber.
    pub fn latest_snapshot(&self, user_id: &str) -> Option<MetricsSnapshot> {
        let latest = Arc::clone(&self.inner.lock_subscriptions().get(user_id)?.latest);
        let snapshot = latest.lock().unwrap_or_else(PoisonError::into_inner).clone();
        snapshot
    }
}

async fn forward_updates<F>(
    user_id: String,
    mut events: mpsc::UnboundedReceiver<FeedEvent>,
    token: CancellationToken,
    latest: SharedSnapshot,
    clock: Clock,
    mut on_update: F,
) where
    F: FnMut(FocusUpdate) + Send + 'static,
{
    loop {
        let event = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    log_warn!("Focus feed for {} ended without unsubscribe", user_id);
                    break;
                }
            },
        };

        let update = match event {
            FeedEvent::Records(records) => {
                let snapshot = compute_metrics(&records, clock());
                *latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
                FocusUpdate::Metrics(snapshot)
            }
            FeedEvent::Error(err) => {
                log_warn!("Error in focus feed for {}: {}", user_id, err);
                FocusUpdate::Error(err)
            }
        };

        on_update(update);
    }

    log_debug!("Delivery task for {} finished", user_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{SessionRecord, UserProfile},
        store::{local_day_start, MemoryStore},
    };
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use std::time::Duration as StdDuration;
    use tokio::time::timeout;

    fn recorder() -> (
        impl FnMut(FocusUpdate) + Send + 'static,
        mpsc::UnboundedReceiver<FocusUpdate>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            move |update| {
                let _ = tx.send(update);
            },
            rx,
        )
    }

    async fn next_update(rx: &mut mpsc::UnboundedReceiver<FocusUpdate>) -> FocusUpdate {
        timeout(StdDuration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for update")
            .expect("update channel closed")
    }

    fn total(update: &FocusUpdate) -> u64 {
        update.metrics().expect("metrics update").total_minutes
    }

    /// Tracker whose clock sits two hours into the current local day.
    fn fixed_tracker(store: &MemoryStore) -> (LiveFocusTracker<MemoryStore>, DateTime<Utc>) {
        let day_start = local_day_start(Utc::now());
        let now = day_start + Duration::hours(2);
        let tracker = LiveFocusTracker::builder(store.clone())
            .clock(move || now)
            .build();
        (tracker, day_start)
    }

    #[tokio::test]
    async fn get_snapshot_rejects_empty_user_before_querying() {
        let store = MemoryStore::new();
        let tracker = LiveFocusTracker::new(store.clone());

        let result = tracker.get_snapshot("").await;

        assert!(matches!(result, Err(FocusError::InvalidArgument(_))));
        assert_eq!(store.query_count(), 0);
    }

    #[tokio::test]
    async fn get_snapshot_surfaces_store_failure() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let tracker = LiveFocusTracker::new(store.clone());

        assert_eq!(
            tracker.get_snapshot("u1").await,
            Err(FocusError::UpstreamUnavailable(
                "memory store marked unavailable".into()
            ))
        );
        assert_eq!(store.query_count(), 1);
    }

    #[tokio::test]
    async fn get_snapshot_mixes_completed_and_ongoing() {
        let store = MemoryStore::new();
        let (tracker, day_start) = fixed_tracker(&store);
        store.upsert(SessionRecord::completed("a", "u1", day_start + Duration::minutes(10), 30));
        store.upsert(SessionRecord::in_progress("b", "u1", day_start + Duration::hours(1)));
        store.upsert(SessionRecord::completed("c", "u1", day_start - Duration::hours(1), 99));
        store.upsert(SessionRecord::completed("d", "u2", day_start, 15));

        let snapshot = tracker.get_snapshot("u1").await.unwrap();

        assert_eq!(snapshot.total_minutes, 90);
        assert_eq!(snapshot.display_value, "1h 30m");
        assert_eq!(snapshot.completed_count, 1);
        assert_eq!(snapshot.ongoing_count, 1);
        assert_eq!(snapshot.session_count, 2);
        assert_eq!(snapshot.computed_at, day_start + Duration::hours(2));
    }

    #[tokio::test]
    async fn duplicate_subscribe_returns_existing_handle() {
        let store = MemoryStore::new();
        let tracker = LiveFocusTracker::new(store.clone());
        let (first_cb, _first_rx) = recorder();
        let (second_cb, _second_rx) = recorder();

        let first = tracker.subscribe("u1", first_cb).unwrap();
        let second = tracker.subscribe("u1", second_cb).unwrap();

        assert_eq!(first, second);
        assert_eq!(store.watch_count(), 1);
        assert_eq!(store.open_feed_count(), 1);
        assert_eq!(tracker.active_subscription_count(), 1);
    }

    #[tokio::test]
    async fn subscribe_rejects_empty_user() {
        let store = MemoryStore::new();
        let tracker = LiveFocusTracker::new(store.clone());
        let (callback, _rx) = recorder();

        assert!(matches!(
            tracker.subscribe("", callback),
            Err(FocusError::InvalidArgument(_))
        ));
        assert_eq!(store.watch_count(), 0);
    }

    #[tokio::test]
    async fn updates_arrive_in_feed_order() {
        let store = MemoryStore::new();
        let (tracker, day_start) = fixed_tracker(&store);
        let (callback, mut rx) = recorder();

        tracker.subscribe("u1", callback).unwrap();
        assert_eq!(total(&next_update(&mut rx).await), 0);

        store.upsert(SessionRecord::completed("a", "u1", day_start, 30));
        store.upsert(SessionRecord::completed("b", "u1", day_start, 20));
        store.upsert(SessionRecord::in_progress("c", "u1", day_start + Duration::minutes(75)));

        assert_eq!(total(&next_update(&mut rx).await), 30);
        assert_eq!(total(&next_update(&mut rx).await), 50);
        let last = next_update(&mut rx).await;
        assert_eq!(total(&last), 95);
        assert_eq!(tracker.latest_snapshot("u1"), last.metrics().cloned());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_and_releases_feed() {
        let store = MemoryStore::new();
        let (tracker, day_start) = fixed_tracker(&store);
        let (callback, mut rx) = recorder();

        let handle = tracker.subscribe("u1", callback).unwrap();
        next_update(&mut rx).await;

        assert!(tracker.unsubscribe("u1"));
        assert_eq!(store.open_feed_count(), 0);
        assert!(!handle.is_active());
        assert!(!tracker.is_subscribed("u1"));

        store.upsert(SessionRecord::completed("a", "u1", day_start, 30));

        let after = timeout(StdDuration::from_secs(2), rx.recv()).await;
        assert!(matches!(after, Ok(None)), "got {after:?}");
    }

    #[tokio::test]
    async fn unsubscribe_unknown_user_is_noop() {
        let tracker = LiveFocusTracker::new(MemoryStore::new());
        assert!(!tracker.unsubscribe("nobody"));
        assert!(!tracker.unsubscribe(""));
    }

    #[tokio::test]
    async fn feed_errors_are_delivered_and_subscription_survives() {
        let store = MemoryStore::new();
        let (tracker, day_start) = fixed_tracker(&store);
        let (callback, mut rx) = recorder();

        tracker.subscribe("u1", callback).unwrap();
        next_update(&mut rx).await;

        store.fail_feeds("u1", "quota exceeded");
        assert_eq!(
            next_update(&mut rx).await,
            FocusUpdate::Error(FocusError::UpstreamUnavailable("quota exceeded".into()))
        );

        store.upsert(SessionRecord::completed("a", "u1", day_start, 12));
        assert_eq!(total(&next_update(&mut rx).await), 12);
        assert!(tracker.is_subscribed("u1"));
    }

    #[tokio::test]
    async fn failed_watch_reports_through_callback() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let tracker = LiveFocusTracker::new(store.clone());
        let (callback, mut rx) = recorder();

        let handle = tracker.subscribe("u1", callback).unwrap();

        assert!(!handle.is_active());
        assert!(next_update(&mut rx).await.is_error());
        assert!(!tracker.is_subscribed("u1"));
        assert_eq!(store.open_feed_count(), 0);
    }

    #[test]
    fn subscribe_without_runtime_reports_error() {
        let store = MemoryStore::new();
        let tracker = LiveFocusTracker::new(store.clone());
        let (callback, mut rx) = recorder();

        let handle = tracker.subscribe("u1", callback).unwrap();

        assert!(!handle.is_active());
        assert!(matches!(
            rx.try_recv(),
            Ok(FocusUpdate::Error(FocusError::UpstreamUnavailable(_)))
        ));
        assert!(rx.try_recv().is_err());
        assert!(!tracker.is_subscribed("u1"));
        assert_eq!(store.watch_count(), 0);
        assert_eq!(store.open_feed_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_from_inside_callback() {
        let store = MemoryStore::new();
        let (tracker, day_start) = fixed_tracker(&store);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let teardown = tracker.clone();
        tracker
            .subscribe("u1", move |update| {
                let removed = teardown.unsubscribe("u1");
                let _ = tx.send((update, removed));
            })
            .unwrap();

        let (first, removed) = timeout(StdDuration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(!first.is_error());
        assert!(removed);
        assert!(!tracker.is_subscribed("u1"));
        assert_eq!(store.open_feed_count(), 0);

        store.upsert(SessionRecord::completed("a", "u1", day_start, 30));
        let after = timeout(StdDuration::from_secs(2), rx.recv()).await;
        assert!(matches!(after, Ok(None)), "got {after:?}");
    }

    #[tokio::test]
    async fn resubscribe_after_unsubscribe_opens_fresh_feed() {
        let store = MemoryStore::new();
        let tracker = LiveFocusTracker::new(store.clone());

        for _ in 0..5 {
            let (callback, _rx) = recorder();
            tracker.subscribe("u1", callback).unwrap();
            tracker.unsubscribe("u1");
        }
        let (callback, _rx) = recorder();
        let handle = tracker.subscribe("u1", callback).unwrap();

        assert!(handle.is_active());
        assert_eq!(store.watch_count(), 6);
        assert_eq!(store.open_feed_count(), 1);
    }

    #[tokio::test]
    async fn unsubscribe_all_and_drop_release_feeds() {
        let store = MemoryStore::new();
        let tracker = LiveFocusTracker::new(store.clone());
        for user in ["u1", "u2", "u3"] {
            let (callback, _rx) = recorder();
            tracker.subscribe(user, callback).unwrap();
        }
        assert_eq!(tracker.unsubscribe_all(), 3);
        assert_eq!(store.open_feed_count(), 0);

        let (callback, _rx) = recorder();
        tracker.subscribe("u4", callback).unwrap();
        assert_eq!(store.open_feed_count(), 1);
        drop(tracker);
        assert_eq!(store.open_feed_count(), 0);
    }

    #[tokio::test]
    async fn dashboard_combines_profile_and_metrics() {
        let store = MemoryStore::new();
        let (tracker, day_start) = fixed_tracker(&store);
        let mut profile = UserProfile::new("u1");
        profile.daily_goal_hours = Some(2);
        profile.current_streak = 3;
        store.set_profile(profile);
        store.upsert(SessionRecord::completed("a", "u1", day_start, 60));

        let stats = tracker.get_dashboard("u1").await.unwrap();

        assert_eq!(stats.todays_focus, "1h 0m");
        assert_eq!(stats.goal_progress_percent, 50);
        assert_eq!(stats.streak, 3);
        assert_eq!(stats.peak_performance_time, "9-12 AM");
        assert!(matches!(
            tracker.get_dashboard("").await,
            Err(FocusError::InvalidArgument(_))
        ));
    }
}
