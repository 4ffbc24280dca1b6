use crate::error::Error;
use crate::feed::{FeedSession, FeedView};
use crate::retention::FEED_LIMIT;
use crate::store::LogStore;
use crate::types::{RecordId, WebhookRecord};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

enum FeedEvent {
    Polled(Vec<WebhookRecord>),
    Pushed(WebhookRecord),
    Select(RecordId),
}

/// Cloneable handle for pushing explicit selections into a [`LiveFeed`].
#[derive(Clone)]
pub struct FeedSelector(mpsc::UnboundedSender<FeedEvent>);

impl FeedSelector {
    /// Returns `false` once the feed has stopped.
    pub fn select(&self, id: RecordId) -> bool {
        self.0.send(FeedEvent::Select(id)).is_ok()
    }
}

/// A running view session: polls the store, listens for inserts and
/// republishes the reconciled [`FeedView`] after every change.
///
/// Dropping the handle tears the session down.
pub struct LiveFeed {
    view: watch::Receiver<FeedView>,
    events: mpsc::UnboundedSender<FeedEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LiveFeed {
    pub fn spawn(
        store: Arc<dyn LogStore>,
        snapshot: Vec<WebhookRecord>,
        requested: Option<RecordId>,
        poll_interval: Duration,
    ) -> Self {
        let session = FeedSession::new(snapshot, requested, Utc::now());
        let (view_tx, view) = watch::channel(session.view().clone());
        let (events, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        // Subscribe before the first poll so no insert falls in between.
        let inserts = store.subscribe();
        tokio::spawn(poll_loop(store, poll_interval, events.clone(), cancel.clone()));
        tokio::spawn(push_loop(inserts, events.clone(), cancel.clone()));
        let task = tokio::spawn(apply_loop(session, events_rx, view_tx, cancel.clone()));

        Self {
            view,
            events,
            cancel,
            task: Some(task),
        }
    }

    /// The latest published view.
    pub fn current(&self) -> FeedView {
        self.view.borrow().clone()
    }

    /// A receiver notified on every rebuild.
    pub fn watch(&self) -> watch::Receiver<FeedView> {
        self.view.clone()
    }

    pub fn selector(&self) -> FeedSelector {
        FeedSelector(self.events.clone())
    }

    /// Explicit user selection.
    pub fn select(&self, id: RecordId) -> bool {
        self.selector().select(id)
    }

    /// Cancel both producers and wait for the session to stop.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop(
    store: Arc<dyn LogStore>,
    every: Duration,
    events: mpsc::UnboundedSender<FeedEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            _ = cancel.cancelled() => break,
            fetched = store.select_recent(FEED_LIMIT) => fetched,
        };
        match fetched {
            Ok(records) => {
                if events.send(FeedEvent::Polled(records)).is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to refresh webhook logs"),
        }
    }
    tracing::debug!("feed poller stopped");
}

async fn push_loop(
    mut inserts: broadcast::Receiver<WebhookRecord>,
    events: mpsc::UnboundedSender<FeedEvent>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = inserts.recv() => received,
        };
        match received {
            Ok(record) => {
                if events.send(FeedEvent::Pushed(record)).is_err() {
                    break;
                }
            }
            // The next poll picks up whatever was skipped.
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                let err = Error::SubscriptionError(format!("skipped {missed} inserts"));
                tracing::warn!(error = %err, "insert subscription lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                let err = Error::SubscriptionError("channel closed".into());
                tracing::warn!(error = %err, "continuing on polling alone");
                break;
            }
        }
    }
    tracing::debug!("feed subscription released");
}

async fn apply_loop(
    mut session: FeedSession,
    mut events: mpsc::UnboundedReceiver<FeedEvent>,
    view: watch::Sender<FeedView>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let now = Utc::now();
        let rebuilt = match event {
            FeedEvent::Polled(records) => session.apply_poll(records, now),
            FeedEvent::Pushed(record) => session.apply_push(record, now),
            FeedEvent::Select(id) => session.select(id, now),
        };
        if view.send(rebuilt.clone()).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileLogStore;
    use crate::types::{CapturedHeaders, NewRecord};
    use serde_json::json;

    fn fresh(subject: &str) -> NewRecord {
        NewRecord {
            received_at: Some(Utc::now().to_rfc3339()),
            headers: CapturedHeaders::default(),
            data: json!({ "subject": subject }),
        }
    }

    async fn wait_for(
        rx: &mut watch::Receiver<FeedView>,
        done: impl Fn(&FeedView) -> bool,
    ) -> FeedView {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if done(&*rx.borrow_and_update()) {
                    return rx.borrow().clone();
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("feed did not converge")
    }

    #[tokio::test]
    async fn pushed_inserts_reach_the_view() {
        let store = Arc::new(FileLogStore::in_memory());
        let live = LiveFeed::spawn(store.clone(), Vec::new(), None, Duration::from_secs(3600));
        let mut rx = live.watch();

        let id = store.insert(fresh("pushed")).await.unwrap();
        let view = wait_for(&mut rx, |v| v.records.contains(id)).await;
        assert_eq!(view.selected, Some(id));

        live.shutdown().await;
    }

    #[tokio::test]
    async fn first_poll_fills_an_empty_snapshot() {
        let store = Arc::new(FileLogStore::in_memory());
        let id = store.insert(fresh("already there")).await.unwrap();

        let live = LiveFeed::spawn(store.clone(), Vec::new(), None, Duration::from_secs(3600));
        let mut rx = live.watch();
        let view = wait_for(&mut rx, |v| v.records.contains(id)).await;
        assert_eq!(view.records.len(), 1);

        live.shutdown().await;
    }

    #[tokio::test]
    async fn explicit_selection_is_kept() {
        let store = Arc::new(FileLogStore::in_memory());
        let older = store.insert(fresh("older")).await.unwrap();
        let newer = store.insert(fresh("newer")).await.unwrap();
        let snapshot = store.select_recent(FEED_LIMIT).await.unwrap();

        let live = LiveFeed::spawn(store.clone(), snapshot, None, Duration::from_secs(3600));
        let mut rx = live.watch();
        assert_eq!(live.current().selected, Some(newer));

        live.select(older);
        wait_for(&mut rx, |v| v.selected == Some(older)).await;

        let newest = store.insert(fresh("newest")).await.unwrap();
        let view = wait_for(&mut rx, |v| v.records.contains(newest)).await;
        assert_eq!(view.selected, Some(older));

        live.shutdown().await;
    }

    #[tokio::test]
    async fn selector_stops_with_the_feed() {
        let store = Arc::new(FileLogStore::in_memory());
        let id = store.insert(fresh("only")).await.unwrap();
        let snapshot = store.select_recent(FEED_LIMIT).await.unwrap();
        let live = LiveFeed::spawn(store.clone(), snapshot, None, Duration::from_secs(3600));
        let selector = live.selector();

        assert!(selector.select(id));
        live.shutdown().await;
        assert!(!selector.select(id));
    }

    #[tokio::test]
    async fn updates_after_shutdown_are_discarded() {
        let store = Arc::new(FileLogStore::in_memory());
        let live = LiveFeed::spawn(store.clone(), Vec::new(), None, Duration::from_secs(3600));
        let rx = live.watch();
        live.shutdown().await;

        store.insert(fresh("too late")).await.unwrap();
        tokio::task::yield_now().await;
        assert!(rx.borrow().records.is_empty());
    }
}
