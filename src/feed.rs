//! Client-side feed reconciliation.
//!
//! The feed is never mutated in place. Every snapshot, poll result or pushed
//! record is appended to the inputs and the whole view is recomputed with
//! [`reconcile`], so arrival order only matters for records sharing an id.

use crate::retention::{cutoff, FEED_LIMIT};
use crate::selection::Selection;
use crate::store::newest_first;
use crate::types::{RecordId, WebhookRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Deduplicated, windowed, newest-first list of at most [`FEED_LIMIT`] records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Feed(Vec<WebhookRecord>);

impl Feed {
    pub fn records(&self) -> &[WebhookRecord] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.0.iter().any(|r| r.id == id)
    }

    pub fn get(&self, id: RecordId) -> Option<&WebhookRecord> {
        self.0.iter().find(|r| r.id == id)
    }

    pub fn first_id(&self) -> Option<RecordId> {
        self.0.first().map(|r| r.id)
    }

    pub fn into_records(self) -> Vec<WebhookRecord> {
        self.0
    }
}

/// Merge `sources` into one feed as of `now`.
///
/// Later occurrences of an id replace earlier ones. Records without a usable
/// timestamp always pass the window and sort last.
pub fn reconcile(sources: &[&[WebhookRecord]], now: DateTime<Utc>) -> Feed {
    let oldest = cutoff(now);

    let mut latest: HashMap<RecordId, &WebhookRecord> = HashMap::new();
    for record in sources.iter().flat_map(|s| s.iter()) {
        latest.insert(record.id, record);
    }

    let mut records: Vec<WebhookRecord> = latest
        .into_values()
        .filter(|r| r.received_instant().map_or(true, |t| t >= oldest))
        .cloned()
        .collect();
    records.sort_by(newest_first);
    records.truncate(FEED_LIMIT);
    Feed(records)
}

/// What a view renders: the feed plus the resolved selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedView {
    pub records: Feed,
    pub selected: Option<RecordId>,
}

impl FeedView {
    pub fn selected_record(&self) -> Option<&WebhookRecord> {
        self.selected.and_then(|id| self.records.get(id))
    }
}

/// Accumulated inputs of one view session.
///
/// The snapshot is fixed at page load. Poll results and pushed records go
/// into `updates`, which is compacted through [`reconcile`] after each event
/// so it stays bounded.
#[derive(Debug, Clone, Default)]
pub struct FeedSession {
    snapshot: Vec<WebhookRecord>,
    updates: Vec<WebhookRecord>,
    selection: Selection,
    view: FeedView,
}

impl FeedSession {
    /// Start from a page-load snapshot, preferring `requested` as the
    /// selection when it is part of the feed.
    pub fn new(
        snapshot: Vec<WebhookRecord>,
        requested: Option<RecordId>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut session = Self {
            snapshot,
            updates: Vec::new(),
            selection: Selection::new(requested),
            view: FeedView::default(),
        };
        session.rebuild(now);
        session
    }

    pub fn view(&self) -> &FeedView {
        &self.view
    }

    /// Merge the result of a poll.
    pub fn apply_poll(&mut self, records: Vec<WebhookRecord>, now: DateTime<Utc>) -> &FeedView {
        self.updates.extend(records);
        self.compact(now);
        self.rebuild(now)
    }

    /// Merge a single pushed record.
    pub fn apply_push(&mut self, record: WebhookRecord, now: DateTime<Utc>) -> &FeedView {
        self.updates.push(record);
        self.compact(now);
        self.rebuild(now)
    }

    /// Explicit user choice of a record.
    pub fn select(&mut self, id: RecordId, now: DateTime<Utc>) -> &FeedView {
        self.selection.choose(id);
        self.rebuild(now)
    }

    /// Re-evaluate the window without new input, e.g. on a timer tick.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> &FeedView {
        self.rebuild(now)
    }

    fn compact(&mut self, now: DateTime<Utc>) {
        self.updates = reconcile(&[&self.updates], now).into_records();
    }

    fn rebuild(&mut self, now: DateTime<Utc>) -> &FeedView {
        let records = reconcile(&[&self.snapshot, &self.updates], now);
        let selected = self.selection.resolve(&records);
        self.view = FeedView { records, selected };
        &self.view
    }
}
