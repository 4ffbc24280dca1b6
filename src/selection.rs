use crate::feed::Feed;
use crate::types::RecordId;

/// Pick the record a view should show: `requested` when it is still in the
/// feed, otherwise the newest record, otherwise nothing.
pub fn resolve_selection(feed: &Feed, requested: Option<RecordId>) -> Option<RecordId> {
    match requested {
        Some(id) if feed.contains(id) => Some(id),
        _ => feed.first_id(),
    }
}

/// The "currently viewed" record of one view session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    requested: Option<RecordId>,
}

impl Selection {
    pub fn new(requested: Option<RecordId>) -> Self {
        Self { requested }
    }

    pub fn choose(&mut self, id: RecordId) {
        self.requested = Some(id);
    }

    /// Resolve against a rebuilt feed. A fallback becomes the new selection,
    /// so it stays put when newer records arrive later.
    pub fn resolve(&mut self, feed: &Feed) -> Option<RecordId> {
        let resolved = resolve_selection(feed, self.requested);
        self.requested = resolved;
        resolved
    }
}
