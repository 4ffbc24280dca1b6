use crate::error::{Error, Result};
use crate::types::{NewRecord, RecordId, WebhookRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;
use tokio::sync::{broadcast, Mutex};

const LOG_FILE: &str = "novu_webhook_logs.json";
const SUBSCRIPTION_CAPACITY: usize = 256;

/// Receiver half of the insert notification stream.
pub type InsertSubscription = broadcast::Receiver<WebhookRecord>;

/// The persistent webhook log table.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append a record and return the id the store assigned to it.
    async fn insert(&self, record: NewRecord) -> Result<RecordId>;

    /// Up to `limit` records, newest `received_at` first.
    async fn select_recent(&self, limit: usize) -> Result<Vec<WebhookRecord>>;

    /// Delete records received strictly before `cutoff`. Records without a
    /// usable timestamp are kept.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Subscribe to records inserted from now on.
    fn subscribe(&self) -> InsertSubscription;
}

/// Newest first; missing or unparseable timestamps sort after everything,
/// equal timestamps by descending id.
pub fn newest_first(a: &WebhookRecord, b: &WebhookRecord) -> Ordering {
    b.received_instant()
        .cmp(&a.received_instant())
        .then_with(|| b.id.cmp(&a.id))
}

#[derive(Serialize, Deserialize)]
struct Table {
    next_id: RecordId,
    records: Vec<WebhookRecord>,
}

/// On-disk shapes: the current table, or a bare record array written
/// before `next_id` was stored.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredLog {
    Table(Table),
    Records(Vec<WebhookRecord>),
}

/// Log table kept in memory and, when a data directory is configured,
/// mirrored to a JSON file after every mutation.
pub struct FileLogStore {
    table: Mutex<Table>,
    path: Option<PathBuf>,
    inserts: broadcast::Sender<WebhookRecord>,
}

impl FileLogStore {
    pub fn in_memory() -> Self {
        Self::with_table(Vec::new(), 1, None)
    }

    /// Open the table stored in `data_dir`, creating the directory if needed.
    pub async fn open(data_dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&data_dir).await?;
        let path = data_dir.join(LOG_FILE);

        let stored = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str::<StoredLog>(&content).map_err(|e| {
                Error::PersistenceFailure(format!("failed to parse {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredLog::Records(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let (records, next_id) = match stored {
            StoredLog::Table(table) => (table.records, table.next_id),
            StoredLog::Records(records) => (records, 1),
        };

        tracing::info!(
            path = %path.display(),
            records = records.len(),
            next_id,
            "opened webhook log"
        );
        Ok(Self::with_table(records, next_id, Some(path)))
    }

    fn with_table(records: Vec<WebhookRecord>, next_id: RecordId, path: Option<PathBuf>) -> Self {
        // Ids are never handed out twice, even if the stored counter is behind.
        let next_id = records
            .iter()
            .map(|r| r.id + 1)
            .max()
            .unwrap_or(1)
            .max(next_id);
        let (inserts, _) = broadcast::channel(SUBSCRIPTION_CAPACITY);
        Self {
            table: Mutex::new(Table { records, next_id }),
            path,
            inserts,
        }
    }

    async fn save(&self, table: &Table) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(table)
            .map_err(|e| Error::PersistenceFailure(format!("failed to serialize log: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await.map_err(|e| {
            Error::PersistenceFailure(format!("failed to write {}: {e}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, path).await.map_err(|e| {
            Error::PersistenceFailure(format!("failed to replace {}: {e}", path.display()))
        })
    }
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn insert(&self, record: NewRecord) -> Result<RecordId> {
        let mut table = self.table.lock().await;
        let stored = WebhookRecord {
            id: table.next_id,
            received_at: record.received_at,
            headers: record.headers,
            data: record.data,
        };

        table.records.push(stored.clone());
        table.next_id += 1;
        if let Err(e) = self.save(&table).await {
            table.records.pop();
            table.next_id -= 1;
            return Err(e);
        }
        drop(table);

        // No receivers just means nobody is watching.
        let _ = self.inserts.send(stored.clone());
        Ok(stored.id)
    }

    async fn select_recent(&self, limit: usize) -> Result<Vec<WebhookRecord>> {
        let table = self.table.lock().await;
        let mut records = table.records.clone();
        drop(table);

        records.sort_by(newest_first);
        records.truncate(limit);
        Ok(records)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut table = self.table.lock().await;
        let expired = |r: &WebhookRecord| r.received_instant().is_some_and(|t| t < cutoff);

        let deleted = table.records.iter().filter(|&r| expired(r)).count();
        if deleted == 0 {
            return Ok(0);
        }

        let previous = table.records.clone();
        table.records.retain(|r| !expired(r));
        if let Err(e) = self.save(&table).await {
            table.records = previous;
            return Err(e);
        }
        Ok(deleted)
    }

    fn subscribe(&self) -> InsertSubscription {
        self.inserts.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CapturedHeaders;
    use chrono::Duration;
    use serde_json::json;
    use tempfile::TempDir;

    fn new_record(received_at: Option<String>, subject: &str) -> NewRecord {
        NewRecord {
            received_at,
            headers: CapturedHeaders::default(),
            data: json!({ "subject": subject }),
        }
    }

    fn days_ago(days: i64) -> Option<String> {
        Some((Utc::now() - Duration::days(days)).to_rfc3339())
    }

    #[tokio::test]
    async fn insert_assigns_increasing_ids() {
        let store = FileLogStore::in_memory();
        let first = store.insert(new_record(days_ago(0), "a")).await.unwrap();
        let second = store.insert(new_record(days_ago(0), "b")).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn select_recent_orders_newest_first_with_missing_last() {
        let store = FileLogStore::in_memory();
        store.insert(new_record(None, "undated")).await.unwrap();
        store.insert(new_record(days_ago(2), "old")).await.unwrap();
        store.insert(new_record(days_ago(0), "new")).await.unwrap();
        store
            .insert(new_record(Some("not a date".into()), "garbled"))
            .await
            .unwrap();

        let subjects: Vec<String> = store
            .select_recent(10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.data["subject"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(subjects, ["new", "old", "garbled", "undated"]);

        assert_eq!(store.select_recent(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_older_than_keeps_undated_records() {
        let store = FileLogStore::in_memory();
        store.insert(new_record(days_ago(5), "stale")).await.unwrap();
        store.insert(new_record(days_ago(1), "fresh")).await.unwrap();
        store.insert(new_record(None, "undated")).await.unwrap();

        let deleted = store
            .delete_older_than(Utc::now() - Duration::days(3))
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let remaining = store.select_recent(10).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|r| r.data["subject"] != "stale"));
    }

    #[tokio::test]
    async fn subscribers_see_inserts() {
        let store = FileLogStore::in_memory();
        let mut rx = store.subscribe();
        let id = store.insert(new_record(days_ago(0), "pushed")).await.unwrap();

        let pushed = rx.recv().await.unwrap();
        assert_eq!(pushed.id, id);
        assert_eq!(pushed.data["subject"], "pushed");
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileLogStore::open(dir.path().to_path_buf()).await.unwrap();
            store.insert(new_record(days_ago(0), "kept")).await.unwrap();
            store.insert(new_record(days_ago(0), "also kept")).await.unwrap();
        }

        let store = FileLogStore::open(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(store.select_recent(10).await.unwrap().len(), 2);

        let id = store.insert(new_record(days_ago(0), "third")).await.unwrap();
        assert_eq!(id, 3);
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_the_log_empties() {
        let dir = TempDir::new().unwrap();
        let first = {
            let store = FileLogStore::open(dir.path().to_path_buf()).await.unwrap();
            let id = store.insert(new_record(days_ago(5), "expired")).await.unwrap();
            let deleted = store
                .delete_older_than(Utc::now() - Duration::days(3))
                .await
                .unwrap();
            assert_eq!(deleted, 1);
            id
        };

        let store = FileLogStore::open(dir.path().to_path_buf()).await.unwrap();
        assert!(store.select_recent(10).await.unwrap().is_empty());
        let next = store.insert(new_record(days_ago(0), "new mail")).await.unwrap();
        assert!(next > first);
    }

    #[tokio::test]
    async fn opens_bare_record_array() {
        let dir = TempDir::new().unwrap();
        let legacy = json!([
            { "id": 4, "received_at": null, "data": { "subject": "old format" } }
        ]);
        std::fs::write(dir.path().join(LOG_FILE), legacy.to_string()).unwrap();

        let store = FileLogStore::open(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(store.select_recent(10).await.unwrap().len(), 1);
        assert_eq!(store.insert(new_record(days_ago(0), "next")).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn failed_insert_leaves_table_unchanged() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("logs");
        let store = FileLogStore::open(data_dir.clone()).await.unwrap();
        let kept = store.insert(new_record(days_ago(0), "kept")).await.unwrap();

        std::fs::remove_dir_all(&data_dir).unwrap();
        let err = store.insert(new_record(days_ago(0), "lost")).await.err().unwrap();
        assert!(matches!(err, Error::PersistenceFailure(_)));

        let records = store.select_recent(10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, kept);

        // The failed insert did not burn an id.
        std::fs::create_dir_all(&data_dir).unwrap();
        assert_eq!(store.insert(new_record(days_ago(0), "again")).await.unwrap(), kept + 1);
    }

    #[tokio::test]
    async fn failed_delete_restores_records() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("logs");
        let store = FileLogStore::open(data_dir.clone()).await.unwrap();
        store.insert(new_record(days_ago(5), "stale")).await.unwrap();

        std::fs::remove_dir_all(&data_dir).unwrap();
        let err = store
            .delete_older_than(Utc::now() - Duration::days(3))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::PersistenceFailure(_)));
        assert_eq!(store.select_recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn open_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(LOG_FILE), "not json").unwrap();
        let err = FileLogStore::open(dir.path().to_path_buf()).await.err().unwrap();
        assert!(matches!(err, Error::PersistenceFailure(_)));
    }
}
