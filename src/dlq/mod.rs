mod file_storage;
mod redis_storage;

pub use file_storage::FileDlqStorage;
pub use redis_storage::RedisDlqStorage;

use crate::config::DlqSettings;
use crate::error::{RelayGuardError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Lifecycle status of a dead letter entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Awaiting reprocessing
    Pending,
    /// Handed out to a consumer; returns to Pending if not resolved
    /// within the visibility timeout
    InFlight,
    /// Terminal: successfully reprocessed, archived in place
    Reprocessed,
    /// Terminal: reprocessing ceiling exceeded, no further automatic attempts
    Dead,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::InFlight => "in_flight",
            EntryStatus::Reprocessed => "reprocessed",
            EntryStatus::Dead => "dead",
        }
    }
}

/// Error context captured with a failed work item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorInfo {
    pub fn from_error(error: &RelayGuardError) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Dead letter entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Unique identifier for this entry
    pub id: String,

    /// The dependency whose protected call failed
    pub dependency: String,

    /// The original work-item payload
    pub payload: serde_json::Value,

    /// The error that caused the failure
    pub error: ErrorInfo,

    /// Number of reprocessing attempts so far
    pub attempt_count: u32,

    pub status: EntryStatus,

    pub created_at: DateTime<Utc>,

    /// Set while the entry is handed out to a consumer
    pub in_flight_since: Option<DateTime<Utc>>,

    /// When reprocessing was last attempted
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl DeadLetterEntry {
    pub fn new(dependency: String, payload: serde_json::Value, error: ErrorInfo) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            dependency,
            payload,
            error,
            attempt_count: 0,
            status: EntryStatus::Pending,
            created_at: Utc::now(),
            in_flight_since: None,
            last_attempt_at: None,
        }
    }
}

/// Dead letter queue statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqStatistics {
    pub total_entries: usize,
    pub entries_by_status: HashMap<String, usize>,
    pub entries_by_dependency: HashMap<String, usize>,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

/// Durable storage backend for the dead letter queue
#[async_trait::async_trait]
pub trait DlqStorage: Send + Sync {
    /// Persist a new entry
    async fn store(&self, entry: &DeadLetterEntry) -> Result<()>;

    /// Retrieve a specific entry
    async fn get(&self, id: &str) -> Result<Option<DeadLetterEntry>>;

    /// Replace an existing entry
    async fn update(&self, entry: &DeadLetterEntry) -> Result<()>;

    /// Remove an entry
    async fn remove(&self, id: &str) -> Result<()>;

    /// Entries in a given status, oldest first
    async fn list_by_status(&self, status: EntryStatus, limit: usize)
        -> Result<Vec<DeadLetterEntry>>;

    /// Entries for a dependency, oldest first
    async fn list_by_dependency(
        &self,
        dependency: &str,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>>;

    async fn statistics(&self) -> Result<DlqStatistics>;

    /// Remove all entries for a dependency, returning the count removed
    async fn clear_dependency(&self, dependency: &str) -> Result<usize>;
}

/// In-memory dead letter storage for tests and development
pub struct InMemoryDlqStorage {
    entries: RwLock<HashMap<String, DeadLetterEntry>>,
}

impl InMemoryDlqStorage {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryDlqStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DlqStorage for InMemoryDlqStorage {
    async fn store(&self, entry: &DeadLetterEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DeadLetterEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.get(id).cloned())
    }

    async fn update(&self, entry: &DeadLetterEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(id);
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: EntryStatus,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>> {
        let entries = self.entries.read().await;
        let mut matching: Vec<_> = entries
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn list_by_dependency(
        &self,
        dependency: &str,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>> {
        let entries = self.entries.read().await;
        let mut matching: Vec<_> = entries
            .values()
            .filter(|e| e.dependency == dependency)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn statistics(&self) -> Result<DlqStatistics> {
        let entries = self.entries.read().await;
        Ok(compute_statistics(entries.values()))
    }

    async fn clear_dependency(&self, dependency: &str) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.dependency != dependency);
        Ok(before - entries.len())
    }
}

pub(crate) fn compute_statistics<'a, I>(entries: I) -> DlqStatistics
where
    I: Iterator<Item = &'a DeadLetterEntry>,
{
    let mut total = 0;
    let mut by_status: HashMap<String, usize> = HashMap::new();
    let mut by_dependency: HashMap<String, usize> = HashMap::new();
    let mut oldest: Option<DateTime<Utc>> = None;
    let mut newest: Option<DateTime<Utc>> = None;

    for entry in entries {
        total += 1;
        *by_status.entry(entry.status.as_str().to_string()).or_insert(0) += 1;
        *by_dependency.entry(entry.dependency.clone()).or_insert(0) += 1;

        match oldest {
            None => oldest = Some(entry.created_at),
            Some(old) if entry.created_at < old => oldest = Some(entry.created_at),
            _ => {}
        }
        match newest {
            None => newest = Some(entry.created_at),
            Some(new) if entry.created_at > new => newest = Some(entry.created_at),
            _ => {}
        }
    }

    DlqStatistics {
        total_entries: total,
        entries_by_status: by_status,
        entries_by_dependency: by_dependency,
        oldest_entry: oldest,
        newest_entry: newest,
    }
}

/// Select a storage backend from configuration
pub fn build_storage(settings: &DlqSettings) -> Result<Arc<dyn DlqStorage>> {
    match settings.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryDlqStorage::new())),
        "file" => {
            let path = settings.file_path.as_deref().ok_or_else(|| {
                RelayGuardError::Config("dlq.file_path is required for the file backend".into())
            })?;
            Ok(Arc::new(FileDlqStorage::new(path.into())?))
        }
        "redis" => {
            let url = settings.redis_url.as_deref().ok_or_else(|| {
                RelayGuardError::Config("dlq.redis_url is required for the redis backend".into())
            })?;
            Ok(Arc::new(RedisDlqStorage::new(
                url,
                settings.key_prefix.clone(),
            )?))
        }
        other => Err(RelayGuardError::Config(format!(
            "Unknown DLQ backend '{}' (expected memory, file or redis)",
            other
        ))),
    }
}

/// Dead letter queue manager
pub struct DeadLetterQueue {
    storage: Arc<dyn DlqStorage>,
    max_reprocess_attempts: u32,
    visibility_timeout: Duration,
}

impl DeadLetterQueue {
    pub fn new(
        storage: Arc<dyn DlqStorage>,
        max_reprocess_attempts: u32,
        visibility_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            max_reprocess_attempts,
            visibility_timeout,
        }
    }

    pub fn storage(&self) -> &Arc<dyn DlqStorage> {
        &self.storage
    }

    /// Capture a terminally-failed work item. Returns the entry id.
    ///
    /// Persistence failures are logged and swallowed: a DLQ write failure
    /// must never crash message processing.
    pub async fn send(
        &self,
        dependency: &str,
        payload: serde_json::Value,
        error_info: ErrorInfo,
    ) -> String {
        let entry = DeadLetterEntry::new(dependency.to_string(), payload, error_info);
        let id = entry.id.clone();

        warn!(
            "Adding work item to dead letter queue. Dependency: {}, Error: {}",
            entry.dependency, entry.error.message
        );

        match self.storage.store(&entry).await {
            Ok(()) => {
                crate::metrics::DEAD_LETTER_ENTRIES_TOTAL
                    .with_label_values(&[dependency])
                    .inc();
            }
            Err(e) => {
                error!(
                    "Failed to store dead letter entry for dependency '{}': {}",
                    dependency, e
                );
            }
        }

        id
    }

    /// Return up to `max` pending entries, marking them InFlight. Entries
    /// stuck InFlight past the visibility timeout are first returned to
    /// Pending, so a crashed consumer's batch becomes deliverable again.
    pub async fn receive(&self, max: usize) -> Result<Vec<DeadLetterEntry>> {
        self.requeue_expired().await?;

        let pending = self.storage.list_by_status(EntryStatus::Pending, max).await?;
        let mut delivered = Vec::with_capacity(pending.len());

        for mut entry in pending {
            entry.status = EntryStatus::InFlight;
            entry.in_flight_since = Some(Utc::now());
            self.storage.update(&entry).await?;
            delivered.push(entry);
        }

        debug!("Delivered {} dead letter entries", delivered.len());
        Ok(delivered)
    }

    async fn requeue_expired(&self) -> Result<()> {
        let in_flight = self
            .storage
            .list_by_status(EntryStatus::InFlight, usize::MAX)
            .await?;
        let now = Utc::now();

        for mut entry in in_flight {
            let expired = entry
                .in_flight_since
                .map(|t| (now - t).to_std().unwrap_or(Duration::ZERO) >= self.visibility_timeout)
                .unwrap_or(true);

            if expired {
                warn!(
                    "Dead letter entry {} exceeded visibility timeout, returning to Pending",
                    entry.id
                );
                entry.status = EntryStatus::Pending;
                entry.in_flight_since = None;
                self.storage.update(&entry).await?;
            }
        }

        Ok(())
    }

    /// Run a caller-supplied reprocessor against an entry's payload.
    ///
    /// Success archives the entry in place as Reprocessed. Failure
    /// increments the attempt count and returns the entry to Pending,
    /// or marks it Dead once the reprocessing ceiling is reached.
    /// Delivery is at-least-once; reprocessors must tolerate duplicates.
    pub async fn reprocess<F, Fut>(
        &self,
        id: &str,
        reprocessor: F,
    ) -> Result<DeadLetterEntry>
    where
        F: FnOnce(serde_json::Value) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut entry = self
            .storage
            .get(id)
            .await?
            .ok_or_else(|| RelayGuardError::NotFound(format!("dead letter entry {}", id)))?;

        match entry.status {
            EntryStatus::Reprocessed => {
                return Err(RelayGuardError::Validation(format!(
                    "entry {} is already reprocessed",
                    id
                )))
            }
            EntryStatus::Dead => {
                return Err(RelayGuardError::Validation(format!(
                    "entry {} is dead and excluded from reprocessing",
                    id
                )))
            }
            EntryStatus::Pending | EntryStatus::InFlight => {}
        }

        entry.last_attempt_at = Some(Utc::now());

        match reprocessor(entry.payload.clone()).await {
            Ok(()) => {
                info!("Successfully reprocessed dead letter entry {}", id);
                entry.status = EntryStatus::Reprocessed;
                entry.in_flight_since = None;
                self.storage.update(&entry).await?;
                crate::metrics::DEAD_LETTER_REPROCESS_TOTAL
                    .with_label_values(&[&entry.dependency, "success"])
                    .inc();
            }
            Err(e) => {
                entry.attempt_count += 1;
                entry.in_flight_since = None;

                if entry.attempt_count >= self.max_reprocess_attempts {
                    warn!(
                        "Dead letter entry {} reached reprocess ceiling ({}/{}), marking Dead",
                        id, entry.attempt_count, self.max_reprocess_attempts
                    );
                    entry.status = EntryStatus::Dead;
                } else {
                    warn!(
                        "Reprocessing dead letter entry {} failed ({}/{}): {}",
                        id, entry.attempt_count, self.max_reprocess_attempts, e
                    );
                    entry.status = EntryStatus::Pending;
                }
                self.storage.update(&entry).await?;
                let outcome = if entry.status == EntryStatus::Dead {
                    "dead"
                } else {
                    "failed"
                };
                crate::metrics::DEAD_LETTER_REPROCESS_TOTAL
                    .with_label_values(&[&entry.dependency, outcome])
                    .inc();
            }
        }

        Ok(entry)
    }

    pub async fn statistics(&self) -> Result<DlqStatistics> {
        self.storage.statistics().await
    }

    pub async fn clear_dependency(&self, dependency: &str) -> Result<usize> {
        let count = self.storage.clear_dependency(dependency).await?;
        info!(
            "Cleared {} dead letter entries for dependency '{}'",
            count, dependency
        );
        Ok(count)
    }
}
