use crate::dlq::{DeadLetterEntry, DlqStatistics, DlqStorage, EntryStatus};
use crate::error::{RelayGuardError, Result};
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use tracing::debug;

const ALL_STATUSES: [EntryStatus; 4] = [
    EntryStatus::Pending,
    EntryStatus::InFlight,
    EntryStatus::Reprocessed,
    EntryStatus::Dead,
];

/// Redis-backed dead letter storage (the managed-queue production backend).
/// Entries live under string keys; status and dependency sorted-set indexes
/// are maintained atomically alongside them.
pub struct RedisDlqStorage {
    client: Client,
    key_prefix: String,
}

impl RedisDlqStorage {
    pub fn new(redis_url: &str, key_prefix: String) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            RelayGuardError::Config(format!("Failed to create Redis client: {}", e))
        })?;

        Ok(Self { client, key_prefix })
    }

    fn entry_key(&self, id: &str) -> String {
        format!("{}:dlq:entry:{}", self.key_prefix, id)
    }

    fn status_index_key(&self, status: EntryStatus) -> String {
        format!("{}:dlq:status:{}", self.key_prefix, status.as_str())
    }

    fn dependency_index_key(&self, dependency: &str) -> String {
        format!("{}:dlq:dep:{}", self.key_prefix, dependency)
    }

    fn all_entries_key(&self) -> String {
        format!("{}:dlq:all", self.key_prefix)
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RelayGuardError::Redis(e.to_string()))
    }

    async fn fetch_entries(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        ids: Vec<String>,
    ) -> Result<Vec<DeadLetterEntry>> {
        let mut entries = Vec::with_capacity(ids.len());

        for id in ids {
            let data: Option<String> = conn
                .get(self.entry_key(&id))
                .await
                .map_err(|e| RelayGuardError::Redis(e.to_string()))?;

            if let Some(data) = data {
                let entry: DeadLetterEntry = serde_json::from_str(&data)?;
                entries.push(entry);
            }
        }

        Ok(entries)
    }

    fn range_stop(limit: usize) -> isize {
        if limit == usize::MAX || limit == 0 {
            -1
        } else {
            limit as isize - 1
        }
    }
}

#[async_trait::async_trait]
impl DlqStorage for RedisDlqStorage {
    async fn store(&self, entry: &DeadLetterEntry) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let entry_data = serde_json::to_string(entry)?;
        let score = entry.created_at.timestamp();

        redis::pipe()
            .atomic()
            .set(self.entry_key(&entry.id), &entry_data)
            .zadd(self.status_index_key(entry.status), &entry.id, score)
            .zadd(self.dependency_index_key(&entry.dependency), &entry.id, score)
            .zadd(self.all_entries_key(), &entry.id, score)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| {
                RelayGuardError::Redis(format!("Failed to store dead letter entry: {}", e))
            })?;

        debug!("Stored dead letter entry {} in Redis", entry.id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DeadLetterEntry>> {
        let mut conn = self.get_connection().await?;

        let data: Option<String> = conn
            .get(self.entry_key(id))
            .await
            .map_err(|e| RelayGuardError::Redis(e.to_string()))?;

        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, entry: &DeadLetterEntry) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let entry_data = serde_json::to_string(entry)?;
        let score = entry.created_at.timestamp();

        // The previous status is unknown here, so drop the id from every
        // status index before re-adding it under the current one.
        let mut pipe = redis::pipe();
        pipe.atomic().set(self.entry_key(&entry.id), &entry_data);
        for status in ALL_STATUSES {
            pipe.zrem(self.status_index_key(status), &entry.id);
        }
        pipe.zadd(self.status_index_key(entry.status), &entry.id, score);

        pipe.query_async::<_, ()>(&mut conn).await.map_err(|e| {
            RelayGuardError::Redis(format!("Failed to update dead letter entry: {}", e))
        })?;

        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let entry = match self.get(id).await? {
            Some(entry) => entry,
            None => return Ok(()),
        };

        let mut conn = self.get_connection().await?;

        let mut pipe = redis::pipe();
        pipe.atomic().del(self.entry_key(id));
        for status in ALL_STATUSES {
            pipe.zrem(self.status_index_key(status), id);
        }
        pipe.zrem(self.dependency_index_key(&entry.dependency), id)
            .zrem(self.all_entries_key(), id);

        pipe.query_async::<_, ()>(&mut conn).await.map_err(|e| {
            RelayGuardError::Redis(format!("Failed to remove dead letter entry: {}", e))
        })?;

        Ok(())
    }

    async fn list_by_status(
        &self,
        status: EntryStatus,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>> {
        let mut conn = self.get_connection().await?;

        let ids: Vec<String> = conn
            .zrange(self.status_index_key(status), 0, Self::range_stop(limit))
            .await
            .map_err(|e| RelayGuardError::Redis(e.to_string()))?;

        self.fetch_entries(&mut conn, ids).await
    }

    async fn list_by_dependency(
        &self,
        dependency: &str,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>> {
        let mut conn = self.get_connection().await?;

        let ids: Vec<String> = conn
            .zrange(
                self.dependency_index_key(dependency),
                0,
                Self::range_stop(limit),
            )
            .await
            .map_err(|e| RelayGuardError::Redis(e.to_string()))?;

        self.fetch_entries(&mut conn, ids).await
    }

    async fn statistics(&self) -> Result<DlqStatistics> {
        let mut conn = self.get_connection().await?;

        let ids: Vec<String> = conn
            .zrange(self.all_entries_key(), 0, -1)
            .await
            .map_err(|e| RelayGuardError::Redis(e.to_string()))?;

        let entries = self.fetch_entries(&mut conn, ids).await?;

        let mut by_status: HashMap<String, usize> = HashMap::new();
        let mut by_dependency: HashMap<String, usize> = HashMap::new();
        let mut oldest = None;
        let mut newest = None;

        for entry in &entries {
            *by_status
                .entry(entry.status.as_str().to_string())
                .or_insert(0) += 1;
            *by_dependency
                .entry(entry.dependency.clone())
                .or_insert(0) += 1;

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

        Ok(DlqStatistics {
            total_entries: entries.len(),
            entries_by_status: by_status,
            entries_by_dependency: by_dependency,
            oldest_entry: oldest,
            newest_entry: newest,
        })
    }

    async fn clear_dependency(&self, dependency: &str) -> Result<usize> {
        let mut conn = self.get_connection().await?;

        let ids: Vec<String> = conn
            .zrange(self.dependency_index_key(dependency), 0, -1)
            .await
            .map_err(|e| RelayGuardError::Redis(e.to_string()))?;

        let count = ids.len();
        for id in ids {
            self.remove(&id).await?;
        }

        Ok(count)
    }
}
