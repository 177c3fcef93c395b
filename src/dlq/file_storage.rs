use crate::dlq::{
    compute_statistics, DeadLetterEntry, DlqStatistics, DlqStorage, EntryStatus,
};
use crate::error::{RelayGuardError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// One line in the append-only log. Every record is self-describing, so
/// the live set can be rebuilt by a forward scan after a crash.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogRecord {
    Put { entry: DeadLetterEntry },
    Remove { id: String },
}

/// File-backed dead letter storage: an append-only JSON-lines log plus an
/// in-memory index of the live entries. Concurrent senders serialize on
/// the write lock; the file is only ever appended to (except by `compact`).
pub struct FileDlqStorage {
    path: PathBuf,
    index: RwLock<HashMap<String, DeadLetterEntry>>,
    write_lock: Mutex<()>,
}

impl FileDlqStorage {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let index = Self::replay(&path)?;
        info!(
            "Opened file DLQ at {:?} with {} live entries",
            path,
            index.len()
        );

        Ok(Self {
            path,
            index: RwLock::new(index),
            write_lock: Mutex::new(()),
        })
    }

    /// Rebuild the live set from the log. A torn tail line (crash during
    /// append) parses as an error and is skipped with a warning.
    fn replay(path: &PathBuf) -> Result<HashMap<String, DeadLetterEntry>> {
        let mut index = HashMap::new();

        if !path.exists() {
            return Ok(index);
        }

        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogRecord>(&line) {
                Ok(LogRecord::Put { entry }) => {
                    index.insert(entry.id.clone(), entry);
                }
                Ok(LogRecord::Remove { id }) => {
                    index.remove(&id);
                }
                Err(e) => {
                    warn!("Skipping unparseable DLQ log line: {}", e);
                }
            }
        }

        Ok(index)
    }

    fn append(&self, record: &LogRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", json)?;
        file.sync_data()?;
        Ok(())
    }

    /// Rewrite the log so it holds exactly the live set. Used by operator
    /// tooling to reclaim space from superseded records.
    pub async fn compact(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let index = self.index.read().await;

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            for entry in index.values() {
                let record = LogRecord::Put {
                    entry: entry.clone(),
                };
                writeln!(file, "{}", serde_json::to_string(&record)?)?;
            }
            file.sync_data()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        debug!("Compacted DLQ log to {} entries", index.len());
        Ok(())
    }
}

#[async_trait::async_trait]
impl DlqStorage for FileDlqStorage {
    async fn store(&self, entry: &DeadLetterEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.append(&LogRecord::Put {
            entry: entry.clone(),
        })?;
        let mut index = self.index.write().await;
        index.insert(entry.id.clone(), entry.clone());
        debug!("Stored dead letter entry {} to {:?}", entry.id, self.path);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DeadLetterEntry>> {
        let index = self.index.read().await;
        Ok(index.get(id).cloned())
    }

    async fn update(&self, entry: &DeadLetterEntry) -> Result<()> {
        {
            let index = self.index.read().await;
            if !index.contains_key(&entry.id) {
                return Err(RelayGuardError::NotFound(format!(
                    "dead letter entry {}",
                    entry.id
                )));
            }
        }
        let _guard = self.write_lock.lock().await;
        self.append(&LogRecord::Put {
            entry: entry.clone(),
        })?;
        let mut index = self.index.write().await;
        index.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.append(&LogRecord::Remove { id: id.to_string() })?;
        let mut index = self.index.write().await;
        index.remove(id);
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: EntryStatus,
        limit: usize,
    ) -> Result<Vec<DeadLetterEntry>> {
        let index = self.index.read().await;
        let mut matching: Vec<_> = index
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
        let index = self.index.read().await;
        let mut matching: Vec<_> = index
            .values()
            .filter(|e| e.dependency == dependency)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn statistics(&self) -> Result<DlqStatistics> {
        let index = self.index.read().await;
        Ok(compute_statistics(index.values()))
    }

    async fn clear_dependency(&self, dependency: &str) -> Result<usize> {
        let ids: Vec<String> = {
            let index = self.index.read().await;
            index
                .values()
                .filter(|e| e.dependency == dependency)
                .map(|e| e.id.clone())
                .collect()
        };

        for id in &ids {
            self.remove(id).await?;
        }

        Ok(ids.len())
    }
}
