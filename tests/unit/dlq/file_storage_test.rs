// Unit tests for the append-only file DLQ backend

use relayguard::dlq::{DeadLetterEntry, DlqStorage, EntryStatus, ErrorInfo, FileDlqStorage};
use relayguard::RelayGuardError;
use std::io::Write;

#[cfg(test)]
mod file_storage_tests {
    use super::*;

    fn create_entry(dependency: &str, n: u64) -> DeadLetterEntry {
        DeadLetterEntry::new(
            dependency.to_string(),
            serde_json::json!({"n": n}),
            ErrorInfo::from_error(&RelayGuardError::Timeout("slow".to_string())),
        )
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlq.jsonl");

        let first = create_entry("sms_api", 1);
        let second = create_entry("email_api", 2);

        {
            let storage = FileDlqStorage::new(path.clone()).unwrap();
            storage.store(&first).await.unwrap();
            storage.store(&second).await.unwrap();

            let mut updated = first.clone();
            updated.status = EntryStatus::Reprocessed;
            storage.update(&updated).await.unwrap();

            storage.remove(&second.id).await.unwrap();
        }

        // Replay the log from disk
        let storage = FileDlqStorage::new(path).unwrap();

        let replayed = storage.get(&first.id).await.unwrap().unwrap();
        assert_eq!(replayed.status, EntryStatus::Reprocessed);
        assert_eq!(replayed.payload["n"], 1);

        assert!(storage.get(&second.id).await.unwrap().is_none());

        let stats = storage.statistics().await.unwrap();
        assert_eq!(stats.total_entries, 1);
    }

    #[tokio::test]
    async fn test_tolerates_torn_tail_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlq.jsonl");

        let entry = create_entry("sms_api", 1);
        {
            let storage = FileDlqStorage::new(path.clone()).unwrap();
            storage.store(&entry).await.unwrap();
        }

        // Simulate a crash mid-write
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        file.write_all(b"{\"op\":\"put\",\"entry\":{\"id\":\"trunc").unwrap();
        drop(file);

        let storage = FileDlqStorage::new(path).unwrap();
        let replayed = storage.get(&entry.id).await.unwrap();
        assert!(replayed.is_some());

        let stats = storage.statistics().await.unwrap();
        assert_eq!(stats.total_entries, 1);
    }

    #[tokio::test]
    async fn test_listing_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlq.jsonl");
        let storage = FileDlqStorage::new(path).unwrap();

        for n in 0..3 {
            storage.store(&create_entry("sms_api", n)).await.unwrap();
        }
        storage.store(&create_entry("email_api", 9)).await.unwrap();

        let pending = storage
            .list_by_status(EntryStatus::Pending, 10)
            .await
            .unwrap();
        assert_eq!(pending.len(), 4);

        let sms = storage.list_by_dependency("sms_api", 10).await.unwrap();
        assert_eq!(sms.len(), 3);

        let removed = storage.clear_dependency("sms_api").await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(storage.statistics().await.unwrap().total_entries, 1);
    }

    #[tokio::test]
    async fn test_compact_rewrites_live_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dlq.jsonl");

        let keep = create_entry("sms_api", 1);
        let drop_entry = create_entry("sms_api", 2);

        {
            let storage = FileDlqStorage::new(path.clone()).unwrap();
            storage.store(&keep).await.unwrap();
            storage.store(&drop_entry).await.unwrap();
            storage.remove(&drop_entry.id).await.unwrap();
            storage.compact().await.unwrap();
        }

        // The compacted log replays to the same live set
        let storage = FileDlqStorage::new(path.clone()).unwrap();
        assert!(storage.get(&keep.id).await.unwrap().is_some());
        assert!(storage.get(&drop_entry.id).await.unwrap().is_none());

        // Compaction leaves only live records in the file
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_entry_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileDlqStorage::new(dir.path().join("dlq.jsonl")).unwrap();

        let entry = create_entry("sms_api", 1);
        let result = storage.update(&entry).await;
        assert!(matches!(result, Err(RelayGuardError::NotFound(_))));
    }
}
