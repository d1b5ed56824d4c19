use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ColloquyError, ColloquyResult};
use crate::models::{
    ConversationSnapshot, HistoryEntry, HistoryIndexEntry, HistorySearch, HistoryStats,
    SaveOptions, SessionMode,
};
use crate::storage::Storage;

const HISTORY_DIR: &str = "history";
const INDEX_FILE: &str = "index.json";
const RECORDS_DIR: &str = "conversations";

/// Durable catalogue of saved conversations.
///
/// Layout under the storage root:
///
/// ```text
/// history/index.json                  compact entries, newest first
/// history/conversations/<id>.json      one full record per conversation
/// ```
///
/// The record and the index are written separately; a crash between the two
/// can leave an orphaned record or a stale index entry. Updates to the index
/// are serialised across clones.
#[derive(Clone)]
pub struct HistoryIndex {
    storage: Arc<dyn Storage>,
    write_lock: Arc<Mutex<()>>,
}

impl HistoryIndex {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn location(&self) -> String {
        format!("{}/{}", self.storage.location(), HISTORY_DIR)
    }

    /// Write the full record and upsert its index entry.
    ///
    /// Saving an id that is already indexed replaces that entry in place;
    /// a new id is put at the front.
    pub async fn save_conversation(
        &self,
        snapshot: &ConversationSnapshot,
        options: &SaveOptions,
    ) -> ColloquyResult<HistoryIndexEntry> {
        let _guard = self.write_lock.lock().await;
        let mut index_entry = HistoryIndexEntry::from_snapshot(snapshot, &options.workspace);

        let mut entries = self.read_index().await?;
        if let Some(previous) = entries.iter().find(|e| e.id == index_entry.id) {
            index_entry.created_at = previous.created_at;
        }

        let record = HistoryEntry {
            index: index_entry.clone(),
            messages: snapshot.messages.clone(),
            trace: if options.include_trace {
                snapshot.trace.clone()
            } else {
                None
            },
        };
        let data = serde_json::to_vec_pretty(&record)?;
        self.storage
            .write(&record_key(&index_entry.file_name), &data)
            .await?;

        match entries.iter_mut().find(|e| e.id == index_entry.id) {
            Some(existing) => *existing = index_entry.clone(),
            None => entries.insert(0, index_entry.clone()),
        }
        self.write_index(&entries).await?;

        debug!(
            conversation_id = %index_entry.id,
            messages = index_entry.message_count,
            "Conversation saved to history"
        );
        Ok(index_entry)
    }

    pub async fn search(&self, search: &HistorySearch) -> ColloquyResult<Vec<HistoryIndexEntry>> {
        Ok(self
            .read_index()
            .await?
            .into_iter()
            .filter(|e| search.matches(e))
            .collect())
    }

    /// Every index entry, most recently saved first.
    pub async fn list(&self) -> ColloquyResult<Vec<HistoryIndexEntry>> {
        let mut entries = self.read_index().await?;
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(entries)
    }

    /// Load the full record of a conversation, if it was saved.
    pub async fn get(&self, id: &str) -> ColloquyResult<Option<HistoryEntry>> {
        let entries = self.read_index().await?;
        let file_name = entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.file_name.clone())
            .unwrap_or_else(|| crate::models::record_file_name(id));

        let Some(data) = self.storage.read(&record_key(&file_name)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&data)?))
    }

    /// Remove an entry and its record. Returns false when the id is unknown.
    pub async fn delete_conversation(&self, id: &str) -> ColloquyResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_index().await?;
        let Some(pos) = entries.iter().position(|e| e.id == id) else {
            return Ok(false);
        };

        let removed = entries.remove(pos);
        self.write_index(&entries).await?;
        if !self.storage.delete(&record_key(&removed.file_name)).await? {
            warn!(conversation_id = %id, "History record was already missing");
        }

        info!(conversation_id = %id, "Conversation deleted from history");
        Ok(true)
    }

    /// Remove every entry and record. Returns how many entries were indexed.
    pub async fn clear_all(&self) -> ColloquyResult<usize> {
        let _guard = self.write_lock.lock().await;
        let entries = self.read_index().await?;
        for entry in &entries {
            self.storage.delete(&record_key(&entry.file_name)).await?;
        }
        self.write_index(&[]).await?;

        info!(count = entries.len(), "History cleared");
        Ok(entries.len())
    }

    pub async fn stats(&self) -> ColloquyResult<HistoryStats> {
        let entries = self.read_index().await?;
        Ok(entries.iter().fold(HistoryStats::default(), |mut stats, e| {
            stats.total_conversations += 1;
            stats.total_messages += e.message_count;
            match e.mode {
                SessionMode::Single => stats.single_stage += 1,
                SessionMode::TwoStage => stats.two_stage += 1,
            }
            stats
        }))
    }

    async fn read_index(&self) -> ColloquyResult<Vec<HistoryIndexEntry>> {
        match self.storage.read(&index_key()).await? {
            Some(data) => serde_json::from_slice(&data).map_err(|e| {
                ColloquyError::SerializationError(format!("Corrupt history index: {}", e))
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn write_index(&self, entries: &[HistoryIndexEntry]) -> ColloquyResult<()> {
        let data = serde_json::to_vec_pretty(entries)?;
        self.storage.write(&index_key(), &data).await
    }
}

fn index_key() -> String {
    format!("{}/{}", HISTORY_DIR, INDEX_FILE)
}

fn record_key(file_name: &str) -> String {
    format!("{}/{}/{}", HISTORY_DIR, RECORDS_DIR, file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMessage, Conversation, ModelBinding};
    use crate::storage::MemoryStorage;

    fn snapshot(id: &str, messages: Vec<ChatMessage>) -> ConversationSnapshot {
        ConversationSnapshot {
            conversation: Conversation::new(
                id,
                ModelBinding::Single {
                    provider: "mock".to_string(),
                    model: "echo".to_string(),
                },
            ),
            messages,
            trace: None,
        }
    }

    fn index() -> HistoryIndex {
        HistoryIndex::new(Arc::new(MemoryStorage::new()))
    }

    #[tokio::test]
    async fn test_save_twice_keeps_one_entry() {
        let history = index();
        let options = SaveOptions::default();

        history
            .save_conversation(&snapshot("c1", vec![ChatMessage::user("first")]), &options)
            .await
            .unwrap();
        history
            .save_conversation(&snapshot("c1", vec![ChatMessage::user("second")]), &options)
            .await
            .unwrap();

        let entries = history.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "second");

        let record = history.get("c1").await.unwrap().unwrap();
        assert_eq!(record.messages.len(), 1);
        assert_eq!(record.messages[0].content, "second");
    }

    #[tokio::test]
    async fn test_new_entries_are_prepended() {
        let history = index();
        let options = SaveOptions::default();
        for id in ["a", "b", "c"] {
            history
                .save_conversation(&snapshot(id, vec![ChatMessage::user(id)]), &options)
                .await
                .unwrap();
        }

        let ids: Vec<String> = history
            .search(&HistorySearch::new())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_delete_reports_missing() {
        let history = index();
        history
            .save_conversation(&snapshot("c1", vec![]), &SaveOptions::default())
            .await
            .unwrap();

        assert!(history.delete_conversation("c1").await.unwrap());
        assert!(!history.delete_conversation("c1").await.unwrap());
        assert!(history.get("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trace_only_embedded_when_requested() {
        let history = index();
        let mut snap = snapshot("c1", vec![ChatMessage::user("hi")]);
        snap.trace = Some(crate::models::ConversationTrace::new("c1", "mock", "echo"));

        history
            .save_conversation(&snap, &SaveOptions::default())
            .await
            .unwrap();
        assert!(history.get("c1").await.unwrap().unwrap().trace.is_none());

        history
            .save_conversation(&snap, &SaveOptions::default().with_trace())
            .await
            .unwrap();
        assert!(history.get("c1").await.unwrap().unwrap().trace.is_some());
    }

    #[tokio::test]
    async fn test_clear_all_and_stats() {
        let history = index();
        let options = SaveOptions::new("repo");
        history
            .save_conversation(
                &snapshot("a", vec![ChatMessage::user("x"), ChatMessage::assistant("y")]),
                &options,
            )
            .await
            .unwrap();
        history
            .save_conversation(&snapshot("b", vec![ChatMessage::user("z")]), &options)
            .await
            .unwrap();

        let stats = history.stats().await.unwrap();
        assert_eq!(stats.total_conversations, 2);
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.single_stage, 2);

        assert_eq!(history.clear_all().await.unwrap(), 2);
        assert!(history.list().await.unwrap().is_empty());
        assert!(history.get("a").await.unwrap().is_none());
    }
}
