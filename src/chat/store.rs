use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors raised by the session store.
#[derive(Debug, Error)]
pub enum ChatStoreError {
    /// Filesystem operation failed.
    #[error("Session storage failed: {0}")]
    Io(#[from] std::io::Error),
    /// Stored session file could not be decoded.
    #[error("Malformed session file: {0}")]
    Serde(#[from] serde_json::Error),
    /// The named session does not exist.
    #[error("Session not found: {0}")]
    NotFound(String),
    /// Session id is not usable as a file name.
    #[error("Invalid session id: {0}")]
    InvalidId(String),
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The person asking questions.
    User,
    /// The generated answer.
    Assistant,
}

impl Sender {
    /// Label used when formatting conversation history for prompts.
    pub fn label(self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message author.
    pub sender: Sender,
    /// Message text.
    pub text: String,
}

/// Session id and title, as returned by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// Session identifier.
    pub id: String,
    /// Display title.
    pub title: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    id: String,
    title: String,
    messages: Vec<ChatMessage>,
}

impl SessionRecord {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            title: default_title(id),
            messages: Vec::new(),
        }
    }
}

/// Default title assigned to a fresh session.
fn default_title(id: &str) -> String {
    let prefix: String = id.chars().take(8).collect();
    format!("Chat-{prefix}")
}

/// File-backed store of conversation sessions.
pub struct ChatSessionStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ChatSessionStore {
    /// Open (and create if needed) the session store under
    /// `data_dir/sessions`.
    pub fn open(data_dir: &Path) -> Result<Self, ChatStoreError> {
        let root = data_dir.join("sessions");
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Conversation history for `session_id`. Unknown sessions read as empty:
    /// the session materializes on its first append.
    pub async fn history(&self, session_id: &str) -> Result<Vec<ChatMessage>, ChatStoreError> {
        validate_id(session_id)?;
        match self.read_record(session_id).await? {
            Some(record) => Ok(record.messages),
            None => Ok(Vec::new()),
        }
    }

    /// Append one message, creating the session (with its default title) on
    /// first use.
    pub async fn append(
        &self,
        session_id: &str,
        message: ChatMessage,
    ) -> Result<(), ChatStoreError> {
        validate_id(session_id)?;
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;

        let mut record = self
            .read_record(session_id)
            .await?
            .unwrap_or_else(|| SessionRecord::new(session_id));
        record.messages.push(message);
        self.write_record(&record).await
    }

    /// List every stored session, sorted by id for stable output.
    pub async fn list(&self) -> Result<Vec<SessionSummary>, ChatStoreError> {
        let mut sessions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            let record: SessionRecord = serde_json::from_slice(&bytes)?;
            sessions.push(SessionSummary {
                id: record.id,
                title: record.title,
            });
        }
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sessions)
    }

    /// Whether the session exists on disk.
    pub async fn exists(&self, session_id: &str) -> Result<bool, ChatStoreError> {
        validate_id(session_id)?;
        Ok(tokio::fs::try_exists(self.path_for(session_id)).await?)
    }

    /// Rename an existing session. Unknown sessions are an error: a rename
    /// must never create a phantom conversation.
    pub async fn rename(&self, session_id: &str, title: &str) -> Result<(), ChatStoreError> {
        validate_id(session_id)?;
        let lock = self.lock_for(session_id).await;
        let _guard = lock.lock().await;

        let mut record = self
            .read_record(session_id)
            .await?
            .ok_or_else(|| ChatStoreError::NotFound(session_id.to_string()))?;
        record.title = title.to_string();
        self.write_record(&record).await
    }

    /// Delete a session. Returns `false` when it was already absent.
    pub async fn delete(&self, session_id: &str) -> Result<bool, ChatStoreError> {
        validate_id(session_id)?;
        let lock = self.lock_for(session_id).await;
        let result = {
            let _guard = lock.lock().await;
            match tokio::fs::remove_file(self.path_for(session_id)).await {
                Ok(()) => Ok(true),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(err) => Err(err.into()),
            }
        };
        drop(lock);
        self.evict_lock(session_id).await;
        result
    }

    async fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Drop the lock entry for a deleted session unless another task still
    /// holds a clone. Callers must have released their own clone first.
    async fn evict_lock(&self, session_id: &str) {
        let mut locks = self.locks.lock().await;
        if locks
            .get(session_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(session_id);
        }
    }

    #[cfg(test)]
    async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }

    async fn read_record(&self, session_id: &str) -> Result<Option<SessionRecord>, ChatStoreError> {
        match tokio::fs::read(self.path_for(session_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_record(&self, record: &SessionRecord) -> Result<(), ChatStoreError> {
        let encoded = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(self.path_for(&record.id), encoded).await?;
        Ok(())
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{session_id}.json"))
    }
}

fn validate_id(session_id: &str) -> Result<(), ChatStoreError> {
    let valid = !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ChatStoreError::InvalidId(session_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn message(sender: Sender, text: &str) -> ChatMessage {
        ChatMessage {
            sender,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn unknown_session_reads_as_empty_history() {
        let dir = TempDir::new().expect("tempdir");
        let store = ChatSessionStore::open(dir.path()).expect("store");
        let history = store.history("missing-id").await.expect("history");
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn append_creates_the_session_with_a_default_title() {
        let dir = TempDir::new().expect("tempdir");
        let store = ChatSessionStore::open(dir.path()).expect("store");

        store
            .append("abcd1234-rest", message(Sender::User, "hello"))
            .await
            .expect("append");

        let sessions = store.list().await.expect("list");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].title, "Chat-abcd1234");

        let history = store.history("abcd1234-rest").await.expect("history");
        assert_eq!(history, vec![message(Sender::User, "hello")]);
    }

    #[tokio::test]
    async fn messages_keep_their_order() {
        let dir = TempDir::new().expect("tempdir");
        let store = ChatSessionStore::open(dir.path()).expect("store");

        store
            .append("s1", message(Sender::User, "question"))
            .await
            .expect("append");
        store
            .append("s1", message(Sender::Assistant, "answer"))
            .await
            .expect("append");

        let history = store.history("s1").await.expect("history");
        assert_eq!(history[0].sender, Sender::User);
        assert_eq!(history[1].sender, Sender::Assistant);
    }

    #[tokio::test]
    async fn concurrent_appends_lose_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(ChatSessionStore::open(dir.path()).expect("store"));

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .append("shared", message(Sender::User, &format!("msg-{i}")))
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("append");
        }

        assert_eq!(store.history("shared").await.expect("history").len(), 16);
    }

    #[tokio::test]
    async fn rename_unknown_session_is_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let store = ChatSessionStore::open(dir.path()).expect("store");
        let error = store.rename("ghost", "New title").await.unwrap_err();
        assert!(matches!(error, ChatStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn rename_and_delete_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let store = ChatSessionStore::open(dir.path()).expect("store");

        store
            .append("s2", message(Sender::User, "hi"))
            .await
            .expect("append");
        store.rename("s2", "Quarterly report chat").await.expect("rename");

        let sessions = store.list().await.expect("list");
        assert_eq!(sessions[0].title, "Quarterly report chat");

        assert!(store.delete("s2").await.expect("delete"));
        assert!(!store.delete("s2").await.expect("second delete"));
        assert!(store.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn delete_releases_the_per_session_lock_entry() {
        let dir = TempDir::new().expect("tempdir");
        let store = ChatSessionStore::open(dir.path()).expect("store");

        store
            .append("s4", message(Sender::User, "hi"))
            .await
            .expect("append");
        assert_eq!(store.lock_count().await, 1);

        assert!(store.delete("s4").await.expect("delete"));
        assert_eq!(store.lock_count().await, 0);
    }

    #[tokio::test]
    async fn path_escaping_ids_are_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let store = ChatSessionStore::open(dir.path()).expect("store");
        let error = store.history("../etc/passwd").await.unwrap_err();
        assert!(matches!(error, ChatStoreError::InvalidId(_)));
    }
}
