//! Session storage capability.
//!
//! The orchestrator only needs the operations of [`SessionRepository`]; the
//! storage engine behind it is an external collaborator. An in-memory
//! implementation is provided for tests and for running without a database.

use crate::session::{Message, NewMessage, Session};
use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Defines the contract for any store of sessions and their transcripts.
///
/// `append_message` must assign sequence numbers atomically so concurrent
/// writers never collide or reorder.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Persists a brand-new session in its initial state.
    async fn create(&self) -> Result<Session>;

    /// Loads a session, or `None` when the id is unknown.
    async fn get(&self, id: Uuid) -> Result<Option<Session>>;

    /// Writes back the mutable parts of a session.
    async fn save(&self, session: &Session) -> Result<()>;

    /// Appends one transcript entry and returns it with its assigned sequence.
    async fn append_message(&self, session_id: Uuid, message: NewMessage) -> Result<Message>;

    /// The full transcript in sequence order.
    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<Message>>;
}

#[derive(Default)]
struct MemoryStore {
    sessions: HashMap<Uuid, Session>,
    messages: HashMap<Uuid, Vec<Message>>,
    next_message_id: i64,
}

/// A process-local repository backed by a mutex-guarded map.
#[derive(Default)]
pub struct InMemorySessionRepository {
    store: Mutex<MemoryStore>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> Result<std::sync::MutexGuard<'_, MemoryStore>> {
        self.store
            .lock()
            .map_err(|_| anyhow::anyhow!("in-memory session store is poisoned"))
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create(&self) -> Result<Session> {
        let session = Session::new(Uuid::new_v4());
        let mut store = self.store()?;
        store.sessions.insert(session.id, session.clone());
        store.messages.insert(session.id, Vec::new());
        Ok(session)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.store()?.sessions.get(&id).cloned())
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let mut store = self.store()?;
        match store.sessions.get_mut(&session.id) {
            Some(stored) => {
                *stored = session.clone();
                stored.updated_at = Utc::now();
                Ok(())
            }
            None => bail!("cannot save unknown session {}", session.id),
        }
    }

    async fn append_message(&self, session_id: Uuid, message: NewMessage) -> Result<Message> {
        let mut store = self.store()?;
        if !store.sessions.contains_key(&session_id) {
            bail!("cannot append to unknown session {}", session_id);
        }
        store.next_message_id += 1;
        let stored = Message {
            id: store.next_message_id,
            session_id,
            role: message.role,
            content: message.content,
            stage: message.stage,
            persona: message.persona,
            created_at: Utc::now(),
        };
        store
            .messages
            .entry(session_id)
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<Message>> {
        Ok(self
            .store()?
            .messages
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MessageRole;
    use crate::stage::Stage;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_then_get() {
        let repo = InMemorySessionRepository::new();
        let session = repo.create().await.unwrap();
        let loaded = repo.get(session.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.current_stage, Stage::Setup);
        assert!(repo.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_unknown_session_fails() {
        let repo = InMemorySessionRepository::new();
        let stray = Session::new(Uuid::new_v4());
        assert!(repo.save(&stray).await.is_err());
    }

    #[tokio::test]
    async fn test_append_to_unknown_session_fails() {
        let repo = InMemorySessionRepository::new();
        let stray = Session::new(Uuid::new_v4());
        let msg = NewMessage::for_session(&stray, MessageRole::User, "hi");
        assert!(repo.append_message(stray.id, msg).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_appends_get_unique_ordered_ids() {
        let repo = Arc::new(InMemorySessionRepository::new());
        let session = repo.create().await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..32 {
            let repo = repo.clone();
            let session = session.clone();
            tasks.push(tokio::spawn(async move {
                let msg = NewMessage::for_session(&session, MessageRole::User, format!("m{i}"));
                repo.append_message(session.id, msg).await.unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let transcript = repo.list_messages(session.id).await.unwrap();
        assert_eq!(transcript.len(), 32);
        assert!(transcript.windows(2).all(|w| w[0].id < w[1].id));
    }
}
