use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{next_timestamp, validate_text, ConversationStore, StoreError};
use crate::models::{Message, SafetyFlag, Sender, Session};

#[derive(Debug, Default)]
struct MemoryState {
    sessions: HashMap<Uuid, Session>,
    /// Session ids in creation order
    created: Vec<Uuid>,
    messages: HashMap<Uuid, Vec<Message>>,
}

impl MemoryState {
    fn insert_session(&mut self) -> Session {
        let session = Session::new();
        self.created.push(session.id);
        self.messages.insert(session.id, Vec::new());
        self.sessions.insert(session.id, session.clone());
        session
    }
}

/// Process-local store. A single lock covers sessions and messages, so a
/// flagged append and the crisis flag it raises are never seen apart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_session(&self) -> Result<Session, StoreError> {
        let session = self.state.write().await.insert_session();
        tracing::debug!(session_id = %session.id, "Session created");
        Ok(session)
    }

    async fn session(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.state.read().await.sessions.get(&id).cloned())
    }

    async fn append(
        &self,
        session_id: Uuid,
        sender: Sender,
        text: &str,
        safety_flag: Option<SafetyFlag>,
    ) -> Result<Message, StoreError> {
        let text = validate_text(text)?;
        let mut state = self.state.write().await;
        let state = &mut *state;

        let session = state
            .sessions
            .get_mut(&session_id)
            .ok_or(StoreError::UnknownSession(session_id))?;
        let messages = state.messages.entry(session_id).or_default();

        let message = Message {
            id: Uuid::new_v4(),
            session_id,
            sender,
            created_at: next_timestamp(messages.last().map(|m| m.created_at), Utc::now()),
            text: text.to_string(),
            safety_flag,
        };

        if let Some(flag) = safety_flag {
            session.mark_crisis(flag);
        }
        messages.push(message.clone());

        Ok(message)
    }

    async fn messages_for(&self, session_id: Uuid) -> Result<Vec<Message>, StoreError> {
        let state = self.state.read().await;
        if !state.sessions.contains_key(&session_id) {
            return Err(StoreError::UnknownSession(session_id));
        }
        Ok(state.messages.get(&session_id).cloned().unwrap_or_default())
    }

    async fn active_or_new_session(&self) -> Result<Session, StoreError> {
        let mut state = self.state.write().await;

        let active = state
            .created
            .iter()
            .rev()
            .filter_map(|id| state.sessions.get(id))
            .find(|s| s.is_open())
            .cloned();

        match active {
            Some(session) => Ok(session),
            None => {
                let session = state.insert_session();
                tracing::debug!(session_id = %session.id, "No open session, created one");
                Ok(session)
            }
        }
    }

    async fn end_session(&self, session_id: Uuid) -> Result<Session, StoreError> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(&session_id)
            .ok_or(StoreError::UnknownSession(session_id))?;
        if session.ended_at.is_none() {
            session.ended_at = Some(Utc::now());
        }
        Ok(session.clone())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
