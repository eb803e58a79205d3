//! Conversation store — append-only sessions and messages.
//!
//! Appending a flagged message and raising its session's crisis flag happen
//! in one atomic step in every implementation.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Local, SubsecRound, TimeZone, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Message, SafetyFlag, Sender, Session};

pub use memory::MemoryStore;
pub use postgres::PgConversationStore;

/// Idle time after which the UI should greet again.
pub const GREETING_IDLE_HOURS: i64 = 6;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unknown session {0}")]
    UnknownSession(Uuid),

    #[error("message text is empty")]
    EmptyMessage,

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_session(&self) -> Result<Session, StoreError>;

    async fn session(&self, id: Uuid) -> Result<Option<Session>, StoreError>;

    /// Append a message. A `safety_flag` raises the session's crisis flag in
    /// the same step.
    async fn append(
        &self,
        session_id: Uuid,
        sender: Sender,
        text: &str,
        safety_flag: Option<SafetyFlag>,
    ) -> Result<Message, StoreError>;

    /// Messages of a session ordered by creation time.
    async fn messages_for(&self, session_id: Uuid) -> Result<Vec<Message>, StoreError>;

    /// Most recently created open session, or a fresh one if none is open.
    async fn active_or_new_session(&self) -> Result<Session, StoreError>;

    /// Set the end timestamp. Ending an ended session changes nothing.
    async fn end_session(&self, session_id: Uuid) -> Result<Session, StoreError>;

    async fn should_greet_at(
        &self,
        session_id: Uuid,
        now: DateTime<FixedOffset>,
    ) -> Result<bool, StoreError> {
        let messages = self.messages_for(session_id).await?;
        Ok(greeting_due(messages.last(), now))
    }

    async fn should_greet(&self, session_id: Uuid) -> Result<bool, StoreError> {
        self.should_greet_at(session_id, Local::now().fixed_offset())
            .await
    }

    /// Store name for logging and health output.
    fn name(&self) -> &str;
}

/// True when there is no last message, it is from another calendar day (in
/// `now`'s offset), or more than six hours have passed since it.
pub fn greeting_due<Tz: TimeZone>(last: Option<&Message>, now: DateTime<Tz>) -> bool {
    let Some(last) = last else {
        return true;
    };

    let last_local = last.created_at.with_timezone(&now.timezone());
    if last_local.date_naive() != now.date_naive() {
        return true;
    }

    now.with_timezone(&Utc) - last.created_at > Duration::hours(GREETING_IDLE_HOURS)
}

/// Creation timestamp for the next message of a session: microsecond
/// precision and strictly after `last`.
pub(crate) fn next_timestamp(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = now.trunc_subsecs(6);
    match last {
        Some(last) if now <= last => last + Duration::microseconds(1),
        _ => now,
    }
}

pub(crate) fn validate_text(text: &str) -> Result<&str, StoreError> {
    if text.trim().is_empty() {
        Err(StoreError::EmptyMessage)
    } else {
        Ok(text)
    }
}
