//! PostgreSQL-backed conversation store.
//!
//! Every append runs in one transaction that locks the session row, so the
//! message insert and the crisis-flag update commit together and appends to
//! one session serialize at the database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{next_timestamp, validate_text, ConversationStore, StoreError};
use crate::models::{Message, SafetyFlag, Sender, Session};

/// Advisory lock key guarding "find open session or create one".
const ACTIVE_SESSION_LOCK_KEY: i64 = 0x50_4c_41_43_45;

const SESSION_COLUMNS: &str = "id, created_at, ended_at, crisis_flag, crisis_reason";

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    session_id: Uuid,
    sender: String,
    created_at: DateTime<Utc>,
    text: String,
    safety_flag: Option<String>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let sender = Sender::parse(&row.sender)
            .ok_or_else(|| StoreError::Corrupt(format!("message {} has sender '{}'", row.id, row.sender)))?;
        let safety_flag = match row.safety_flag.as_deref() {
            None => None,
            Some(code) => Some(SafetyFlag::parse(code).ok_or_else(|| {
                StoreError::Corrupt(format!("message {} has safety flag '{}'", row.id, code))
            })?),
        };

        Ok(Message {
            id: row.id,
            session_id: row.session_id,
            sender,
            created_at: row.created_at,
            text: row.text,
            safety_flag,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_session<'e, E>(executor: E) -> Result<Session, StoreError>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let mut session = Session::new();
        session.created_at = next_timestamp(None, session.created_at);
        sqlx::query(
            "INSERT INTO sessions (id, created_at, ended_at, crisis_flag, crisis_reason) \
             VALUES ($1, $2, NULL, FALSE, NULL)",
        )
        .bind(session.id)
        .bind(session.created_at)
        .execute(executor)
        .await?;
        Ok(session)
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn create_session(&self) -> Result<Session, StoreError> {
        let session = Self::insert_session(&self.pool).await?;
        tracing::debug!(session_id = %session.id, "Session created");
        Ok(session)
    }

    async fn session(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "SELECT {} FROM sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn append(
        &self,
        session_id: Uuid,
        sender: Sender,
        text: &str,
        safety_flag: Option<SafetyFlag>,
    ) -> Result<Message, StoreError> {
        let text = validate_text(text)?;
        let mut tx = self.pool.begin().await?;

        let locked: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM sessions WHERE id = $1 FOR UPDATE")
                .bind(session_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(StoreError::UnknownSession(session_id));
        }

        let last: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(created_at) FROM messages WHERE session_id = $1")
                .bind(session_id)
                .fetch_one(&mut *tx)
                .await?;

        let message = Message {
            id: Uuid::new_v4(),
            session_id,
            sender,
            created_at: next_timestamp(last, Utc::now()),
            text: text.to_string(),
            safety_flag,
        };

        sqlx::query(
            "INSERT INTO messages (id, session_id, sender, created_at, text, safety_flag) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(message.id)
        .bind(message.session_id)
        .bind(message.sender.as_str())
        .bind(message.created_at)
        .bind(&message.text)
        .bind(message.safety_flag.map(|f| f.as_str()))
        .execute(&mut *tx)
        .await?;

        if let Some(flag) = safety_flag {
            sqlx::query(
                "UPDATE sessions SET crisis_flag = TRUE, \
                 crisis_reason = COALESCE(crisis_reason, $2) WHERE id = $1",
            )
            .bind(session_id)
            .bind(flag.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(message)
    }

    async fn messages_for(&self, session_id: Uuid) -> Result<Vec<Message>, StoreError> {
        if self.session(session_id).await?.is_none() {
            return Err(StoreError::UnknownSession(session_id));
        }

        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, session_id, sender, created_at, text, safety_flag \
             FROM messages WHERE session_id = $1 ORDER BY created_at, seq",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Message::try_from).collect()
    }

    async fn active_or_new_session(&self) -> Result<Session, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(ACTIVE_SESSION_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let open = sqlx::query_as::<_, Session>(&format!(
            "SELECT {} FROM sessions WHERE ended_at IS NULL \
             ORDER BY created_at DESC LIMIT 1",
            SESSION_COLUMNS
        ))
        .fetch_optional(&mut *tx)
        .await?;

        let session = match open {
            Some(session) => session,
            None => {
                let session = Self::insert_session(&mut *tx).await?;
                tracing::debug!(session_id = %session.id, "No open session, created one");
                session
            }
        };

        tx.commit().await?;
        Ok(session)
    }

    async fn end_session(&self, session_id: Uuid) -> Result<Session, StoreError> {
        let session = sqlx::query_as::<_, Session>(&format!(
            "UPDATE sessions SET ended_at = COALESCE(ended_at, $2) WHERE id = $1 RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        session.ok_or(StoreError::UnknownSession(session_id))
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

// ============================================================================
// Tests — require a local PostgreSQL; skipped when unavailable
// ============================================================================
