//! Data Access Layer
//!
//! A PostgreSQL implementation of the core `SessionRepository`, built on
//! `sqlx` connection pooling. Queries are checked at runtime so the crate
//! builds without a live database.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use monica_core::repository::SessionRepository;
use monica_core::session::{ExtensionState, Message, MessageRole, NewMessage, Session, TraineeProfile};
use monica_core::stage::Stage;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const SESSION_COLUMNS: &str =
    "id, name, role, headquarters, division, current_stage, extension_state, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, session_id, role, content, stage, created_at";

#[derive(FromRow)]
struct SessionRow {
    id: Uuid,
    name: Option<String>,
    role: Option<String>,
    headquarters: Option<String>,
    division: Option<String>,
    current_stage: String,
    extension_state: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for Session {
    type Error = anyhow::Error;

    fn try_from(row: SessionRow) -> Result<Self> {
        let extension_state = match row.extension_state {
            Value::Object(map) => ExtensionState(map),
            Value::Null => ExtensionState::new(),
            other => bail!("extension_state of session {} is not an object: {other}", row.id),
        };
        Ok(Session {
            id: row.id,
            profile: TraineeProfile {
                name: row.name,
                role: row.role,
                headquarters: row.headquarters,
                division: row.division,
            },
            current_stage: row.current_stage.parse()?,
            extension_state,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: i64,
    session_id: Uuid,
    role: String,
    content: String,
    stage: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        let stage: Stage = row.stage.parse()?;
        Ok(Message {
            id: row.id,
            session_id: row.session_id,
            role: row.role.parse::<MessageRole>()?,
            content: row.content,
            stage,
            // The stored persona column is informational; the stage decides.
            persona: stage.persona(),
            created_at: row.created_at,
        })
    }
}

/// A wrapper around the `PgPool` implementing session storage.
#[derive(Clone)]
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    /// Creates a new `PgSessionRepository` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn create(&self) -> Result<Session> {
        let row: SessionRow = sqlx::query_as(&format!(
            "INSERT INTO coaching_sessions (id, current_stage) VALUES ($1, $2) RETURNING {SESSION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(Stage::FIRST.as_str())
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert session")?;
        row.try_into()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM coaching_sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Session::try_from).transpose()
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE coaching_sessions
            SET name = $2, role = $3, headquarters = $4, division = $5,
                current_stage = $6, extension_state = $7, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(session.id)
        .bind(&session.profile.name)
        .bind(&session.profile.role)
        .bind(&session.profile.headquarters)
        .bind(&session.profile.division)
        .bind(session.current_stage.as_str())
        .bind(Value::Object(session.extension_state.0.clone()))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("cannot save unknown session {}", session.id);
        }
        Ok(())
    }

    async fn append_message(&self, session_id: Uuid, message: NewMessage) -> Result<Message> {
        let row: MessageRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO coaching_messages (session_id, role, content, stage, persona)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.stage.as_str())
        .bind(message.persona.as_str())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to append message to session {session_id}"))?;
        row.try_into()
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM coaching_messages WHERE session_id = $1 ORDER BY id ASC"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Message::try_from).collect()
    }
}
