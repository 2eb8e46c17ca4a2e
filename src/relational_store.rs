//! Relational store for sessions, chat history, and upload metadata (spec
//! §3, §5). Grounded on `parallax-labs-context-harness/src/db.rs` (WAL
//! connect) and `src/migrate.rs` (idempotent `CREATE TABLE IF NOT EXISTS`
//! schema). Chunk/entity/fact/concept/case content lives in the graph store;
//! this store owns only session-scoped bookkeeping that is naturally
//! relational.

use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{Message, MessageRole, Session, Upload};

#[derive(Clone)]
pub struct RelationalStore {
    pool: SqlitePool,
}

impl RelationalStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                token_count INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS uploads (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                file_name TEXT NOT NULL,
                byte_size INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_session_id ON messages(session_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_session_created ON messages(session_id, created_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_uploads_session_id ON uploads(session_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn create_session(&self, name: &str) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO sessions (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.name)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(session)
    }

    pub async fn rename_session(&self, session_id: &str, name: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET name = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(Utc::now().to_rfc3339())
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query("SELECT id, name, created_at, updated_at FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_session(&r)).transpose()
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query("SELECT id, name, created_at, updated_at FROM sessions ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_session).collect()
    }

    /// Hard delete: spec §4.3 requires `SessionGone` for any subsequent
    /// reference (P6).
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM uploads WHERE session_id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn record_upload(&self, session_id: &str, file_name: &str, byte_size: i64) -> Result<Upload> {
        let upload = Upload {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            file_name: file_name.to_string(),
            byte_size,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO uploads (id, session_id, file_name, byte_size, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&upload.id)
        .bind(&upload.session_id)
        .bind(&upload.file_name)
        .bind(upload.byte_size)
        .bind(upload.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(upload)
    }

    /// Looks up a prior upload by its dedup key (spec §6: duplicate uploads
    /// keyed by `(session_id, file_name, size)` are rejected with 409).
    pub async fn find_upload(
        &self,
        session_id: &str,
        file_name: &str,
        byte_size: i64,
    ) -> Result<Option<Upload>> {
        let row = sqlx::query(
            "SELECT id, session_id, file_name, byte_size, created_at FROM uploads \
             WHERE session_id = ? AND file_name = ? AND byte_size = ? LIMIT 1",
        )
        .bind(session_id)
        .bind(file_name)
        .bind(byte_size)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_upload(&r)).transpose()
    }

    /// Appends a message (I5: history is append-only within a session).
    pub async fn append_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        token_count: i64,
    ) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            token_count,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO messages (id, session_id, role, content, token_count, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.token_count)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(message.created_at.to_rfc3339())
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(message)
    }

    /// All messages in a session, oldest first — the full append-only log
    /// (used by the history endpoint).
    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, token_count, created_at FROM messages \
             WHERE session_id = ? ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    /// Walks history newest-first accumulating `token_count` until the
    /// budget would be exceeded, then returns the kept slice in
    /// chronological order (spec §4.6: the Answerer's bounded history
    /// window).
    pub async fn recent_messages_within_budget(
        &self,
        session_id: &str,
        token_budget: i64,
    ) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, token_count, created_at FROM messages \
             WHERE session_id = ? ORDER BY created_at DESC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        let mut kept = Vec::new();
        let mut spent = 0i64;
        for row in &rows {
            let message = row_to_message(row)?;
            if spent + message.token_count > token_budget && !kept.is_empty() {
                break;
            }
            spent += message.token_count;
            kept.push(message);
        }
        kept.reverse();
        Ok(kept)
    }
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created_at: chrono::DateTime::parse_from_rfc3339(row.try_get::<String, _>("created_at")?.as_str())?
            .with_timezone(&Utc),
        updated_at: chrono::DateTime::parse_from_rfc3339(row.try_get::<String, _>("updated_at")?.as_str())?
            .with_timezone(&Utc),
    })
}

fn row_to_upload(row: &sqlx::sqlite::SqliteRow) -> Result<Upload> {
    Ok(Upload {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        file_name: row.try_get("file_name")?,
        byte_size: row.try_get("byte_size")?,
        created_at: chrono::DateTime::parse_from_rfc3339(row.try_get::<String, _>("created_at")?.as_str())?
            .with_timezone(&Utc),
    })
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message> {
    let role_str: String = row.try_get("role")?;
    Ok(Message {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        role: role_str.parse()?,
        content: row.try_get("content")?,
        token_count: row.try_get("token_count")?,
        created_at: chrono::DateTime::parse_from_rfc3339(row.try_get::<String, _>("created_at")?.as_str())?
            .with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn in_memory_store() -> RelationalStore {
        RelationalStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn create_and_fetch_session_roundtrips() {
        let store = in_memory_store().await;
        let session = store.create_session("Matter 123").await.unwrap();
        let fetched = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "Matter 123");
    }

    #[tokio::test]
    async fn delete_session_removes_messages_and_uploads() {
        let store = in_memory_store().await;
        let session = store.create_session("Matter 123").await.unwrap();
        store
            .append_message(&session.id, MessageRole::User, "hello", 1)
            .await
            .unwrap();
        store.record_upload(&session.id, "doc.pdf", 100).await.unwrap();

        store.delete_session(&session.id).await.unwrap();

        assert!(store.get_session(&session.id).await.unwrap().is_none());
        assert!(store.list_messages(&session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn messages_are_append_only_and_ordered() {
        let store = in_memory_store().await;
        let session = store.create_session("Matter 123").await.unwrap();
        store
            .append_message(&session.id, MessageRole::User, "first", 1)
            .await
            .unwrap();
        store
            .append_message(&session.id, MessageRole::Assistant, "second", 1)
            .await
            .unwrap();

        let messages = store.list_messages(&session.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].content, "second");
    }

    #[tokio::test]
    async fn find_upload_matches_on_session_file_name_and_size_only() {
        let store = in_memory_store().await;
        let session = store.create_session("Matter 123").await.unwrap();
        store.record_upload(&session.id, "doc.pdf", 100).await.unwrap();

        assert!(store.find_upload(&session.id, "doc.pdf", 100).await.unwrap().is_some());
        assert!(store.find_upload(&session.id, "doc.pdf", 200).await.unwrap().is_none());
        assert!(store.find_upload(&session.id, "other.pdf", 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recent_messages_within_budget_keeps_at_least_one_and_trims_older() {
        let store = in_memory_store().await;
        let session = store.create_session("Matter 123").await.unwrap();
        for i in 0..5 {
            store
                .append_message(&session.id, MessageRole::User, &format!("msg {i}"), 100)
                .await
                .unwrap();
        }

        let kept = store
            .recent_messages_within_budget(&session.id, 250)
            .await
            .unwrap();

        assert!(kept.len() >= 1 && kept.len() <= 3);
        assert_eq!(kept.last().unwrap().content, "msg 4");
    }
}
