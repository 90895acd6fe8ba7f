//! SQLite people store: who the patient knows, what has been noted about
//! them, and past conversations.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Memory notes fed into a summary, newest first.
pub const SUMMARY_MEMORY_LIMIT: usize = 10;
/// Conversation transcripts fed into a summary, newest first.
pub const SUMMARY_CONVERSATION_LIMIT: usize = 5;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("failed to create data directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("person not found: {0}")]
    PersonNotFound(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Person {
    pub id: String,
    pub name: String,
    pub relationship: String,
    pub photo_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Everything a summary is generated from.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonContext {
    pub person: Person,
    /// Newest first, at most [`SUMMARY_MEMORY_LIMIT`].
    pub memories: Vec<String>,
    /// Newest first, at most [`SUMMARY_CONVERSATION_LIMIT`].
    pub conversations: Vec<String>,
}

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS people (
        id           TEXT PRIMARY KEY,
        name         TEXT NOT NULL,
        relationship TEXT NOT NULL,
        photo_url    TEXT,
        created_at   TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS memory_updates (
        id         TEXT PRIMARY KEY,
        person_id  TEXT NOT NULL REFERENCES people(id) ON DELETE CASCADE,
        text       TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_memory_person ON memory_updates(person_id, created_at);
    CREATE TABLE IF NOT EXISTS conversation_history (
        id         TEXT PRIMARY KEY,
        person_id  TEXT NOT NULL REFERENCES people(id) ON DELETE CASCADE,
        transcript TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_conversation_person ON conversation_history(person_id, created_at);
";

pub struct Store {
    conn: tokio_rusqlite::Connection,
}

impl Store {
    /// Open (or create) the store at `path`, creating parent directories.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = tokio_rusqlite::Connection::open(path).await?;
        let store = Self { conn };
        store.migrate().await?;
        tracing::info!(path = %path.display(), "people store opened");
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = Self { conn };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn add_person(
        &self,
        name: &str,
        relationship: &str,
        photo_url: Option<&str>,
    ) -> Result<Person, StoreError> {
        let person = Person {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            relationship: relationship.to_string(),
            photo_url: photo_url.map(str::to_string),
            created_at: Utc::now(),
        };
        let row = person.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO people (id, name, relationship, photo_url, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        row.id,
                        row.name,
                        row.relationship,
                        row.photo_url,
                        timestamp(&row.created_at)
                    ],
                )?;
                Ok(())
            })
            .await?;
        tracing::info!(id = %person.id, name = %person.name, "person added");
        Ok(person)
    }

    pub async fn get_person(&self, id: &str) -> Result<Option<Person>, StoreError> {
        let id = id.to_string();
        let person = self
            .conn
            .call(move |conn| {
                let person = conn
                    .query_row(
                        "SELECT id, name, relationship, photo_url, created_at
                         FROM people WHERE id = ?1",
                        params![id],
                        person_from_row,
                    )
                    .optional()?;
                Ok(person)
            })
            .await?;
        Ok(person)
    }

    pub async fn list_people(&self) -> Result<Vec<Person>, StoreError> {
        let people = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, relationship, photo_url, created_at
                     FROM people ORDER BY name COLLATE NOCASE",
                )?;
                let people = stmt
                    .query_map([], person_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(people)
            })
            .await?;
        Ok(people)
    }

    /// Record a memory note about a person.
    pub async fn add_memory(&self, person_id: &str, text: &str) -> Result<(), StoreError> {
        self.append("memory_updates", "text", person_id, text).await
    }

    /// Record a conversation transcript with a person.
    pub async fn add_conversation(&self, person_id: &str, transcript: &str) -> Result<(), StoreError> {
        self.append("conversation_history", "transcript", person_id, transcript)
            .await
    }

    async fn append(
        &self,
        table: &'static str,
        column: &'static str,
        person_id: &str,
        body: &str,
    ) -> Result<(), StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let person = person_id.to_string();
        let body = body.to_string();
        let inserted = self
            .conn
            .call(move |conn| {
                let exists = conn
                    .query_row("SELECT 1 FROM people WHERE id = ?1", params![person], |_| Ok(()))
                    .optional()?
                    .is_some();
                if !exists {
                    return Ok(false);
                }
                conn.execute(
                    &format!(
                        "INSERT INTO {table} (id, person_id, {column}, created_at)
                         VALUES (?1, ?2, ?3, ?4)"
                    ),
                    params![id, person, body, timestamp(&Utc::now())],
                )?;
                Ok(true)
            })
            .await?;

        if !inserted {
            return Err(StoreError::PersonNotFound(person_id.to_string()));
        }
        tracing::debug!(table, person_id, "entry added");
        Ok(())
    }

    /// Load a person with their most recent memories and conversations.
    pub async fn person_context(&self, id: &str) -> Result<Option<PersonContext>, StoreError> {
        let Some(person) = self.get_person(id).await? else {
            return Ok(None);
        };

        let person_id = person.id.clone();
        let (memories, conversations) = self
            .conn
            .call(move |conn| {
                let memories = recent(conn, "memory_updates", "text", &person_id, SUMMARY_MEMORY_LIMIT)?;
                let conversations = recent(
                    conn,
                    "conversation_history",
                    "transcript",
                    &person_id,
                    SUMMARY_CONVERSATION_LIMIT,
                )?;
                Ok((memories, conversations))
            })
            .await?;

        Ok(Some(PersonContext {
            person,
            memories,
            conversations,
        }))
    }

    #[cfg(test)]
    pub(crate) async fn drop_table(&self, table: &'static str) {
        self.conn
            .call(move |conn| Ok(conn.execute_batch(&format!("DROP TABLE {table}"))?))
            .await
            .unwrap();
    }
}

fn recent(
    conn: &rusqlite::Connection,
    table: &str,
    column: &str,
    person_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {column} FROM {table} WHERE person_id = ?1
         ORDER BY created_at DESC, rowid DESC LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![person_id, limit as i64], |row| row.get(0))?;
    rows.collect()
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn person_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Person> {
    let created_at: String = row.get(4)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?
        .with_timezone(&Utc);
    Ok(Person {
        id: row.get(0)?,
        name: row.get(1)?,
        relationship: row.get(2)?,
        photo_url: row.get(3)?,
        created_at,
    })
}
