use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

pub const DEFAULT_ROOM_NAME: &str = "Untitled Chat";

/// Role tag on a stored message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_db_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "assistant" => MessageRole::Assistant,
            "system" => MessageRole::System,
            _ => MessageRole::User,
        }
    }
}

/// A named conversation scope holding an append-only message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Room listing entry with derived message stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub message_count: usize,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// One message in a room's log. Append-only; never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub room_id: String,
    pub user_id: Option<String>,
    pub user_name: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

pub struct ChatDatabase {
    conn: Mutex<Connection>,
}

impl ChatDatabase {
    /// Helper to lock the connection
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS rooms (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS room_participants (
                room_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                joined_at TEXT NOT NULL,
                PRIMARY KEY (room_id, user_id)
            )"#,
            [],
        )?;

        // seq tiebreaks messages created within the same timestamp so the
        // window order stays stable under concurrent sends.
        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                room_id TEXT NOT NULL,
                user_id TEXT,
                user_name TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_room_created ON messages(room_id, created_at)",
            [],
        )?;

        Ok(())
    }

    /// Create a room and record the creator as its first participant.
    pub fn create_room(&self, name: Option<&str>, created_by: &str) -> Result<Room> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let name = name
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_ROOM_NAME)
            .to_string();

        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO rooms (id, name, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, created_by, now_str],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO room_participants (room_id, user_id, joined_at)
             VALUES (?1, ?2, ?3)",
            params![id, created_by, now_str],
        )?;

        Ok(Room {
            id,
            name,
            created_by: created_by.to_string(),
            created_at: now,
        })
    }

    pub fn get_room(&self, room_id: &str) -> Result<Option<Room>> {
        let conn = self.lock_conn()?;
        let room = conn
            .prepare("SELECT id, name, created_by, created_at FROM rooms WHERE id = ?1")?
            .query_row([room_id], |row| {
                Ok(Room {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_by: row.get(2)?,
                    created_at: parse_timestamp(3, row.get::<_, String>(3)?)?,
                })
            })
            .optional()
            .context("Failed to look up room")?;
        Ok(room)
    }

    /// List rooms, most recently active first.
    pub fn list_rooms(&self, limit: usize) -> Result<Vec<RoomSummary>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT
                   r.id,
                   r.name,
                   r.created_by,
                   r.created_at,
                   COUNT(m.id) as message_count,
                   MAX(m.created_at) as last_message_at
               FROM rooms r
               LEFT JOIN messages m ON m.room_id = r.id
               GROUP BY r.id
               ORDER BY COALESCE(MAX(m.created_at), r.created_at) DESC
               LIMIT ?1"#,
        )?;

        let rooms = stmt
            .query_map([limit], |row| {
                let last_message_at_str: Option<String> = row.get(5)?;
                Ok(RoomSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_by: row.get(2)?,
                    created_at: parse_timestamp(3, row.get::<_, String>(3)?)?,
                    message_count: row.get::<_, i64>(4)? as usize,
                    last_message_at: last_message_at_str
                        .map(|raw| parse_timestamp(5, raw))
                        .transpose()?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rooms)
    }

    /// Destroy a room along with its messages and participant rows. This is
    /// the only bulk delete in the system; individual messages are never
    /// removed. Returns false when the room did not exist.
    pub fn delete_room(&self, room_id: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM messages WHERE room_id = ?1", [room_id])?;
        conn.execute(
            "DELETE FROM room_participants WHERE room_id = ?1",
            [room_id],
        )?;
        let deleted = conn.execute("DELETE FROM rooms WHERE id = ?1", [room_id])?;
        Ok(deleted > 0)
    }

    pub fn add_participant(&self, room_id: &str, user_id: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO room_participants (room_id, user_id, joined_at)
             VALUES (?1, ?2, ?3)",
            params![room_id, user_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn remove_participant(&self, room_id: &str, user_id: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "DELETE FROM room_participants WHERE room_id = ?1 AND user_id = ?2",
            params![room_id, user_id],
        )?;
        Ok(())
    }

    /// Append a message to a room's log and return the stored row.
    pub fn insert_message(
        &self,
        room_id: &str,
        user_id: Option<&str>,
        user_name: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<StoredMessage> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO messages (id, room_id, user_id, user_name, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                room_id,
                user_id,
                user_name,
                role.as_db_str(),
                content,
                now.to_rfc3339(),
            ],
        )?;

        Ok(StoredMessage {
            id,
            room_id: room_id.to_string(),
            user_id: user_id.map(str::to_string),
            user_name: user_name.to_string(),
            role,
            content: content.to_string(),
            created_at: now,
        })
    }

    /// Get the most recent `limit` messages of a room in chronological order.
    /// This is the conversation window fed to the assistant and the payload
    /// of the message-listing route.
    pub fn recent_messages(&self, room_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, room_id, user_id, user_name, role, content, created_at FROM messages
             WHERE room_id = ?1
             ORDER BY created_at DESC, seq DESC
             LIMIT ?2",
        )?;

        let messages = stmt
            .query_map(params![room_id, limit], |row| {
                let role_raw: String = row.get(4)?;
                Ok(StoredMessage {
                    id: row.get(0)?,
                    room_id: row.get(1)?,
                    user_id: row.get(2)?,
                    user_name: row.get(3)?,
                    role: MessageRole::from_db(&role_raw),
                    content: row.get(5)?,
                    created_at: parse_timestamp(6, row.get::<_, String>(6)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        // Reverse to get chronological order
        Ok(messages.into_iter().rev().collect())
    }
}

fn parse_timestamp(column: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_db(dir: &tempfile::TempDir) -> ChatDatabase {
        ChatDatabase::new(dir.path().join("test.db")).unwrap()
    }

    #[test]
    fn create_room_defaults_name_and_adds_creator() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);

        let room = db.create_room(None, "user-1").unwrap();
        assert_eq!(room.name, DEFAULT_ROOM_NAME);
        assert_eq!(room.created_by, "user-1");

        let named = db.create_room(Some("  Lunch plans "), "user-2").unwrap();
        assert_eq!(named.name, "Lunch plans");

        let fetched = db.get_room(&room.id).unwrap().unwrap();
        assert_eq!(fetched.id, room.id);
        assert!(db.get_room("missing").unwrap().is_none());
    }

    #[test]
    fn role_round_trips_through_storage() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let room = db.create_room(Some("roles"), "u1").unwrap();

        db.insert_message(&room.id, Some("u1"), "Alice", MessageRole::User, "hello there")
            .unwrap();
        db.insert_message(&room.id, None, "ChatGPT", MessageRole::Assistant, "hi Alice")
            .unwrap();
        db.insert_message(&room.id, Some("u2"), "Bob", MessageRole::System, "Bob joined the chat")
            .unwrap();

        let messages = db.recent_messages(&room.id, 10).unwrap();
        let roles: Vec<MessageRole> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![MessageRole::User, MessageRole::Assistant, MessageRole::System]
        );
        assert_eq!(messages[1].user_id, None);
    }

    #[test]
    fn window_is_bounded_and_chronological() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let room = db.create_room(Some("busy"), "u1").unwrap();

        for i in 0..60 {
            db.insert_message(
                &room.id,
                Some("u1"),
                "Alice",
                MessageRole::User,
                &format!("message {}", i),
            )
            .unwrap();
        }

        let window = db.recent_messages(&room.id, 50).unwrap();
        assert_eq!(window.len(), 50);
        // Most recent 50, oldest first.
        assert_eq!(window.first().unwrap().content, "message 10");
        assert_eq!(window.last().unwrap().content, "message 59");

        assert!(db.recent_messages(&room.id, 0).unwrap().is_empty());
    }

    #[test]
    fn messages_scoped_to_their_room() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let a = db.create_room(Some("a"), "u1").unwrap();
        let b = db.create_room(Some("b"), "u1").unwrap();

        db.insert_message(&a.id, Some("u1"), "Alice", MessageRole::User, "room a message")
            .unwrap();
        db.insert_message(&b.id, Some("u1"), "Alice", MessageRole::User, "room b message")
            .unwrap();

        let window = db.recent_messages(&a.id, 50).unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].content, "room a message");
    }

    #[test]
    fn delete_room_removes_messages() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let room = db.create_room(Some("doomed"), "u1").unwrap();
        db.insert_message(&room.id, Some("u1"), "Alice", MessageRole::User, "goodbye world")
            .unwrap();

        assert!(db.delete_room(&room.id).unwrap());
        assert!(db.get_room(&room.id).unwrap().is_none());
        assert!(db.recent_messages(&room.id, 50).unwrap().is_empty());
        assert!(!db.delete_room(&room.id).unwrap());
    }

    #[test]
    fn list_rooms_includes_message_stats() {
        let dir = tempdir().unwrap();
        let db = open_db(&dir);
        let quiet = db.create_room(Some("quiet"), "u1").unwrap();
        let busy = db.create_room(Some("busy"), "u1").unwrap();
        db.insert_message(&busy.id, Some("u1"), "Alice", MessageRole::User, "only message here")
            .unwrap();

        let rooms = db.list_rooms(10).unwrap();
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].id, busy.id);
        assert_eq!(rooms[0].message_count, 1);
        assert!(rooms[0].last_message_at.is_some());
        let quiet_summary = rooms.iter().find(|r| r.id == quiet.id).unwrap();
        assert_eq!(quiet_summary.message_count, 0);
        assert!(quiet_summary.last_message_at.is_none());
    }
}
