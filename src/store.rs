//! Durable panel state in a small SQLite key-value table.
//!
//! Each key holds the whole current value as JSON; writes replace it
//! outright. Reads never fail from the caller's point of view: a missing
//! or unreadable value comes back as `None` / empty.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, warn};

use crate::conversation::{now_ms, Message};
use crate::geometry::GeometryRecord;

pub const GEOMETRY_KEY: &str = "geometry";
pub const LOG_KEY: &str = "conversationLog";

pub struct PanelStore {
    conn: Connection,
}

impl PanelStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS panel_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(PanelStore { conn })
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM panel_state WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO panel_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now_ms()],
        )?;
        Ok(())
    }

    pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        debug!(key, bytes = json.len(), "saving panel state");
        self.put_raw(key, &json)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM panel_state WHERE key = ?1", [key])?;
        Ok(())
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.get_raw(key) {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("stored {} is malformed, using defaults: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("could not read stored {}, using defaults: {}", key, e);
                None
            }
        }
    }

    pub fn load_geometry(&self) -> Option<GeometryRecord> {
        self.load(GEOMETRY_KEY)
    }

    pub fn load_log(&self) -> Vec<Message> {
        self.load(LOG_KEY).unwrap_or_default()
    }

    pub fn save_geometry(&self, record: &GeometryRecord) -> Result<()> {
        self.put(GEOMETRY_KEY, record)
    }

    pub fn save_log(&self, messages: &[Message]) -> Result<()> {
        self.put(LOG_KEY, messages)
    }

    pub fn clear_log(&self) -> Result<()> {
        self.remove(LOG_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::Attachment;
    use crate::conversation::Role;

    fn record() -> GeometryRecord {
        GeometryRecord {
            width: 512.0,
            height: 640.0,
            edge_offset_a: 12.0,
            edge_offset_b: 34.0,
        }
    }

    #[test]
    fn test_empty_store_yields_nothing() {
        let store = PanelStore::open_in_memory().unwrap();
        assert_eq!(store.load_geometry(), None);
        assert!(store.load_log().is_empty());
    }

    #[test]
    fn test_round_trip_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("panel.sqlite");
        let log = vec![
            Message::new(Role::User, "hi", vec![Attachment::file("a.txt", b"abc")]),
            Message::assistant("hello"),
        ];

        {
            let store = PanelStore::open(&path).unwrap();
            store.save_geometry(&record()).unwrap();
            store.save_log(&log).unwrap();
        }

        let store = PanelStore::open(&path).unwrap();
        assert_eq!(store.load_geometry(), Some(record()));
        assert_eq!(store.load_log(), log);
    }

    #[test]
    fn test_save_overwrites_whole_value() {
        let store = PanelStore::open_in_memory().unwrap();
        store.save_log(&[Message::assistant("one"), Message::assistant("two")]).unwrap();
        store.save_log(&[Message::assistant("three")]).unwrap();
        let log = store.load_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].text, "three");
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let store = PanelStore::open_in_memory().unwrap();
        store.put_raw(GEOMETRY_KEY, "{\"width\": \"wide\"}").unwrap();
        store.put_raw(LOG_KEY, "not json").unwrap();
        assert_eq!(store.load_geometry(), None);
        assert!(store.load_log().is_empty());
    }

    #[test]
    fn test_persisted_key_layout() {
        let store = PanelStore::open_in_memory().unwrap();
        store.save_geometry(&record()).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&store.get_raw(GEOMETRY_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({ "width": 512.0, "height": 640.0, "edgeOffsetA": 12.0, "edgeOffsetB": 34.0 })
        );

        let message = Message::assistant("x");
        store.save_log(std::slice::from_ref(&message)).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&store.get_raw(LOG_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(raw[0]["role"], "assistant");
        assert_eq!(raw[0]["text"], "x");
        assert_eq!(raw[0]["id"], message.id.as_str());
        assert!(raw[0]["attachments"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_clear_log_removes_key() {
        let store = PanelStore::open_in_memory().unwrap();
        store.save_log(&[Message::assistant("keep?")]).unwrap();
        store.clear_log().unwrap();
        assert_eq!(store.get_raw(LOG_KEY).unwrap(), None);
        assert!(store.load_log().is_empty());
    }
}
