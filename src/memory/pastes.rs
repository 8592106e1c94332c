use anyhow::{Context, Result};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use super::MemoryStore;
use crate::overflow::PasteRequest;

/// Long text stored in place of an overflowed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paste {
    pub room: String,
    pub sender: String,
    pub content: String,
    pub date: Option<String>,
    pub time: Option<String>,
    pub log_id: String,
}

impl MemoryStore {
    /// Persist a paste and return its ID
    pub async fn save_paste(&self, req: &PasteRequest<'_>) -> Result<String> {
        let id = Uuid::new_v4().simple().to_string();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO pastes (id, room, sender, content, date, time, log_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                &id,
                req.room,
                req.sender,
                req.content,
                req.date,
                req.time,
                &req.log_ref.0,
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to save paste")?;
        Ok(id)
    }

    pub async fn get_paste(&self, id: &str) -> Result<Option<Paste>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT room, sender, content, date, time, log_id FROM pastes WHERE id = ?1",
            rusqlite::params![id],
            |row| {
                Ok(Paste {
                    room: row.get(0)?,
                    sender: row.get(1)?,
                    content: row.get(2)?,
                    date: row.get(3)?,
                    time: row.get(4)?,
                    log_id: row.get(5)?,
                })
            },
        )
        .optional()
        .context("Failed to read paste")
    }
}
