use anyhow::{Context, Result};
use rusqlite::OptionalExtension;
use uuid::Uuid;

use super::MemoryStore;

/// A photo or sticker downloaded from its origin network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    pub content_type: String,
    pub data: Vec<u8>,
}

impl MemoryStore {
    /// Keep the file and return its ID
    pub async fn save_media(&self, content_type: &str, data: &[u8]) -> Result<String> {
        let id = Uuid::new_v4().simple().to_string();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO media (id, content_type, data, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![&id, content_type, data, chrono::Utc::now().to_rfc3339()],
        )
        .context("Failed to save media")?;
        Ok(id)
    }

    pub async fn get_media(&self, id: &str) -> Result<Option<Media>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT content_type, data FROM media WHERE id = ?1",
            rusqlite::params![id],
            |row| {
                Ok(Media {
                    content_type: row.get(0)?,
                    data: row.get(1)?,
                })
            },
        )
        .optional()
        .context("Failed to read media")
    }
}
