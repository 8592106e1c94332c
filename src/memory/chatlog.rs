use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use super::MemoryStore;
use crate::message::Message;

/// Identifier of a chat log entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogRef(pub String);

impl fmt::Display for LogRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// History store every routed message is written to before fan-out
#[async_trait]
pub trait ChatLog: Send + Sync {
    async fn log(&self, room: &str, msg: &Message) -> Result<LogRef>;
}

#[async_trait]
impl ChatLog for MemoryStore {
    async fn log(&self, room: &str, msg: &Message) -> Result<LogRef> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO chat_log
             (id, room, channel, sender, receiver, content, mtype, date, time, media_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                &id,
                room,
                msg.channel.to_string(),
                &msg.sender,
                &msg.receiver,
                &msg.content,
                msg.mtype.to_string(),
                &msg.date,
                &msg.time,
                &msg.media_url,
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to write chat log")?;
        Ok(LogRef(id))
    }
}

impl MemoryStore {
    /// Look up a logged message and the room it was logged under
    pub async fn get_logged(&self, log_ref: &LogRef) -> Result<Option<(String, Message)>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT room, channel, sender, receiver, content, mtype, date, time, media_url
                 FROM chat_log WHERE id = ?1",
                rusqlite::params![&log_ref.0],
                |row| Ok((row.get::<_, String>(0)?, parse_message_row(row, 1)?)),
            )
            .optional()
            .context("Failed to read chat log")?;
        Ok(row)
    }

    /// Most recent messages of a room, oldest first
    pub async fn recent(&self, room: &str, limit: usize) -> Result<Vec<Message>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT channel, sender, receiver, content, mtype, date, time, media_url
             FROM chat_log
             WHERE room = ?1
             ORDER BY rowid DESC
             LIMIT ?2",
        )?;
        let mut messages = stmt
            .query_map(rusqlite::params![room, limit as i64], |row| {
                parse_message_row(row, 0)
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list chat log")?;
        messages.reverse();
        Ok(messages)
    }
}

/// Columns must be `channel, sender, receiver, content, mtype, date, time,
/// media_url` starting at `offset`
fn parse_message_row(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<Message> {
    Ok(Message {
        channel: parse_wire_name(row, offset)?,
        sender: row.get(offset + 1)?,
        receiver: row.get(offset + 2)?,
        content: row.get(offset + 3)?,
        mtype: parse_wire_name(row, offset + 4)?,
        date: row.get(offset + 5)?,
        time: row.get(offset + 6)?,
        media_url: row.get(offset + 7)?,
    })
}

/// Enum columns are stored under the same lowercase names the bus uses
fn parse_wire_name<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<T> {
    let value: String = row.get(idx)?;
    serde_json::from_value(serde_json::Value::String(value)).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
