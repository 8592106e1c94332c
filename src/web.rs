use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::WebConfig;
use crate::memory::chatlog::LogRef;
use crate::memory::MemoryStore;
use crate::message::Message;

const DEFAULT_LOG_LIMIT: usize = 100;
const MAX_LOG_LIMIT: usize = 1000;

#[derive(Clone)]
struct AppState {
    memory: MemoryStore,
}

/// Stores downloaded photos and stickers and hands out links served under
/// `/media/<id>`
#[derive(Clone)]
pub struct MediaLinks {
    memory: MemoryStore,
    public_url: String,
}

impl MediaLinks {
    pub fn new(memory: MemoryStore, public_url: &str) -> Self {
        Self {
            memory,
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn store(&self, content_type: &str, data: &[u8]) -> Result<String> {
        let id = self.memory.save_media(content_type, data).await?;
        Ok(format!("{}/media/{}", self.public_url, id))
    }
}

pub fn router(memory: MemoryStore) -> Router {
    Router::new()
        .route("/paste/{id}", get(serve_paste))
        .route("/log/{room}", get(serve_room_log))
        .route("/log/{room}/{date}/{id}", get(serve_log_entry))
        .route("/media/{id}", get(serve_media))
        .with_state(AppState { memory })
}

/// Bind `[web] bind` and serve until the listener fails
pub async fn run(config: WebConfig, memory: MemoryStore) -> Result<()> {
    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;
    info!("Web server listening on http://{}", config.bind);
    serve(listener, memory).await
}

pub async fn serve(listener: TcpListener, memory: MemoryStore) -> Result<()> {
    axum::serve(listener, router(memory))
        .await
        .context("Web server error")?;
    anyhow::bail!("Web server stopped")
}

fn internal_error(e: anyhow::Error) -> StatusCode {
    error!("Web request failed: {:#}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}

/// `[date time] sender: content`, with the media link when there is one
fn log_line(msg: &Message) -> String {
    let mut line = format!(
        "[{} {}] {}: {}",
        msg.date.as_deref().unwrap_or("-"),
        msg.time.as_deref().unwrap_or("-"),
        msg.sender,
        msg.content
    );
    if let Some(url) = &msg.media_url {
        if !msg.content.contains(url.as_str()) {
            line.push(' ');
            line.push_str(url);
        }
    }
    line
}

async fn serve_paste(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<String, StatusCode> {
    let paste = state
        .memory
        .get_paste(&id)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let date = paste.date.as_deref().unwrap_or("today");
    Ok(format!(
        "{} in {} at {} {}\nlog: /log/{}/{}/{}\n\n{}\n",
        paste.sender,
        paste.room,
        date,
        paste.time.as_deref().unwrap_or("-"),
        paste.room,
        date,
        paste.log_id,
        paste.content
    ))
}

async fn serve_log_entry(
    State(state): State<AppState>,
    Path((room, _date, id)): Path<(String, String, String)>,
) -> Result<String, StatusCode> {
    let (logged_room, msg) = state
        .memory
        .get_logged(&LogRef(id))
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    // IDs are global; a mismatched room means a hand-edited link
    if logged_room != room {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(format!("{}\n", log_line(&msg)))
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    limit: Option<usize>,
}

async fn serve_room_log(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<String, StatusCode> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_LOG_LIMIT);
    let messages = state
        .memory
        .recent(&room, limit)
        .await
        .map_err(internal_error)?;

    let mut body = String::new();
    for msg in &messages {
        body.push_str(&log_line(msg));
        body.push('\n');
    }
    Ok(body)
}

async fn serve_media(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, StatusCode> {
    let media = state
        .memory
        .get_media(&id)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(([(header::CONTENT_TYPE, media.content_type)], media.data).into_response())
}
