use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::config::TextStoreConfig;
use crate::memory::MemoryStore;
use crate::overflow::{PasteRequest, TextStore};

const PASTEBIN_API_URL: &str = "https://pastebin.com/api/api_post.php";
/// The forwarder waits on the store, so a stalled paste service stalls every room
const PASTEBIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the text store selected in `[text_store]`
pub fn from_config(config: &TextStoreConfig, memory: MemoryStore) -> Result<Arc<dyn TextStore>> {
    let store: Arc<dyn TextStore> = match config {
        TextStoreConfig::Sqlite { base_url } => Arc::new(SqlitePasteStore::new(memory, base_url)),
        TextStoreConfig::ChatLogger { base_url } => Arc::new(ChatLogStore::new(base_url)),
        TextStoreConfig::Pastebin { api_key } => Arc::new(Pastebin::new(api_key)?),
    };
    Ok(store)
}

/// Keeps pastes in the bridge database; served under `<base_url>/paste/<id>`
pub struct SqlitePasteStore {
    memory: MemoryStore,
    base_url: String,
}

impl SqlitePasteStore {
    pub fn new(memory: MemoryStore, base_url: &str) -> Self {
        Self {
            memory,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TextStore for SqlitePasteStore {
    async fn store(&self, req: &PasteRequest<'_>) -> Result<String> {
        let id = self.memory.save_paste(req).await?;
        Ok(format!("{}/paste/{}", self.base_url, id))
    }
}

/// Stores nothing new: the full text already lives in the chat log, so the
/// link points at the log entry of the original message
pub struct ChatLogStore {
    base_url: String,
}

impl ChatLogStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TextStore for ChatLogStore {
    async fn store(&self, req: &PasteRequest<'_>) -> Result<String> {
        Ok(format!(
            "{}/log/{}/{}/{}",
            self.base_url,
            req.room,
            req.date.unwrap_or("today"),
            req.log_ref
        ))
    }
}

/// pastebin.com API client
pub struct Pastebin {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
}

impl Pastebin {
    pub fn new(api_key: &str) -> Result<Self> {
        Self::with_api_url(api_key, PASTEBIN_API_URL, PASTEBIN_TIMEOUT)
    }

    pub fn with_api_url(api_key: &str, api_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            api_url: api_url.to_string(),
        })
    }
}

#[async_trait]
impl TextStore for Pastebin {
    async fn store(&self, req: &PasteRequest<'_>) -> Result<String> {
        let title = format!("Text from {}", req.sender);
        let params = [
            ("api_dev_key", self.api_key.as_str()),
            ("api_option", "paste"),
            ("api_paste_code", req.content),
            ("api_paste_name", title.as_str()),
            ("api_paste_private", "1"),
            ("api_paste_expire_date", "1M"),
        ];

        debug!("Posting {} bytes to pastebin", req.content.len());

        let response = self
            .client
            .post(&self.api_url)
            .form(&params)
            .send()
            .await
            .context("Failed to send request to pastebin")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read pastebin response")?;
        if !status.is_success() {
            anyhow::bail!("Pastebin API error ({}): {}", status, body);
        }

        // Errors come back as 200 with a plain-text message
        let url = body.trim();
        if !url.starts_with("http") {
            anyhow::bail!("Pastebin rejected paste: {}", url);
        }
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::chatlog::LogRef;

    fn request<'a>(log_ref: &'a LogRef, date: Option<&'a str>) -> PasteRequest<'a> {
        PasteRequest {
            content: "long\ntext",
            sender: "alice",
            room: "room1",
            date,
            time: Some("12:00:00"),
            log_ref,
        }
    }

    #[tokio::test]
    async fn test_sqlite_store_url_resolves_to_paste() {
        let memory = MemoryStore::open_in_memory().unwrap();
        let store = SqlitePasteStore::new(memory.clone(), "https://p.example/");
        let log_ref = LogRef("abc".to_string());

        let url = store.store(&request(&log_ref, None)).await.unwrap();
        let id = url.strip_prefix("https://p.example/paste/").unwrap();
        let paste = memory.get_paste(id).await.unwrap().unwrap();
        assert_eq!(paste.content, "long\ntext");
        assert_eq!(paste.room, "room1");
    }

    #[tokio::test]
    async fn test_chat_log_store_links_log_entry() {
        let store = ChatLogStore::new("https://logs.example");
        let log_ref = LogRef("abc".to_string());

        let url = store
            .store(&request(&log_ref, Some("2026-10-19")))
            .await
            .unwrap();
        assert_eq!(url, "https://logs.example/log/room1/2026-10-19/abc");

        let url = store.store(&request(&log_ref, None)).await.unwrap();
        assert_eq!(url, "https://logs.example/log/room1/today/abc");
    }

    #[tokio::test]
    async fn test_pastebin_unreachable_is_error() {
        // Port 9 on localhost is never a pastebin
        let store =
            Pastebin::with_api_url("key", "http://127.0.0.1:9/api_post.php", PASTEBIN_TIMEOUT)
                .unwrap();
        let log_ref = LogRef("abc".to_string());
        assert!(store.store(&request(&log_ref, None)).await.is_err());
    }

    #[tokio::test]
    async fn test_pastebin_gives_up_on_silent_server() {
        // Accepts the connection but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let api_url = format!("http://{}/api_post.php", addr);
        let store = Pastebin::with_api_url("key", &api_url, Duration::from_millis(200)).unwrap();
        let log_ref = LogRef("abc".to_string());

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            store.store(&request(&log_ref, None)),
        )
        .await
        .expect("pastebin request should time out on its own");
        assert!(result.is_err());
        server.abort();
    }
}
