use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileMeta, User};
use tracing::{debug, error, info, warn};

use super::{display_timestamp, ChannelAdapter};
use crate::bus::BusPublisher;
use crate::commands::parse_command;
use crate::message::{self, ChannelType, MessageType};
use crate::web::MediaLinks;

/// Sends relayed lines into Telegram group chats
pub struct TelegramAdapter {
    bot: Bot,
}

impl TelegramAdapter {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChannelAdapter for TelegramAdapter {
    fn channel(&self) -> ChannelType {
        ChannelType::Telegram
    }

    async fn send(&self, address: &str, text: &str) -> Result<()> {
        let chat_id: i64 = address
            .parse()
            .with_context(|| format!("Invalid Telegram chat id: {}", address))?;
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .context("Failed to send Telegram message")?;
        Ok(())
    }
}

/// Run the Telegram listener, publishing every group message onto the bus.
/// Photos and stickers are downloaded into `media` and relayed as links.
pub async fn run(bot: Bot, publisher: BusPublisher, media: MediaLinks) -> Result<()> {
    info!("Starting Telegram listener...");

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![publisher, media])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .build()
        .dispatch()
        .await;

    anyhow::bail!("Telegram dispatcher stopped")
}

async fn handle_message(
    bot: Bot,
    msg: Message,
    publisher: BusPublisher,
    media: MediaLinks,
) -> ResponseResult<()> {
    let Some(mut bridged) = to_bridge_message(&msg) else {
        return Ok(());
    };

    // On failure the placeholder text is relayed without a link
    if let Some((file, label)) = media_of(&msg) {
        match relay_media(&bot, &media, file).await {
            Ok(url) => bridged = attach_media(bridged, label, url),
            Err(e) => warn!("Failed to relay Telegram media {}: {:#}", msg.id.0, e),
        }
    }

    info!("Telegram message in {}: {}", msg.chat.id.0, bridged);

    if let Err(e) = publisher.publish(&bridged).await {
        error!("Failed to publish Telegram message: {:#}", e);
    }
    Ok(())
}

fn to_bridge_message(msg: &Message) -> Option<message::Message> {
    let user = msg.from.as_ref()?;
    let (content, mtype) = if let Some(text) = msg.text() {
        (text.to_string(), classify_text(text))
    } else if let Some(sticker) = msg.sticker() {
        let emoji = sticker.emoji.clone().unwrap_or_else(|| "[sticker]".to_string());
        (emoji, MessageType::Sticker)
    } else if msg.photo().is_some() {
        let caption = msg.caption().unwrap_or("[photo]").to_string();
        (caption, MessageType::Photo)
    } else if let Some(members) = msg.new_chat_members() {
        let names: Vec<_> = members.iter().map(display_name).collect();
        (format!("{} joined", names.join(", ")), MessageType::Event)
    } else if let Some(member) = msg.left_chat_member() {
        (format!("{} left", display_name(member)), MessageType::Event)
    } else {
        warn!("Ignoring unsupported Telegram message {}", msg.id.0);
        return None;
    };

    let (date, time) = display_timestamp(msg.date);
    Some(
        message::Message::new(
            ChannelType::Telegram,
            display_name(user),
            msg.chat.id.0.to_string(),
            content,
            mtype,
        )
        .with_timestamp(date, time),
    )
}

/// File behind a photo (largest size) or sticker, with its caption or emoji
fn media_of(msg: &Message) -> Option<(&FileMeta, Option<&str>)> {
    if let Some(sizes) = msg.photo() {
        return sizes.last().map(|size| (&size.file, msg.caption()));
    }
    msg.sticker()
        .map(|sticker| (&sticker.file, sticker.emoji.as_deref()))
}

/// Download a Telegram file into the media store and return its public link.
/// Telegram's own file URLs embed the bot token, so they are never relayed.
async fn relay_media(bot: &Bot, media: &MediaLinks, file: &FileMeta) -> Result<String> {
    let file = bot
        .get_file(file.id.clone())
        .await
        .context("Failed to look up Telegram file")?;

    let mut data = Vec::new();
    bot.download_file(&file.path, &mut data)
        .await
        .context("Failed to download Telegram file")?;

    debug!("Downloaded {} ({} bytes)", file.path, data.len());
    media.store(content_type_for(&file.path), &data).await
}

fn content_type_for(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "tgs" => "application/x-tgsticker",
        "webm" => "video/webm",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// Relay the link itself so networks without inline media still see the image
fn attach_media(msg: message::Message, label: Option<&str>, url: String) -> message::Message {
    let content = match label {
        Some(label) => format!("{} {}", url, label),
        None => url.clone(),
    };
    message::Message { content, ..msg }.with_media_url(url)
}

/// Username if set, otherwise first name
fn display_name(user: &User) -> String {
    user.username
        .clone()
        .unwrap_or_else(|| user.first_name.clone())
}

fn classify_text(text: &str) -> MessageType {
    if parse_command(text).is_some() {
        MessageType::Command
    } else {
        MessageType::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, StatusCode, Uri};
    use axum::response::{IntoResponse, Response};
    use axum::routing::any;
    use axum::{Json, Router};
    use serde_json::json;

    use crate::bus::MessageBus;
    use crate::memory::MemoryStore;

    const JPEG: &[u8] = &[0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10];

    fn photo_message(caption: Option<&str>) -> Message {
        let mut value = json!({
            "message_id": 7,
            "date": 1760870000,
            "chat": { "id": -100123, "type": "supergroup", "title": "fishroom" },
            "from": {
                "id": 1001,
                "is_bot": false,
                "first_name": "Alice",
                "username": "alice"
            },
            "photo": [
                { "file_id": "small", "file_unique_id": "s", "width": 90, "height": 90, "file_size": 10 },
                { "file_id": "large", "file_unique_id": "l", "width": 800, "height": 800, "file_size": 6 }
            ]
        });
        if let Some(caption) = caption {
            value["caption"] = json!(caption);
        }
        serde_json::from_value(value).unwrap()
    }

    /// Answers getFile and serves the file download, like the Bot API
    async fn fake_bot_api(method: Method, uri: Uri) -> Response {
        let path = uri.path();
        if method == Method::GET && path.contains("/file/bot") {
            return JPEG.to_vec().into_response();
        }
        if path.to_ascii_lowercase().ends_with("/getfile") {
            return Json(json!({
                "ok": true,
                "result": {
                    "file_id": "large",
                    "file_unique_id": "l",
                    "file_size": 6,
                    "file_path": "photos/file_1.jpg"
                }
            }))
            .into_response();
        }
        StatusCode::NOT_FOUND.into_response()
    }

    async fn fake_bot() -> Bot {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/{*path}", any(fake_bot_api));
        tokio::spawn(async move { axum::serve(listener, app).await });

        let api_url = reqwest::Url::parse(&format!("http://{}/", addr)).unwrap();
        Bot::new("123:fake").set_api_url(api_url)
    }

    #[test]
    fn test_photo_without_download_keeps_placeholder() {
        let bridged = to_bridge_message(&photo_message(None)).unwrap();
        assert_eq!(bridged.mtype, MessageType::Photo);
        assert_eq!(bridged.content, "[photo]");
        assert_eq!(bridged.receiver, "-100123");
        assert!(bridged.media_url.is_none());
    }

    #[test]
    fn test_media_of_picks_largest_photo() {
        let msg = photo_message(Some("look"));
        let (file, label) = media_of(&msg).unwrap();
        assert_eq!(file.id.to_string(), "large");
        assert_eq!(label, Some("look"));
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("photos/file_1.jpg"), "image/jpeg");
        assert_eq!(content_type_for("stickers/file_2.WEBP"), "image/webp");
        assert_eq!(content_type_for("stickers/file_3.tgs"), "application/x-tgsticker");
        assert_eq!(content_type_for("documents/file"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_photo_is_published_with_media_link() {
        let bot = fake_bot().await;
        let memory = MemoryStore::open_in_memory().unwrap();
        let media = MediaLinks::new(memory.clone(), "https://bridge.example");
        let (publisher, mut receiver) = MessageBus::new(4);

        handle_message(bot, photo_message(Some("look")), publisher, media)
            .await
            .unwrap();

        let bridged = receiver.next().await.unwrap();
        assert_eq!(bridged.mtype, MessageType::Photo);
        assert_eq!(bridged.sender, "alice");

        let url = bridged.media_url.clone().unwrap();
        assert_eq!(bridged.content, format!("{} look", url));
        assert!(!url.contains("123:fake"));

        let id = url.strip_prefix("https://bridge.example/media/").unwrap();
        let stored = memory.get_media(id).await.unwrap().unwrap();
        assert_eq!(stored.content_type, "image/jpeg");
        assert_eq!(stored.data, JPEG);
    }

    #[test]
    fn test_classify_text() {
        assert_eq!(classify_text("/ping@fishbot"), MessageType::Command);
        assert_eq!(classify_text("!echo hi"), MessageType::Command);
        assert_eq!(classify_text("hello /ping"), MessageType::Text);
        assert_eq!(classify_text("/"), MessageType::Text);
    }

    #[tokio::test]
    async fn test_send_rejects_non_numeric_chat() {
        let adapter = TelegramAdapter::new(Bot::new("123:fake"));
        let err = adapter.send("#irc-room", "hi").await.unwrap_err();
        assert!(err.to_string().contains("Invalid Telegram chat id"));
    }
}
