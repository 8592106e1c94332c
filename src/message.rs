use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Chat network a message originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Irc,
    Xmpp,
    Telegram,
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelType::Irc => write!(f, "irc"),
            ChannelType::Xmpp => write!(f, "xmpp"),
            ChannelType::Telegram => write!(f, "telegram"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Photo,
    Sticker,
    Event,
    Command,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Text => write!(f, "text"),
            MessageType::Photo => write!(f, "photo"),
            MessageType::Sticker => write!(f, "sticker"),
            MessageType::Event => write!(f, "event"),
            MessageType::Command => write!(f, "command"),
        }
    }
}

/// A message received from any network, as published on the bus.
///
/// `mtype` is decided by the producing adapter. The forwarder only ever
/// downgrades `Command` to `Text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub channel: ChannelType,
    pub sender: String,
    /// Room or handle the message was addressed to on the origin network
    pub receiver: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub mtype: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

impl Message {
    pub fn new(
        channel: ChannelType,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        content: impl Into<String>,
        mtype: MessageType,
    ) -> Self {
        Self {
            channel,
            sender: sender.into(),
            receiver: receiver.into(),
            content: content.into(),
            mtype,
            date: None,
            time: None,
            media_url: None,
        }
    }

    /// Attach display-formatted date and time strings
    pub fn with_timestamp(mut self, date: impl Into<String>, time: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self.time = Some(time.into());
        self
    }

    /// Link to a downloaded photo or sticker
    pub fn with_media_url(mut self, url: impl Into<String>) -> Self {
        self.media_url = Some(url.into());
        self
    }

    /// Encode for transport over the bus
    pub fn dumps(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to encode message")
    }

    /// Decode a bus frame
    pub fn loads(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).context("Failed to decode message")
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} from: {}, to: {}, {}",
            self.channel, self.mtype, self.sender, self.receiver, self.content
        )
    }
}
