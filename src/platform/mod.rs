pub mod irc;
pub mod telegram;
pub mod xmpp;

use anyhow::Result;
use async_trait::async_trait;

use crate::message::ChannelType;

/// Outbound side of a bridged network. Owns no routing logic.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Network this adapter sends to
    fn channel(&self) -> ChannelType;

    /// Post one line of text to a room or handle on this network
    async fn send(&self, address: &str, text: &str) -> Result<()>;
}

/// Local date and time strings stamped on inbound messages
pub(crate) fn display_timestamp<Tz: chrono::TimeZone>(
    at: chrono::DateTime<Tz>,
) -> (String, String) {
    let local = at.with_timezone(&chrono::Local);
    (
        local.format("%Y-%m-%d").to_string(),
        local.format("%H:%M:%S").to_string(),
    )
}
