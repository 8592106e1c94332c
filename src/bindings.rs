use std::collections::BTreeMap;

use serde::Deserialize;

use crate::message::{ChannelType, Message};

/// One logical room: its concrete address on each bridged network
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct Binding {
    pub irc: Option<String>,
    pub xmpp: Option<String>,
    pub telegram: Option<String>,
}

impl Binding {
    pub fn address(&self, channel: ChannelType) -> Option<&str> {
        match channel {
            ChannelType::Irc => self.irc.as_deref(),
            ChannelType::Xmpp => self.xmpp.as_deref(),
            ChannelType::Telegram => self.telegram.as_deref(),
        }
    }

    /// Every (network, address) pair this room is bound to
    pub fn entries(&self) -> impl Iterator<Item = (ChannelType, &str)> {
        [ChannelType::Irc, ChannelType::Xmpp, ChannelType::Telegram]
            .into_iter()
            .filter_map(|c| self.address(c).map(|a| (c, a)))
    }
}

/// Read-only room table, loaded once at startup
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    rooms: Vec<(String, Binding)>,
}

impl BindingTable {
    pub fn new(rooms: BTreeMap<String, Binding>) -> Self {
        Self {
            rooms: rooms.into_iter().collect(),
        }
    }

    /// Find the room whose address on the message's network is the message's
    /// receiver. `None` means the message is unroutable.
    pub fn resolve(&self, msg: &Message) -> Option<(&str, &Binding)> {
        self.rooms
            .iter()
            .find(|(_, b)| b.address(msg.channel) == Some(msg.receiver.as_str()))
            .map(|(room, b)| (room.as_str(), b))
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
