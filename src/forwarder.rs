use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::bindings::{Binding, BindingTable};
use crate::bus::BusReceiver;
use crate::commands::{CommandRegistry, Dispatch};
use crate::memory::chatlog::ChatLog;
use crate::message::{Message, MessageType};
use crate::overflow::{self, PasteRequest, TextStore};
use crate::platform::ChannelAdapter;

/// Relays every bus message into the sibling rooms of its binding.
///
/// Messages are processed one at a time, to completion, in bus order.
pub struct Forwarder {
    bot_name: String,
    bindings: Arc<BindingTable>,
    commands: CommandRegistry,
    adapters: Vec<Arc<dyn ChannelAdapter>>,
    text_store: Arc<dyn TextStore>,
    chat_log: Arc<dyn ChatLog>,
}

/// What a single message turned into after dispatch and overflow
struct Relay {
    lines: Vec<String>,
    send_back: bool,
    reply: Option<String>,
}

impl Forwarder {
    pub fn new(
        bot_name: impl Into<String>,
        bindings: Arc<BindingTable>,
        commands: CommandRegistry,
        adapters: Vec<Arc<dyn ChannelAdapter>>,
        text_store: Arc<dyn TextStore>,
        chat_log: Arc<dyn ChatLog>,
    ) -> Self {
        Self {
            bot_name: bot_name.into(),
            bindings,
            commands,
            adapters,
            text_store,
            chat_log,
        }
    }

    /// Consume the bus until it closes. Returns an error only for faults the
    /// loop cannot make progress past (log store failure, bus gone).
    pub async fn run(&self, mut bus: BusReceiver) -> Result<()> {
        info!(
            "Forwarding between {} adapters over {} rooms",
            self.adapters.len(),
            self.bindings.len()
        );

        while let Some(msg) = bus.next().await {
            self.process(msg).await?;
        }

        anyhow::bail!("Message bus closed")
    }

    pub async fn process(&self, mut msg: Message) -> Result<()> {
        let Some((room, binding)) = self.bindings.resolve(&msg) else {
            debug!("Unroutable message, dropping: {}", msg);
            return Ok(());
        };
        debug!("{} (room {}, {} bytes)", msg, room, msg.content.len());

        let reply = if msg.mtype == MessageType::Command {
            self.dispatch(&mut msg)
        } else {
            None
        };

        let log_ref = self
            .chat_log
            .log(room, &msg)
            .await
            .context("Failed to log message")?;
        if let Some(reply) = &reply {
            let mut bot_msg = Message::new(
                msg.channel,
                self.bot_name.clone(),
                msg.receiver.clone(),
                reply.clone(),
                MessageType::Text,
            );
            bot_msg.date = msg.date.clone();
            bot_msg.time = msg.time.clone();
            self.chat_log
                .log(room, &bot_msg)
                .await
                .context("Failed to log command reply")?;
        }

        if msg.mtype == MessageType::Event {
            for adapter in self.adapters.iter().filter(|a| a.channel() != msg.channel) {
                self.send(adapter.as_ref(), binding, &msg.content).await;
            }
            return Ok(());
        }

        let relay = if overflow::should_overflow(&msg.content) {
            let req = PasteRequest {
                content: &msg.content,
                sender: &msg.sender,
                room,
                date: msg.date.as_deref(),
                time: msg.time.as_deref(),
                log_ref: &log_ref,
            };
            match self.text_store.store(&req).await {
                Ok(url) => Relay {
                    lines: vec![overflow::overflow_line(&url)],
                    send_back: true,
                    reply,
                },
                Err(e) => {
                    warn!("Failed to publish long text from {}: {:#}", msg.sender, e);
                    return Ok(());
                }
            }
        } else {
            Relay {
                lines: overflow::split_lines(&msg.content)
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                send_back: false,
                reply,
            }
        };

        self.fan_out(&msg, binding, &relay).await;
        Ok(())
    }

    /// Run a command message through the registry. Any failure downgrades
    /// the message to plain text so it is still relayed.
    fn dispatch(&self, msg: &mut Message) -> Option<String> {
        match self.commands.dispatch(msg) {
            Dispatch::Reply(reply) if reply.is_empty() => None,
            Dispatch::Reply(reply) => Some(reply),
            Dispatch::Unknown(name) => {
                debug!("No handler for command '{}'", name);
                None
            }
            Dispatch::NotACommand => {
                debug!("Not a command, relaying as text: {}", msg.content);
                msg.mtype = MessageType::Text;
                None
            }
            Dispatch::Failed(e) => {
                warn!("Command from {} failed: {:#}", msg.sender, e);
                msg.mtype = MessageType::Text;
                None
            }
        }
    }

    async fn fan_out(&self, msg: &Message, binding: &Binding, relay: &Relay) {
        for adapter in &self.adapters {
            if adapter.channel() != msg.channel || relay.send_back {
                for line in &relay.lines {
                    let text = format!("[{}] {}", msg.sender, line);
                    self.send(adapter.as_ref(), binding, &text).await;
                }
            }
            if let Some(reply) = &relay.reply {
                self.send(adapter.as_ref(), binding, reply).await;
            }
        }
    }

    /// Best-effort send to the adapter's address in this binding
    async fn send(&self, adapter: &dyn ChannelAdapter, binding: &Binding, text: &str) {
        let channel = adapter.channel();
        let Some(address) = binding.address(channel) else {
            debug!("Room has no {} address, skipping", channel);
            return;
        };
        if let Err(e) = adapter.send(address, text).await {
            warn!("Failed to send to {} {}: {:#}", channel, address, e);
        }
    }
}
