use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_xmpp::parsers::message::{Lang, Message as XmppMessage, MessageType as XmppMessageType};
use tokio_xmpp::parsers::muc::Muc;
use tokio_xmpp::parsers::presence::{Presence, Type as PresenceType};
use tokio_xmpp::jid::{BareJid, Jid};
use tokio_xmpp::{Client, Event, Stanza};
use tracing::{debug, error, info, warn};

use super::{display_timestamp, ChannelAdapter};
use crate::bus::BusPublisher;
use crate::commands::parse_command;
use crate::config::XmppConfig;
use crate::message::{ChannelType, Message, MessageType};

const DELAY_NS: &str = "urn:xmpp:delay";

/// A groupchat line waiting to be written by the connection task
#[derive(Debug, PartialEq, Eq)]
pub struct Outgoing {
    pub room: String,
    pub text: String,
}

/// Queues groupchat messages for the connection task to send
pub struct XmppAdapter {
    outbound: mpsc::UnboundedSender<Outgoing>,
}

impl XmppAdapter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (Self { outbound }, rx)
    }
}

#[async_trait]
impl ChannelAdapter for XmppAdapter {
    fn channel(&self) -> ChannelType {
        ChannelType::Xmpp
    }

    async fn send(&self, address: &str, text: &str) -> Result<()> {
        // Catch bad room addresses here rather than in the connection task
        address
            .parse::<BareJid>()
            .with_context(|| format!("Invalid XMPP room: {}", address))?;
        self.outbound
            .send(Outgoing {
                room: address.to_string(),
                text: text.to_string(),
            })
            .ok()
            .context("XMPP connection task has stopped")
    }
}

/// Turn a groupchat line from `room@service/nick` into a bridge message.
/// Returns `None` for our own echoes and lines without a nick (room
/// subjects and service notices).
fn to_bridge_message(from: &str, body: &str, own_nick: &str) -> Option<Message> {
    let (room, nick) = from.split_once('/')?;
    if nick.is_empty() || nick == own_nick {
        return None;
    }

    let (content, mtype) = if let Some(action) = body.strip_prefix("/me ") {
        (format!("* {} {}", nick, action), MessageType::Text)
    } else if parse_command(body).is_some() {
        (body.to_string(), MessageType::Command)
    } else {
        (body.to_string(), MessageType::Text)
    };

    let (date, time) = display_timestamp(chrono::Local::now());
    Some(Message::new(ChannelType::Xmpp, nick, room, content, mtype).with_timestamp(date, time))
}

/// Presence that joins `room` under `nick`
fn join_presence(room: &str, nick: &str) -> Result<Presence> {
    let occupant: Jid = format!("{}/{}", room, nick)
        .parse()
        .with_context(|| format!("Invalid XMPP room: {}", room))?;
    Ok(Presence::new(PresenceType::None)
        .with_to(occupant)
        .with_payloads(vec![Muc::new().into()]))
}

fn groupchat(out: &Outgoing) -> Result<XmppMessage> {
    let room: Jid = out
        .room
        .parse()
        .with_context(|| format!("Invalid XMPP room: {}", out.room))?;
    Ok(XmppMessage::groupchat(Some(room)).with_body(Lang::default(), out.text.clone()))
}

async fn handle_stanza(stanza: Stanza, nick: &str, publisher: &BusPublisher) {
    let Stanza::Message(msg) = stanza else {
        return;
    };
    if msg.type_ != XmppMessageType::Groupchat {
        return;
    }
    // Rooms replay recent history on join, marked with a delay
    if msg.payloads.iter().any(|p| p.is("delay", DELAY_NS)) {
        debug!("Skipping XMPP history line");
        return;
    }
    let Some(from) = msg.from.as_ref().map(|jid| jid.to_string()) else {
        return;
    };
    let Some(body) = msg.bodies.values().next().map(|b| b.as_str().to_string()) else {
        return;
    };

    if let Some(bridged) = to_bridge_message(&from, &body, nick) {
        info!("XMPP message: {}", bridged);
        if let Err(e) = publisher.publish(&bridged).await {
            error!("Failed to publish XMPP message: {:#}", e);
        }
    }
}

/// Log in, join every bound room, and pump stanzas in both directions until
/// the server goes away
pub async fn run(
    config: XmppConfig,
    rooms: Vec<String>,
    publisher: BusPublisher,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
) -> Result<()> {
    let jid: BareJid = config
        .jid
        .parse()
        .with_context(|| format!("Invalid XMPP account: {}", config.jid))?;
    info!("Connecting to XMPP as {}", jid);
    let mut client = Client::new(jid, config.password.clone());

    loop {
        tokio::select! {
            event = client.next() => {
                match event {
                    Some(Event::Online { bound_jid, .. }) => {
                        info!("XMPP online as {}", bound_jid);
                        for room in &rooms {
                            let presence = join_presence(room, &config.nick)?;
                            client
                                .send_stanza(presence.into())
                                .await
                                .with_context(|| format!("Failed to join {}", room))?;
                        }
                    }
                    Some(Event::Stanza(stanza)) => {
                        handle_stanza(stanza, &config.nick, &publisher).await;
                    }
                    Some(Event::Disconnected(e)) => {
                        anyhow::bail!("XMPP connection lost: {}", e);
                    }
                    None => anyhow::bail!("XMPP client stopped"),
                }
            }
            Some(out) = outbound.recv() => {
                let message = match groupchat(&out) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Dropping XMPP message: {:#}", e);
                        continue;
                    }
                };
                client
                    .send_stanza(message.into())
                    .await
                    .context("Failed to send XMPP message")?;
            }
        }
    }
}
