use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{display_timestamp, ChannelAdapter};
use crate::bus::BusPublisher;
use crate::commands::parse_command;
use crate::config::IrcConfig;
use crate::message::{ChannelType, Message, MessageType};

/// Queues PRIVMSG lines for the connection task to write
pub struct IrcAdapter {
    outbound: mpsc::UnboundedSender<String>,
}

impl IrcAdapter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        (Self { outbound }, rx)
    }
}

#[async_trait]
impl ChannelAdapter for IrcAdapter {
    fn channel(&self) -> ChannelType {
        ChannelType::Irc
    }

    async fn send(&self, address: &str, text: &str) -> Result<()> {
        // A raw line break would end the PRIVMSG and start a new command
        let text = text.replace(['\r', '\n'], " ");
        self.outbound
            .send(format!("PRIVMSG {} :{}", address, text))
            .ok()
            .context("IRC connection task has stopped")
    }
}

/// A parsed server line: `[:prefix] COMMAND params... [:trailing]`
#[derive(Debug, PartialEq, Eq)]
struct IrcLine<'a> {
    prefix: Option<&'a str>,
    command: &'a str,
    params: Vec<&'a str>,
}

impl<'a> IrcLine<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (p, r) = stripped.split_once(' ')?;
            prefix = Some(p);
            rest = r;
        }

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };
        let mut words = head.split(' ').filter(|w| !w.is_empty());
        let command = words.next()?;
        let mut params: Vec<&str> = words.collect();
        params.extend(trailing);

        Some(Self {
            prefix,
            command,
            params,
        })
    }

    /// Nick part of a `nick!user@host` prefix
    fn nick(&self) -> Option<&'a str> {
        self.prefix.map(|p| p.split('!').next().unwrap_or(p))
    }
}

/// Turn a PRIVMSG into a bridge message. Returns `None` for our own lines,
/// blacklisted nicks and CTCP requests other than ACTION.
fn to_bridge_message(line: &IrcLine<'_>, own_nick: &str, blacklist: &[String]) -> Option<Message> {
    if line.command != "PRIVMSG" || line.params.len() < 2 {
        return None;
    }
    let nick = line.nick()?;
    if nick.eq_ignore_ascii_case(own_nick) || blacklist.iter().any(|b| b.eq_ignore_ascii_case(nick))
    {
        return None;
    }

    let target = line.params[0];
    let text = line.params[1];
    let (content, mtype) = if let Some(ctcp) = text.strip_prefix('\u{1}') {
        let ctcp = ctcp.trim_end_matches('\u{1}');
        let action = ctcp.strip_prefix("ACTION ")?;
        (format!("* {} {}", nick, action), MessageType::Text)
    } else if parse_command(text).is_some() {
        (text.to_string(), MessageType::Command)
    } else {
        (text.to_string(), MessageType::Text)
    };

    let (date, time) = display_timestamp(chrono::Local::now());
    Some(Message::new(ChannelType::Irc, nick, target, content, mtype).with_timestamp(date, time))
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> Result<()> {
    debug!("IRC >> {}", line);
    writer
        .write_all(format!("{}\r\n", line).as_bytes())
        .await
        .context("Failed to write to IRC server")
}

/// Connect, join every bound channel, and pump lines in both directions
/// until the server goes away
pub async fn run(
    config: IrcConfig,
    channels: Vec<String>,
    publisher: BusPublisher,
    mut outbound: mpsc::UnboundedReceiver<String>,
) -> Result<()> {
    info!("Connecting to IRC {}:{}", config.server, config.port);
    let stream = TcpStream::connect((config.server.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to connect to {}:{}", config.server, config.port))?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    // Servers relay whatever bytes clients send, so lines are not always UTF-8.
    // Partial reads stay in `buf` when the outbound branch wins the select.
    let mut buf = Vec::new();

    let mut nick = config.nick.clone();
    write_line(&mut writer, &format!("NICK {}", nick)).await?;
    write_line(&mut writer, &format!("USER {} 0 * :{}", nick, nick)).await?;

    loop {
        tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => {
                if read.context("Failed to read from IRC server")? == 0 {
                    anyhow::bail!("IRC server closed the connection");
                }
                let raw = String::from_utf8_lossy(&buf).into_owned();
                buf.clear();
                let Some(line) = IrcLine::parse(&raw) else {
                    continue;
                };
                match line.command {
                    "PING" => {
                        let token = line.params.first().copied().unwrap_or_default();
                        write_line(&mut writer, &format!("PONG :{}", token)).await?;
                    }
                    // RPL_WELCOME
                    "001" => {
                        info!("Registered on IRC as {}", nick);
                        for channel in &channels {
                            write_line(&mut writer, &format!("JOIN {}", channel)).await?;
                        }
                    }
                    // ERR_NICKNAMEINUSE
                    "433" => {
                        nick.push('_');
                        warn!("IRC nick in use, retrying as {}", nick);
                        write_line(&mut writer, &format!("NICK {}", nick)).await?;
                    }
                    "PRIVMSG" => {
                        if let Some(msg) = to_bridge_message(&line, &nick, &config.blacklist) {
                            info!("IRC message: {}", msg);
                            if let Err(e) = publisher.publish(&msg).await {
                                error!("Failed to publish IRC message: {:#}", e);
                            }
                        }
                    }
                    _ => debug!("IRC << {}", raw.trim_end()),
                }
            }
            Some(out) = outbound.recv() => {
                write_line(&mut writer, &out).await?;
            }
        }
    }
}
