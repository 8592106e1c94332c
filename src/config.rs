use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::bindings::Binding;
use crate::message::ChannelType;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Bot identity used when logging command replies
    #[serde(default = "default_name")]
    pub name: String,
    /// Built-in commands to register; all of them when absent
    #[serde(default)]
    pub plugins: Option<Vec<String>>,
    pub bindings: BTreeMap<String, Binding>,
    pub telegram: Option<TelegramConfig>,
    pub irc: Option<IrcConfig>,
    pub xmpp: Option<XmppConfig>,
    #[serde(default)]
    pub text_store: TextStoreConfig,
    #[serde(default = "default_memory_config")]
    pub memory: MemoryConfig,
    #[serde(default = "default_bus_config")]
    pub bus: BusConfig,
    #[serde(default = "default_web_config")]
    pub web: WebConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IrcConfig {
    pub server: String,
    #[serde(default = "default_irc_port")]
    pub port: u16,
    pub nick: String,
    /// Nicks whose messages are never relayed (other bots, services)
    #[serde(default)]
    pub blacklist: Vec<String>,
}

#[derive(Deserialize, Clone)]
pub struct XmppConfig {
    /// Account the bridge logs in as, e.g. `bridge@example.org`
    pub jid: String,
    pub password: String,
    /// Nick used in every joined room
    pub nick: String,
}

impl fmt::Debug for XmppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmppConfig")
            .field("jid", &self.jid)
            .field("password", &"<redacted>")
            .field("nick", &self.nick)
            .finish()
    }
}

#[derive(Deserialize, Clone, PartialEq)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum TextStoreConfig {
    /// Pastes kept in the bridge's own SQLite database
    Sqlite { base_url: String },
    /// Link to the chat log entry instead of a separate paste
    ChatLogger { base_url: String },
    Pastebin { api_key: String },
}

// Manual so the pastebin key never reaches the logs
impl fmt::Debug for TextStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextStoreConfig::Sqlite { base_url } => {
                f.debug_struct("Sqlite").field("base_url", base_url).finish()
            }
            TextStoreConfig::ChatLogger { base_url } => f
                .debug_struct("ChatLogger")
                .field("base_url", base_url)
                .finish(),
            TextStoreConfig::Pastebin { .. } => f
                .debug_struct("Pastebin")
                .field("api_key", &"<redacted>")
                .finish(),
        }
    }
}

impl fmt::Display for TextStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextStoreConfig::Sqlite { base_url } => write!(f, "sqlite ({})", base_url),
            TextStoreConfig::ChatLogger { base_url } => write!(f, "chat_logger ({})", base_url),
            TextStoreConfig::Pastebin { .. } => write!(f, "pastebin"),
        }
    }
}

impl Default for TextStoreConfig {
    fn default() -> Self {
        TextStoreConfig::Sqlite {
            base_url: "http://localhost:8080".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusConfig {
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

/// HTTP server for pastes, chat log entries and relayed media
#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_web_bind")]
    pub bind: String,
    /// Externally reachable base of `bind`, used in media links
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

fn default_name() -> String {
    "bot".to_string()
}

fn default_irc_port() -> u16 {
    6667
}

fn default_db_path() -> PathBuf {
    PathBuf::from("roombridge.db")
}

fn default_bus_capacity() -> usize {
    1024
}

fn default_web_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_memory_config() -> MemoryConfig {
    MemoryConfig {
        database_path: default_db_path(),
    }
}

fn default_bus_config() -> BusConfig {
    BusConfig {
        capacity: default_bus_capacity(),
    }
}

fn default_web_config() -> WebConfig {
    WebConfig {
        bind: default_web_bind(),
        public_url: default_public_url(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Addresses bound on one network, in room order
    pub fn addresses(&self, channel: ChannelType) -> Vec<String> {
        self.bindings
            .values()
            .filter_map(|b| b.address(channel))
            .map(str::to_string)
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.bindings.is_empty() {
            anyhow::bail!("No [bindings] configured");
        }
        if self.bus.capacity == 0 {
            anyhow::bail!("[bus] capacity must be greater than zero");
        }

        // Rooms must be disjoint per network, otherwise resolution is ambiguous
        let mut seen: HashMap<(ChannelType, &str), &str> = HashMap::new();
        for (room, binding) in &self.bindings {
            for (channel, address) in binding.entries() {
                if let Some(other) = seen.insert((channel, address), room) {
                    anyhow::bail!(
                        "{} address '{}' is bound by both '{}' and '{}'",
                        channel,
                        address,
                        other,
                        room
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
name = "fishbot"
plugins = ["ping"]

[bindings.room1]
irc = "#a"
xmpp = "room@conf"
telegram = "-100123"

[bindings.room2]
irc = "#b"

[irc]
server = "irc.example.org"
nick = "bridge"

[text_store]
provider = "chat_logger"
base_url = "https://logs.example.org"
"##;

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.name, "fishbot");
        assert_eq!(config.plugins, Some(vec!["ping".to_string()]));
        assert_eq!(config.bindings.len(), 2);
        assert!(config.telegram.is_none());

        let irc = config.irc.as_ref().unwrap();
        assert_eq!(irc.port, 6667);
        assert!(irc.blacklist.is_empty());

        assert_eq!(
            config.text_store,
            TextStoreConfig::ChatLogger {
                base_url: "https://logs.example.org".to_string()
            }
        );
        assert_eq!(config.bus.capacity, 1024);
        assert_eq!(config.memory.database_path, PathBuf::from("roombridge.db"));
    }

    #[test]
    fn test_addresses_per_network() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.addresses(ChannelType::Irc), vec!["#a", "#b"]);
        assert_eq!(config.addresses(ChannelType::Telegram), vec!["-100123"]);
    }

    #[test]
    fn test_defaults() {
        let config = Config::parse("[bindings.r]\nirc = \"#r\"\n").unwrap();
        assert_eq!(config.name, "bot");
        assert!(config.plugins.is_none());
        assert_eq!(config.text_store, TextStoreConfig::default());
        assert_eq!(config.web.bind, "127.0.0.1:8080");
        assert_eq!(config.web.public_url, "http://localhost:8080");
    }

    #[test]
    fn test_rejects_empty_bindings() {
        assert!(Config::parse("name = \"x\"\n[bindings]\n").is_err());
    }

    #[test]
    fn test_rejects_overlapping_bindings() {
        let content = r##"
[bindings.one]
irc = "#same"

[bindings.two]
irc = "#same"
"##;
        let err = Config::parse(content).unwrap_err();
        assert!(err.to_string().contains("#same"));
    }

    #[test]
    fn test_text_store_summary_hides_api_key() {
        let content = r##"
[bindings.one]
irc = "#a"

[text_store]
provider = "pastebin"
api_key = "s3cr3t-dev-key"
"##;
        let config = Config::parse(content).unwrap();
        assert_eq!(config.text_store.to_string(), "pastebin");
        assert!(!format!("{:?}", config.text_store).contains("s3cr3t-dev-key"));
        assert!(!format!("{:?}", config).contains("s3cr3t-dev-key"));
        assert_eq!(
            TextStoreConfig::default().to_string(),
            "sqlite (http://localhost:8080)"
        );
    }

    #[test]
    fn test_xmpp_section() {
        let content = r##"
[bindings.one]
xmpp = "fish@conference.example.org"

[xmpp]
jid = "bridge@example.org"
password = "hunter2"
nick = "fishbridge"
"##;
        let config = Config::parse(content).unwrap();
        let xmpp = config.xmpp.as_ref().unwrap();
        assert_eq!(xmpp.jid, "bridge@example.org");
        assert_eq!(xmpp.nick, "fishbridge");
        assert!(!format!("{:?}", config).contains("hunter2"));
        assert_eq!(
            config.addresses(ChannelType::Xmpp),
            vec!["fish@conference.example.org"]
        );
    }

    #[test]
    fn test_rejects_unknown_text_store() {
        let content = r##"
[bindings.one]
irc = "#a"

[text_store]
provider = "gist"
"##;
        assert!(Config::parse(content).is_err());
    }
}
