mod bindings;
mod bus;
mod commands;
mod config;
mod forwarder;
mod memory;
mod message;
mod overflow;
mod platform;
mod textstore;
mod web;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tokio::task::JoinSet;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bindings::BindingTable;
use crate::bus::MessageBus;
use crate::config::Config;
use crate::forwarder::Forwarder;
use crate::memory::MemoryStore;
use crate::message::ChannelType;
use crate::platform::irc::IrcAdapter;
use crate::platform::telegram::TelegramAdapter;
use crate::platform::xmpp::XmppAdapter;
use crate::platform::ChannelAdapter;
use crate::web::MediaLinks;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,roombridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Bot name: {}", config.name);
    info!("  Rooms: {}", config.bindings.len());
    info!("  Text store: {}", config.text_store);

    let memory = MemoryStore::open(&config.memory.database_path)?;
    let text_store = textstore::from_config(&config.text_store, memory.clone())?;
    let commands = commands::builtin::build_registry(config.plugins.as_deref());
    let bindings = Arc::new(BindingTable::new(config.bindings.clone()));
    let (publisher, receiver) = MessageBus::new(config.bus.capacity);

    // Adapter order is the fan-out order
    let mut adapters: Vec<Arc<dyn ChannelAdapter>> = Vec::new();
    let mut tasks = JoinSet::new();

    // Serves paste, log and media links
    tasks.spawn(web::run(config.web.clone(), memory.clone()));

    if let Some(telegram) = &config.telegram {
        let bot = Bot::new(&telegram.bot_token);
        let media = MediaLinks::new(memory.clone(), &config.web.public_url);
        adapters.push(Arc::new(TelegramAdapter::new(bot.clone())));
        tasks.spawn(platform::telegram::run(bot, publisher.clone(), media));
    }

    if let Some(irc) = &config.irc {
        let (adapter, outbound) = IrcAdapter::new();
        adapters.push(Arc::new(adapter));
        tasks.spawn(platform::irc::run(
            irc.clone(),
            config.addresses(ChannelType::Irc),
            publisher.clone(),
            outbound,
        ));
    }

    if let Some(xmpp) = &config.xmpp {
        let (adapter, outbound) = XmppAdapter::new();
        adapters.push(Arc::new(adapter));
        tasks.spawn(platform::xmpp::run(
            xmpp.clone(),
            config.addresses(ChannelType::Xmpp),
            publisher.clone(),
            outbound,
        ));
    }

    if adapters.is_empty() {
        anyhow::bail!("No networks configured; add a [telegram], [irc] or [xmpp] section");
    }

    // Listeners hold the only publishers, so the bus closes when they all exit
    drop(publisher);

    let forwarder = Forwarder::new(
        config.name.clone(),
        bindings,
        commands,
        adapters,
        text_store,
        Arc::new(memory),
    );
    tasks.spawn(async move { forwarder.run(receiver).await });

    info!("Bridge is starting...");

    // Every task runs for the life of the process; the first one to stop ends it
    match tasks.join_next().await {
        Some(Ok(result)) => result,
        Some(Err(e)) => Err(e).context("Bridge task panicked"),
        None => Ok(()),
    }
}
