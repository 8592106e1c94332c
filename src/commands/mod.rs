pub mod builtin;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::message::Message;

/// Characters that mark the start of a command on any network
pub const COMMAND_MARKERS: &[char] = &['/', '!'];

/// Pure command function: `(args, triggering message) -> reply`
pub type CommandHandler = Arc<dyn Fn(&[String], &Message) -> Result<String> + Send + Sync>;

/// A registered bot command
#[derive(Clone)]
pub struct Command {
    pub name: String,
    pub description: String,
    pub handler: CommandHandler,
}

/// Result of running a message through the registry
#[derive(Debug)]
pub enum Dispatch {
    /// Handler ran and produced this reply (possibly empty)
    Reply(String),
    /// Content does not parse as a command
    NotACommand,
    /// Parsed, but no handler is registered under this name
    Unknown(String),
    /// Handler returned an error or panicked
    Failed(anyhow::Error),
}

/// Split `"/name@bot arg1 arg2"` into its lowercase name and arguments
pub fn parse_command(content: &str) -> Option<(String, Vec<String>)> {
    let rest = content.strip_prefix(COMMAND_MARKERS)?;
    let mut parts = rest.split_whitespace();
    let head = parts.next()?;

    // Telegram appends the bot's username in groups: /ping@fishbot
    let name = head.split('@').next().unwrap_or(head);
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return None;
    }
    if !rest.starts_with(head) {
        // whitespace between marker and name
        return None;
    }

    Some((
        name.to_ascii_lowercase(),
        parts.map(str::to_string).collect(),
    ))
}

/// Name → handler table, populated once at startup
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Command>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: &str, description: &str, handler: F)
    where
        F: Fn(&[String], &Message) -> Result<String> + Send + Sync + 'static,
    {
        let name = name.to_ascii_lowercase();
        info!("Registered command: {}", name);
        self.commands.insert(
            name.clone(),
            Command {
                name,
                description: description.to_string(),
                handler: Arc::new(handler),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    /// All commands, sorted by name
    pub fn list(&self) -> Vec<&Command> {
        let mut commands: Vec<_> = self.commands.values().collect();
        commands.sort_by(|a, b| a.name.cmp(&b.name));
        commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Parse the message content and run the matching handler.
    /// A panicking handler is reported as `Failed` rather than unwinding into
    /// the forwarding loop.
    pub fn dispatch(&self, msg: &Message) -> Dispatch {
        let Some((name, args)) = parse_command(&msg.content) else {
            return Dispatch::NotACommand;
        };
        let Some(command) = self.get(&name) else {
            return Dispatch::Unknown(name);
        };

        let handler = Arc::clone(&command.handler);
        match panic::catch_unwind(AssertUnwindSafe(|| handler(&args, msg))) {
            Ok(Ok(reply)) => Dispatch::Reply(reply),
            Ok(Err(e)) => Dispatch::Failed(e.context(format!("command '{}' failed", name))),
            Err(_) => Dispatch::Failed(anyhow::anyhow!("command '{}' panicked", name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ChannelType, MessageType};

    fn cmd(content: &str) -> Message {
        Message::new(ChannelType::Irc, "alice", "#a", content, MessageType::Command)
    }

    #[test]
    fn test_parse_command_with_args() {
        let (name, args) = parse_command("!echo hello   world").unwrap();
        assert_eq!(name, "echo");
        assert_eq!(args, vec!["hello", "world"]);
    }

    #[test]
    fn test_parse_command_strips_bot_suffix() {
        let (name, args) = parse_command("/Ping@fishbot").unwrap();
        assert_eq!(name, "ping");
        assert!(args.is_empty());
    }

    #[test]
    fn test_parse_rejects_non_commands() {
        assert!(parse_command("ping").is_none());
        assert!(parse_command("!").is_none());
        assert!(parse_command("! ping").is_none());
        assert!(parse_command("/usr/bin").is_none());
        assert!(parse_command("").is_none());
    }

    #[test]
    fn test_dispatch_reply() {
        let mut registry = CommandRegistry::new();
        registry.register("ping", "", |_, _| Ok("pong".to_string()));
        match registry.dispatch(&cmd("!ping")) {
            Dispatch::Reply(r) => assert_eq!(r, "pong"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_passes_message() {
        let mut registry = CommandRegistry::new();
        registry.register("whoami", "", |_, msg| Ok(msg.sender.clone()));
        match registry.dispatch(&cmd("/whoami")) {
            Dispatch::Reply(r) => assert_eq!(r, "alice"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_unknown_and_not_a_command() {
        let registry = CommandRegistry::new();
        assert!(matches!(registry.dispatch(&cmd("!nope")), Dispatch::Unknown(n) if n == "nope"));
        assert!(matches!(registry.dispatch(&cmd("plain")), Dispatch::NotACommand));
    }

    #[test]
    fn test_dispatch_failure_and_panic() {
        let mut registry = CommandRegistry::new();
        registry.register("bad", "", |_, _| anyhow::bail!("boom"));
        registry.register("worse", "", |_, _| panic!("kaboom"));
        assert!(matches!(registry.dispatch(&cmd("!bad")), Dispatch::Failed(_)));
        assert!(matches!(registry.dispatch(&cmd("!worse")), Dispatch::Failed(_)));
    }

    #[test]
    fn test_list_sorted() {
        let mut registry = CommandRegistry::new();
        registry.register("zeta", "", |_, _| Ok(String::new()));
        registry.register("Alpha", "", |_, _| Ok(String::new()));
        let names: Vec<_> = registry.list().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
