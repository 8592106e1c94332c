use tracing::{info, warn};

use super::CommandRegistry;

/// Names accepted in the `plugins` config list
pub const BUILTIN_COMMANDS: &[&str] = &["ping", "echo"];

/// Build the registry from the configured plugin list.
///
/// `None` registers every built-in. `help` is always registered and lists
/// whatever ended up in the registry.
pub fn build_registry(plugins: Option<&[String]>) -> CommandRegistry {
    let mut registry = CommandRegistry::new();

    let selected: Vec<String> = match plugins {
        Some(names) => names.iter().map(|n| n.to_ascii_lowercase()).collect(),
        None => BUILTIN_COMMANDS.iter().map(|n| n.to_string()).collect(),
    };

    for name in &selected {
        match name.as_str() {
            "ping" => registry.register("ping", "Check that the bridge is alive", |_, _| {
                Ok("pong".to_string())
            }),
            "echo" => registry.register("echo", "Repeat the given text", |args, _| {
                if args.is_empty() {
                    anyhow::bail!("echo needs at least one argument");
                }
                Ok(args.join(" "))
            }),
            "help" => {}
            other => warn!("Unknown plugin '{}', skipping", other),
        }
    }

    let mut help = String::from("Commands:");
    for command in registry.list() {
        help.push_str(&format!("\n  /{} - {}", command.name, command.description));
    }
    help.push_str("\n  /help - List available commands");
    registry.register("help", "List available commands", move |_, _| Ok(help.clone()));

    info!("Loaded {} commands", registry.len());
    registry
}
