//! Command-line entry: `serve` (default), `send-test` and `menu` admin
//! subcommands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::load_config;
use crate::gateway;
use crate::menu::MenuClient;
use crate::notify::Notifier;
use crate::token::TokenCache;

#[derive(Parser)]
#[command(name = "wecom-gateway", version, about = "Secure command gateway for WeCom callbacks")]
struct Cli {
    /// Path to the JSON config file (default: ./config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the webhook gateway (default)
    Serve,
    /// Send a test message through the configured transports
    SendTest {
        /// Message text; a self-describing default is used when omitted
        #[arg(long)]
        content: Option<String>,
        /// Recipient user id
        #[arg(long, default_value = "@all")]
        to: String,
    },
    /// Manage the platform custom menu
    Menu {
        #[command(subcommand)]
        action: MenuAction,
    },
}

#[derive(Subcommand)]
enum MenuAction {
    /// Push the menu definition from config to the platform
    Create,
    /// Print the currently installed menu
    Show,
    /// Delete the installed menu
    Delete,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => gateway::run_server(&config).await,
        Command::SendTest { content, to } => {
            let tokens = Arc::new(TokenCache::new());
            let notifier = Notifier::from_config(&config, tokens);
            let text = content.unwrap_or_else(|| {
                format!("wecom-gateway {} 测试消息", crate::VERSION)
            });
            let outcome = notifier.send_text(&text, &to).await;
            if outcome.success {
                println!("sent, msgid: {}", outcome.msg_id.as_deref().unwrap_or("-"));
                Ok(())
            } else {
                anyhow::bail!("test message delivery failed")
            }
        }
        Command::Menu { action } => {
            let tokens = Arc::new(TokenCache::new());
            let client = MenuClient::from_config(&config, tokens);
            let outcome = match action {
                MenuAction::Create => client.create().await?,
                MenuAction::Show => client.get().await?,
                MenuAction::Delete => client.delete().await?,
            };
            println!("{}", outcome.message);
            if let Some(menu) = outcome.menu {
                println!("{}", serde_json::to_string_pretty(&menu)?);
            }
            if outcome.success {
                Ok(())
            } else {
                anyhow::bail!("menu operation failed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_to_serve() {
        let cli = Cli::parse_from(["wecom-gateway"]);
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn send_test_flags() {
        let cli = Cli::parse_from(["wecom-gateway", "send-test", "--content", "hi", "--to", "u1"]);
        match cli.command {
            Some(Command::SendTest { content, to }) => {
                assert_eq!(content.as_deref(), Some("hi"));
                assert_eq!(to, "u1");
            }
            _ => panic!("expected send-test"),
        }
    }

    #[test]
    fn global_config_flag() {
        let cli = Cli::parse_from(["wecom-gateway", "--config", "/tmp/c.json", "menu", "show"]);
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/c.json")));
    }
}
