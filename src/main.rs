mod cli;
mod codec;
mod commands;
mod config;
mod crypto;
mod dedup;
mod errors;
mod gateway;
mod media;
mod menu;
mod notify;
mod search;
mod session;
mod token;
mod utils;

use anyhow::Result;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".parse().unwrap());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    cli::run().await
}
