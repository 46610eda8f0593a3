//! swansonbot: Ron Swanson quotes for a Twitch channel.
//!
//! Connects to Twitch IRC over TLS, joins one channel and answers:
//!
//!   !swanson   a quote, in the channel (or by whisper if whispered)
//!   !shutdown  disconnect (channel owner only)
//!
//! The OAuth token comes from `--oauth` / `SWANSON_OAUTH` or the key file
//! (`.keys.json` by default). Connection settings may also come from a JSON
//! file given with `--config`.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use swanson_sdk::bot::CommandRouter;
use swanson_sdk::engine::ChatEngine;
use tracing_subscriber::EnvFilter;

use swanson_bot::commands;
use swanson_bot::config::Args;
use swanson_bot::quote::SwansonQuotes;

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs with SWANSON_LOG_JSON=1, human-readable otherwise
    let json_logs = std::env::var("SWANSON_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "swanson_bot=info,swanson_sdk=info".into());
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let args = Args::parse();
    let token = args.token()?;
    let config = args.bot_config()?;

    tracing::info!(
        server = %config.connect.server_addr(),
        nick = %config.nick,
        channel = %config.channel,
        "Starting swansonbot"
    );

    let quotes = Arc::new(SwansonQuotes::new().with_url(&args.quotes_url));
    let mut router = CommandRouter::new();
    commands::register(&mut router, quotes);

    let engine = ChatEngine::new(config, router);

    tokio::select! {
        result = engine.start(&token) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
            engine.shutdown().await;
        }
    }

    tracing::info!("Signed off");
    Ok(())
}
