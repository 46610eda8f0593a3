//! The bot's chat commands.
//!
//!   !swanson   a Ron Swanson quote, in the channel or by whisper
//!   !shutdown  disconnect the bot (channel owner only)

use std::sync::Arc;

use anyhow::Context;
use swanson_sdk::bot::CommandRouter;

use crate::quote::QuoteProvider;

pub const SWANSON: &str = "swanson";
pub const SHUTDOWN: &str = "shutdown";

pub fn register<Q: QuoteProvider>(router: &mut CommandRouter, quotes: Arc<Q>) {
    router.command(SWANSON, "A quote from Ron Swanson", move |ctx| {
        let quotes = quotes.clone();
        Box::pin(async move {
            // The read loop has moved on already; a failed fetch just means no reply.
            let quote = quotes.fetch_quote().await.context("Quote fetch failed")?;
            ctx.reply(&quote).await
        })
    });

    router.owner_command(SHUTDOWN, "Disconnect the bot", |ctx| {
        Box::pin(async move {
            tracing::info!(sender = ctx.sender(), "Shutdown command received, signing off");
            ctx.engine.shutdown().await;
            Ok(())
        })
    });
}
