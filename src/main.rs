mod config;
mod lesson;
mod llm;
mod platform;
mod relay;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::llm::gemini::GeminiClient;
use crate::platform::telegram::{self, TelegramSink};
use crate::relay::Relay;

#[tokio::main]
async fn main() -> Result<()> {
    // Pick up secrets (and RUST_LOG) from a local .env before anything reads the environment
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gemini_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Loading configuration from environment");
    let config = Config::from_env().context("Invalid configuration")?;

    info!("Configuration loaded successfully");
    info!("  Model: {}", config.gemini.model);
    info!("  API base: {}", config.gemini.base_url);
    info!("  Streaming replies: {}", config.relay.stream_replies);
    info!(
        "  System prompt: {}",
        if config.relay.system_prompt.is_some() { "set" } else { "none" }
    );

    let generator = GeminiClient::new(&config.gemini).context("Failed to create Gemini client")?;
    let bot = teloxide::Bot::new(config.telegram.bot_token.expose_secret());

    let relay = Relay::new(Arc::new(generator), Arc::new(TelegramSink::new(bot.clone())))
        .with_config(&config.relay);

    info!("Bot is starting...");
    telegram::run(bot, Arc::new(relay)).await?;

    Ok(())
}
