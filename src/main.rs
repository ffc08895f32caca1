use anyhow::Result;
use open_music_gateway::{AudioClient, GatewayConfig, VoiceGatewayListener};
use serenity::{model::gateway::GatewayIntents, Client};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_music_gateway=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("reqwest=info".parse()?),
        )
        .init();

    info!("🎵 Starting Open Music gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = GatewayConfig::load()?;
    info!("{}", config.summary());

    let audio = Arc::new(AudioClient::from_config(&config)?);

    // Voice events only; commands live in the upper layers.
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(VoiceGatewayListener::new(Arc::clone(&audio)))
        .await?;

    let shard_manager = client.shard_manager.clone();
    let shutdown_audio = Arc::clone(&audio);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("❌ Could not listen for Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Shutdown signal received, closing...");
        shutdown_audio.close();
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Gateway started");
    if let Err(why) = client.start().await {
        error!("Error running the chat client: {:?}", why);
    }

    Ok(())
}
