use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use countwarden::channels::{CountingChannel, DiscordChannel};
use countwarden::config::{ChannelTarget, WardenConfig};
use countwarden::pipeline::{Moderator, ModeratorDeps, event_loop};
use countwarden::recognition::create_recognizer;
use countwarden::store::{LibSqlBackend, StatsStore, parse_legacy_stats};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WardenConfig::from_env().context("invalid configuration")?;
    let _logging = countwarden::logging::init(&config.log_dir)?;

    eprintln!("Countwarden v{}", env!("CARGO_PKG_VERSION"));

    let channel_id = match &config.channel {
        ChannelTarget::Id(id) => id.clone(),
        ChannelTarget::Named { guild_id, name } => {
            let id = DiscordChannel::resolve_channel_id(&config.discord_token, guild_id, name)
                .await
                .with_context(|| format!("could not find channel #{name}"))?;
            tracing::info!(channel = %name, id = %id, "Resolved counting channel");
            id
        }
    };

    let channel = Arc::new(
        DiscordChannel::new(config.discord_token.clone(), channel_id)
            .with_polling(config.poll_interval, config.poll_window),
    );
    channel
        .health_check()
        .await
        .context("Discord health check failed")?;

    let stats = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .context("failed to open stats database")?,
    );
    if let Some(path) = &config.legacy_stats_path {
        import_legacy_once(&*stats, path).await?;
    }

    let recognizer = create_recognizer(config.recognition.as_ref());

    let moderator = Arc::new(
        Moderator::start(
            ModeratorDeps {
                channel: channel.clone(),
                recognizer,
                stats,
            },
            config.pipeline.clone(),
        )
        .await
        .context("initial resynchronization failed")?,
    );

    let events = channel.start().await?;
    let consumer = event_loop::spawn(moderator, events);

    tokio::select! {
        result = consumer => {
            result.context("event loop panicked")?;
            tracing::warn!("Event stream closed");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }
    Ok(())
}

/// Import a legacy stats export, then rename it to `<file>.imported` so a
/// restart does not add the same counts twice.
async fn import_legacy_once(stats: &dyn StatsStore, path: &Path) -> anyhow::Result<()> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        tracing::info!(path = %path.display(), "No legacy stats to import");
        return Ok(());
    }
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let legacy = parse_legacy_stats(&raw)?;
    stats.import_legacy(&legacy).await?;

    let mut done = path.as_os_str().to_owned();
    done.push(".imported");
    tokio::fs::rename(path, &done)
        .await
        .with_context(|| format!("failed to mark {} as imported", path.display()))?;
    Ok(())
}
