//! Configuration types, loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::recognition::RecognitionConfig;

/// Default name of the counting channel when resolving by name.
pub const DEFAULT_CHANNEL_NAME: &str = "the-million-channel";

/// Default OCR.space endpoint.
pub const DEFAULT_OCR_ENDPOINT: &str = "https://api.ocr.space/parse/image";

/// Largest resync window one Discord history fetch can serve.
pub const MAX_RESYNC_LIMIT: usize = 100;

/// Counting engine configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How many tail messages to fetch when resynchronizing.
    pub resync_limit: usize,
    /// Skip bot-authored messages when choosing the resynchronized tail.
    pub resync_skip_bots: bool,
    /// Attachment extensions treated as images.
    pub image_extensions: Vec<String>,
    /// Upper bound on a single recognition call.
    pub recognition_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resync_limit: 10,
            resync_skip_bots: true,
            image_extensions: ["png", "jpg", "jpeg", "webp", "gif", "bmp"]
                .into_iter()
                .map(String::from)
                .collect(),
            recognition_timeout: Duration::from_secs(15),
        }
    }
}

/// Where the counting channel lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelTarget {
    Id(String),
    Named { guild_id: String, name: String },
}

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct WardenConfig {
    pub discord_token: SecretString,
    pub channel: ChannelTarget,
    pub poll_interval: Duration,
    pub poll_window: usize,
    pub pipeline: PipelineConfig,
    /// `None` disables image recognition.
    pub recognition: Option<RecognitionConfig>,
    pub db_path: PathBuf,
    /// Legacy JSON stats to import at startup.
    pub legacy_stats_path: Option<PathBuf>,
    pub log_dir: PathBuf,
}

impl WardenConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let discord_token = var("DISCORD_TOKEN")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("DISCORD_TOKEN".into()))?;

        let channel = match (var("COUNTING_CHANNEL_ID"), var("COUNTING_GUILD_ID")) {
            (Some(id), _) => ChannelTarget::Id(id),
            (None, Some(guild_id)) => ChannelTarget::Named {
                guild_id,
                name: var("COUNTING_CHANNEL_NAME")
                    .unwrap_or_else(|| DEFAULT_CHANNEL_NAME.to_string()),
            },
            (None, None) => {
                return Err(ConfigError::MissingRequired {
                    key: "COUNTING_CHANNEL_ID".into(),
                    hint: "Set it, or set COUNTING_GUILD_ID to resolve the channel by name."
                        .into(),
                });
            }
        };

        let poll_interval = Duration::from_secs(parse_or(
            &var,
            "COUNTWARDEN_POLL_INTERVAL_SECS",
            2u64,
        )?);
        if poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "COUNTWARDEN_POLL_INTERVAL_SECS".into(),
                message: "must be at least 1".into(),
            });
        }
        let poll_window = parse_or(&var, "COUNTWARDEN_POLL_WINDOW", 50usize)?;

        let defaults = PipelineConfig::default();
        let image_extensions = var("COUNTWARDEN_IMAGE_EXTENSIONS")
            .map(|s| {
                s.split(',')
                    .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.image_extensions);

        let pipeline = PipelineConfig {
            resync_limit: parse_or(&var, "COUNTWARDEN_RESYNC_LIMIT", defaults.resync_limit)?,
            resync_skip_bots: parse_or(
                &var,
                "COUNTWARDEN_RESYNC_SKIP_BOTS",
                defaults.resync_skip_bots,
            )?,
            image_extensions,
            recognition_timeout: Duration::from_secs(parse_or(
                &var,
                "COUNTWARDEN_RECOGNITION_TIMEOUT_SECS",
                defaults.recognition_timeout.as_secs(),
            )?),
        };
        if !(1..=MAX_RESYNC_LIMIT).contains(&pipeline.resync_limit) {
            return Err(ConfigError::InvalidValue {
                key: "COUNTWARDEN_RESYNC_LIMIT".into(),
                message: format!("must be between 1 and {MAX_RESYNC_LIMIT}"),
            });
        }

        let recognition = match var("OCR_SPACE_API_KEY") {
            Some(key) => Some(RecognitionConfig {
                api_key: SecretString::from(key),
                endpoint: var("OCR_SPACE_ENDPOINT")
                    .unwrap_or_else(|| DEFAULT_OCR_ENDPOINT.to_string()),
                language: var("OCR_LANGUAGE").unwrap_or_else(|| "eng".to_string()),
                engine: parse_or(&var, "OCR_ENGINE", 2u8)?,
            }),
            None => None,
        };

        Ok(Self {
            discord_token,
            channel,
            poll_interval,
            poll_window,
            pipeline,
            recognition,
            db_path: var("COUNTWARDEN_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/countwarden.db")),
            legacy_stats_path: var("COUNTWARDEN_LEGACY_STATS").map(PathBuf::from),
            log_dir: var("COUNTWARDEN_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./logs")),
        })
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}
