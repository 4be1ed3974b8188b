//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono_tz::Tz;

use crate::jobs::Cadence;
use crate::services::chat::ChannelKind;
use crate::services::discord::DiscordConfig;
use crate::services::jellyfin::JellyfinConfig;
use crate::services::logging::LogFormat;
use crate::services::report::ReportConfig;

/// Libraries hidden from the report unless `IGNORED_LIBRARIES` says otherwise.
pub const DEFAULT_IGNORED_LIBRARIES: &[&str] =
    &["Playlists", "Collections", "Recommendations", "Recordings"];

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Media server connection and inventory settings
    pub jellyfin: JellyfinConfig,

    /// Chat destination (guild, category, channel)
    pub discord: DiscordConfig,

    /// Report presentation (title, assets, timezone)
    pub report: ReportConfig,

    /// How often the status board is refreshed
    pub cadence: Cadence,

    /// Upper bound for a single fetch/build/publish cycle
    pub cycle_timeout: Duration,

    /// File holding the id of the published status message
    pub state_path: PathBuf,

    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Blank values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| get(key).with_context(|| format!("{key} is required"));

        let base_url = required("JELLYFIN_URL")?;
        url::Url::parse(&base_url).with_context(|| format!("Invalid JELLYFIN_URL: {base_url}"))?;

        let ignored_libraries = match get("IGNORED_LIBRARIES") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_IGNORED_LIBRARIES.iter().map(|s| s.to_string()).collect(),
        };

        let jellyfin = JellyfinConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: required("JELLYFIN_API_KEY")?,
            user_id: get("JELLYFIN_USER_ID"),
            ignored_libraries,
            request_timeout: Duration::from_secs(parse_positive(&get, "HTTP_TIMEOUT_SECS", 10)?),
            health_timeout: Duration::from_secs(parse_positive(&get, "HEALTH_TIMEOUT_SECS", 5)?),
            library_concurrency: parse_or(&get, "LIBRARY_CONCURRENCY", 4usize)?.max(1),
            recent_scan_limit: parse_or(&get, "RECENT_SCAN_LIMIT", 500u32)?,
        };

        let guild_id = required("DISCORD_GUILD_ID")?;
        let guild_id: u64 = guild_id
            .parse()
            .with_context(|| format!("Invalid DISCORD_GUILD_ID: {guild_id}"))?;

        let channel_kind = match get("DISCORD_CHANNEL_KIND") {
            Some(kind) => ChannelKind::from_str(&kind).map_err(|e| anyhow!(e))?,
            None => ChannelKind::Text,
        };

        let discord = DiscordConfig {
            token: required("DISCORD_TOKEN")?,
            guild_id,
            category_name: get("DISCORD_CATEGORY_NAME")
                .unwrap_or_else(|| "Jellyfin Status".to_string()),
            channel_name: get("DISCORD_CHANNEL_NAME")
                .unwrap_or_else(|| "jellyfin-status".to_string()),
            channel_kind,
            read_only: parse_bool(&get, "DISCORD_READ_ONLY", true)?,
            request_timeout: jellyfin.request_timeout,
        };

        let timezone = match get("TIMEZONE") {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|e| anyhow!("Invalid TIMEZONE {name}: {e}"))?,
            None => Tz::UTC,
        };

        let report = ReportConfig {
            title: get("STATUS_TITLE")
                .unwrap_or_else(|| "Jellyfin Server Status & Media Library Counts".to_string()),
            thumbnail_url: get("STATUS_THUMBNAIL_URL"),
            footer_icon_url: get("STATUS_FOOTER_ICON_URL"),
            timezone,
        };

        let interval_secs = parse_positive(&get, "POLL_INTERVAL_SECS", 60)?;

        let log_format = match get("LOG_FORMAT") {
            Some(format) => LogFormat::from_str(&format).map_err(|e| anyhow!(e))?,
            None => LogFormat::Json,
        };

        Ok(Self {
            jellyfin,
            discord,
            report,
            cadence: Cadence {
                interval: Duration::from_secs(interval_secs),
                align_to_wall_clock: parse_bool(&get, "ALIGN_TO_WALL_CLOCK", false)?,
            },
            cycle_timeout: Duration::from_secs(parse_positive(&get, "CYCLE_TIMEOUT_SECS", 120)?),
            state_path: get("MESSAGE_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("last_message_id.json")),
            log_format,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow!("Invalid {key} ({raw}): {e}")),
        None => Ok(default),
    }
}

/// Like [parse_or] for durations in seconds, rejecting zero.
fn parse_positive<G>(get: &G, key: &str, default: u64) -> Result<u64>
where
    G: Fn(&str) -> Option<String>,
{
    let value: u64 = parse_or(get, key, default)?;
    if value == 0 {
        bail!("{key} must be greater than zero");
    }
    Ok(value)
}

fn parse_bool<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes") => Ok(true),
        Some(v) if matches!(v.as_str(), "false" | "0" | "no") => Ok(false),
        Some(v) => bail!("Invalid {key}: {v} (expected true/false)"),
    }
}
