//! Discord REST implementation of [ChatPlatform].
//!
//! Talks to the v10 HTTP API with a bot token. Rate limits are honoured via
//! `Retry-After`; 5xx and 429 responses are retried a few times before the
//! cycle gives up. 404 bodies are inspected so that a deleted message and a
//! deleted channel surface as different errors.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Method, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::{Error, Resource, Result};
use crate::services::chat::{
    AccessRule, ChannelInfo, ChannelKind, ChannelType, ChatPlatform, NewChannel,
};
use crate::services::channel_resolver::DestinationSpec;
use crate::services::rate_limiter::{RateLimitedClient, ResponseExt, RetryConfig, retry_async};
use crate::services::report::{ColorTag, DisplayHint, ReportDocument, ReportSection};

const API_BASE: &str = "https://discord.com/api/v10";

/// JSON error codes Discord returns alongside 404
const UNKNOWN_CHANNEL: u64 = 10003;
const UNKNOWN_MESSAGE: u64 = 10008;

const VIEW_CHANNEL: u64 = 1 << 10;
const SEND_MESSAGES: u64 = 1 << 11;
const EMBED_LINKS: u64 = 1 << 14;
const READ_MESSAGE_HISTORY: u64 = 1 << 16;

const MAX_FIELDS: usize = 25;
const MAX_FIELD_NAME: usize = 256;
const MAX_TITLE: usize = 256;
const MAX_FIELD_VALUE: usize = 1024;

/// Discord destination configuration
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    /// Bot token (without the `Bot ` prefix)
    pub token: String,
    pub guild_id: u64,
    pub category_name: String,
    pub channel_name: String,
    pub channel_kind: ChannelKind,
    /// Deny `@everyone` from posting in a newly created channel
    pub read_only: bool,
    pub request_timeout: Duration,
}

impl DiscordConfig {
    pub fn destination(&self) -> DestinationSpec {
        DestinationSpec {
            category_name: self.category_name.clone(),
            channel_name: self.channel_name.clone(),
            kind: self.channel_kind,
            read_only: self.read_only,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DiscordChannel {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    parent_id: Option<String>,
}

impl From<DiscordChannel> for ChannelInfo {
    fn from(channel: DiscordChannel) -> Self {
        ChannelInfo {
            id: channel.id,
            name: channel.name.unwrap_or_default(),
            channel_type: channel_type_from_code(channel.kind),
            parent_id: channel.parent_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DiscordMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct DiscordErrorBody {
    #[serde(default)]
    code: u64,
    #[serde(default)]
    message: String,
}

/// Discord bot client scoped to one guild
pub struct DiscordClient {
    http: RateLimitedClient,
    api_base: String,
    token: String,
    guild_id: u64,
    timeout: Duration,
    retry: RetryConfig,
    current_user: parking_lot::RwLock<Option<String>>,
}

impl DiscordClient {
    pub fn new(config: &DiscordConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: RateLimitedClient::for_discord(config.request_timeout)
                .context("Failed to build Discord client")?,
            api_base: API_BASE.to_string(),
            token: config.token.clone(),
            guild_id: config.guild_id,
            timeout: config.request_timeout,
            retry: RetryConfig::default(),
            current_user: parking_lot::RwLock::new(None),
        })
    }

    async fn send_once(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        missing: Resource,
    ) -> Result<Response> {
        let url = format!("{}{}", self.api_base, path);
        let mut request = self
            .http
            .request(method, &url)
            .await
            .header("Authorization", format!("Bot {}", self.token));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(self.timeout)
            } else {
                Error::destination(format!("{path}: {e}"))
            }
        })?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let retry_after = if response.is_rate_limited() {
            response.retry_after()
        } else {
            None
        };
        let text = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &text, missing, retry_after))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        missing: Resource,
    ) -> Result<T> {
        let body = body.as_ref();
        let operation = format!("discord {method} {path}");
        let response = retry_async(
            || self.send_once(method.clone(), path, body, missing),
            &self.retry,
            &operation,
        )
        .await?;

        response
            .json::<T>()
            .await
            .map_err(|e| Error::destination(format!("{path}: unexpected response body: {e}")))
    }

    fn overwrites(&self, access: &[AccessRule]) -> Vec<Value> {
        access
            .iter()
            .map(|rule| match rule {
                // The @everyone role shares the guild's id
                AccessRule::EveryoneReadOnly => json!({
                    "id": self.guild_id.to_string(),
                    "type": 0,
                    "allow": VIEW_CHANNEL.to_string(),
                    "deny": SEND_MESSAGES.to_string(),
                }),
                AccessRule::PublisherWrite { user_id } => json!({
                    "id": user_id,
                    "type": 1,
                    "allow": (VIEW_CHANNEL | SEND_MESSAGES | EMBED_LINKS | READ_MESSAGE_HISTORY)
                        .to_string(),
                    "deny": "0",
                }),
            })
            .collect()
    }
}

#[async_trait]
impl ChatPlatform for DiscordClient {
    async fn current_user_id(&self) -> Result<String> {
        if let Some(id) = self.current_user.read().clone() {
            return Ok(id);
        }
        let user: DiscordUser = self
            .call(Method::GET, "/users/@me", None, Resource::Channel)
            .await?;
        *self.current_user.write() = Some(user.id.clone());
        Ok(user.id)
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>> {
        let channels: Vec<DiscordChannel> = self
            .call(
                Method::GET,
                &format!("/guilds/{}/channels", self.guild_id),
                None,
                Resource::Channel,
            )
            .await?;
        debug!(count = channels.len(), guild_id = self.guild_id, "Listed guild channels");
        Ok(channels.into_iter().map(ChannelInfo::from).collect())
    }

    async fn create_channel(&self, request: &NewChannel) -> Result<ChannelInfo> {
        let mut body = json!({
            "name": request.name,
            "type": channel_type_code(request.channel_type)?,
            "permission_overwrites": self.overwrites(&request.access),
        });
        if let Some(parent_id) = &request.parent_id {
            body["parent_id"] = json!(parent_id);
        }

        let channel: DiscordChannel = self
            .call(
                Method::POST,
                &format!("/guilds/{}/channels", self.guild_id),
                Some(body),
                Resource::Channel,
            )
            .await?;
        Ok(channel.into())
    }

    async fn convert_channel(&self, channel_id: &str, kind: ChannelKind) -> Result<ChannelInfo> {
        let channel: DiscordChannel = self
            .call(
                Method::PATCH,
                &format!("/channels/{channel_id}"),
                Some(json!({ "type": channel_type_code(ChannelType::Leaf(kind))? })),
                Resource::Channel,
            )
            .await?;
        Ok(channel.into())
    }

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Result<String> {
        let message: DiscordMessage = self
            .call(
                Method::GET,
                &format!("/channels/{channel_id}/messages/{message_id}"),
                None,
                Resource::Message,
            )
            .await?;
        Ok(message.id)
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        report: &ReportDocument,
    ) -> Result<()> {
        let _: DiscordMessage = self
            .call(
                Method::PATCH,
                &format!("/channels/{channel_id}/messages/{message_id}"),
                Some(embed_payload(report)),
                Resource::Message,
            )
            .await?;
        Ok(())
    }

    async fn create_message(&self, channel_id: &str, report: &ReportDocument) -> Result<String> {
        let message: DiscordMessage = self
            .call(
                Method::POST,
                &format!("/channels/{channel_id}/messages"),
                Some(embed_payload(report)),
                Resource::Channel,
            )
            .await?;
        Ok(message.id)
    }
}

fn channel_type_from_code(code: u8) -> ChannelType {
    match code {
        0 => ChannelType::Leaf(ChannelKind::Text),
        2 => ChannelType::Leaf(ChannelKind::Voice),
        4 => ChannelType::Category,
        5 => ChannelType::Leaf(ChannelKind::Announcement),
        _ => ChannelType::Other,
    }
}

fn channel_type_code(channel_type: ChannelType) -> Result<u8> {
    match channel_type {
        ChannelType::Leaf(ChannelKind::Text) => Ok(0),
        ChannelType::Leaf(ChannelKind::Voice) => Ok(2),
        ChannelType::Category => Ok(4),
        ChannelType::Leaf(ChannelKind::Announcement) => Ok(5),
        ChannelType::Other => Err(Error::destination("cannot provision unsupported channel type")),
    }
}

/// Map a failed response onto the error taxonomy.
///
/// `missing` is what a bare 404 on this route refers to.
fn classify_failure(
    status: u16,
    body: &str,
    missing: Resource,
    retry_after: Option<Duration>,
) -> Error {
    let parsed: DiscordErrorBody = serde_json::from_str(body).unwrap_or_default();
    let detail = if parsed.message.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {} (code {})", parsed.message, parsed.code)
    };

    match status {
        404 => match parsed.code {
            UNKNOWN_CHANNEL => Error::DestinationNotFound(Resource::Channel),
            UNKNOWN_MESSAGE => Error::DestinationNotFound(Resource::Message),
            _ => Error::DestinationNotFound(missing),
        },
        401 | 403 => Error::DestinationPermissionDenied(detail),
        429 => Error::RateLimited { retry_after },
        _ => Error::DestinationUnavailable(detail),
    }
}

fn embed_color(color: ColorTag) -> u32 {
    match color {
        ColorTag::Healthy => 0x2ecc71,
        ColorTag::Unhealthy => 0xe74c3c,
        ColorTag::Neutral => 0x3498db,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.is_empty() {
        // Discord rejects empty field values
        return "\u{200b}".to_string();
    }
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

fn embed_field(section: &ReportSection) -> Value {
    json!({
        "name": truncate(&section.heading, MAX_FIELD_NAME),
        "value": truncate(&section.body, MAX_FIELD_VALUE),
        "inline": section.display == DisplayHint::Inline,
    })
}

/// Map sections onto embed fields within Discord's field limit.
///
/// Block sections (status, issues, recently added) are always kept. When
/// there are too many library fields, the ones that do not fit are folded
/// into a single summary field placed after the last library shown.
fn embed_fields(sections: &[ReportSection]) -> Vec<Value> {
    if sections.len() <= MAX_FIELDS {
        return sections.iter().map(embed_field).collect();
    }

    let blocks = sections
        .iter()
        .filter(|s| s.display == DisplayHint::Block)
        .count();
    let room = MAX_FIELDS.saturating_sub(blocks + 1);

    let mut fields = Vec::with_capacity(MAX_FIELDS);
    let mut shown = 0;
    let mut hidden = 0;
    let mut overflow_at = None;
    for section in sections {
        if section.display == DisplayHint::Block {
            fields.push(embed_field(section));
        } else if shown < room {
            fields.push(embed_field(section));
            shown += 1;
        } else {
            overflow_at.get_or_insert(fields.len());
            hidden += 1;
        }
    }

    if let Some(at) = overflow_at {
        warn!(shown, hidden, "Too many libraries for one embed; folding the rest");
        fields.insert(
            at,
            json!({
                "name": "More libraries",
                "value": format!("…and {hidden} more"),
                "inline": true,
            }),
        );
    }
    fields.truncate(MAX_FIELDS);
    fields
}

/// Message body carrying the report as a single embed.
pub fn embed_payload(report: &ReportDocument) -> Value {
    let fields = embed_fields(&report.sections);

    let mut embed = json!({
        "title": truncate(&report.title, MAX_TITLE),
        "color": embed_color(report.color),
        "timestamp": report.generated_at.to_rfc3339(),
        "fields": fields,
        "footer": { "text": report.footer },
    });
    if let Some(icon) = &report.footer_icon_url {
        embed["footer"]["icon_url"] = json!(icon);
    }
    if let Some(thumbnail) = &report.thumbnail_url {
        embed["thumbnail"] = json!({ "url": thumbnail });
    }

    json!({ "embeds": [embed] })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::services::jellyfin::{InventorySnapshot, LibraryKind, LibrarySummary};
    use crate::services::report::{RECENT_HEADING, ReportBuilder, ReportConfig, STATUS_HEADING};

    #[test]
    fn test_not_found_codes() {
        let body = r#"{"message": "Unknown Message", "code": 10008}"#;
        assert!(classify_failure(404, body, Resource::Channel, None).is_message_not_found());

        let body = r#"{"message": "Unknown Channel", "code": 10003}"#;
        assert!(classify_failure(404, body, Resource::Message, None).is_channel_not_found());

        assert!(classify_failure(404, "", Resource::Message, None).is_message_not_found());
    }

    #[test]
    fn test_failure_classes() {
        let body = r#"{"message": "Missing Access", "code": 50001}"#;
        assert!(matches!(
            classify_failure(403, body, Resource::Message, None),
            Error::DestinationPermissionDenied(_)
        ));
        assert!(matches!(
            classify_failure(429, "{}", Resource::Message, Some(Duration::from_secs(2))),
            Error::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(2)
        ));
        let err = classify_failure(502, "<html>", Resource::Message, None);
        assert!(matches!(err, Error::DestinationUnavailable(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_channel_type_codes() {
        for kind in [ChannelKind::Text, ChannelKind::Voice, ChannelKind::Announcement] {
            let code = channel_type_code(ChannelType::Leaf(kind)).unwrap();
            assert_eq!(channel_type_from_code(code), ChannelType::Leaf(kind));
        }
        assert_eq!(channel_type_from_code(4), ChannelType::Category);
        assert_eq!(channel_type_from_code(15), ChannelType::Other);
    }

    #[test]
    fn test_channel_listing_parses() {
        let raw = r#"[
            {"id": "1", "name": "Jellyfin Status", "type": 4, "parent_id": null},
            {"id": "2", "name": "jellyfin-status", "type": 5, "parent_id": "1", "position": 0}
        ]"#;
        let channels: Vec<ChannelInfo> = serde_json::from_str::<Vec<DiscordChannel>>(raw)
            .unwrap()
            .into_iter()
            .map(ChannelInfo::from)
            .collect();
        assert_eq!(channels[0].channel_type, ChannelType::Category);
        assert_eq!(channels[1].channel_type, ChannelType::Leaf(ChannelKind::Announcement));
        assert_eq!(channels[1].parent_id.as_deref(), Some("1"));
    }

    #[test]
    fn test_embed_payload() {
        let builder = ReportBuilder::new(
            ReportConfig {
                thumbnail_url: Some("https://example.org/logo.png".to_string()),
                ..ReportConfig::default()
            },
            vec![],
        );
        let at = chrono::Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap();
        let report = builder.build(
            &InventorySnapshot {
                server_online: true,
                libraries: vec![],
                issue: None,
            },
            at,
        );

        let payload = embed_payload(&report);
        let embed = &payload["embeds"][0];
        assert_eq!(embed["color"], json!(0x2ecc71));
        assert_eq!(embed["timestamp"], json!("2026-10-15T12:00:00+00:00"));
        assert_eq!(embed["thumbnail"]["url"], json!("https://example.org/logo.png"));
        assert_eq!(embed["fields"][0]["inline"], json!(false));
        assert!(embed["footer"].get("icon_url").is_none());
    }

    #[test]
    fn test_many_libraries_keep_recent_section() {
        let libraries: Vec<LibrarySummary> = (0..30)
            .map(|i| LibrarySummary {
                name: format!("Library {i:02}"),
                kind: LibraryKind::Movies,
                counts: Default::default(),
                recently_added: if i == 29 { 4 } else { 0 },
                degraded: false,
            })
            .collect();
        let report = ReportBuilder::new(ReportConfig::default(), vec![]).build(
            &InventorySnapshot {
                server_online: true,
                libraries,
                issue: None,
            },
            chrono::Utc::now(),
        );

        let payload = embed_payload(&report);
        let fields = payload["embeds"][0]["fields"].as_array().unwrap();
        assert_eq!(fields.len(), MAX_FIELDS);
        assert_eq!(fields[0]["name"], json!(STATUS_HEADING));
        assert_eq!(fields[22]["name"], json!("Library 21"));
        assert_eq!(fields[23]["value"], json!("…and 8 more"));
        assert_eq!(fields[24]["name"], json!(RECENT_HEADING));
        assert_eq!(fields[24]["value"], json!("**Library 29:** +4"));
    }

    #[test]
    fn test_long_title_is_truncated() {
        let report = ReportBuilder::new(
            ReportConfig {
                title: "x".repeat(400),
                ..ReportConfig::default()
            },
            vec![],
        )
        .placeholder("offline", chrono::Utc::now());

        let payload = embed_payload(&report);
        let title = payload["embeds"][0]["title"].as_str().unwrap();
        assert_eq!(title.chars().count(), MAX_TITLE);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("", 10), "\u{200b}");
        assert_eq!(truncate("abc", 3), "abc");
        assert_eq!(truncate("abcdef", 4), "abc…");
    }

    #[test]
    fn test_read_only_overwrites() {
        let client = DiscordClient::new(&DiscordConfig {
            token: "t".to_string(),
            guild_id: 42,
            category_name: "c".to_string(),
            channel_name: "s".to_string(),
            channel_kind: ChannelKind::Text,
            read_only: true,
            request_timeout: Duration::from_secs(1),
        })
        .unwrap();

        let overwrites = client.overwrites(&[
            AccessRule::EveryoneReadOnly,
            AccessRule::PublisherWrite {
                user_id: "7".to_string(),
            },
        ]);
        assert_eq!(overwrites[0]["id"], json!("42"));
        assert_eq!(overwrites[0]["deny"], json!("2048"));
        assert_eq!(overwrites[1]["type"], json!(1));
        assert_eq!(overwrites[1]["allow"], json!("84992"));
    }
}
