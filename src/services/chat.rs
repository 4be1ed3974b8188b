//! Chat platform seam.
//!
//! The status board only needs a handful of operations from the chat side:
//! enumerate and provision channels, then fetch, edit or create one message.
//! [ChatPlatform] captures exactly that so the resolver and reconciler can be
//! exercised against an in-memory platform in tests.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::error::Result;
use crate::services::report::ReportDocument;

/// Kind of leaf channel the status board lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Text,
    Voice,
    Announcement,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Text => f.write_str("text"),
            ChannelKind::Voice => f.write_str("voice"),
            ChannelKind::Announcement => f.write_str("announcement"),
        }
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(ChannelKind::Text),
            "voice" => Ok(ChannelKind::Voice),
            "announcement" | "news" => Ok(ChannelKind::Announcement),
            other => Err(format!(
                "Unknown channel kind '{other}' (expected text, voice or announcement)"
            )),
        }
    }
}

/// What a guild channel is, as far as the board cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Category,
    Leaf(ChannelKind),
    /// Forums, stages, threads and anything else we never publish into.
    Other,
}

/// A channel as listed by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub channel_type: ChannelType,
    pub parent_id: Option<String>,
}

/// Resolved destination for the status message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
}

/// Access rule attached to a newly created channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessRule {
    /// Everyone may read, nobody but the publisher may write.
    EveryoneReadOnly,
    /// The given user may read and write.
    PublisherWrite { user_id: String },
}

/// Request to provision a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChannel {
    pub name: String,
    pub channel_type: ChannelType,
    pub parent_id: Option<String>,
    pub access: Vec<AccessRule>,
}

/// Operations the status board needs from a chat platform.
///
/// Implementations must report a deleted message or channel as
/// [Error::DestinationNotFound](crate::error::Error::DestinationNotFound) so the
/// reconciler can tell "gone" apart from "temporarily failing".
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Id of the identity this platform client publishes as.
    async fn current_user_id(&self) -> Result<String>;

    /// All channels (categories included) of the configured chat space.
    async fn list_channels(&self) -> Result<Vec<ChannelInfo>>;

    async fn create_channel(&self, request: &NewChannel) -> Result<ChannelInfo>;

    /// Change the type of an existing channel in place.
    async fn convert_channel(&self, channel_id: &str, kind: ChannelKind) -> Result<ChannelInfo>;

    /// Confirm that a message exists, returning its id.
    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Result<String>;

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        report: &ReportDocument,
    ) -> Result<()>;

    /// Post a new message and return its id.
    async fn create_message(&self, channel_id: &str, report: &ReportDocument) -> Result<String>;
}
