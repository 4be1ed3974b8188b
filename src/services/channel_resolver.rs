//! Locates or provisions the status board channel.
//!
//! Resolution is a reconciliation of two resources: the grouping category
//! (matched by exact name) and the leaf channel inside it (matched
//! case-insensitively). Missing resources are created, a leaf of the wrong
//! kind is converted in place. Calls are serialized, and every call re-lists
//! channels after taking the lock, so concurrent resolves cannot create
//! duplicates.

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::Result;
use crate::services::chat::{
    AccessRule, ChannelHandle, ChannelInfo, ChannelKind, ChannelType, ChatPlatform, NewChannel,
};

/// Where the status board should live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationSpec {
    pub category_name: String,
    pub channel_name: String,
    pub kind: ChannelKind,
    /// Only the publishing identity may post
    pub read_only: bool,
}

pub struct ChannelResolver {
    destination: DestinationSpec,
    lock: Mutex<()>,
}

impl ChannelResolver {
    pub fn new(destination: DestinationSpec) -> Self {
        Self {
            destination,
            lock: Mutex::new(()),
        }
    }

    pub async fn resolve(&self, platform: &dyn ChatPlatform) -> Result<ChannelHandle> {
        let _guard = self.lock.lock().await;
        let spec = &self.destination;

        let channels = platform.list_channels().await?;

        let category = match channels
            .iter()
            .find(|c| c.channel_type == ChannelType::Category && c.name == spec.category_name)
        {
            Some(category) => category.clone(),
            None => {
                info!(category = %spec.category_name, "Creating status category");
                platform
                    .create_channel(&NewChannel {
                        name: spec.category_name.clone(),
                        channel_type: ChannelType::Category,
                        parent_id: None,
                        access: Vec::new(),
                    })
                    .await?
            }
        };

        let existing = channels.iter().find(|c| {
            c.parent_id.as_deref() == Some(category.id.as_str())
                && c.channel_type != ChannelType::Category
                && channel_name_matches(&c.name, &spec.channel_name)
        });

        let channel = match existing {
            Some(channel) if channel.channel_type == ChannelType::Leaf(spec.kind) => {
                debug!(channel = %channel.name, id = %channel.id, "Reusing status channel");
                channel.clone()
            }
            Some(channel) => {
                info!(
                    channel = %channel.name,
                    id = %channel.id,
                    from = ?channel.channel_type,
                    to = %spec.kind,
                    "Converting status channel to configured kind"
                );
                platform.convert_channel(&channel.id, spec.kind).await?
            }
            None => {
                let publisher = platform.current_user_id().await?;
                let mut access = Vec::new();
                if spec.read_only {
                    access.push(AccessRule::EveryoneReadOnly);
                }
                access.push(AccessRule::PublisherWrite { user_id: publisher });

                info!(
                    channel = %spec.channel_name,
                    category = %category.name,
                    kind = %spec.kind,
                    read_only = spec.read_only,
                    "Creating status channel"
                );
                platform
                    .create_channel(&NewChannel {
                        name: spec.channel_name.clone(),
                        channel_type: ChannelType::Leaf(spec.kind),
                        parent_id: Some(category.id.clone()),
                        access,
                    })
                    .await?
            }
        };

        Ok(to_handle(channel, spec.kind))
    }
}

fn to_handle(channel: ChannelInfo, configured: ChannelKind) -> ChannelHandle {
    let kind = match channel.channel_type {
        ChannelType::Leaf(kind) => kind,
        _ => configured,
    };
    ChannelHandle {
        id: channel.id,
        name: channel.name,
        kind,
    }
}

/// Case-insensitive, also accepting the platform's slugged form
/// (`Jellyfin Status` is stored as `jellyfin-status` for text channels).
fn channel_name_matches(existing: &str, configured: &str) -> bool {
    existing.eq_ignore_ascii_case(configured)
        || existing.eq_ignore_ascii_case(&configured.trim().replace(' ', "-"))
}
