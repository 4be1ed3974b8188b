//! External service integrations and the publishing pipeline

pub mod channel_resolver;
pub mod chat;
pub mod discord;
pub mod jellyfin;
pub mod logging;
pub mod message_store;
pub mod rate_limiter;
pub mod reconciler;
pub mod report;

pub use channel_resolver::{ChannelResolver, DestinationSpec};
pub use chat::{ChannelHandle, ChannelKind, ChatPlatform};
pub use discord::{DiscordClient, DiscordConfig};
pub use jellyfin::{Inventory, InventorySnapshot, InventorySource, JellyfinClient, JellyfinConfig};
pub use logging::{LogFormat, init_tracing};
pub use message_store::MessageStore;
pub use reconciler::{MessageReconciler, Publication, PublishOutcome};
pub use report::{MonotonicClock, ReportBuilder, ReportConfig, ReportDocument};
