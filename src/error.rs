//! Error taxonomy shared by the inventory, chat and persistence layers.

use std::time::Duration;

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Which chat resource a "not found" refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Message,
    Channel,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::Message => f.write_str("message"),
            Resource::Channel => f.write_str("channel"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Network failure, timeout or non-success status from the media server.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The media server answered with a payload we could not interpret.
    #[error("Upstream returned malformed data: {0}")]
    UpstreamMalformed(String),

    /// The referenced chat resource no longer exists.
    #[error("Destination {0} not found")]
    DestinationNotFound(Resource),

    #[error("Permission denied by chat platform: {0}")]
    DestinationPermissionDenied(String),

    #[error("Chat platform unavailable: {0}")]
    DestinationUnavailable(String),

    #[error("Rate limited by chat platform, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Failed to persist message reference: {0}")]
    Persistence(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::UpstreamMalformed(msg.into())
    }

    pub fn destination(msg: impl Into<String>) -> Self {
        Self::DestinationUnavailable(msg.into())
    }

    pub fn is_message_not_found(&self) -> bool {
        matches!(self, Error::DestinationNotFound(Resource::Message))
    }

    pub fn is_channel_not_found(&self) -> bool {
        matches!(self, Error::DestinationNotFound(Resource::Channel))
    }

    /// Whether retrying the same request shortly afterwards may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::UpstreamUnavailable(_)
                | Error::DestinationUnavailable(_)
                | Error::RateLimited { .. }
                | Error::Timeout(_)
        )
    }
}
