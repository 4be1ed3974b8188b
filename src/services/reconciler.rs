//! Keeps exactly one status message alive in the destination channel.
//!
//! The reconciler is the only owner of the published message id. Per cycle:
//!
//! 1. With a stored id, fetch that message and edit it in place.
//! 2. If the platform reports the message as gone, forget the id and fall
//!    through to creation in the same cycle.
//! 3. Without an id, create a new message and remember its id.
//! 4. Persist the id after every create. Edits keep the id and skip the write.
//!
//! Any other failure is returned to the caller with the stored id untouched.
//! If persisting fails, the in-memory id stays authoritative and the write is
//! retried after each later successful cycle.

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::services::chat::{ChannelHandle, ChatPlatform};
use crate::services::message_store::MessageStore;
use crate::services::report::ReportDocument;

/// Whether a status message is currently tracked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcilerState {
    NoMessage,
    Published { message_id: String },
}

/// What a successful reconcile did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Existing message edited in place
    Edited,
    /// First message created (nothing was tracked)
    Created,
    /// Tracked message had been deleted; a replacement was created
    Recreated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub message_id: String,
    pub outcome: PublishOutcome,
}

pub struct MessageReconciler {
    store: MessageStore,
    message_id: Option<String>,
    persist_pending: bool,
}

impl MessageReconciler {
    /// Start from whatever reference the store holds.
    pub fn load(store: MessageStore) -> Self {
        let message_id = store.load();
        match &message_id {
            Some(id) => info!(message_id = %id, path = %store.path().display(), "Loaded status message reference"),
            None => info!(path = %store.path().display(), "No status message published yet"),
        }
        Self {
            store,
            message_id,
            persist_pending: false,
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn state(&self) -> ReconcilerState {
        match &self.message_id {
            Some(id) => ReconcilerState::Published {
                message_id: id.clone(),
            },
            None => ReconcilerState::NoMessage,
        }
    }

    /// True while the last id change has not reached disk.
    pub fn persist_pending(&self) -> bool {
        self.persist_pending
    }

    pub async fn reconcile(
        &mut self,
        platform: &dyn ChatPlatform,
        channel: &ChannelHandle,
        report: &ReportDocument,
    ) -> Result<Publication> {
        let mut recreated = false;

        if let Some(message_id) = self.message_id.clone() {
            debug!(message_id = %message_id, channel = %channel.name, "Verifying status message");

            let edited = match platform.fetch_message(&channel.id, &message_id).await {
                Ok(_) => platform.edit_message(&channel.id, &message_id, report).await,
                Err(e) => Err(e),
            };

            match edited {
                Ok(()) => {
                    debug!(message_id = %message_id, "Status message edited in place");
                    self.retry_pending_persist();
                    return Ok(Publication {
                        message_id,
                        outcome: PublishOutcome::Edited,
                    });
                }
                Err(e) if e.is_message_not_found() => {
                    info!(
                        message_id = %message_id,
                        channel = %channel.name,
                        "Status message no longer exists, publishing a new one"
                    );
                    self.message_id = None;
                    recreated = true;
                }
                Err(e) => return Err(e),
            }
        }

        let message_id = platform.create_message(&channel.id, report).await?;
        info!(message_id = %message_id, channel = %channel.name, "Published new status message");

        self.message_id = Some(message_id.clone());
        self.persist_pending = true;
        self.retry_pending_persist();

        Ok(Publication {
            message_id,
            outcome: if recreated {
                PublishOutcome::Recreated
            } else {
                PublishOutcome::Created
            },
        })
    }

    fn retry_pending_persist(&mut self) {
        if !self.persist_pending {
            return;
        }
        match self.store.save(self.message_id.as_deref()) {
            Ok(()) => self.persist_pending = false,
            Err(e) => warn!(
                error = %e,
                message_id = ?self.message_id,
                "Failed to persist status message id; keeping it in memory"
            ),
        }
    }
}
