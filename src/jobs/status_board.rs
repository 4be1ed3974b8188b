//! One reconciliation cycle of the status board.
//!
//! A cycle gathers a Jellyfin snapshot, renders it, makes sure the status
//! channel exists and then converges the single status message onto the new
//! report. Each cycle is bounded by a timeout, and a failed cycle leaves all
//! state in place for the next one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::Result;
use crate::services::channel_resolver::ChannelResolver;
use crate::services::chat::{ChannelHandle, ChatPlatform};
use crate::services::jellyfin::InventorySource;
use crate::services::reconciler::{MessageReconciler, Publication};
use crate::services::report::{MonotonicClock, ReportBuilder, ReportDocument};

/// Result of a single cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Published(Publication),
    Failed(String),
    TimedOut,
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Published(_))
    }
}

pub struct StatusBoard {
    inventory: Arc<dyn InventorySource>,
    builder: ReportBuilder,
    resolver: ChannelResolver,
    platform: Arc<dyn ChatPlatform>,
    reconciler: MessageReconciler,
    /// Resolved once and reused until the platform reports it gone
    channel: Option<ChannelHandle>,
    clock: MonotonicClock,
    cycle_timeout: Duration,
    consecutive_failures: u32,
}

impl StatusBoard {
    pub fn new(
        inventory: Arc<dyn InventorySource>,
        builder: ReportBuilder,
        resolver: ChannelResolver,
        platform: Arc<dyn ChatPlatform>,
        reconciler: MessageReconciler,
        cycle_timeout: Duration,
    ) -> Self {
        Self {
            inventory,
            builder,
            resolver,
            platform,
            reconciler,
            channel: None,
            clock: MonotonicClock::new(),
            cycle_timeout,
            consecutive_failures: 0,
        }
    }

    pub fn channel(&self) -> Option<&ChannelHandle> {
        self.channel.as_ref()
    }

    pub fn message_id(&self) -> Option<&str> {
        self.reconciler.message_id()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run one cycle. Never returns an error; failures are reported in the
    /// outcome and logged.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let started = Instant::now();
        let timeout = self.cycle_timeout;

        let outcome = match tokio::time::timeout(timeout, self.publish()).await {
            Ok(Ok(publication)) => CycleOutcome::Published(publication),
            Ok(Err(e)) => {
                if e.is_channel_not_found() {
                    if let Some(channel) = self.channel.take() {
                        warn!(
                            channel = %channel.name,
                            id = %channel.id,
                            "Status channel no longer exists; it will be resolved again next cycle"
                        );
                    }
                }
                CycleOutcome::Failed(e.to_string())
            }
            Err(_) => CycleOutcome::TimedOut,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            CycleOutcome::Published(publication) => {
                if self.consecutive_failures > 0 {
                    info!(
                        failures = self.consecutive_failures,
                        "Status board recovered after failed cycles"
                    );
                }
                self.consecutive_failures = 0;
                info!(
                    message_id = %publication.message_id,
                    outcome = ?publication.outcome,
                    elapsed_ms,
                    "Status board cycle complete"
                );
            }
            CycleOutcome::Failed(reason) => {
                self.consecutive_failures += 1;
                warn!(
                    error = %reason,
                    consecutive_failures = self.consecutive_failures,
                    elapsed_ms,
                    "Status board cycle failed"
                );
            }
            CycleOutcome::TimedOut => {
                self.consecutive_failures += 1;
                warn!(
                    timeout_secs = timeout.as_secs(),
                    consecutive_failures = self.consecutive_failures,
                    "Status board cycle timed out"
                );
            }
        }

        outcome
    }

    async fn publish(&mut self) -> Result<Publication> {
        let report = self.build_report().await;
        let channel = self.ensure_channel().await?;
        self.reconciler
            .reconcile(self.platform.as_ref(), &channel, &report)
            .await
    }

    async fn build_report(&mut self) -> ReportDocument {
        match self.inventory.fetch_snapshot().await {
            Ok(snapshot) => {
                let at = self.clock.now();
                self.builder.build(&snapshot, at)
            }
            Err(e) => {
                warn!(error = %e, "Jellyfin inventory unavailable; publishing placeholder");
                let at = self.clock.now();
                self.builder.placeholder(&e.to_string(), at)
            }
        }
    }

    async fn ensure_channel(&mut self) -> Result<ChannelHandle> {
        if let Some(channel) = &self.channel {
            return Ok(channel.clone());
        }
        let channel = self.resolver.resolve(self.platform.as_ref()).await?;
        info!(channel = %channel.name, id = %channel.id, kind = %channel.kind, "Status channel ready");
        self.channel = Some(channel.clone());
        Ok(channel)
    }
}
