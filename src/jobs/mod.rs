//! Background job scheduling

pub mod status_board;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

pub use status_board::{CycleOutcome, StatusBoard};

/// How often the status board runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cadence {
    pub interval: Duration,
    /// Fire on wall-clock boundaries (e.g. every full minute) rather than
    /// relative to process start
    pub align_to_wall_clock: bool,
}

impl Cadence {
    /// Six-field cron expression for intervals that evenly divide a minute,
    /// an hour or a day. Other intervals have no aligned form.
    pub fn cron_expression(&self) -> Option<String> {
        let secs = self.interval.as_secs();
        if secs == 0 || self.interval.subsec_nanos() != 0 {
            return None;
        }

        if secs < 60 {
            return (60 % secs == 0).then(|| format!("*/{secs} * * * * *"));
        }
        if secs % 60 == 0 && secs < 3600 {
            let minutes = secs / 60;
            return (60 % minutes == 0).then(|| format!("0 */{minutes} * * * *"));
        }
        if secs % 3600 == 0 && secs < 86_400 {
            let hours = secs / 3600;
            return (24 % hours == 0).then(|| format!("0 0 */{hours} * * *"));
        }
        (secs == 86_400).then(|| "0 0 0 * * *".to_string())
    }
}

/// Run one cycle unless the previous one is still in flight.
async fn run_scheduled_cycle(board: Arc<Mutex<StatusBoard>>) {
    let Ok(mut board) = board.try_lock() else {
        warn!("Previous status board cycle still running; skipping this tick");
        return;
    };
    board.run_cycle().await;
}

/// Initialize and start the job scheduler
pub async fn start_scheduler(
    board: Arc<Mutex<StatusBoard>>,
    cadence: &Cadence,
) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let aligned = if cadence.align_to_wall_clock {
        let expression = cadence.cron_expression();
        if expression.is_none() {
            warn!(
                interval_secs = cadence.interval.as_secs(),
                "Interval does not divide a minute, hour or day; running unaligned"
            );
        }
        expression
    } else {
        None
    };

    let job = match &aligned {
        Some(expression) => {
            let board = board.clone();
            Job::new_async(expression.as_str(), move |_uuid, _l| {
                let board = board.clone();
                Box::pin(async move { run_scheduled_cycle(board).await })
            })?
        }
        None => {
            let board = board.clone();
            Job::new_repeated_async(cadence.interval, move |_uuid, _l| {
                let board = board.clone();
                Box::pin(async move { run_scheduled_cycle(board).await })
            })?
        }
    };
    scheduler.add(job).await?;

    scheduler.start().await?;

    info!(
        interval_secs = cadence.interval.as_secs(),
        cron = aligned.as_deref().unwrap_or("-"),
        "Job scheduler started"
    );
    Ok(scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cadence(secs: u64) -> Cadence {
        Cadence {
            interval: Duration::from_secs(secs),
            align_to_wall_clock: true,
        }
    }

    #[test]
    fn test_cron_for_dividing_intervals() {
        assert_eq!(cadence(15).cron_expression().as_deref(), Some("*/15 * * * * *"));
        assert_eq!(cadence(60).cron_expression().as_deref(), Some("0 */1 * * * *"));
        assert_eq!(cadence(300).cron_expression().as_deref(), Some("0 */5 * * * *"));
        assert_eq!(cadence(7200).cron_expression().as_deref(), Some("0 0 */2 * * *"));
        assert_eq!(cadence(86_400).cron_expression().as_deref(), Some("0 0 0 * * *"));
    }

    #[test]
    fn test_no_cron_for_uneven_intervals() {
        assert_eq!(cadence(0).cron_expression(), None);
        assert_eq!(cadence(7).cron_expression(), None);
        assert_eq!(cadence(90).cron_expression(), None);
        assert_eq!(cadence(420).cron_expression(), None);
        assert_eq!(cadence(5 * 3600).cron_expression(), None);
        assert_eq!(cadence(2 * 86_400).cron_expression(), None);
        let fractional = Cadence {
            interval: Duration::from_millis(1500),
            align_to_wall_clock: true,
        };
        assert_eq!(fractional.cron_expression(), None);
    }
}
