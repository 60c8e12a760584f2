//! Daemon loop

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::{CostMonitor, RunOutcome};
use crate::models::TimeWindow;
use crate::settings::NotificationFrequency;

/// Whether a summary report is due on `today`
pub fn summary_due(
    frequency: NotificationFrequency,
    today: NaiveDate,
    last_sent: Option<NaiveDate>,
) -> bool {
    if last_sent == Some(today) {
        return false;
    }
    match frequency {
        NotificationFrequency::Daily => true,
        NotificationFrequency::Weekly => today.weekday() == Weekday::Mon,
        NotificationFrequency::Monthly => today.day() == 1,
    }
}

/// Runs checks every `check_interval_hours` until shut down
pub struct Scheduler {
    monitor: Arc<CostMonitor>,
    last_summary: Option<NaiveDate>,
}

impl Scheduler {
    /// Create a scheduler with no summary sent yet
    pub fn new(monitor: Arc<CostMonitor>) -> Self {
        Self {
            monitor,
            last_summary: None,
        }
    }

    /// Run until `shutdown` resolves.
    ///
    /// Checks in flight when shutdown arrives are allowed to finish.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let period = self.monitor.settings().check_interval().max(Duration::from_secs(3600));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval = %humantime::format_duration(ticker.period()),
            frequency = ?self.monitor.settings().notification_frequency,
            "Cost monitor daemon started"
        );

        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = ticker.tick() => self.tick(Utc::now(), &mut tasks),
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Scheduled task panicked");
                    }
                }
            }
        }

        if !tasks.is_empty() {
            info!(pending = tasks.len(), "Waiting for in-flight checks");
        }
        while tasks.join_next().await.is_some() {}
        info!("Cost monitor daemon stopped");
    }

    fn tick(&mut self, now: DateTime<Utc>, tasks: &mut JoinSet<()>) {
        let settings = self.monitor.settings();
        let today = now.date_naive();

        if !settings.enable_weekend_monitoring && TimeWindow::is_weekend(today) {
            debug!(date = %today, "Weekend monitoring disabled, skipping check");
        } else {
            let monitor = Arc::clone(&self.monitor);
            tasks.spawn(async move {
                match monitor.run_check_or_notify(now).await {
                    Ok(RunOutcome::Skipped) => debug!("Check skipped"),
                    Ok(RunOutcome::Completed(_)) | Err(_) => {}
                }
            });
        }

        if summary_due(settings.notification_frequency, today, self.last_summary) {
            self.last_summary = Some(today);
            let monitor = Arc::clone(&self.monitor);
            tasks.spawn(async move {
                if let Err(e) = monitor.run_summary(now).await {
                    warn!(error = %e, "Summary report failed");
                }
            });
        }
    }
}
