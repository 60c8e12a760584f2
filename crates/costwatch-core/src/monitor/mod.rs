//! Cost monitor
//!
//! Drives one check: fetch the window, evaluate it, run the anomaly and
//! forecast checks and dispatch the resulting alerts. Runs are serialized; a
//! run that starts while another holds the dedup state is skipped, not queued.

mod scheduler;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::alerting::formatter::{render_error, render_summary, render_test_message};
use crate::alerting::{
    dispatch, CostSummary, DedupStore, DispatchSummary, InMemoryDedupStore, MessageSender,
};
use crate::error::{Error, Result};
use crate::evaluation::anomaly::MIN_BASELINE_POINTS;
use crate::evaluation::{check_forecast, detect, detect_daily_spike, evaluate, Evaluation};
use crate::models::{stable_sum, AlertEvent, Granularity, TimeWindow};
use crate::retry::RetryPolicy;
use crate::settings::{Settings, RESOURCE_LOOKBACK_DAYS};
use crate::sources::{daily_totals, BillingSource};

pub use scheduler::{summary_due, Scheduler};

/// Days covered by the summary report at minimum
const SUMMARY_DAYS: u32 = 7;

/// What a completed check did
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Id carried by every log line of the run
    pub run_id: Uuid,
    /// Window that was checked
    pub window: TimeWindow,
    /// `None` when the provider had no data for the window yet
    pub evaluation: Option<Evaluation>,
    /// Anomaly events found this run
    pub anomalies: usize,
    /// Prior periods the anomaly baseline was built from
    pub baseline_periods: usize,
    /// Provider forecast, when requested and available
    pub forecast: Option<f64>,
    /// Delivery accounting
    pub dispatch: DispatchSummary,
}

/// Result of asking for a check
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The check ran to the end
    Completed(RunReport),
    /// Another run was in progress
    Skipped,
}

/// Result of the connection test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    /// Identity the chat client posts as
    pub chat_identity: String,
}

/// Owns the collaborators and the dedup state for the life of the process
pub struct CostMonitor {
    settings: Arc<Settings>,
    source: Arc<dyn BillingSource>,
    sender: Arc<dyn MessageSender>,
    dedup: Mutex<Box<dyn DedupStore>>,
    retry: RetryPolicy,
}

impl CostMonitor {
    /// Create a monitor with in-memory dedup state
    pub fn new(
        settings: Arc<Settings>,
        source: Arc<dyn BillingSource>,
        sender: Arc<dyn MessageSender>,
    ) -> Self {
        Self {
            settings,
            source,
            sender,
            dedup: Mutex::new(Box::new(InMemoryDedupStore::new())),
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy used for billing calls
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the dedup store
    pub fn with_dedup_store(mut self, store: Box<dyn DedupStore>) -> Self {
        self.dedup = Mutex::new(store);
        self
    }

    /// Resolved settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run one check at `now`
    pub async fn run_check(&self, now: DateTime<Utc>) -> Result<RunOutcome> {
        let Ok(mut dedup) = self.dedup.try_lock() else {
            warn!("Previous cost check still running, skipping this one");
            return Ok(RunOutcome::Skipped);
        };

        let run_id = Uuid::new_v4();
        let report = self
            .check(&mut **dedup, now, run_id)
            .instrument(info_span!("cost_check", run_id = %run_id))
            .await?;

        Ok(RunOutcome::Completed(report))
    }

    /// Run one check and post an error notice if it fails
    pub async fn run_check_or_notify(&self, now: DateTime<Utc>) -> Result<RunOutcome> {
        match self.run_check(now).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(error = %e, "Cost check failed");
                self.notify_failure(&e).await;
                Err(e)
            }
        }
    }

    async fn check(
        &self,
        dedup: &mut dyn DedupStore,
        now: DateTime<Utc>,
        run_id: Uuid,
    ) -> Result<RunReport> {
        let settings = self.settings.as_ref();
        let window = TimeWindow::trailing_days_from(now.date_naive(), settings.monitoring_period_days);
        info!(
            start = %window.start,
            end = %window.end,
            days = window.days(),
            "Starting cost check"
        );

        let records = self
            .retry
            .run("fetch_costs", || {
                self.source.fetch_costs(window, Granularity::Daily)
            })
            .await?;

        let mut events: Vec<AlertEvent> = Vec::new();
        let mut anomalies = 0;
        let mut baseline_periods = 0;

        let evaluation = if records.is_empty() {
            info!("No cost data for this window yet, skipping threshold and anomaly checks");
            None
        } else {
            let evaluation = evaluate(&records, settings)?;
            info!(
                total = evaluation.total,
                currency = %settings.currency,
                included = evaluation.included_records,
                excluded = evaluation.excluded_records(),
                severity = %evaluation.global().severity,
                "Evaluated costs"
            );
            events.extend(evaluation.alerts.iter().cloned());

            if settings.enable_anomaly_detection {
                let (mut found, periods) = self.anomalies(evaluation.total).await;
                found.extend(detect_daily_spike(&daily_totals(&records, settings)));
                anomalies = found.len();
                baseline_periods = periods;
                events.extend(found);
            }
            Some(evaluation)
        };

        let forecast = if settings.enable_cost_forecasting {
            self.forecast().await
        } else {
            None
        };
        events.extend(check_forecast(forecast, settings));

        let summary = dispatch(&events, dedup, settings, self.sender.as_ref(), now).await;

        if let Some(cutoff) = Duration::from_std(settings.alert_cooldown)
            .ok()
            .and_then(|cooldown| now.checked_sub_signed(cooldown))
        {
            dedup.prune(cutoff);
        }

        info!(
            events = events.len(),
            sent = summary.sent,
            suppressed = summary.suppressed,
            skipped = summary.skipped,
            failed = summary.failed,
            "Cost check finished"
        );

        Ok(RunReport {
            run_id,
            window,
            evaluation,
            anomalies,
            baseline_periods,
            forecast,
            dispatch: summary,
        })
    }

    /// Per-period totals of the windows before the current one
    pub async fn fetch_history(&self, num_periods: usize) -> Result<Vec<f64>> {
        self.retry
            .run("fetch_history", || self.source.fetch_history(num_periods))
            .await
    }

    async fn anomalies(&self, current: f64) -> (Vec<AlertEvent>, usize) {
        let settings = self.settings.as_ref();
        let periods = settings.history_periods();
        if periods < settings.anomaly_history_periods {
            warn!(
                requested = settings.anomaly_history_periods,
                available = periods,
                lookback_days = RESOURCE_LOOKBACK_DAYS,
                "Resource-level cost history is limited, anomaly baseline shortened"
            );
        }
        if periods < MIN_BASELINE_POINTS {
            warn!(
                periods,
                period_days = settings.monitoring_period_days,
                "Too few prior periods for a baseline, skipping anomaly detection"
            );
            return (Vec::new(), 0);
        }

        match self.fetch_history(periods).await {
            Ok(history) => {
                let found = detect(current, &history, settings.anomaly_sensitivity);
                (found, history.len())
            }
            Err(e) => {
                warn!(error = %e, "Cost history unavailable, skipping anomaly detection");
                (Vec::new(), 0)
            }
        }
    }

    async fn forecast(&self) -> Option<f64> {
        let horizon = self.settings.forecast_days;
        match self
            .retry
            .run("fetch_forecast", || self.source.fetch_forecast(horizon))
            .await
        {
            Ok(forecast) => forecast,
            Err(e) => {
                warn!(error = %e, "Cost forecast unavailable");
                None
            }
        }
    }

    /// Build and post the daily-cost summary
    pub async fn run_summary(&self, now: DateTime<Utc>) -> Result<CostSummary> {
        let settings = self.settings.as_ref();
        let days = settings.monitoring_period_days.max(SUMMARY_DAYS);
        let window = TimeWindow::trailing_days_from(now.date_naive(), days);

        let records = self
            .retry
            .run("fetch_costs", || {
                self.source.fetch_costs(window, Granularity::Daily)
            })
            .await?;

        let daily = daily_totals(&records, settings);
        let top_services = if records.is_empty() {
            Vec::new()
        } else {
            evaluate(&records, settings)?.per_service_aggregates
        };
        let summary = CostSummary {
            total: stable_sum(daily.iter().map(|d| d.amount)),
            daily,
            top_services,
        };

        let message = render_summary(&summary, settings);
        self.sender.send(&settings.slack_channel, &message).await?;

        info!(total = summary.total, days = summary.daily.len(), "Summary report sent");
        Ok(summary)
    }

    /// Check both integrations and post a test message
    pub async fn test_connections(&self) -> Result<ConnectionReport> {
        self.source.check_connection().await?;
        info!("Billing source connection OK");

        let chat_identity = self.sender.check_connection().await?;
        info!(identity = %chat_identity, "Chat connection OK");

        self.sender
            .send(&self.settings.slack_channel, &render_test_message(&self.settings))
            .await?;

        Ok(ConnectionReport { chat_identity })
    }

    /// Best-effort failure notice; delivery problems are only logged
    pub async fn notify_failure(&self, failure: &Error) {
        let message = render_error(&self.settings, &failure.to_string());
        if let Err(e) = self.sender.send(&self.settings.slack_channel, &message).await {
            warn!(error = %e, "Could not deliver failure notice");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::alerting::ChatMessage;
    use crate::error::DeliveryError;
    use crate::models::{AlertScope, BillingRecord, Severity};
    use crate::settings::ArnPattern;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use parking_lot::Mutex as SyncMutex;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub records: SyncMutex<Vec<BillingRecord>>,
        pub failures: SyncMutex<VecDeque<Error>>,
        pub history: Vec<f64>,
        pub history_requests: SyncMutex<Vec<usize>>,
        pub forecast: Option<f64>,
        pub fetches: SyncMutex<usize>,
    }

    #[async_trait]
    impl BillingSource for FakeSource {
        async fn fetch_costs(
            &self,
            _window: TimeWindow,
            _granularity: Granularity,
        ) -> Result<Vec<BillingRecord>> {
            *self.fetches.lock() += 1;
            if let Some(e) = self.failures.lock().pop_front() {
                return Err(e);
            }
            Ok(self.records.lock().clone())
        }

        async fn fetch_forecast(&self, _horizon_days: u32) -> Result<Option<f64>> {
            Ok(self.forecast)
        }

        async fn fetch_history(&self, num_periods: usize) -> Result<Vec<f64>> {
            self.history_requests.lock().push(num_periods);
            Ok(self.history.clone())
        }

        async fn check_connection(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeSender {
        pub messages: SyncMutex<Vec<ChatMessage>>,
    }

    #[async_trait]
    impl MessageSender for FakeSender {
        async fn send(
            &self,
            _channel: &str,
            message: &ChatMessage,
        ) -> std::result::Result<(), DeliveryError> {
            self.messages.lock().push(message.clone());
            Ok(())
        }

        async fn check_connection(&self) -> std::result::Result<String, DeliveryError> {
            Ok("costbot".to_string())
        }
    }

    pub(crate) fn now() -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2024, 6, 12)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
            .and_utc()
    }

    fn record(service: &str, amount: f64) -> BillingRecord {
        BillingRecord::new(service, amount, "USD", TimeWindow::trailing_days_from(now().date_naive(), 7))
    }

    fn quiet_settings() -> Settings {
        Settings {
            enable_anomaly_detection: false,
            enable_cost_forecasting: false,
            ..Settings::default()
        }
    }

    pub(crate) fn monitor(
        settings: Settings,
        source: Arc<FakeSource>,
        sender: Arc<FakeSender>,
    ) -> CostMonitor {
        CostMonitor::new(Arc::new(settings), source, sender)
            .with_retry(RetryPolicy::exponential(3, std::time::Duration::from_millis(1)))
    }

    fn completed(outcome: RunOutcome) -> RunReport {
        match outcome {
            RunOutcome::Completed(report) => report,
            RunOutcome::Skipped => panic!("run was skipped"),
        }
    }

    #[tokio::test]
    async fn test_over_threshold_sends_critical_alert() {
        let source = Arc::new(FakeSource::default());
        *source.records.lock() = vec![record("Amazon EC2", 80.0), record("Amazon S3", 40.0)];
        let sender = Arc::new(FakeSender::default());
        let monitor = monitor(quiet_settings(), source, sender.clone());

        let report = completed(monitor.run_check(now()).await.unwrap());

        assert_eq!(report.dispatch.sent, 1);
        assert_eq!(report.evaluation.unwrap().global().severity, Severity::Critical);
        let messages = sender.messages.lock();
        assert!(messages[0].rendered_text().contains("CRITICAL"));
    }

    #[tokio::test]
    async fn test_second_run_is_deduplicated() {
        let source = Arc::new(FakeSource::default());
        *source.records.lock() = vec![record("Amazon EC2", 85.0)];
        let sender = Arc::new(FakeSender::default());
        let monitor = monitor(quiet_settings(), source, sender.clone());

        completed(monitor.run_check(now()).await.unwrap());
        let second = completed(monitor.run_check(now() + Duration::hours(1)).await.unwrap());

        assert_eq!(second.dispatch.suppressed, 1);
        assert_eq!(sender.messages.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_escalation_between_runs() {
        let source = Arc::new(FakeSource::default());
        *source.records.lock() = vec![record("Amazon EC2", 85.0)];
        let sender = Arc::new(FakeSender::default());
        let monitor = monitor(quiet_settings(), source.clone(), sender.clone());

        completed(monitor.run_check(now()).await.unwrap());
        *source.records.lock() = vec![record("Amazon EC2", 130.0)];
        let second = completed(monitor.run_check(now() + Duration::hours(1)).await.unwrap());

        assert_eq!(second.dispatch.sent, 1);
        assert_eq!(sender.messages.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_window_is_no_data() {
        let source = Arc::new(FakeSource::default());
        let sender = Arc::new(FakeSender::default());
        let monitor = monitor(quiet_settings(), source, sender.clone());

        let report = completed(monitor.run_check(now()).await.unwrap());

        assert!(report.evaluation.is_none());
        assert_eq!(report.dispatch.total(), 0);
        assert!(sender.messages.lock().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let source = Arc::new(FakeSource::default());
        *source.records.lock() = vec![record("Amazon EC2", 10.0)];
        source.failures.lock().push_back(Error::transient("throttled"));
        let sender = Arc::new(FakeSender::default());
        let monitor = monitor(quiet_settings(), source.clone(), sender);

        completed(monitor.run_check(now()).await.unwrap());
        assert_eq!(*source.fetches.lock(), 2);
    }

    #[tokio::test]
    async fn test_retrieval_failure_posts_notice_and_no_alerts() {
        let source = Arc::new(FakeSource::default());
        *source.records.lock() = vec![record("Amazon EC2", 500.0)];
        source.failures.lock().push_back(Error::retrieval("AccessDenied"));
        let sender = Arc::new(FakeSender::default());
        let monitor = monitor(quiet_settings(), source, sender.clone());

        let err = monitor.run_check_or_notify(now()).await.unwrap_err();

        assert!(!err.is_transient());
        let messages = sender.messages.lock();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].text.contains("AWS Cost Monitor Error"));
    }

    #[tokio::test]
    async fn test_concurrent_run_is_skipped() {
        let source = Arc::new(FakeSource::default());
        let sender = Arc::new(FakeSender::default());
        let monitor = monitor(quiet_settings(), source.clone(), sender);

        let _held = monitor.dedup.lock().await;
        let outcome = monitor.run_check(now()).await.unwrap();

        assert!(matches!(outcome, RunOutcome::Skipped));
        assert_eq!(*source.fetches.lock(), 0);
    }

    #[tokio::test]
    async fn test_anomaly_and_forecast_events_are_dispatched() {
        let source = Arc::new(FakeSource {
            history: vec![100.0, 102.0, 98.0, 101.0],
            forecast: Some(10_000.0),
            ..FakeSource::default()
        });
        *source.records.lock() = vec![record("Amazon EC2", 500.0)];
        let sender = Arc::new(FakeSender::default());
        let settings = Settings {
            cost_threshold: 2_000.0,
            ..Settings::default()
        };
        let monitor = monitor(settings, source.clone(), sender);

        let report = completed(monitor.run_check(now()).await.unwrap());

        assert_eq!(report.anomalies, 1);
        assert_eq!(report.baseline_periods, 4);
        assert_eq!(*source.history_requests.lock(), vec![14]);
        assert_eq!(report.forecast, Some(10_000.0));
        let scopes: Vec<AlertScope> = report.dispatch.delivered.iter().map(|f| f.scope).collect();
        assert_eq!(scopes, vec![AlertScope::Anomaly, AlertScope::Forecast]);
        assert_eq!(report.dispatch.skipped, 1);
    }

    #[tokio::test]
    async fn test_arn_filters_request_history_within_resource_lookback() {
        let source = Arc::new(FakeSource {
            history: vec![100.0, 102.0, 98.0],
            ..FakeSource::default()
        });
        *source.records.lock() = vec![record("Amazon EC2", 500.0)];
        let settings = Settings {
            monitoring_period_days: 3,
            resource_arns: vec![ArnPattern::parse("arn:aws:ec2:*").unwrap()],
            enable_cost_forecasting: false,
            ..Settings::default()
        };
        let monitor = monitor(settings, source.clone(), Arc::new(FakeSender::default()));

        let report = completed(monitor.run_check(now()).await.unwrap());

        assert_eq!(*source.history_requests.lock(), vec![3]);
        assert_eq!(report.baseline_periods, 3);
    }

    #[tokio::test]
    async fn test_anomaly_check_skipped_when_lookback_too_short() {
        let source = Arc::new(FakeSource {
            history: vec![100.0, 102.0, 98.0, 101.0],
            ..FakeSource::default()
        });
        *source.records.lock() = vec![record("Amazon EC2", 500.0)];
        let settings = Settings {
            monitoring_period_days: 7,
            excluded_arns: vec![ArnPattern::parse("arn:aws:s3:::logs").unwrap()],
            enable_cost_forecasting: false,
            ..Settings::default()
        };
        let monitor = monitor(settings, source.clone(), Arc::new(FakeSender::default()));

        let report = completed(monitor.run_check(now()).await.unwrap());

        assert!(source.history_requests.lock().is_empty());
        assert_eq!(report.anomalies, 0);
        assert_eq!(report.baseline_periods, 0);
    }

    #[tokio::test]
    async fn test_day_over_day_spike_is_dispatched() {
        let source = Arc::new(FakeSource::default());
        let yesterday = now().date_naive() - Duration::days(1);
        let daily = |date: NaiveDate, amount: f64| {
            BillingRecord::new("Amazon EC2", amount, "USD", TimeWindow::new(date, date + Duration::days(1)))
        };
        *source.records.lock() = vec![
            daily(yesterday - Duration::days(2), 5.0),
            daily(yesterday - Duration::days(1), 6.0),
            daily(yesterday, 20.0),
        ];
        let sender = Arc::new(FakeSender::default());
        let settings = Settings {
            enable_cost_forecasting: false,
            ..Settings::default()
        };
        let monitor = monitor(settings, source, sender);

        let report = completed(monitor.run_check(now()).await.unwrap());

        assert_eq!(report.anomalies, 1);
        let spike = report
            .dispatch
            .delivered
            .iter()
            .find(|f| f.scope == AlertScope::Anomaly)
            .unwrap();
        assert_eq!(spike.subject.as_deref(), Some("daily spike 2024-06-11"));
    }

    #[tokio::test]
    async fn test_summary_report() {
        let source = Arc::new(FakeSource::default());
        let day = now().date_naive() - Duration::days(1);
        *source.records.lock() = vec![
            BillingRecord::new("Amazon EC2", 4.0, "USD", TimeWindow::new(day, day + Duration::days(1))),
            BillingRecord::new("Amazon S3", 1.0, "USD", TimeWindow::new(day, day + Duration::days(1))),
        ];
        let sender = Arc::new(FakeSender::default());
        let monitor = monitor(quiet_settings(), source, sender.clone());

        let summary = monitor.run_summary(now()).await.unwrap();

        assert_eq!(summary.total, 5.0);
        assert_eq!(summary.top_services[0].service, "Amazon EC2");
        assert!(sender.messages.lock()[0].text.contains("Daily Cost Summary"));
    }

    #[tokio::test]
    async fn test_connection_test_posts_message() {
        let sender = Arc::new(FakeSender::default());
        let monitor = monitor(quiet_settings(), Arc::new(FakeSource::default()), sender.clone());

        let report = monitor.test_connections().await.unwrap();

        assert_eq!(report.chat_identity, "costbot");
        assert!(sender.messages.lock()[0].text.contains("test successful"));
    }
}
