//! costwatch CLI
//!
//! Command-line interface for the cost monitor.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{ArgGroup, Args, Parser};
use tracing::{error, info};

use costwatch::alerting::SlackNotifier;
use costwatch::config::ConfigOverrides;
use costwatch::monitor::{CostMonitor, RunOutcome, Scheduler};
use costwatch::settings::AnomalySensitivity;
use costwatch::sources::CostExplorerSource;
use costwatch::{Config, Settings};

/// costwatch - AWS cost alerts for Slack
#[derive(Parser)]
#[command(name = "costwatch")]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["test", "check_once", "summary", "daemon"])
))]
struct Cli {
    /// Test AWS and Slack connections and post a test message
    #[arg(long)]
    test: bool,

    /// Run a single cost check
    #[arg(long)]
    check_once: bool,

    /// Post a daily-cost summary
    #[arg(long)]
    summary: bool,

    /// Keep checking on a schedule until interrupted
    #[arg(long)]
    daemon: bool,

    /// Configuration file path (YAML, JSON or TOML)
    #[arg(short, long, env = "COSTWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(flatten)]
    overrides: OverrideArgs,
}

#[derive(Args, Clone, Default)]
struct OverrideArgs {
    /// Global cost threshold
    #[arg(long)]
    threshold: Option<f64>,

    /// Comma-separated services to monitor ("all" for every service)
    #[arg(long)]
    services: Option<String>,

    /// Comma-separated services to ignore
    #[arg(long)]
    exclude_services: Option<String>,

    /// Per-service thresholds as JSON, e.g. '{"Amazon EC2": 50}'
    #[arg(long, value_name = "JSON")]
    service_thresholds: Option<String>,

    /// Comma-separated resource ARNs to monitor (`*` wildcards allowed)
    #[arg(long)]
    resource_arns: Option<String>,

    /// Comma-separated resource ARNs to ignore
    #[arg(long)]
    exclude_arns: Option<String>,

    /// Required tags as JSON, e.g. '{"Environment": "prod"}'
    #[arg(long, value_name = "JSON")]
    tag_filters: Option<String>,

    /// Enable or disable anomaly detection
    #[arg(long, value_name = "BOOL")]
    anomaly_detection: Option<bool>,

    /// Anomaly detection sensitivity
    #[arg(long, value_enum)]
    anomaly_sensitivity: Option<AnomalySensitivity>,

    /// Enable or disable forecast alerts
    #[arg(long, value_name = "BOOL")]
    cost_forecasting: Option<bool>,

    /// Forecast horizon in days
    #[arg(long)]
    forecast_days: Option<u32>,

    /// Hours between checks in daemon mode
    #[arg(long)]
    check_interval: Option<u64>,

    /// Check on weekends in daemon mode
    #[arg(long, value_name = "BOOL")]
    weekend_monitoring: Option<bool>,

    /// Severity breakpoints as JSON, e.g. '{"critical": 100, "warning": 80, "info": 50}'
    #[arg(long, value_name = "JSON")]
    alert_levels: Option<String>,

    /// Include the top-services breakdown in alerts
    #[arg(long, value_name = "BOOL")]
    detailed_breakdown: Option<bool>,

    /// Maximum services listed in an alert
    #[arg(long)]
    max_services: Option<usize>,
}

impl From<OverrideArgs> for ConfigOverrides {
    fn from(args: OverrideArgs) -> Self {
        Self {
            cost_threshold: args.threshold,
            enabled_services: args.services,
            disabled_services: args.exclude_services,
            service_thresholds: args.service_thresholds,
            resource_arns: args.resource_arns,
            excluded_arns: args.exclude_arns,
            tag_filters: args.tag_filters,
            enable_anomaly_detection: args.anomaly_detection,
            anomaly_sensitivity: args.anomaly_sensitivity,
            enable_cost_forecasting: args.cost_forecasting,
            forecast_days: args.forecast_days,
            check_interval_hours: args.check_interval,
            enable_weekend_monitoring: args.weekend_monitoring,
            alert_levels: args.alert_levels,
            enable_detailed_breakdown: args.detailed_breakdown,
            max_services_in_alert: args.max_services,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging; the guard flushes the log file on exit
    let _log_guard = match costwatch::logging::init(&config.logging, cli.debug) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error initializing logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(&cli, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "costwatch failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    config.apply_overrides(&cli.overrides.clone().into());
    Ok(config)
}

async fn run(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    let settings = Arc::new(Settings::resolve(config)?);
    let token = config.require_slack_token()?;

    let notifier = SlackNotifier::new(
        config.slack_api_url.as_str(),
        token,
        Duration::from_secs(config.request_timeout_seconds),
    )?;
    let source = CostExplorerSource::from_env(&config.aws_region, Arc::clone(&settings)).await;
    let monitor = Arc::new(CostMonitor::new(
        Arc::clone(&settings),
        Arc::new(source),
        Arc::new(notifier),
    ));

    info!(
        project = %settings.project_name,
        threshold = settings.cost_threshold,
        currency = %settings.currency,
        period_days = settings.monitoring_period_days,
        "costwatch starting"
    );

    if cli.test {
        let report = monitor
            .test_connections()
            .await
            .context("connection test failed")?;
        println!("✅ AWS and Slack connections OK (posting as {})", report.chat_identity);
    } else if cli.check_once {
        match monitor.run_check_or_notify(Utc::now()).await? {
            RunOutcome::Completed(report) => {
                let total = report.evaluation.as_ref().map_or(0.0, |e| e.total);
                println!(
                    "Checked {} to {}: total {} {total:.2}, {} alert(s) sent, {} suppressed, {} failed",
                    report.window.start,
                    report.window.end,
                    settings.currency,
                    report.dispatch.sent,
                    report.dispatch.suppressed,
                    report.dispatch.failed,
                );
            }
            RunOutcome::Skipped => println!("Another check is already running"),
        }
    } else if cli.summary {
        let summary = monitor.run_summary(Utc::now()).await?;
        println!(
            "Summary sent: {} {:.2} over {} day(s)",
            settings.currency,
            summary.total,
            summary.daily.len()
        );
    } else {
        Scheduler::new(monitor).run(shutdown_signal()).await;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C; run until killed");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exactly_one_action_required() {
        assert!(Cli::try_parse_from(["costwatch"]).is_err());
        assert!(Cli::try_parse_from(["costwatch", "--test", "--daemon"]).is_err());
        assert!(Cli::try_parse_from(["costwatch", "--check-once"]).is_ok());
    }

    #[test]
    fn test_overrides_map_to_config() {
        let cli = Cli::try_parse_from([
            "costwatch",
            "--check-once",
            "--threshold",
            "250",
            "--services",
            "EC2,S3",
            "--anomaly-sensitivity",
            "high",
            "--weekend-monitoring",
            "false",
        ])
        .unwrap();

        let overrides: ConfigOverrides = cli.overrides.into();
        assert_eq!(overrides.cost_threshold, Some(250.0));
        assert_eq!(overrides.enabled_services.as_deref(), Some("EC2,S3"));
        assert_eq!(overrides.anomaly_sensitivity, Some(AnomalySensitivity::High));
        assert_eq!(overrides.enable_weekend_monitoring, Some(false));
    }
}
