//! Configuration loading for costwatch
//!
//! Layers, lowest precedence first:
//!
//! 1. built-in defaults ([`Config::default`])
//! 2. environment variables (bare names such as `COST_THRESHOLD`, `.env` honoured)
//! 3. the config file (YAML, JSON or TOML)
//! 4. command-line overrides ([`ConfigOverrides`])
//!
//! The result is still loosely typed: lists may arrive as comma-separated
//! strings and mappings as JSON strings. [`crate::Settings::resolve`] turns it
//! into the strongly typed snapshot the engine consumes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::settings::{AlertLevelsPatch, AnomalySensitivity, NotificationFrequency};

/// Raw layered configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Display name used in alert headers
    pub project_name: String,

    // AWS
    /// Region used for the Cost Explorer client
    pub aws_region: String,

    // Slack
    /// Bot token (`xoxb-...`)
    pub slack_bot_token: Option<String>,
    /// Channel alerts are posted to
    pub slack_channel: String,
    /// Base URL of the Slack Web API
    pub slack_api_url: String,
    /// Per-request timeout for chat delivery, seconds
    pub request_timeout_seconds: u64,

    // Cost monitoring
    /// Global cost threshold for the monitoring window
    pub cost_threshold: f64,
    /// Monitoring window length in days
    pub monitoring_period_days: u32,
    /// Currency amounts are reported in
    pub currency: String,
    /// How often summary reports are sent in daemon mode
    pub notification_frequency: NotificationFrequency,

    // Service controls
    /// `all`, a list, or a comma-separated string
    pub enabled_services: StringList,
    /// List or comma-separated string
    pub disabled_services: StringList,
    /// Service name to threshold, as a mapping or a JSON object string
    pub service_thresholds: Encoded<HashMap<String, f64>>,

    // Resource filters
    /// ARN patterns to monitor exclusively (`*` wildcards allowed)
    pub resource_arns: StringList,
    /// ARN patterns to ignore
    pub excluded_arns: StringList,
    /// Tag key to required value, as a mapping or a JSON object string
    pub tag_filters: Encoded<HashMap<String, String>>,

    // Monitoring features
    /// Compare current spend against the historical baseline
    pub enable_anomaly_detection: bool,
    /// How far from the baseline counts as anomalous
    pub anomaly_sensitivity: AnomalySensitivity,
    /// Number of prior periods forming the baseline
    pub anomaly_history_periods: usize,
    /// Compare the provider's spend forecast against the threshold
    pub enable_cost_forecasting: bool,
    /// Forecast horizon in days
    pub forecast_days: u32,

    // Scheduling
    /// Hours between threshold checks in daemon mode
    pub check_interval_hours: u64,
    /// Run scheduled checks on Saturdays and Sundays
    pub enable_weekend_monitoring: bool,
    /// Minimum spacing between two deliveries of the same alert (defaults to the check interval)
    #[serde(with = "humantime_serde")]
    pub alert_cooldown: Option<Duration>,

    // Alerts
    /// Percent-of-threshold breakpoints, as a mapping or a JSON object string
    pub alert_levels: Encoded<AlertLevelsPatch>,
    /// Include the top-services breakdown in alerts
    pub enable_detailed_breakdown: bool,
    /// Maximum number of services listed in an alert
    pub max_services_in_alert: usize,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_name: "AWS Project".to_string(),
            aws_region: "us-east-1".to_string(),
            slack_bot_token: None,
            slack_channel: "#alerts".to_string(),
            slack_api_url: "https://slack.com/api".to_string(),
            request_timeout_seconds: 30,
            cost_threshold: 100.0,
            monitoring_period_days: 7,
            currency: "USD".to_string(),
            notification_frequency: NotificationFrequency::Daily,
            enabled_services: StringList::Csv("all".to_string()),
            disabled_services: StringList::default(),
            service_thresholds: Encoded::default(),
            resource_arns: StringList::default(),
            excluded_arns: StringList::default(),
            tag_filters: Encoded::default(),
            enable_anomaly_detection: true,
            anomaly_sensitivity: AnomalySensitivity::Medium,
            anomaly_history_periods: 14,
            enable_cost_forecasting: true,
            forecast_days: 30,
            check_interval_hours: 6,
            enable_weekend_monitoring: true,
            alert_cooldown: None,
            alert_levels: Encoded::default(),
            enable_detailed_breakdown: true,
            max_services_in_alert: 10,
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the environment and an optional config file.
    ///
    /// An explicit `path` must exist. Without one, the platform config
    /// directory is checked for `costwatch.{yaml,yml,json,toml}`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!(error = %e, "Failed to read .env file");
            }
        }

        let mut builder = config::Config::builder()
            .add_source(config::Environment::default().try_parsing(false));

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::config(format!(
                        "config file {} not found",
                        path.display()
                    )));
                }
                debug!(path = %path.display(), "Loading config file");
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(path) = default_config_path() {
                    debug!(path = %path.display(), "Loading default config file");
                    builder = builder.add_source(config::File::from(path).required(false));
                }
            }
        }

        let config = builder.build()?.try_deserialize::<Config>()?;
        Ok(config)
    }

    /// Apply command-line overrides on top of the loaded layers
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(threshold) = overrides.cost_threshold {
            self.cost_threshold = threshold;
        }
        if let Some(services) = &overrides.enabled_services {
            self.enabled_services = StringList::Csv(services.clone());
        }
        if let Some(services) = &overrides.disabled_services {
            self.disabled_services = StringList::Csv(services.clone());
        }
        if let Some(json) = &overrides.service_thresholds {
            self.service_thresholds = Encoded::Json(json.clone());
        }
        if let Some(arns) = &overrides.resource_arns {
            self.resource_arns = StringList::Csv(arns.clone());
        }
        if let Some(arns) = &overrides.excluded_arns {
            self.excluded_arns = StringList::Csv(arns.clone());
        }
        if let Some(json) = &overrides.tag_filters {
            self.tag_filters = Encoded::Json(json.clone());
        }
        if let Some(enabled) = overrides.enable_anomaly_detection {
            self.enable_anomaly_detection = enabled;
        }
        if let Some(sensitivity) = overrides.anomaly_sensitivity {
            self.anomaly_sensitivity = sensitivity;
        }
        if let Some(enabled) = overrides.enable_cost_forecasting {
            self.enable_cost_forecasting = enabled;
        }
        if let Some(days) = overrides.forecast_days {
            self.forecast_days = days;
        }
        if let Some(hours) = overrides.check_interval_hours {
            self.check_interval_hours = hours;
        }
        if let Some(enabled) = overrides.enable_weekend_monitoring {
            self.enable_weekend_monitoring = enabled;
        }
        if let Some(json) = &overrides.alert_levels {
            self.alert_levels = Encoded::Json(json.clone());
        }
        if let Some(enabled) = overrides.enable_detailed_breakdown {
            self.enable_detailed_breakdown = enabled;
        }
        if let Some(max) = overrides.max_services_in_alert {
            self.max_services_in_alert = max;
        }
    }

    /// Check that the credentials needed to talk to Slack are present
    pub fn require_slack_token(&self) -> Result<&str> {
        self.slack_bot_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::config("missing required configuration parameter SLACK_BOT_TOKEN"))
    }
}

/// Platform default location of the config file, if one exists
pub fn default_config_path() -> Option<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "costwatch")?;
    ["yaml", "yml", "json", "toml"]
        .iter()
        .map(|ext| dirs.config_dir().join(format!("costwatch.{ext}")))
        .find(|p| p.exists())
}

/// Command-line overrides; `None` leaves the loaded value untouched
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Replaces `cost_threshold`
    pub cost_threshold: Option<f64>,
    /// Replaces `enabled_services`
    pub enabled_services: Option<String>,
    /// Replaces `disabled_services`
    pub disabled_services: Option<String>,
    /// Replaces `service_thresholds`
    pub service_thresholds: Option<String>,
    /// Replaces `resource_arns`
    pub resource_arns: Option<String>,
    /// Replaces `excluded_arns`
    pub excluded_arns: Option<String>,
    /// Replaces `tag_filters`
    pub tag_filters: Option<String>,
    /// Replaces `enable_anomaly_detection`
    pub enable_anomaly_detection: Option<bool>,
    /// Replaces `anomaly_sensitivity`
    pub anomaly_sensitivity: Option<AnomalySensitivity>,
    /// Replaces `enable_cost_forecasting`
    pub enable_cost_forecasting: Option<bool>,
    /// Replaces `forecast_days`
    pub forecast_days: Option<u32>,
    /// Replaces `check_interval_hours`
    pub check_interval_hours: Option<u64>,
    /// Replaces `enable_weekend_monitoring`
    pub enable_weekend_monitoring: Option<bool>,
    /// Replaces `alert_levels`
    pub alert_levels: Option<String>,
    /// Replaces `enable_detailed_breakdown`
    pub enable_detailed_breakdown: Option<bool>,
    /// Replaces `max_services_in_alert`
    pub max_services_in_alert: Option<usize>,
}

/// A list given either as a sequence or as a comma-separated string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringList {
    /// `[a, b]`
    List(Vec<String>),
    /// `"a, b"`
    Csv(String),
}

impl Default for StringList {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl StringList {
    /// Trimmed, non-empty items
    pub fn items(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            Self::List(items) => items.iter().map(String::as_str).collect(),
            Self::Csv(s) => s.split(',').collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

/// A value given either structurally or as a JSON-encoded string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Encoded<T> {
    /// Already structured (config file)
    Value(T),
    /// JSON text (environment variable or CLI flag)
    Json(String),
}

impl<T: Default> Default for Encoded<T> {
    fn default() -> Self {
        Self::Value(T::default())
    }
}

impl<T> Encoded<T>
where
    T: Clone + Default + serde::de::DeserializeOwned,
{
    /// Decode into `T`; `key` names the setting in error messages
    pub fn decode(&self, key: &str) -> Result<T> {
        match self {
            Self::Value(value) => Ok(value.clone()),
            Self::Json(text) if text.trim().is_empty() => Ok(T::default()),
            Self::Json(text) => serde_json::from_str(text)
                .map_err(|e| Error::config(format!("{key} is not valid JSON: {e}"))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
    /// File to mirror logs into (empty disables)
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: Some("cost_monitor.log".to_string()),
        }
    }
}
