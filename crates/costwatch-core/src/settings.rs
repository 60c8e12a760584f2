//! Resolved, immutable settings consumed by the evaluation engine
//!
//! [`Settings::resolve`] is the only place loosely typed configuration is
//! parsed. Everything downstream reads typed fields.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};

/// Longest accepted daemon check interval, one year
pub const MAX_CHECK_INTERVAL_HOURS: u64 = 24 * 365;

/// Days of resource-level cost data the provider keeps
pub const RESOURCE_LOOKBACK_DAYS: u32 = 14;

/// Anomaly detection sensitivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySensitivity {
    /// Flag only deviations beyond 3 standard deviations
    Low,
    /// Beyond 2 standard deviations
    #[default]
    Medium,
    /// Beyond 1 standard deviation
    High,
}

impl AnomalySensitivity {
    /// Number of standard deviations a value must stray from the mean
    pub fn k(self) -> f64 {
        match self {
            Self::Low => 3.0,
            Self::Medium => 2.0,
            Self::High => 1.0,
        }
    }
}

impl fmt::Display for AnomalySensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// Cadence of summary reports in daemon mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationFrequency {
    /// Every day
    #[default]
    Daily,
    /// Mondays
    Weekly,
    /// First day of the month
    Monthly,
}

/// Percent-of-threshold breakpoints separating severities
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertLevels {
    /// Critical at or above this percent
    pub critical: f64,
    /// Warning at or above this percent
    pub warning: f64,
    /// Info at or above this percent
    pub info: f64,
}

impl Default for AlertLevels {
    fn default() -> Self {
        Self {
            critical: 100.0,
            warning: 80.0,
            info: 50.0,
        }
    }
}

/// Partial alert levels; missing keys keep their defaults
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct AlertLevelsPatch {
    /// Critical breakpoint, percent
    pub critical: Option<f64>,
    /// Warning breakpoint, percent
    pub warning: Option<f64>,
    /// Info breakpoint, percent
    pub info: Option<f64>,
}

impl AlertLevelsPatch {
    fn apply(self, mut levels: AlertLevels) -> AlertLevels {
        if let Some(v) = self.critical {
            levels.critical = v;
        }
        if let Some(v) = self.warning {
            levels.warning = v;
        }
        if let Some(v) = self.info {
            levels.info = v;
        }
        levels
    }
}

/// Which services are evaluated
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ServiceSelection {
    /// Every service
    #[default]
    All,
    /// Only the listed services (lowercased)
    Only(HashSet<String>),
}

impl ServiceSelection {
    /// Whether `service` is selected
    pub fn contains(&self, service: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(set) => set.contains(&normalize(service)),
        }
    }
}

/// A resource ARN, optionally containing `*` wildcards
#[derive(Debug, Clone)]
pub struct ArnPattern {
    raw: String,
    wildcard: Option<Regex>,
}

impl ArnPattern {
    /// Parse a pattern; it must start with `arn:` and contain no whitespace
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if !raw.starts_with("arn:") || raw.chars().any(char::is_whitespace) {
            return Err(Error::config(format!("malformed resource ARN pattern '{raw}'")));
        }

        let wildcard = if raw.contains('*') {
            let body = raw
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            let regex = Regex::new(&format!("^{body}$"))
                .map_err(|e| Error::config(format!("invalid ARN pattern '{raw}': {e}")))?;
            Some(regex)
        } else {
            None
        };

        Ok(Self {
            raw: raw.to_string(),
            wildcard,
        })
    }

    /// Whether `resource_id` matches this pattern
    pub fn matches(&self, resource_id: &str) -> bool {
        match &self.wildcard {
            Some(regex) => regex.is_match(resource_id),
            None => self.raw == resource_id,
        }
    }

    /// The pattern as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl PartialEq for ArnPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

/// Immutable snapshot of everything a run needs.
///
/// Service names are stored lowercased and lookups normalise the record side
/// the same way. Tag keys keep their spelling and are compared case-insensitively.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Project label shown in every message
    pub project_name: String,
    /// Global spend limit for one monitoring window
    pub cost_threshold: f64,
    /// Length of the trailing window in days
    pub monitoring_period_days: u32,
    /// Currency code used in messages
    pub currency: String,
    /// Services to monitor
    pub enabled_services: ServiceSelection,
    /// Services to ignore, lowercased
    pub disabled_services: HashSet<String>,
    /// Per-service limits keyed by lowercased service name
    pub service_thresholds: HashMap<String, f64>,
    /// Resource allow-list
    pub resource_arns: Vec<ArnPattern>,
    /// Resource deny-list
    pub excluded_arns: Vec<ArnPattern>,
    /// Tags every record must carry
    pub tag_filters: HashMap<String, String>,
    /// Compare the window total with prior periods
    pub enable_anomaly_detection: bool,
    /// How far from the baseline counts as anomalous
    pub anomaly_sensitivity: AnomalySensitivity,
    /// Prior periods fetched for the baseline
    pub anomaly_history_periods: usize,
    /// Check the provider forecast
    pub enable_cost_forecasting: bool,
    /// Forecast horizon in days
    pub forecast_days: u32,
    /// Severity breakpoints in percent of a threshold
    pub alert_levels: AlertLevels,
    /// Cap on services listed in one alert
    pub max_services_in_alert: usize,
    /// Include the top-services breakdown
    pub enable_detailed_breakdown: bool,
    /// Minimum spacing between two deliveries of one fingerprint
    pub alert_cooldown: Duration,
    /// Hours between daemon checks
    pub check_interval_hours: u64,
    /// Run daemon checks on Saturdays and Sundays
    pub enable_weekend_monitoring: bool,
    /// Summary report cadence
    pub notification_frequency: NotificationFrequency,
    /// Channel alerts are posted to
    pub slack_channel: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_name: "AWS Project".to_string(),
            cost_threshold: 100.0,
            monitoring_period_days: 7,
            currency: "USD".to_string(),
            enabled_services: ServiceSelection::All,
            disabled_services: HashSet::new(),
            service_thresholds: HashMap::new(),
            resource_arns: Vec::new(),
            excluded_arns: Vec::new(),
            tag_filters: HashMap::new(),
            enable_anomaly_detection: true,
            anomaly_sensitivity: AnomalySensitivity::Medium,
            anomaly_history_periods: 14,
            enable_cost_forecasting: true,
            forecast_days: 30,
            alert_levels: AlertLevels::default(),
            max_services_in_alert: 10,
            enable_detailed_breakdown: true,
            alert_cooldown: Duration::from_secs(6 * 3600),
            check_interval_hours: 6,
            enable_weekend_monitoring: true,
            notification_frequency: NotificationFrequency::Daily,
            slack_channel: "#alerts".to_string(),
        }
    }
}

impl Settings {
    /// Resolve and validate a loaded [`Config`]
    pub fn resolve(config: &Config) -> Result<Self> {
        let enabled = config.enabled_services.items();
        let enabled_services = if enabled.is_empty()
            || enabled.iter().any(|s| s.eq_ignore_ascii_case("all"))
        {
            ServiceSelection::All
        } else {
            ServiceSelection::Only(enabled.iter().map(|s| normalize(s)).collect())
        };

        let disabled_services = config
            .disabled_services
            .items()
            .iter()
            .map(|s| normalize(s))
            .collect();

        let mut service_thresholds = HashMap::new();
        for (service, threshold) in config.service_thresholds.decode("service_thresholds")? {
            if !threshold.is_finite() || threshold <= 0.0 {
                return Err(Error::config(format!(
                    "threshold for service '{service}' must be positive, got {threshold}"
                )));
            }
            service_thresholds.insert(normalize(&service), threshold);
        }

        let resource_arns = parse_arns(&config.resource_arns.items())?;
        let excluded_arns = parse_arns(&config.excluded_arns.items())?;

        let mut tag_filters = HashMap::new();
        for (key, value) in config.tag_filters.decode("tag_filters")? {
            if key.trim().is_empty() {
                return Err(Error::config("tag filter keys must not be empty"));
            }
            tag_filters.insert(key.trim().to_string(), value);
        }

        let alert_levels = config
            .alert_levels
            .decode("alert_levels")?
            .apply(AlertLevels::default());

        let alert_cooldown = config
            .alert_cooldown
            .unwrap_or_else(|| interval_duration(config.check_interval_hours));

        let settings = Self {
            project_name: config.project_name.clone(),
            cost_threshold: config.cost_threshold,
            monitoring_period_days: config.monitoring_period_days,
            currency: config.currency.clone(),
            enabled_services,
            disabled_services,
            service_thresholds,
            resource_arns,
            excluded_arns,
            tag_filters,
            enable_anomaly_detection: config.enable_anomaly_detection,
            anomaly_sensitivity: config.anomaly_sensitivity,
            anomaly_history_periods: config.anomaly_history_periods,
            enable_cost_forecasting: config.enable_cost_forecasting,
            forecast_days: config.forecast_days,
            alert_levels,
            max_services_in_alert: config.max_services_in_alert,
            enable_detailed_breakdown: config.enable_detailed_breakdown,
            alert_cooldown,
            check_interval_hours: config.check_interval_hours,
            enable_weekend_monitoring: config.enable_weekend_monitoring,
            notification_frequency: config.notification_frequency,
            slack_channel: config.slack_channel.clone(),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Check numeric invariants
    pub fn validate(&self) -> Result<()> {
        if !self.cost_threshold.is_finite() || self.cost_threshold <= 0.0 {
            return Err(Error::config(format!(
                "cost_threshold must be positive, got {}",
                self.cost_threshold
            )));
        }
        if self.monitoring_period_days == 0 {
            return Err(Error::config("monitoring_period_days must be at least 1"));
        }
        if self.resource_level() && self.monitoring_period_days > RESOURCE_LOOKBACK_DAYS {
            return Err(Error::config(format!(
                "monitoring_period_days must be at most {RESOURCE_LOOKBACK_DAYS} when resource ARN \
                 filters are set, got {}",
                self.monitoring_period_days
            )));
        }
        if self.enable_cost_forecasting && self.forecast_days == 0 {
            return Err(Error::config("forecast_days must be at least 1"));
        }
        if self.max_services_in_alert == 0 {
            return Err(Error::config("max_services_in_alert must be at least 1"));
        }
        if !(1..=MAX_CHECK_INTERVAL_HOURS).contains(&self.check_interval_hours) {
            return Err(Error::config(format!(
                "check_interval_hours must be between 1 and {MAX_CHECK_INTERVAL_HOURS}, got {}",
                self.check_interval_hours
            )));
        }

        let AlertLevels {
            critical,
            warning,
            info,
        } = self.alert_levels;
        if ![critical, warning, info].iter().all(|v| v.is_finite() && *v > 0.0) {
            return Err(Error::config("alert levels must be positive percentages"));
        }
        if !(critical >= warning && warning >= info) {
            return Err(Error::config(format!(
                "alert levels must satisfy critical >= warning >= info, got {critical}/{warning}/{info}"
            )));
        }

        Ok(())
    }

    /// Whether ARN filters require resource-level cost data
    pub fn resource_level(&self) -> bool {
        !self.resource_arns.is_empty() || !self.excluded_arns.is_empty()
    }

    /// Prior periods the anomaly baseline can use.
    ///
    /// Resource-level data only reaches back [`RESOURCE_LOOKBACK_DAYS`], so with
    /// ARN filters only the whole periods before the current window that fit
    /// in it are available.
    pub fn history_periods(&self) -> usize {
        if !self.resource_level() {
            return self.anomaly_history_periods;
        }
        let period = self.monitoring_period_days.max(1);
        let available = RESOURCE_LOOKBACK_DAYS.saturating_sub(period) / period;
        self.anomaly_history_periods
            .min(usize::try_from(available).unwrap_or(usize::MAX))
    }

    /// Global threshold scaled from the monitoring window to the forecast horizon
    pub fn forecast_threshold(&self) -> f64 {
        self.cost_threshold * f64::from(self.forecast_days)
            / f64::from(self.monitoring_period_days.max(1))
    }

    /// Time between daemon checks
    pub fn check_interval(&self) -> Duration {
        interval_duration(self.check_interval_hours)
    }

    /// Threshold configured for `service`, if any
    pub fn service_threshold(&self, service: &str) -> Option<f64> {
        self.service_thresholds.get(&normalize(service)).copied()
    }

    /// Whether `service` is on the deny list
    pub fn is_service_disabled(&self, service: &str) -> bool {
        self.disabled_services.contains(&normalize(service))
    }
}

fn interval_duration(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(3600))
}

fn parse_arns(items: &[String]) -> Result<Vec<ArnPattern>> {
    items.iter().map(|s| ArnPattern::parse(s)).collect()
}

/// Case-insensitive key for service names and tag keys
pub(crate) fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}
