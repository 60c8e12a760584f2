//! Alert data models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::billing::ServiceAggregate;

/// Alert severity level, ordered `Normal < Info < Warning < Critical`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Below every breakpoint
    #[default]
    Normal,
    /// Informational
    Info,
    /// Warning
    Warning,
    /// Critical
    Critical,
}

impl Severity {
    /// Lowercase label
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an alert is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertScope {
    /// Total cost across all included services
    Global,
    /// A single service against its own threshold
    PerService,
    /// A single monitored resource
    PerResource,
    /// Statistically unusual spend
    Anomaly,
    /// Projected spend over the forecast horizon
    Forecast,
}

impl AlertScope {
    /// snake_case label
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::PerService => "per_service",
            Self::PerResource => "per_resource",
            Self::Anomaly => "anomaly",
            Self::Forecast => "forecast",
        }
    }
}

impl fmt::Display for AlertScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate alert produced by the evaluator, anomaly detector or forecast check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Severity level
    pub severity: Severity,

    /// What the alert is about
    pub scope: AlertScope,

    /// Service name or resource id (None for global totals)
    pub subject: Option<String>,

    /// The amount that was evaluated
    pub current_amount: f64,

    /// The threshold (or baseline) it was compared against
    pub threshold_amount: f64,

    /// `current_amount / threshold_amount * 100`
    pub percent_of_threshold: f64,

    /// Human-readable message
    pub message: String,

    /// Top services by cost, rendered as the detailed body
    #[serde(default)]
    pub breakdown: Vec<ServiceAggregate>,
}

impl AlertEvent {
    /// Deduplication key for this event
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            severity: self.severity,
            scope: self.scope,
            subject: self.subject.clone(),
        }
    }

    /// Subject label used in headers and logs
    pub fn subject_label(&self) -> &str {
        self.subject.as_deref().unwrap_or("all services")
    }
}

/// Identifies "the same alert" across runs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Severity tier
    pub severity: Severity,
    /// Alert scope
    pub scope: AlertScope,
    /// Service or resource id
    pub subject: Option<String>,
}

impl Fingerprint {
    /// Whether this fingerprint is about the same thing as `other`, ignoring severity
    pub fn same_subject(&self, other: &Fingerprint) -> bool {
        self.scope == other.scope && self.subject == other.subject
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.severity,
            self.scope,
            self.subject.as_deref().unwrap_or("-")
        )
    }
}

/// Record of a delivered alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Fingerprint of the delivered event
    pub fingerprint: Fingerprint,

    /// When it was sent
    pub sent_at: DateTime<Utc>,
}
