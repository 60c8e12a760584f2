//! Baseline deviation detection
//!
//! The current value is compared with the mean and sample standard deviation
//! of prior per-period totals. A value further than `k` standard deviations
//! from the mean is anomalous; `k` comes from [`AnomalySensitivity::k`].

use tracing::debug;

use chrono::Duration;

use crate::models::{AlertEvent, AlertScope, DailyCost, Severity, AMOUNT_EPSILON};
use crate::settings::AnomalySensitivity;

/// Fewest prior periods a baseline is computed from
pub const MIN_BASELINE_POINTS: usize = 2;

/// Day-over-day growth factor that counts as a sudden spike
pub const DAILY_SPIKE_FACTOR: f64 = 2.0;

/// Subject used when the caller does not label the series
pub const DEFAULT_SUBJECT: &str = "total";

/// Mean and sample standard deviation of a baseline series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    /// Arithmetic mean
    pub mean: f64,
    /// Sample standard deviation (n - 1)
    pub std_dev: f64,
    /// Number of points
    pub len: usize,
}

impl Baseline {
    /// Compute the baseline; `None` with fewer than two points
    pub fn from_history(history: &[f64]) -> Option<Self> {
        if history.len() < MIN_BASELINE_POINTS {
            return None;
        }

        let n = history.len() as f64;
        let mean = history.iter().sum::<f64>() / n;
        let variance = history.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);

        Some(Self {
            mean,
            std_dev: variance.sqrt(),
            len: history.len(),
        })
    }

    /// Whether `value` strays more than `k` standard deviations from the mean
    pub fn is_anomalous(&self, value: f64, k: f64) -> bool {
        (value - self.mean).abs() > k * self.std_dev + AMOUNT_EPSILON
    }
}

/// Detect an anomaly in the total for the current period
pub fn detect(current: f64, historical: &[f64], sensitivity: AnomalySensitivity) -> Vec<AlertEvent> {
    detect_for(DEFAULT_SUBJECT, current, historical, sensitivity)
}

/// Detect an anomaly in a labelled series
pub fn detect_for(
    subject: &str,
    current: f64,
    historical: &[f64],
    sensitivity: AnomalySensitivity,
) -> Vec<AlertEvent> {
    let Some(baseline) = Baseline::from_history(historical) else {
        debug!(
            subject,
            points = historical.len(),
            "Not enough history for anomaly detection"
        );
        return Vec::new();
    };

    let k = sensitivity.k();
    if !baseline.is_anomalous(current, k) {
        debug!(
            subject,
            current,
            mean = baseline.mean,
            std_dev = baseline.std_dev,
            "No anomaly"
        );
        return Vec::new();
    }

    let spike = current > baseline.mean;
    let (kind, severity) = if spike {
        ("spike", Severity::Warning)
    } else {
        ("drop", Severity::Info)
    };

    let deviation_pct = if baseline.mean.abs() > AMOUNT_EPSILON {
        (current - baseline.mean) / baseline.mean * 100.0
    } else {
        0.0
    };
    let percent = if baseline.mean.abs() > AMOUNT_EPSILON {
        current / baseline.mean * 100.0
    } else {
        0.0
    };

    vec![AlertEvent {
        severity,
        scope: AlertScope::Anomaly,
        subject: Some(subject.to_string()),
        current_amount: current,
        threshold_amount: baseline.mean,
        percent_of_threshold: percent,
        message: format!(
            "Cost {kind} for {subject}: {current:.2} vs baseline {mean:.2} ± {sd:.2} \
             over {n} periods ({deviation_pct:+.1}%, sensitivity {sensitivity})",
            mean = baseline.mean,
            sd = baseline.std_dev,
            n = baseline.len,
        ),
        breakdown: Vec::new(),
    }]
}

/// Flag the latest day if it cost more than [`DAILY_SPIKE_FACTOR`] times the
/// day before.
///
/// `daily` is oldest first. The two days must be consecutive and the earlier
/// one must have non-zero spend.
pub fn detect_daily_spike(daily: &[DailyCost]) -> Option<AlertEvent> {
    let [.., previous, latest] = daily else {
        return None;
    };
    if latest.date - previous.date != Duration::days(1) || previous.amount <= AMOUNT_EPSILON {
        return None;
    }
    if latest.amount <= previous.amount * DAILY_SPIKE_FACTOR + AMOUNT_EPSILON {
        return None;
    }

    Some(AlertEvent {
        severity: Severity::Warning,
        scope: AlertScope::Anomaly,
        subject: Some(format!("daily spike {}", latest.date)),
        current_amount: latest.amount,
        threshold_amount: previous.amount,
        percent_of_threshold: latest.amount / previous.amount * 100.0,
        message: format!(
            "Cost spike on {date}: {cur:.2} vs {prev:.2} the previous day",
            date = latest.date,
            cur = latest.amount,
            prev = previous.amount,
        ),
        breakdown: Vec::new(),
    })
}
