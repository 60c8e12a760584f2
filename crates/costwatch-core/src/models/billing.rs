//! Billing data models

use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Two amounts closer than this are treated as equal
pub const AMOUNT_EPSILON: f64 = 1e-6;

/// Time bucket size requested from the billing provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Granularity {
    /// One bucket per hour
    Hourly,
    /// One bucket per day
    #[default]
    Daily,
    /// One bucket per calendar month
    Monthly,
}

/// Half-open date range `[start, end)` over which costs are aggregated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeWindow {
    /// First day included
    pub start: NaiveDate,
    /// First day excluded
    pub end: NaiveDate,
}

impl TimeWindow {
    /// Create a window, swapping the bounds if given in reverse
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    /// The `days` days ending today (exclusive of today)
    pub fn trailing_days(days: u32) -> Self {
        Self::trailing_days_from(Utc::now().date_naive(), days)
    }

    /// The `days` days ending at `today` (exclusive)
    pub fn trailing_days_from(today: NaiveDate, days: u32) -> Self {
        Self::new(today - Duration::days(i64::from(days)), today)
    }

    /// Number of days covered
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Whether the window covers no days at all
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether `date` falls on a Saturday or Sunday
    pub fn is_weekend(date: NaiveDate) -> bool {
        matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }
}

/// One line item of raw cost data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingRecord {
    /// Provider service name (e.g. "Amazon Elastic Compute Cloud - Compute")
    pub service: String,

    /// Resource identifier (ARN) when the provider reports per-resource costs
    pub resource_id: Option<String>,

    /// Cost allocation tags attached to the line item
    #[serde(default)]
    pub tags: HashMap<String, String>,

    /// Cost amount
    pub amount: f64,

    /// Currency of the amount
    pub currency: String,

    /// Time bucket the amount covers
    pub window: TimeWindow,
}

impl BillingRecord {
    /// Create a record without resource id or tags
    pub fn new(
        service: impl Into<String>,
        amount: f64,
        currency: impl Into<String>,
        window: TimeWindow,
    ) -> Self {
        Self {
            service: service.into(),
            resource_id: None,
            tags: HashMap::new(),
            amount,
            currency: currency.into(),
            window,
        }
    }

    /// Attach a resource identifier
    #[must_use]
    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Attach a tag
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Summed cost for one service over the monitoring window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAggregate {
    /// Service name
    pub service: String,
    /// Summed amount
    pub amount: f64,
}

/// Total cost for one day, used by summary reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCost {
    /// Day the cost was incurred
    pub date: NaiveDate,
    /// Total for that day
    pub amount: f64,
}

/// Order-independent compensated sum.
///
/// Values are sorted before a Neumaier summation so the same multiset of
/// amounts always produces the same total regardless of input order.
pub fn stable_sum(values: impl IntoIterator<Item = f64>) -> f64 {
    let mut values: Vec<f64> = values.into_iter().collect();
    values.sort_by(f64::total_cmp);

    let mut sum = 0.0_f64;
    let mut compensation = 0.0_f64;
    for v in values {
        let t = sum + v;
        if sum.abs() >= v.abs() {
            compensation += (sum - t) + v;
        } else {
            compensation += (v - t) + sum;
        }
        sum = t;
    }
    sum + compensation
}
