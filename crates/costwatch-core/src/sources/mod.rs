//! Billing data sources
//!
//! [`BillingSource`] is the seam between the monitor and the cloud provider.
//! The helpers here turn raw per-day records into the per-period and per-day
//! series the anomaly check and the summary report need.

mod cost_explorer;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};

use crate::error::Result;
use crate::evaluation::filter_records;
use crate::models::{stable_sum, BillingRecord, DailyCost, Granularity, TimeWindow};
use crate::settings::Settings;

pub use cost_explorer::CostExplorerSource;

/// Provider of billing records, forecasts and history
#[async_trait]
pub trait BillingSource: Send + Sync {
    /// Cost records for `window`, one per service (and resource) per bucket
    async fn fetch_costs(
        &self,
        window: TimeWindow,
        granularity: Granularity,
    ) -> Result<Vec<BillingRecord>>;

    /// Projected spend over the next `horizon_days`; `None` when the provider
    /// has too little history to project
    async fn fetch_forecast(&self, horizon_days: u32) -> Result<Option<f64>>;

    /// Totals of the `num_periods` monitoring windows preceding the current one,
    /// oldest first
    async fn fetch_history(&self, num_periods: usize) -> Result<Vec<f64>>;

    /// Verify credentials and access
    async fn check_connection(&self) -> Result<()>;
}

/// The `num_periods` windows of `period_days` immediately before `current`,
/// as one contiguous range
pub fn history_range(current: TimeWindow, num_periods: usize, period_days: u32) -> TimeWindow {
    let span = i64::from(period_days) * i64::try_from(num_periods).unwrap_or(i64::MAX / 366);
    TimeWindow::new(current.start - Duration::days(span), current.start)
}

/// Sum filtered `records` into `num_periods` buckets of `period_days`
/// starting at `range_start`, oldest first.
///
/// Periods without any record are left out rather than counted as zero
/// spend; a young account has no history, not free history.
pub fn period_totals(
    records: &[BillingRecord],
    range_start: NaiveDate,
    period_days: u32,
    num_periods: usize,
    settings: &Settings,
) -> Vec<f64> {
    let period = i64::from(period_days.max(1));
    let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();

    for record in filter_records(records, settings) {
        let offset = (record.window.start - range_start).num_days();
        if offset < 0 {
            continue;
        }
        let index = offset / period;
        if usize::try_from(index).map_or(true, |i| i >= num_periods) {
            continue;
        }
        buckets.entry(index).or_default().push(record.amount);
    }

    buckets.into_values().map(stable_sum).collect()
}

/// Sum filtered `records` per calendar day, oldest first
pub fn daily_totals(records: &[BillingRecord], settings: &Settings) -> Vec<DailyCost> {
    let mut days: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for record in filter_records(records, settings) {
        days.entry(record.window.start).or_default().push(record.amount);
    }

    days.into_iter()
        .map(|(date, amounts)| DailyCost {
            date,
            amount: stable_sum(amounts),
        })
        .collect()
}
