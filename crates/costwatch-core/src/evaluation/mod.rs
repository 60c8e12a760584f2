//! Cost evaluation engine
//!
//! Filters raw billing records, aggregates them per service, classifies the
//! totals against thresholds and flags anomalous or projected spend.

pub mod anomaly;
mod evaluator;
mod filter;
mod forecast;

pub use anomaly::{detect, detect_daily_spike, detect_for, Baseline};
pub use evaluator::{classify, evaluate, percent_of, Evaluation};
pub use filter::{exclusion, filter_records, include, ExclusionRule};
pub use forecast::check_forecast;
