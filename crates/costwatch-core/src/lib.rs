//! # costwatch
//!
//! Cloud cost monitoring with threshold, anomaly and forecast alerts.
//!
//! costwatch pulls billing data from AWS Cost Explorer, aggregates it per
//! service, classifies spend against configurable thresholds and posts the
//! resulting alerts to Slack, deduplicated within a cool-down window.
//!
//! ## Architecture
//!
//! - **Settings**: layered configuration resolved into an immutable snapshot
//! - **Evaluation**: filtering, aggregation, severity classification, anomaly
//!   and forecast checks
//! - **Alerting**: deduplication, message rendering and Slack delivery
//! - **Monitor**: one check per run, serialized, plus the daemon scheduler
//!
//! ## Quick Start
//!
//! ```bash
//! # Verify AWS and Slack access
//! costwatch --test
//!
//! # Run a single check
//! costwatch --check-once --threshold 250
//!
//! # Keep checking every few hours
//! costwatch --daemon
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod alerting;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod retry;
pub mod settings;
pub mod sources;

pub use config::Config;
pub use error::{Error, Result};
pub use settings::Settings;

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{MessageSender, SlackNotifier};
    pub use crate::config::{Config, ConfigOverrides};
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::monitor::{CostMonitor, RunOutcome, Scheduler};
    pub use crate::settings::Settings;
    pub use crate::sources::{BillingSource, CostExplorerSource};
}
