//! Alerting for costwatch
//!
//! Deduplicates alert events, renders them as Slack messages and delivers them.

pub mod dedup;
mod dispatcher;
pub mod formatter;
mod notifier;

pub use dedup::{DedupDecision, DedupStore, InMemoryDedupStore};
pub use dispatcher::{dispatch, DeliveryFailure, DispatchSummary};
pub use formatter::{ChatMessage, CostSummary};
pub use notifier::{MessageSender, SlackNotifier};
