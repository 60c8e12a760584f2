//! Deduplicate, render and deliver alert events

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use super::dedup::{decide, DedupDecision, DedupStore};
use super::formatter::render_alert;
use super::notifier::MessageSender;
use crate::error::DeliveryError;
use crate::models::{AlertEvent, Fingerprint, Severity};
use crate::settings::Settings;

/// A delivery that did not go through
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    /// Event that was not delivered
    pub fingerprint: Fingerprint,
    /// Last error from the sender
    pub error: DeliveryError,
}

/// Per-run dispatch counters.
///
/// Every candidate event lands in exactly one of `sent`, `suppressed`,
/// `skipped` or `failed`.
#[derive(Debug, Clone, Default)]
pub struct DispatchSummary {
    /// Delivered
    pub sent: usize,
    /// Repeats inside the cool-down window
    pub suppressed: usize,
    /// Normal-severity events, which are never delivered
    pub skipped: usize,
    /// Deliveries that errored
    pub failed: usize,
    /// One entry per failed delivery
    pub failures: Vec<DeliveryFailure>,
    /// Fingerprints delivered this run, in order
    pub delivered: Vec<Fingerprint>,
}

impl DispatchSummary {
    /// Number of events accounted for
    pub fn total(&self) -> usize {
        self.sent + self.suppressed + self.skipped + self.failed
    }
}

/// Deliver `events` through `sender`, consulting and updating `dedup`.
///
/// Delivery failures are collected, not returned; a failed event is not
/// recorded so the next run tries it again.
pub async fn dispatch(
    events: &[AlertEvent],
    dedup: &mut dyn DedupStore,
    settings: &Settings,
    sender: &dyn MessageSender,
    now: DateTime<Utc>,
) -> DispatchSummary {
    let cooldown = TimeDelta::from_std(settings.alert_cooldown).unwrap_or(TimeDelta::MAX);
    let mut summary = DispatchSummary::default();

    for event in events {
        let fingerprint = event.fingerprint();

        if event.severity == Severity::Normal {
            debug!(fingerprint = %fingerprint, "Skipping normal-severity event");
            summary.skipped += 1;
            continue;
        }

        match decide(dedup, &fingerprint, now, cooldown) {
            DedupDecision::Suppress { last_sent } => {
                debug!(
                    fingerprint = %fingerprint,
                    last_sent = %last_sent,
                    "Suppressed inside cool-down window"
                );
                summary.suppressed += 1;
                continue;
            }
            DedupDecision::Escalation { previous } => {
                info!(
                    fingerprint = %fingerprint,
                    previous = %previous,
                    "Severity escalated, bypassing cool-down"
                );
            }
            DedupDecision::Send => {}
        }

        let message = render_alert(event, settings);
        match sender.send(&settings.slack_channel, &message).await {
            Ok(()) => {
                info!(
                    fingerprint = %fingerprint,
                    amount = event.current_amount,
                    threshold = event.threshold_amount,
                    "Alert delivered"
                );
                dedup.record(fingerprint.clone(), now);
                summary.delivered.push(fingerprint);
                summary.sent += 1;
            }
            Err(error) => {
                warn!(fingerprint = %fingerprint, error = %error, "Alert delivery failed");
                summary.failures.push(DeliveryFailure { fingerprint, error });
                summary.failed += 1;
            }
        }
    }

    summary
}
