//! Alert deduplication state
//!
//! Remembers when each [`Fingerprint`] was last delivered so an unchanged
//! alert is not repeated inside the cool-down window. The state is owned by
//! whoever drives dispatch and handed in explicitly; the in-memory store lives
//! for the life of the process.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::models::{Fingerprint, NotificationRecord, Severity};

/// Storage for last-sent timestamps
pub trait DedupStore: Send {
    /// When `fingerprint` was last delivered
    fn last_sent(&self, fingerprint: &Fingerprint) -> Option<DateTime<Utc>>;

    /// Most recent delivery about the same scope and subject, at any severity
    fn latest_for_subject(&self, fingerprint: &Fingerprint) -> Option<NotificationRecord>;

    /// Record a successful delivery
    fn record(&mut self, fingerprint: Fingerprint, sent_at: DateTime<Utc>);

    /// Forget deliveries older than `cutoff`; returns how many were dropped
    fn prune(&mut self, cutoff: DateTime<Utc>) -> usize;

    /// Number of remembered fingerprints
    fn len(&self) -> usize;

    /// Whether nothing is remembered
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-lifetime dedup state
#[derive(Debug, Default)]
pub struct InMemoryDedupStore {
    sent: HashMap<Fingerprint, DateTime<Utc>>,
}

impl InMemoryDedupStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl DedupStore for InMemoryDedupStore {
    fn last_sent(&self, fingerprint: &Fingerprint) -> Option<DateTime<Utc>> {
        self.sent.get(fingerprint).copied()
    }

    fn latest_for_subject(&self, fingerprint: &Fingerprint) -> Option<NotificationRecord> {
        self.sent
            .iter()
            .filter(|(fp, _)| fp.same_subject(fingerprint))
            .max_by(|(a_fp, a_at), (b_fp, b_at)| {
                a_at.cmp(b_at).then(a_fp.severity.cmp(&b_fp.severity))
            })
            .map(|(fp, at)| NotificationRecord {
                fingerprint: fp.clone(),
                sent_at: *at,
            })
    }

    fn record(&mut self, fingerprint: Fingerprint, sent_at: DateTime<Utc>) {
        self.sent.insert(fingerprint, sent_at);
    }

    fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.sent.len();
        self.sent.retain(|_, at| *at >= cutoff);
        before - self.sent.len()
    }

    fn len(&self) -> usize {
        self.sent.len()
    }
}

/// What to do with a candidate alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    /// Not seen inside the cool-down window
    Send,
    /// Worse than the last alert about the same subject; bypasses the cool-down
    Escalation {
        /// Severity of the previous delivery
        previous: Severity,
    },
    /// Same fingerprint delivered inside the cool-down window
    Suppress {
        /// When it was last delivered
        last_sent: DateTime<Utc>,
    },
}

impl DedupDecision {
    /// Whether the alert should be delivered
    pub fn should_send(self) -> bool {
        !matches!(self, Self::Suppress { .. })
    }
}

/// Decide whether `fingerprint` may be delivered at `now`
pub fn decide(
    store: &dyn DedupStore,
    fingerprint: &Fingerprint,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> DedupDecision {
    if let Some(latest) = store.latest_for_subject(fingerprint) {
        if latest.fingerprint.severity < fingerprint.severity {
            return DedupDecision::Escalation {
                previous: latest.fingerprint.severity,
            };
        }
    }

    match store.last_sent(fingerprint) {
        Some(last_sent) if now - last_sent < cooldown => DedupDecision::Suppress { last_sent },
        _ => DedupDecision::Send,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertScope;

    fn fp(severity: Severity, subject: &str) -> Fingerprint {
        Fingerprint {
            severity,
            scope: AlertScope::PerService,
            subject: Some(subject.to_string()),
        }
    }

    #[test]
    fn test_unseen_fingerprint_is_sent() {
        let store = InMemoryDedupStore::new();
        let decision = decide(&store, &fp(Severity::Warning, "EC2"), Utc::now(), Duration::hours(6));
        assert_eq!(decision, DedupDecision::Send);
    }

    #[test]
    fn test_repeat_inside_cooldown_is_suppressed() {
        let mut store = InMemoryDedupStore::new();
        let now = Utc::now();
        store.record(fp(Severity::Warning, "EC2"), now - Duration::hours(1));

        let decision = decide(&store, &fp(Severity::Warning, "EC2"), now, Duration::hours(6));
        assert!(!decision.should_send());
    }

    #[test]
    fn test_repeat_after_cooldown_is_sent() {
        let mut store = InMemoryDedupStore::new();
        let now = Utc::now();
        store.record(fp(Severity::Warning, "EC2"), now - Duration::hours(6));

        let decision = decide(&store, &fp(Severity::Warning, "EC2"), now, Duration::hours(6));
        assert_eq!(decision, DedupDecision::Send);
    }

    #[test]
    fn test_escalation_bypasses_cooldown() {
        let mut store = InMemoryDedupStore::new();
        let now = Utc::now();
        store.record(fp(Severity::Critical, "EC2"), now - Duration::hours(3));
        store.record(fp(Severity::Warning, "EC2"), now - Duration::hours(1));

        // critical was sent recently, but the latest alert for EC2 was only a warning
        let decision = decide(&store, &fp(Severity::Critical, "EC2"), now, Duration::hours(6));
        assert_eq!(
            decision,
            DedupDecision::Escalation {
                previous: Severity::Warning
            }
        );
    }

    #[test]
    fn test_other_subjects_do_not_interfere() {
        let mut store = InMemoryDedupStore::new();
        let now = Utc::now();
        store.record(fp(Severity::Critical, "RDS"), now);

        let decision = decide(&store, &fp(Severity::Warning, "EC2"), now, Duration::hours(6));
        assert_eq!(decision, DedupDecision::Send);
    }

    #[test]
    fn test_prune_drops_old_entries() {
        let mut store = InMemoryDedupStore::new();
        let now = Utc::now();
        store.record(fp(Severity::Warning, "EC2"), now - Duration::days(2));
        store.record(fp(Severity::Warning, "RDS"), now);

        assert_eq!(store.prune(now - Duration::days(1)), 1);
        assert_eq!(store.len(), 1);
    }
}
