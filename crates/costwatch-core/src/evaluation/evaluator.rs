//! Cost evaluation: aggregation, threshold comparison and severity classification

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{
    stable_sum, AlertEvent, AlertScope, BillingRecord, ServiceAggregate, Severity, AMOUNT_EPSILON,
};
use crate::settings::{normalize, AlertLevels, Settings};

use super::filter::{exclusion, ExclusionRule};

/// Outcome of evaluating one window of billing records
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Sum of every included amount
    pub total: f64,
    /// Per-service sums, descending by amount
    pub per_service_aggregates: Vec<ServiceAggregate>,
    /// Global event first, then per-service and per-resource events
    pub alerts: Vec<AlertEvent>,
    /// Number of records that passed the filters
    pub included_records: usize,
    /// Number of records excluded by each rule
    pub exclusions: BTreeMap<ExclusionRule, usize>,
    /// Included records whose currency differs from the configured one
    pub currency_mismatches: usize,
}

impl Evaluation {
    /// The global summary event
    pub fn global(&self) -> &AlertEvent {
        &self.alerts[0]
    }

    /// Events other than the global summary
    pub fn scoped_alerts(&self) -> &[AlertEvent] {
        &self.alerts[1..]
    }

    /// Aggregate for `service`, if it had any included cost
    pub fn aggregate(&self, service: &str) -> Option<f64> {
        let key = normalize(service);
        self.per_service_aggregates
            .iter()
            .find(|a| normalize(&a.service) == key)
            .map(|a| a.amount)
    }

    /// Total number of excluded records
    pub fn excluded_records(&self) -> usize {
        self.exclusions.values().sum()
    }
}

/// `amount` as a percentage of `threshold`
pub fn percent_of(amount: f64, threshold: f64) -> f64 {
    amount / threshold * 100.0
}

/// Classify `amount` against `threshold` using the configured breakpoints.
///
/// Breakpoints are checked from critical down; an amount within
/// [`AMOUNT_EPSILON`] of a breakpoint counts as reaching it.
pub fn classify(amount: f64, threshold: f64, levels: &AlertLevels) -> Severity {
    let reaches = |percent: f64| amount >= threshold * percent / 100.0 - AMOUNT_EPSILON;

    if reaches(levels.critical) {
        Severity::Critical
    } else if reaches(levels.warning) {
        Severity::Warning
    } else if reaches(levels.info) {
        Severity::Info
    } else {
        Severity::Normal
    }
}

struct Group<'a> {
    display: &'a str,
    amounts: Vec<f64>,
    service: &'a str,
}

impl<'a> Group<'a> {
    fn new(display: &'a str, service: &'a str) -> Self {
        Self {
            display,
            amounts: Vec::new(),
            service,
        }
    }

    fn push(&mut self, display: &'a str, service: &'a str, amount: f64) {
        // Keep the smallest spelling so the label does not depend on record order
        if display < self.display {
            self.display = display;
        }
        if service < self.service {
            self.service = service;
        }
        self.amounts.push(amount);
    }
}

/// Evaluate `records` against `settings`
pub fn evaluate(records: &[BillingRecord], settings: &Settings) -> Result<Evaluation> {
    let threshold = settings.cost_threshold;
    if !threshold.is_finite() || threshold <= 0.0 {
        return Err(Error::config(format!(
            "cost_threshold must be positive, got {threshold}"
        )));
    }

    let mut exclusions: BTreeMap<ExclusionRule, usize> = BTreeMap::new();
    let mut by_service: BTreeMap<String, Group<'_>> = BTreeMap::new();
    let mut by_resource: BTreeMap<&str, Group<'_>> = BTreeMap::new();
    let mut included_amounts = Vec::new();
    let mut currency_mismatches = 0;

    for record in records {
        if let Some(rule) = exclusion(record, settings) {
            *exclusions.entry(rule).or_default() += 1;
            continue;
        }

        if !record.currency.eq_ignore_ascii_case(&settings.currency) {
            currency_mismatches += 1;
        }

        included_amounts.push(record.amount);
        by_service
            .entry(normalize(&record.service))
            .or_insert_with(|| Group::new(&record.service, &record.service))
            .push(&record.service, &record.service, record.amount);

        if !settings.resource_arns.is_empty() {
            if let Some(id) = record.resource_id.as_deref() {
                by_resource
                    .entry(id)
                    .or_insert_with(|| Group::new(id, &record.service))
                    .push(id, &record.service, record.amount);
            }
        }
    }

    if currency_mismatches > 0 {
        warn!(
            count = currency_mismatches,
            currency = %settings.currency,
            "Billing records reported in an unexpected currency"
        );
    }

    let total = stable_sum(included_amounts.iter().copied());

    let mut per_service_aggregates: Vec<ServiceAggregate> = by_service
        .values()
        .map(|g| ServiceAggregate {
            service: g.display.to_string(),
            amount: stable_sum(g.amounts.iter().copied()),
        })
        .collect();
    sort_by_cost(&mut per_service_aggregates, |a| (a.amount, a.service.as_str()));

    debug!(
        total,
        included = included_amounts.len(),
        excluded = exclusions.values().sum::<usize>(),
        services = per_service_aggregates.len(),
        "Aggregated billing records"
    );

    let mut alerts = vec![global_event(total, &per_service_aggregates, settings)];
    alerts.extend(service_events(&per_service_aggregates, settings));
    alerts.extend(resource_events(&by_resource, settings));

    Ok(Evaluation {
        total,
        per_service_aggregates,
        alerts,
        included_records: included_amounts.len(),
        exclusions,
        currency_mismatches,
    })
}

fn sort_by_cost<T>(items: &mut [T], key: impl Fn(&T) -> (f64, &str)) {
    items.sort_by(|a, b| {
        let (amount_a, name_a) = key(a);
        let (amount_b, name_b) = key(b);
        amount_b.total_cmp(&amount_a).then_with(|| name_a.cmp(name_b))
    });
}

fn global_event(total: f64, aggregates: &[ServiceAggregate], settings: &Settings) -> AlertEvent {
    let threshold = settings.cost_threshold;
    let percent = percent_of(total, threshold);
    let severity = classify(total, threshold, &settings.alert_levels);

    let breakdown = aggregates
        .iter()
        .filter(|a| a.amount > AMOUNT_EPSILON)
        .take(settings.max_services_in_alert)
        .cloned()
        .collect();

    AlertEvent {
        severity,
        scope: AlertScope::Global,
        subject: None,
        current_amount: total,
        threshold_amount: threshold,
        percent_of_threshold: percent,
        message: format!(
            "Total cost {cur} {total:.2} is {percent:.1}% of the {cur} {threshold:.2} threshold over the last {days} days",
            cur = settings.currency,
            days = settings.monitoring_period_days,
        ),
        breakdown,
    }
}

fn service_events(aggregates: &[ServiceAggregate], settings: &Settings) -> Vec<AlertEvent> {
    let amounts: HashMap<String, (&str, f64)> = aggregates
        .iter()
        .map(|a| (normalize(&a.service), (a.service.as_str(), a.amount)))
        .collect();

    let mut urgent = Vec::new();
    let mut summaries = Vec::new();

    for (key, &threshold) in &settings.service_thresholds {
        let (display, amount) = amounts.get(key).copied().unwrap_or((key.as_str(), 0.0));
        let severity = classify(amount, threshold, &settings.alert_levels);
        let percent = percent_of(amount, threshold);

        let event = AlertEvent {
            severity,
            scope: AlertScope::PerService,
            subject: Some(display.to_string()),
            current_amount: amount,
            threshold_amount: threshold,
            percent_of_threshold: percent,
            message: format!(
                "{display} cost {cur} {amount:.2} is {percent:.1}% of its {cur} {threshold:.2} threshold",
                cur = settings.currency,
            ),
            breakdown: Vec::new(),
        };

        match severity {
            Severity::Warning | Severity::Critical => urgent.push(event),
            Severity::Info if settings.enable_detailed_breakdown => summaries.push(event),
            Severity::Info | Severity::Normal => {}
        }
    }

    sort_by_cost(&mut urgent, |e| (e.current_amount, e.subject_label()));
    sort_by_cost(&mut summaries, |e| (e.current_amount, e.subject_label()));
    summaries.truncate(settings.max_services_in_alert);

    urgent.extend(summaries);
    urgent
}

fn resource_events(resources: &BTreeMap<&str, Group<'_>>, settings: &Settings) -> Vec<AlertEvent> {
    let mut events: Vec<AlertEvent> = resources
        .values()
        .filter_map(|group| {
            let amount = stable_sum(group.amounts.iter().copied());
            let threshold = settings
                .service_threshold(group.service)
                .unwrap_or(settings.cost_threshold);
            let severity = classify(amount, threshold, &settings.alert_levels);
            if severity < Severity::Warning {
                return None;
            }

            let percent = percent_of(amount, threshold);
            Some(AlertEvent {
                severity,
                scope: AlertScope::PerResource,
                subject: Some(group.display.to_string()),
                current_amount: amount,
                threshold_amount: threshold,
                percent_of_threshold: percent,
                message: format!(
                    "Resource {id} ({service}) cost {cur} {amount:.2} is {percent:.1}% of the {cur} {threshold:.2} threshold",
                    id = group.display,
                    service = group.service,
                    cur = settings.currency,
                ),
                breakdown: Vec::new(),
            })
        })
        .collect();

    sort_by_cost(&mut events, |e| (e.current_amount, e.subject_label()));
    events
}
