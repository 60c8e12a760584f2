//! Record inclusion rules
//!
//! Rules are checked in a fixed precedence order and the first exclusion that
//! matches is reported:
//!
//! 1. resource allow-list
//! 2. resource deny-list
//! 3. enabled services
//! 4. disabled services
//! 5. tag filters

use std::fmt;

use serde::Serialize;

use crate::models::BillingRecord;
use crate::settings::{normalize, Settings};

/// The named rule that excluded a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionRule {
    /// Resource id not on the `resource_arns` allow-list
    ResourceNotAllowed,
    /// Resource id on the `excluded_arns` deny-list
    ResourceExcluded,
    /// Service not in `enabled_services`
    ServiceNotEnabled,
    /// Service in `disabled_services`
    ServiceDisabled,
    /// A required tag is missing or has a different value
    TagMismatch,
}

impl fmt::Display for ExclusionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ResourceNotAllowed => "resource_not_allowed",
            Self::ResourceExcluded => "resource_excluded",
            Self::ServiceNotEnabled => "service_not_enabled",
            Self::ServiceDisabled => "service_disabled",
            Self::TagMismatch => "tag_mismatch",
        })
    }
}

/// Whether `record` survives every filter in `settings`
pub fn include(record: &BillingRecord, settings: &Settings) -> bool {
    exclusion(record, settings).is_none()
}

/// The first rule excluding `record`, or `None` if it is included
pub fn exclusion(record: &BillingRecord, settings: &Settings) -> Option<ExclusionRule> {
    let resource = record.resource_id.as_deref();

    if !settings.resource_arns.is_empty() {
        let allowed = resource
            .is_some_and(|id| settings.resource_arns.iter().any(|p| p.matches(id)));
        if !allowed {
            return Some(ExclusionRule::ResourceNotAllowed);
        }
    }

    if let Some(id) = resource {
        if settings.excluded_arns.iter().any(|p| p.matches(id)) {
            return Some(ExclusionRule::ResourceExcluded);
        }
    }

    if !settings.enabled_services.contains(&record.service) {
        return Some(ExclusionRule::ServiceNotEnabled);
    }

    if settings.is_service_disabled(&record.service) {
        return Some(ExclusionRule::ServiceDisabled);
    }

    if !settings.tag_filters.is_empty() && !tags_match(record, settings) {
        return Some(ExclusionRule::TagMismatch);
    }

    None
}

fn tags_match(record: &BillingRecord, settings: &Settings) -> bool {
    settings.tag_filters.iter().all(|(key, required)| {
        record
            .tags
            .iter()
            .any(|(k, v)| normalize(k) == normalize(key) && v == required)
    })
}

/// Keep only the records `include` accepts
pub fn filter_records<'a>(
    records: &'a [BillingRecord],
    settings: &'a Settings,
) -> impl Iterator<Item = &'a BillingRecord> + 'a {
    records.iter().filter(move |r| include(r, settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeWindow;
    use crate::settings::{ArnPattern, ServiceSelection};
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use rstest::rstest;

    fn window() -> TimeWindow {
        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        TimeWindow::new(start, start + chrono::Duration::days(7))
    }

    fn record(service: &str) -> BillingRecord {
        BillingRecord::new(service, 10.0, "USD", window())
    }

    fn only(services: &[&str]) -> ServiceSelection {
        ServiceSelection::Only(services.iter().map(|s| normalize(s)).collect())
    }

    #[test]
    fn test_enabled_services_excludes_other_service_regardless_of_cost() {
        let settings = Settings {
            enabled_services: only(&["EC2"]),
            ..Settings::default()
        };
        let mut s3 = record("S3");
        s3.amount = 1_000_000.0;

        assert_eq!(exclusion(&s3, &settings), Some(ExclusionRule::ServiceNotEnabled));
        assert!(include(&record("EC2"), &settings));
    }

    #[test]
    fn test_disabled_service() {
        let settings = Settings {
            disabled_services: ["tax".to_string()].into_iter().collect(),
            ..Settings::default()
        };
        assert_eq!(exclusion(&record("Tax"), &settings), Some(ExclusionRule::ServiceDisabled));
    }

    #[test]
    fn test_allow_list_excludes_records_without_resource() {
        let settings = Settings {
            resource_arns: vec![ArnPattern::parse("arn:aws:ec2:us-east-1:1:instance/i-prod*").unwrap()],
            ..Settings::default()
        };
        assert_eq!(
            exclusion(&record("EC2"), &settings),
            Some(ExclusionRule::ResourceNotAllowed)
        );
        let prod = record("EC2").with_resource("arn:aws:ec2:us-east-1:1:instance/i-prod-1");
        assert!(include(&prod, &settings));
    }

    #[rstest]
    #[case::resource_outside_allow_list(
        Some("arn:aws:s3:::other"),
        "S3",
        Some(ExclusionRule::ResourceNotAllowed)
    )]
    #[case::deny_list_beats_service_rules(
        Some("arn:aws:s3:::logs"),
        "Tax",
        Some(ExclusionRule::ResourceExcluded)
    )]
    #[case::service_rule_beats_tags(Some("arn:aws:s3:::data"), "Tax", Some(ExclusionRule::ServiceDisabled))]
    #[case::tags_checked_last(Some("arn:aws:s3:::data"), "S3", Some(ExclusionRule::TagMismatch))]
    fn test_precedence(
        #[case] resource: Option<&str>,
        #[case] service: &str,
        #[case] expected: Option<ExclusionRule>,
    ) {
        let settings = Settings {
            resource_arns: vec![
                ArnPattern::parse("arn:aws:s3:::logs").unwrap(),
                ArnPattern::parse("arn:aws:s3:::data").unwrap(),
            ],
            excluded_arns: vec![ArnPattern::parse("arn:aws:s3:::logs").unwrap()],
            disabled_services: ["tax".to_string()].into_iter().collect(),
            tag_filters: [("env".to_string(), "prod".to_string())].into_iter().collect(),
            ..Settings::default()
        };
        let mut rec = record(service);
        rec.resource_id = resource.map(String::from);
        assert_eq!(exclusion(&rec, &settings), expected);
    }

    #[test]
    fn test_tag_filters_require_every_key() {
        let settings = Settings {
            tag_filters: [
                ("env".to_string(), "prod".to_string()),
                ("team".to_string(), "billing".to_string()),
            ]
            .into_iter()
            .collect(),
            ..Settings::default()
        };

        let partial = record("EC2").with_tag("env", "prod");
        assert!(!include(&partial, &settings));

        let wrong_value = record("EC2").with_tag("env", "prod").with_tag("team", "infra");
        assert!(!include(&wrong_value, &settings));

        let full = record("EC2").with_tag("Env", "prod").with_tag("team", "billing");
        assert!(include(&full, &settings));
    }

    fn arb_record() -> impl Strategy<Value = BillingRecord> {
        (
            prop::sample::select(vec!["EC2", "S3", "RDS", "Tax"]),
            prop::option::of(prop::sample::select(vec![
                "arn:aws:s3:::logs",
                "arn:aws:s3:::data",
                "arn:aws:ec2:us-east-1:1:instance/i-prod-1",
            ])),
            prop::option::of(prop::sample::select(vec!["prod", "dev"])),
            0.0..1000.0f64,
        )
            .prop_map(|(service, resource, env, amount)| {
                let mut rec = record(service);
                rec.amount = amount;
                rec.resource_id = resource.map(String::from);
                if let Some(env) = env {
                    rec.tags.insert("env".to_string(), env.to_string());
                }
                rec
            })
    }

    proptest! {
        #[test]
        fn prop_filter_is_idempotent(records in prop::collection::vec(arb_record(), 0..50)) {
            let settings = Settings {
                excluded_arns: vec![ArnPattern::parse("arn:aws:s3:::logs").unwrap()],
                enabled_services: only(&["EC2", "S3", "Tax"]),
                disabled_services: ["tax".to_string()].into_iter().collect(),
                tag_filters: [("env".to_string(), "prod".to_string())].into_iter().collect(),
                ..Settings::default()
            };

            let once: Vec<BillingRecord> = filter_records(&records, &settings).cloned().collect();
            let twice: Vec<BillingRecord> = filter_records(&once, &settings).cloned().collect();
            prop_assert_eq!(once, twice);
        }
    }
}
