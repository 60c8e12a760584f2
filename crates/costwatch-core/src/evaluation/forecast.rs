//! Projected-spend check against the global threshold
//!
//! The threshold covers one monitoring window, so it is scaled to the forecast
//! horizon before comparing.

use crate::models::{AlertEvent, AlertScope, Severity};
use crate::settings::Settings;

use super::evaluator::{classify, percent_of};

/// Compare a provider forecast for the next `settings.forecast_days` with the
/// global threshold scaled to that horizon.
///
/// Only projected overspend (warning or above) produces an event. A missing
/// forecast is not an error: the provider has too little history to project.
pub fn check_forecast(forecast: Option<f64>, settings: &Settings) -> Option<AlertEvent> {
    let amount = forecast?;
    let threshold = settings.forecast_threshold();
    let severity = classify(amount, threshold, &settings.alert_levels);
    if severity < Severity::Warning {
        return None;
    }

    let percent = percent_of(amount, threshold);
    Some(AlertEvent {
        severity,
        scope: AlertScope::Forecast,
        subject: Some(format!("next {} days", settings.forecast_days)),
        current_amount: amount,
        threshold_amount: threshold,
        percent_of_threshold: percent,
        message: format!(
            "Forecast spend for the next {days} days is {cur} {amount:.2}, {percent:.1}% of the {cur} {threshold:.2} budget for that horizon",
            days = settings.forecast_days,
            cur = settings.currency,
        ),
        breakdown: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_projected_overspend_alerts() {
        // 100 per 7 days scales to ~428.57 over 30 days
        let event = check_forecast(Some(450.0), &Settings::default()).unwrap();
        assert_eq!(event.scope, AlertScope::Forecast);
        assert_eq!(event.severity, Severity::Critical);
        assert_eq!(event.subject.as_deref(), Some("next 30 days"));
        assert!((event.threshold_amount - 3000.0 / 7.0).abs() < 1e-9);
        assert!((event.percent_of_threshold - 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_steady_in_budget_spend_is_quiet() {
        // 60 over the 7-day window is 60% of the threshold; the same daily rate
        // over 30 days must stay at 60% of the scaled threshold
        let settings = Settings::default();
        let forecast = 60.0 / 7.0 * 30.0;
        assert!(check_forecast(Some(forecast), &settings).is_none());
    }

    #[rstest]
    #[case::warning(0.85, Some(Severity::Warning))]
    #[case::critical(1.2, Some(Severity::Critical))]
    #[case::info(0.5, None)]
    fn test_severity_follows_scaled_threshold(
        #[case] fraction: f64,
        #[case] expected: Option<Severity>,
    ) {
        let settings = Settings {
            monitoring_period_days: 14,
            forecast_days: 7,
            ..Settings::default()
        };
        let forecast = settings.forecast_threshold() * fraction;
        assert_eq!(check_forecast(Some(forecast), &settings).map(|e| e.severity), expected);
    }

    #[test]
    fn test_missing_forecast_is_quiet() {
        assert!(check_forecast(None, &Settings::default()).is_none());
    }
}
