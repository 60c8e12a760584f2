//! AWS Cost Explorer billing source

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_costexplorer::config::http::HttpResponse;
use aws_sdk_costexplorer::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_costexplorer::types::{
    DateInterval, Dimension, DimensionValues, Expression, Granularity as CeGranularity,
    GroupDefinition, GroupDefinitionType, Metric, ResultByTime, TagValues,
};
use aws_sdk_costexplorer::Client;
use chrono::{Duration, NaiveDate, Utc};
use tracing::{debug, info, warn};

use super::{history_range, period_totals, BillingSource};
use crate::error::{Error, Result};
use crate::models::{BillingRecord, Granularity, TimeWindow};
use crate::settings::{Settings, RESOURCE_LOOKBACK_DAYS};

const COST_METRIC: &str = "BlendedCost";

/// Resource id reported for usage not attributable to a resource
const NO_RESOURCE_ID: &str = "NoResourceId";

const THROTTLING_CODES: &[&str] = &[
    "LimitExceededException",
    "ThrottlingException",
    "RequestLimitExceeded",
    "ServiceUnavailableException",
];

/// Cost Explorer client wrapper
pub struct CostExplorerSource {
    client: Client,
    settings: Arc<Settings>,
}

impl CostExplorerSource {
    /// Create a source from the default credential chain in `region`
    pub async fn from_env(region: &str, settings: Arc<Settings>) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self::new(Client::new(&config), settings)
    }

    /// Wrap an existing client
    pub fn new(client: Client, settings: Arc<Settings>) -> Self {
        Self { client, settings }
    }

    /// Tag filters pushed down to the API; matching is repeated locally
    fn tag_expression(&self) -> Option<Expression> {
        let mut tags: Vec<Expression> = self
            .settings
            .tag_filters
            .iter()
            .map(|(key, value)| {
                Expression::builder()
                    .tags(TagValues::builder().key(key).values(value).build())
                    .build()
            })
            .collect();

        match tags.len() {
            0 => None,
            1 => tags.pop(),
            _ => Some(Expression::builder().set_and(Some(tags)).build()),
        }
    }

    async fn service_costs(
        &self,
        window: TimeWindow,
        granularity: Granularity,
    ) -> Result<Vec<BillingRecord>> {
        let mut records = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let output = self
                .client
                .get_cost_and_usage()
                .time_period(interval(window.start, window.end)?)
                .granularity(ce_granularity(granularity))
                .set_filter(self.tag_expression())
                .group_by(group_by("SERVICE"))
                .metrics(COST_METRIC)
                .set_next_page_token(token.take())
                .send()
                .await
                .map_err(|e| sdk_error("GetCostAndUsage", e))?;

            records.extend(records_from_results(
                output.results_by_time(),
                &self.settings.tag_filters,
            ));

            match output.next_page_token() {
                Some(next) if !next.is_empty() => token = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(records)
    }

    async fn resource_costs(
        &self,
        window: TimeWindow,
        granularity: Granularity,
    ) -> Result<Vec<BillingRecord>> {
        let services: BTreeSet<String> = self
            .service_costs(window, granularity)
            .await?
            .into_iter()
            .filter(|r| r.amount > 0.0)
            .map(|r| r.service)
            .collect();

        if services.is_empty() {
            return Ok(Vec::new());
        }

        let earliest =
            Utc::now().date_naive() - Duration::days(i64::from(RESOURCE_LOOKBACK_DAYS));
        let window = if window.start < earliest {
            warn!(
                requested = %window.start,
                clamped = %earliest,
                lookback_days = RESOURCE_LOOKBACK_DAYS,
                "Resource-level costs do not reach back that far, window shortened"
            );
            TimeWindow::new(earliest, window.end.max(earliest))
        } else {
            window
        };
        if window.is_empty() {
            return Ok(Vec::new());
        }

        let service_filter = Expression::builder()
            .dimensions(
                DimensionValues::builder()
                    .key(Dimension::Service)
                    .set_values(Some(services.into_iter().collect()))
                    .build(),
            )
            .build();
        let filter = match self.tag_expression() {
            Some(tags) => Expression::builder().and(service_filter).and(tags).build(),
            None => service_filter,
        };

        let mut records = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let output = self
                .client
                .get_cost_and_usage_with_resources()
                .time_period(interval(window.start, window.end)?)
                .granularity(ce_granularity(granularity))
                .filter(filter.clone())
                .group_by(group_by("SERVICE"))
                .group_by(group_by("RESOURCE_ID"))
                .metrics(COST_METRIC)
                .set_next_page_token(token.take())
                .send()
                .await
                .map_err(|e| sdk_error("GetCostAndUsageWithResources", e))?;

            records.extend(records_from_results(
                output.results_by_time(),
                &self.settings.tag_filters,
            ));

            match output.next_page_token() {
                Some(next) if !next.is_empty() => token = Some(next.to_string()),
                _ => break,
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl BillingSource for CostExplorerSource {
    async fn fetch_costs(
        &self,
        window: TimeWindow,
        granularity: Granularity,
    ) -> Result<Vec<BillingRecord>> {
        info!(
            start = %window.start,
            end = %window.end,
            resource_level = self.settings.resource_level(),
            "Fetching AWS costs"
        );

        if window.is_empty() {
            return Ok(Vec::new());
        }

        let records = if self.settings.resource_level() {
            self.resource_costs(window, granularity).await?
        } else {
            self.service_costs(window, granularity).await?
        };

        debug!(records = records.len(), "Fetched cost records");
        Ok(records)
    }

    async fn fetch_forecast(&self, horizon_days: u32) -> Result<Option<f64>> {
        let start = Utc::now().date_naive();
        let end = start + Duration::days(i64::from(horizon_days.max(1)));

        let result = self
            .client
            .get_cost_forecast()
            .time_period(interval(start, end)?)
            .metric(Metric::BlendedCost)
            .granularity(CeGranularity::Monthly)
            .set_filter(self.tag_expression())
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|s| s.is_data_unavailable_exception()) => {
                info!("Not enough cost history for a forecast");
                return Ok(None);
            }
            Err(e) => return Err(sdk_error("GetCostForecast", e)),
        };

        let amount = output
            .total()
            .and_then(|total| total.amount())
            .and_then(|amount| amount.parse::<f64>().ok());

        debug!(horizon_days, forecast = ?amount, "Fetched cost forecast");
        Ok(amount)
    }

    async fn fetch_history(&self, num_periods: usize) -> Result<Vec<f64>> {
        let num_periods = if self.settings.resource_level() {
            num_periods.min(self.settings.history_periods())
        } else {
            num_periods
        };
        if num_periods == 0 {
            return Ok(Vec::new());
        }

        let period_days = self.settings.monitoring_period_days;
        let current = TimeWindow::trailing_days(period_days);
        let range = history_range(current, num_periods, period_days);

        let records = self.fetch_costs(range, Granularity::Daily).await?;
        Ok(period_totals(
            &records,
            range.start,
            period_days,
            num_periods,
            &self.settings,
        ))
    }

    async fn check_connection(&self) -> Result<()> {
        let window = TimeWindow::trailing_days(1);
        self.client
            .get_cost_and_usage()
            .time_period(interval(window.start, window.end)?)
            .granularity(CeGranularity::Daily)
            .metrics(COST_METRIC)
            .send()
            .await
            .map_err(|e| sdk_error("GetCostAndUsage", e))?;

        info!("AWS Cost Explorer connection OK");
        Ok(())
    }
}

fn interval(start: NaiveDate, end: NaiveDate) -> Result<DateInterval> {
    DateInterval::builder()
        .start(start.format("%Y-%m-%d").to_string())
        .end(end.format("%Y-%m-%d").to_string())
        .build()
        .map_err(|e| Error::internal(format!("Failed to build date interval: {e}")))
}

fn group_by(key: &str) -> GroupDefinition {
    GroupDefinition::builder()
        .r#type(GroupDefinitionType::Dimension)
        .key(key)
        .build()
}

fn ce_granularity(granularity: Granularity) -> CeGranularity {
    match granularity {
        Granularity::Hourly => CeGranularity::Hourly,
        Granularity::Daily => CeGranularity::Daily,
        Granularity::Monthly => CeGranularity::Monthly,
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    // hourly buckets come back as full timestamps
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Convert grouped results into records.
///
/// Group keys are `[service]` or `[service, resource id]`. Records are
/// annotated with the pushed-down tag filters, which every returned group
/// already satisfies.
fn records_from_results(
    results: &[ResultByTime],
    tag_filters: &HashMap<String, String>,
) -> Vec<BillingRecord> {
    let mut records = Vec::new();

    for result in results {
        let Some(window) = result.time_period().and_then(|tp| {
            Some(TimeWindow::new(parse_date(tp.start())?, parse_date(tp.end())?))
        }) else {
            warn!("Skipping result without a parsable time period");
            continue;
        };

        for group in result.groups() {
            let keys = group.keys();
            let Some(service) = keys.first() else {
                continue;
            };
            let Some(metric) = group.metrics().and_then(|m| m.get(COST_METRIC)) else {
                continue;
            };
            let Some(amount) = metric.amount().and_then(|a| a.parse::<f64>().ok()) else {
                warn!(service = %service, "Skipping unparsable cost amount");
                continue;
            };

            let mut record =
                BillingRecord::new(service.as_str(), amount, metric.unit().unwrap_or("USD"), window);
            if let Some(resource) = keys.get(1).filter(|id| id.as_str() != NO_RESOURCE_ID) {
                record = record.with_resource(resource.as_str());
            }
            record.tags = tag_filters.clone();
            records.push(record);
        }
    }

    records
}

fn sdk_error<E>(operation: &str, err: SdkError<E, HttpResponse>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let transient = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(service) => {
            service.raw().status().is_server_error()
                || service
                    .err()
                    .code()
                    .is_some_and(|code| THROTTLING_CODES.contains(&code))
        }
        _ => false,
    };

    let message = format!("{operation} failed: {}", DisplayErrorContext(&err));
    if transient {
        Error::transient(message)
    } else {
        Error::retrieval(message)
    }
}
