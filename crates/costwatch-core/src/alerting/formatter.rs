//! Chat message rendering
//!
//! Produces Slack block-kit messages for alerts, the daily summary, the
//! connection test and failure notices. Rendering is pure; delivery lives in
//! [`super::notifier`].

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{AlertEvent, AlertScope, DailyCost, ServiceAggregate, Severity};
use crate::settings::Settings;

/// A rendered chat message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    /// Plain-text fallback shown in notifications
    pub text: String,
    /// Sidebar colour, when the message is severity-coloured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Block-kit body
    pub blocks: Vec<Block>,
}

impl ChatMessage {
    fn plain(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            blocks: vec![Block::section(Text::mrkdwn(text.clone()))],
            text,
            color: None,
        }
    }

    /// All visible text, header first; handy for logs and assertions
    pub fn rendered_text(&self) -> String {
        let mut out = Vec::new();
        for block in &self.blocks {
            match block {
                Block::Header { text } => out.push(text.text.clone()),
                Block::Section { text, fields } => {
                    if let Some(text) = text {
                        out.push(text.text.clone());
                    }
                    for field in fields.iter().flatten() {
                        out.push(field.text.clone());
                    }
                }
                Block::Context { elements } => {
                    out.extend(elements.iter().map(|e| e.text.clone()));
                }
                Block::Divider => {}
            }
        }
        out.join("\n")
    }
}

/// Slack block-kit block
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    /// Large plain-text title
    Header {
        /// Title text, plain only
        text: Text,
    },
    /// Body text, a two-column field grid, or both
    Section {
        /// Paragraph text
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<Text>,
        /// Label/value cells
        #[serde(skip_serializing_if = "Option::is_none")]
        fields: Option<Vec<Text>>,
    },
    /// Small print under the body
    Context {
        /// Text elements shown inline
        elements: Vec<Text>,
    },
    /// Horizontal rule
    Divider,
}

impl Block {
    fn header(text: impl Into<String>) -> Self {
        Self::Header {
            text: Text::plain(text),
        }
    }

    fn section(text: Text) -> Self {
        Self::Section {
            text: Some(text),
            fields: None,
        }
    }

    fn fields(fields: Vec<Text>) -> Self {
        Self::Section {
            text: None,
            fields: Some(fields),
        }
    }
}

/// Text object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Text {
    /// Rendering mode
    #[serde(rename = "type")]
    pub kind: TextKind,
    /// Content
    pub text: String,
}

impl Text {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            kind: TextKind::PlainText,
            text: text.into(),
        }
    }

    fn mrkdwn(text: impl Into<String>) -> Self {
        Self {
            kind: TextKind::Mrkdwn,
            text: text.into(),
        }
    }
}

/// How Slack renders a [`Text`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextKind {
    /// Literal text
    PlainText,
    /// Slack markdown
    Mrkdwn,
}

/// Emoji shown in the header
pub fn severity_emoji(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🚨",
        Severity::Warning => "⚠️",
        Severity::Info => "ℹ️",
        Severity::Normal => "✅",
    }
}

/// Sidebar colour
pub fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "#FF0000",
        Severity::Warning => "#FF9900",
        Severity::Info | Severity::Normal => "#36A64F",
    }
}

/// Follow-up actions suggested under an alert
pub fn recommendations(severity: Severity) -> &'static [&'static str] {
    match severity {
        Severity::Critical => &[
            "Immediately review high-cost services",
            "Consider stopping non-essential resources",
            "Set up billing alerts for real-time monitoring",
        ],
        Severity::Warning => &[
            "Review resource utilization",
            "Consider rightsizing instances",
            "Enable cost optimization recommendations",
        ],
        Severity::Info | Severity::Normal => &[
            "Costs are within normal range",
            "Consider setting up Reserved Instances for predictable workloads",
            "Review and optimize storage costs",
        ],
    }
}

fn money(currency: &str, amount: f64) -> String {
    format!("{currency} {amount:.2}")
}

fn field(label: &str, value: impl AsRef<str>) -> Text {
    Text::mrkdwn(format!("*{label}:*\n{}", value.as_ref()))
}

/// Render an alert event
pub fn render_alert(event: &AlertEvent, settings: &Settings) -> ChatMessage {
    let label = event.severity.as_str().to_uppercase();
    let emoji = severity_emoji(event.severity);
    let cur = settings.currency.as_str();

    let title = match event.scope {
        AlertScope::Global => format!("{emoji} {label}: AWS Cost Alert for {}", settings.project_name),
        _ => format!(
            "{emoji} {label}: {} alert for {} ({})",
            scope_title(event.scope),
            event.subject_label(),
            settings.project_name
        ),
    };

    let threshold_label = if event.scope == AlertScope::Anomaly {
        "Baseline"
    } else {
        "Threshold"
    };
    let period = match event.scope {
        AlertScope::Forecast => format!("next {} days", settings.forecast_days),
        _ => format!("last {} days", settings.monitoring_period_days),
    };

    let mut blocks = vec![
        Block::header(title.clone()),
        Block::section(Text::mrkdwn(event.message.clone())),
        Block::fields(vec![
            field("Current Cost", money(cur, event.current_amount)),
            field(threshold_label, money(cur, event.threshold_amount)),
            field("Period", period),
            field("Percentage", format!("{:.1}%", event.percent_of_threshold)),
        ]),
    ];

    if settings.enable_detailed_breakdown {
        if let Some(body) = breakdown(&event.breakdown, settings) {
            blocks.push(Block::Divider);
            blocks.push(Block::section(Text::mrkdwn(body)));
        }
    }

    let advice = recommendations(event.severity)
        .iter()
        .map(|r| format!("• {r}"))
        .collect::<Vec<_>>()
        .join("\n");
    blocks.push(Block::section(Text::mrkdwn(format!(
        "*Recommendations:*\n{advice}"
    ))));

    ChatMessage {
        text: format!(
            "{title}: {} of {} ({:.1}%)",
            money(cur, event.current_amount),
            money(cur, event.threshold_amount),
            event.percent_of_threshold
        ),
        color: Some(severity_color(event.severity).to_string()),
        blocks,
    }
}

fn scope_title(scope: AlertScope) -> &'static str {
    match scope {
        AlertScope::Global => "Cost",
        AlertScope::PerService => "Service cost",
        AlertScope::PerResource => "Resource cost",
        AlertScope::Anomaly => "Anomaly",
        AlertScope::Forecast => "Forecast",
    }
}

fn breakdown(services: &[ServiceAggregate], settings: &Settings) -> Option<String> {
    let lines: Vec<String> = services
        .iter()
        .filter(|s| s.amount > 0.0)
        .take(settings.max_services_in_alert)
        .map(|s| format!("• {}: {}", s.service, money(&settings.currency, s.amount)))
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(format!("*Top Services by Cost:*\n{}", lines.join("\n")))
    }
}

/// Daily-cost summary for the summary report
#[derive(Debug, Clone, PartialEq)]
pub struct CostSummary {
    /// Total over the summary window
    pub total: f64,
    /// Per-day totals, oldest first
    pub daily: Vec<DailyCost>,
    /// Services by cost, descending
    pub top_services: Vec<ServiceAggregate>,
}

impl CostSummary {
    /// Most recent day against the one before, as `(latest, previous)`
    pub fn last_two_days(&self) -> Option<(f64, f64)> {
        match self.daily.as_slice() {
            [.., previous, latest] => Some((latest.amount, previous.amount)),
            _ => None,
        }
    }
}

fn trend_line(summary: &CostSummary, currency: &str) -> Option<String> {
    let (latest, previous) = summary.last_two_days()?;
    let change = latest - previous;
    let emoji = if change > 0.0 {
        "📈"
    } else if change < 0.0 {
        "📉"
    } else {
        "➡️"
    };
    Some(format!(
        "{emoji} {sign}{} vs. yesterday",
        money(currency, change.abs()),
        sign = if change < 0.0 { "-" } else { "+" },
    ))
}

fn day_line(date: NaiveDate, amount: f64, currency: &str) -> String {
    format!("• {}: {}", date.format("%Y-%m-%d (%a)"), money(currency, amount))
}

/// Render the daily summary report
pub fn render_summary(summary: &CostSummary, settings: &Settings) -> ChatMessage {
    let cur = settings.currency.as_str();
    let title = format!("📊 Daily Cost Summary for {}", settings.project_name);

    let mut blocks = vec![
        Block::header(title.clone()),
        Block::fields(vec![
            field(
                &format!("Total ({} days)", summary.daily.len()),
                money(cur, summary.total),
            ),
            field("Threshold", money(cur, settings.cost_threshold)),
        ]),
    ];

    if let Some(trend) = trend_line(summary, cur) {
        blocks.push(Block::section(Text::mrkdwn(trend)));
    }

    let days: Vec<String> = summary
        .daily
        .iter()
        .rev()
        .take(7)
        .map(|d| day_line(d.date, d.amount, cur))
        .collect();
    if !days.is_empty() {
        blocks.push(Block::section(Text::mrkdwn(format!(
            "*Last 7 days:*\n{}",
            days.join("\n")
        ))));
    }

    if let Some(body) = breakdown(&summary.top_services, settings) {
        blocks.push(Block::Divider);
        blocks.push(Block::section(Text::mrkdwn(body)));
    }

    ChatMessage {
        text: format!("{title}: {}", money(cur, summary.total)),
        color: None,
        blocks,
    }
}

/// Message posted by the connection test
pub fn render_test_message(settings: &Settings) -> ChatMessage {
    ChatMessage::plain(format!(
        "✅ AWS Cost Monitor test successful for {}. Bot is ready to monitor costs!",
        settings.project_name
    ))
}

/// Best-effort notice posted when a run fails
pub fn render_error(settings: &Settings, error: &str) -> ChatMessage {
    let mut message = ChatMessage::plain(format!(
        "🚨 AWS Cost Monitor Error for {}\n```{error}```",
        settings.project_name
    ));
    message.color = Some(severity_color(Severity::Critical).to_string());
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn critical_event() -> AlertEvent {
        AlertEvent {
            severity: Severity::Critical,
            scope: AlertScope::Global,
            subject: None,
            current_amount: 120.0,
            threshold_amount: 100.0,
            percent_of_threshold: 120.0,
            message: "Total cost USD 120.00 exceeds threshold".to_string(),
            breakdown: (0..15)
                .map(|i| ServiceAggregate {
                    service: format!("svc-{i:02}"),
                    amount: 100.0 - f64::from(i),
                })
                .collect(),
        }
    }

    #[test]
    fn test_alert_header_carries_severity_and_project() {
        let message = render_alert(&critical_event(), &Settings::default());
        match &message.blocks[0] {
            Block::Header { text } => {
                assert_eq!(text.text, "🚨 CRITICAL: AWS Cost Alert for AWS Project")
            }
            other => panic!("expected header, got {other:?}"),
        }
        assert_eq!(message.color.as_deref(), Some("#FF0000"));
    }

    #[test]
    fn test_alert_fields() {
        let text = render_alert(&critical_event(), &Settings::default()).rendered_text();
        assert!(text.contains("*Current Cost:*\nUSD 120.00"));
        assert!(text.contains("*Threshold:*\nUSD 100.00"));
        assert!(text.contains("*Period:*\nlast 7 days"));
        assert!(text.contains("*Percentage:*\n120.0%"));
        assert!(text.contains("Immediately review high-cost services"));
    }

    #[test]
    fn test_breakdown_is_capped() {
        let settings = Settings {
            max_services_in_alert: 3,
            ..Settings::default()
        };
        let text = render_alert(&critical_event(), &settings).rendered_text();
        assert!(text.contains("svc-02"));
        assert!(!text.contains("svc-03"));
    }

    #[test]
    fn test_breakdown_disabled() {
        let settings = Settings {
            enable_detailed_breakdown: false,
            ..Settings::default()
        };
        let text = render_alert(&critical_event(), &settings).rendered_text();
        assert!(!text.contains("Top Services by Cost"));
    }

    #[test]
    fn test_block_serialization() {
        let json = serde_json::to_value(Block::header("hi")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "header", "text": {"type": "plain_text", "text": "hi"}})
        );
    }

    #[test]
    fn test_summary_trend_and_days() {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let daily: Vec<DailyCost> = (0..9)
            .map(|i| DailyCost {
                date: start + chrono::Duration::days(i),
                amount: 10.0 + i as f64,
            })
            .collect();
        let summary = CostSummary {
            total: daily.iter().map(|d| d.amount).sum(),
            daily,
            top_services: Vec::new(),
        };

        let text = render_summary(&summary, &Settings::default()).rendered_text();
        assert!(text.contains("📈 +USD 1.00 vs. yesterday"));
        assert!(text.contains("2024-03-09"));
        assert!(text.contains("2024-03-03"));
        assert!(!text.contains("2024-03-02"));
    }

    #[test]
    fn test_error_notice() {
        let message = render_error(&Settings::default(), "boom");
        assert!(message.text.starts_with("🚨 AWS Cost Monitor Error for AWS Project"));
    }
}
