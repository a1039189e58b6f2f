//! Capability interfaces the orchestrator depends on instead of concrete
//! crates, breaking the ai-intelligence/security/operations/observability
//! cycle the predecessor's modules formed. Each trait ships a default
//! implementation usable out of the box; a deployment with a real security
//! scanner, capacity forecaster, or LM-backed investigator swaps its own in.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use fleet_common::{
    Action, ActionType, Container, CorrelationConfidence, CorrelationType, Incident, Insight, Severity,
};

/// One finding from a point-in-time scan of a container's descriptor.
#[derive(Debug, Clone)]
pub struct SecurityFinding {
    pub severity: Severity,
    pub category: String,
    pub title: String,
    pub description: String,
}

/// Pure, synchronous security scan over a container's already-fetched
/// descriptor. No network calls: everything it needs travels with `raw`.
pub trait SecurityScanner: Send + Sync {
    fn scan_container(&self, container: &Container) -> Vec<SecurityFinding>;
}

const ADMIN_PORTS: &[u16] = &[22, 3389, 2375, 2376];

/// Heuristic scanner over labels, image tag, and exposed ports. Grounded on
/// the same private/reserved-destination classification idiom used for
/// outbound webhook validation, applied here to inbound exposure instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSecurityScanner;

impl SecurityScanner for DefaultSecurityScanner {
    fn scan_container(&self, container: &Container) -> Vec<SecurityFinding> {
        let mut findings = Vec::new();

        if container.image.ends_with(":latest") || !container.image.contains(':') {
            findings.push(SecurityFinding {
                severity: Severity::Warning,
                category: "image".to_string(),
                title: "Unpinned image tag".to_string(),
                description: format!("container {} runs image {} without a pinned version tag", container.name, container.image),
            });
        }

        if container
            .labels
            .get("privileged")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
        {
            findings.push(SecurityFinding {
                severity: Severity::Critical,
                category: "privileged".to_string(),
                title: "Privileged container".to_string(),
                description: format!("container {} is labeled privileged=true", container.name),
            });
        }

        for port in &container.ports {
            if port.public_port.is_some() && ADMIN_PORTS.contains(&port.private_port) {
                findings.push(SecurityFinding {
                    severity: Severity::Critical,
                    category: "exposed_port".to_string(),
                    title: "Administrative port exposed publicly".to_string(),
                    description: format!(
                        "container {} publishes port {} ({}) to the host",
                        container.name, port.private_port, port.protocol
                    ),
                });
            }
        }

        findings
    }
}

/// Trend direction for a capacity forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Increasing,
    Stable,
    Decreasing,
}

/// A point-in-time prediction that a container will cross a resource
/// threshold within `time_to_threshold_hours`.
#[derive(Debug, Clone)]
pub struct CapacityForecast {
    pub container_id: String,
    pub container_name: String,
    pub metric_type: fleet_common::MetricType,
    pub trend: Trend,
    pub time_to_threshold_hours: f64,
    pub confidence: CorrelationConfidence,
}

#[async_trait]
pub trait CapacityForecaster: Send + Sync {
    async fn recent_forecasts(&self) -> Vec<CapacityForecast>;
}

/// No forecasting model is wired up; predictive alerting is disabled by
/// default (`PredictiveConfig::enabled`), so this never runs in practice.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCapacityForecaster;

#[async_trait]
impl CapacityForecaster for NullCapacityForecaster {
    async fn recent_forecasts(&self) -> Vec<CapacityForecast> {
        Vec::new()
    }
}

/// Asynchronous, best-effort deep-dive triggered for a subset of insights.
/// Failures must never fail the cycle: callers log and move on.
#[async_trait]
pub trait Investigator: Send + Sync {
    async fn investigate(&self, insight: &Insight);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullInvestigator;

#[async_trait]
impl Investigator for NullInvestigator {
    async fn investigate(&self, insight: &Insight) {
        debug!(insight_id = %insight.id, "no investigator configured, skipping");
    }
}

/// Maps an insight to a suggested remediation action, if any.
pub trait ActionSuggester: Send + Sync {
    fn suggest_action(&self, insight: &Insight) -> Option<ActionType>;
}

/// Suggests a container restart for critical anomaly insights carrying a
/// container id. Every other insight shape is left to operator judgement.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultActionSuggester;

impl ActionSuggester for DefaultActionSuggester {
    fn suggest_action(&self, insight: &Insight) -> Option<ActionType> {
        if insight.category == "anomaly" && insight.severity == Severity::Critical && insight.container_id.is_some() {
            Some(ActionType::RestartContainer)
        } else {
            None
        }
    }
}

/// Groups a batch of insights into incidents.
pub trait Correlator: Send + Sync {
    fn correlate(&self, insights: &[Insight]) -> Vec<Incident>;
}

/// Temporal correlation: insights sharing a container id within the same
/// batch are treated as one incident, rooted at the most severe member.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemporalCorrelator;

impl Correlator for TemporalCorrelator {
    fn correlate(&self, insights: &[Insight]) -> Vec<Incident> {
        use std::collections::HashMap;

        let mut by_container: HashMap<String, Vec<&Insight>> = HashMap::new();
        for insight in insights {
            if let Some(container_id) = &insight.container_id {
                by_container.entry(container_id.clone()).or_default().push(insight);
            }
        }

        by_container
            .into_iter()
            .filter(|(_, group)| group.len() >= 2)
            .map(|(container_id, mut group)| {
                group.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.created_at.cmp(&b.created_at)));
                let root = group[0];
                let confidence = if group.len() >= 3 {
                    CorrelationConfidence::High
                } else {
                    CorrelationConfidence::Medium
                };

                Incident {
                    id: Uuid::new_v4(),
                    title: format!("{} related findings on container {}", group.len(), container_id),
                    severity: root.severity,
                    root_cause_insight_id: root.id,
                    related_insight_ids: group.iter().map(|i| i.id).collect(),
                    affected_containers: vec![container_id],
                    correlation_type: CorrelationType::Temporal,
                    correlation_confidence: confidence,
                    insight_count: group.len() as u32,
                    created_at: Utc::now(),
                }
            })
            .collect()
    }
}

/// A single explained insight: its id paired with the generated explanation
/// text appended as `"AI Analysis: <text>"`.
pub type Explanation = (Uuid, String);

/// Language-model-backed capabilities: anomaly explanation, log analysis,
/// and the async infra-wide chat summary. Gated by `is_available()` so the
/// orchestrator never calls into an absent or disabled LM integration.
#[async_trait]
pub trait LMClient: Send + Sync {
    fn is_available(&self) -> bool;
    async fn explain_anomalies(&self, insights: &[Insight], max_per_cycle: u32) -> Vec<Explanation>;
    async fn analyze_logs(&self, containers: &[Container], max_per_cycle: u32, tail_lines: u32) -> Vec<Insight>;
    async fn infra_chat(&self, context: &str) -> anyhow::Result<String>;
}

/// No LM backend is configured; every gate (`ai_analysis_enabled`,
/// `anomaly_explanation_enabled`, `nlp_log_analysis_enabled`) defaults to
/// `false`, so `is_available()` returning `false` is sufficient to keep
/// phases 8/9/11 inert.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLmClient;

#[async_trait]
impl LMClient for NullLmClient {
    fn is_available(&self) -> bool {
        false
    }

    async fn explain_anomalies(&self, _insights: &[Insight], _max_per_cycle: u32) -> Vec<Explanation> {
        Vec::new()
    }

    async fn analyze_logs(&self, _containers: &[Container], _max_per_cycle: u32, _tail_lines: u32) -> Vec<Insight> {
        Vec::new()
    }

    async fn infra_chat(&self, _context: &str) -> anyhow::Result<String> {
        Err(anyhow::anyhow!("no LM client configured"))
    }
}

/// Fire-and-forget notification dispatch keyed off an insight, abstracting
/// over `fleet_notify::Notifier`'s channel/SSRF/cooldown machinery so the
/// orchestrator never depends on it directly.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_insight(&self, insight: &Insight);
}

/// Adapts `fleet_notify::Notifier` to the orchestrator's narrower contract.
pub struct NotifyAdapter {
    inner: Arc<fleet_notify::Notifier>,
}

impl NotifyAdapter {
    pub fn new(inner: Arc<fleet_notify::Notifier>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Notifier for NotifyAdapter {
    async fn notify_insight(&self, insight: &Insight) {
        let request = fleet_notify::NotificationRequest {
            event_type: &insight.category,
            title: &insight.title,
            body: &insight.description,
            severity: insight.severity,
            container_id: insight.container_id.as_deref(),
            container_name: insight.container_name.as_deref(),
            endpoint_id: insight.endpoint_id,
        };
        let _ = self.inner.dispatch(request, &fleet_notify::ChannelOverrides::default()).await;
    }
}

/// Telemetry record of an action suggestion, independent of whether it was
/// ever created through `fleet_remediation`.
#[derive(Debug, Clone)]
pub struct SuggestedAction {
    pub insight_id: Uuid,
    pub action_type: ActionType,
}

impl SuggestedAction {
    pub fn from_action(action: &Action) -> Self {
        Self {
            insight_id: action.insight_id.unwrap_or(action.id),
            action_type: action.action_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn insight(category: &str, severity: Severity, container_id: Option<&str>) -> Insight {
        Insight {
            id: Uuid::new_v4(),
            endpoint_id: Some(1),
            endpoint_name: Some("prod-1".to_string()),
            container_id: container_id.map(String::from),
            container_name: container_id.map(String::from),
            severity,
            category: category.to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            suggested_action: None,
            created_at: Utc::now(),
            is_acknowledged: false,
        }
    }

    #[test]
    fn unpinned_image_tag_is_flagged() {
        let container = fleet_common::Container {
            id: "abc".to_string(),
            endpoint_id: 1,
            endpoint_name: "prod-1".to_string(),
            name: "web".to_string(),
            image: "nginx".to_string(),
            state: fleet_common::ContainerState::Running,
            labels: Default::default(),
            ports: Vec::new(),
            networks: Vec::new(),
            health_status: None,
        };
        let findings = DefaultSecurityScanner.scan_container(&container);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].category, "image");
    }

    #[test]
    fn exposed_admin_port_is_critical() {
        let mut container = fleet_common::Container {
            id: "abc".to_string(),
            endpoint_id: 1,
            endpoint_name: "prod-1".to_string(),
            name: "web".to_string(),
            image: "nginx:1.25".to_string(),
            state: fleet_common::ContainerState::Running,
            labels: Default::default(),
            ports: Vec::new(),
            networks: Vec::new(),
            health_status: None,
        };
        container.ports.push(fleet_common::PortMapping {
            private_port: 22,
            public_port: Some(2222),
            protocol: "tcp".to_string(),
        });
        let findings = DefaultSecurityScanner.scan_container(&container);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn action_suggester_restarts_only_critical_anomalies_with_a_container() {
        let suggester = DefaultActionSuggester;
        assert_eq!(
            suggester.suggest_action(&insight("anomaly", Severity::Critical, Some("abc"))),
            Some(ActionType::RestartContainer)
        );
        assert_eq!(suggester.suggest_action(&insight("anomaly", Severity::Warning, Some("abc"))), None);
        assert_eq!(suggester.suggest_action(&insight("anomaly", Severity::Critical, None)), None);
    }

    #[test]
    fn correlator_groups_insights_sharing_a_container() {
        let insights = vec![
            insight("anomaly", Severity::Warning, Some("abc")),
            insight("anomaly", Severity::Critical, Some("abc")),
            insight("anomaly", Severity::Warning, Some("def")),
        ];
        let incidents = TemporalCorrelator.correlate(&insights);
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].insight_count, 2);
        assert_eq!(incidents[0].severity, Severity::Critical);
    }

    #[test]
    fn correlator_skips_containers_with_a_single_insight() {
        let insights = vec![insight("anomaly", Severity::Warning, Some("abc"))];
        assert!(TemporalCorrelator.correlate(&insights).is_empty());
    }
}
