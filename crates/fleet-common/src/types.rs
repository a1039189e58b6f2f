//! Domain types shared across the fleet observability service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Identifier for an inventory endpoint (a managed Docker/Swarm/Kubernetes host).
pub type EndpointId = i64;

/// Identifier for a container, as assigned by the upstream inventory API.
pub type ContainerId = String;

/// Endpoint status as reported by the upstream inventory API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    Up,
    Down,
}

/// Capabilities an endpoint advertises; edge endpoints may lack some of these.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EndpointCapabilities {
    pub live_stats: bool,
    pub realtime_logs: bool,
    pub exec: bool,
}

/// A normalized inventory endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    pub name: String,
    pub status: EndpointStatus,
    pub capabilities: EndpointCapabilities,
    pub containers_running: u32,
    pub containers_stopped: u32,
    pub containers_healthy: u32,
    pub containers_unhealthy: u32,
    pub stack_count: u32,
}

/// Container lifecycle state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Running,
    Stopped,
    Paused,
    Dead,
    Unknown,
}

/// A normalized container, projected from a raw inventory API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub endpoint_id: EndpointId,
    pub endpoint_name: String,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub labels: HashMap<String, String>,
    pub ports: Vec<PortMapping>,
    pub networks: Vec<String>,
    pub health_status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortMapping {
    pub private_port: u16,
    pub public_port: Option<u16>,
    pub protocol: String,
}

/// A metric kind tracked by the anomaly pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Cpu,
    Memory,
    MemoryBytes,
    NetworkRx,
    NetworkTx,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Cpu => "cpu",
            MetricType::Memory => "memory",
            MetricType::MemoryBytes => "memory_bytes",
            MetricType::NetworkRx => "network_rx",
            MetricType::NetworkTx => "network_tx",
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single metric observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub endpoint_id: EndpointId,
    pub container_id: ContainerId,
    pub container_name: String,
    pub metric_type: MetricType,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Summary statistics over a moving window of metric samples.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MovingAverageStats {
    pub mean: f64,
    pub std_dev: f64,
    pub sample_count: u32,
}

/// The detection method that produced an `AnomalyVerdict`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionMethod {
    Zscore,
    Bollinger,
    Adaptive,
    IsolationForest,
    Threshold,
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DetectionMethod::Zscore => "zscore",
            DetectionMethod::Bollinger => "bollinger",
            DetectionMethod::Adaptive => "adaptive",
            DetectionMethod::IsolationForest => "isolation-forest",
            DetectionMethod::Threshold => "threshold",
        };
        write!(f, "{}", s)
    }
}

/// Result of evaluating a single (container, metric) pair for anomalies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub is_anomalous: bool,
    pub z_score: f64,
    pub mean: f64,
    pub current_value: f64,
    pub method: DetectionMethod,
}

/// Severity levels shared by insights and notifications.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn room(&self) -> &'static str {
        match self {
            Severity::Critical => "severity:critical",
            Severity::Warning => "severity:warning",
            Severity::Info => "severity:info",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        write!(f, "{}", s)
    }
}

/// A human-readable finding produced during a monitoring cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: Uuid,
    pub endpoint_id: Option<EndpointId>,
    pub endpoint_name: Option<String>,
    pub container_id: Option<ContainerId>,
    pub container_name: Option<String>,
    pub severity: Severity,
    pub category: String,
    pub title: String,
    pub description: String,
    pub suggested_action: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_acknowledged: bool,
}

/// How an incident's member insights were determined to be related.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationType {
    Temporal,
    Cascade,
    Semantic,
    Dedup,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationConfidence {
    Low,
    Medium,
    High,
}

/// A group of related insights with a designated root cause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub title: String,
    pub severity: Severity,
    pub root_cause_insight_id: Uuid,
    pub related_insight_ids: Vec<Uuid>,
    pub affected_containers: Vec<ContainerId>,
    pub correlation_type: CorrelationType,
    pub correlation_confidence: CorrelationConfidence,
    pub insight_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Remediation action type, mapped to an inventory operation by the executor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    RestartContainer,
    StopContainer,
    StartContainer,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionType::RestartContainer => "RESTART_CONTAINER",
            ActionType::StopContainer => "STOP_CONTAINER",
            ActionType::StartContainer => "START_CONTAINER",
        };
        write!(f, "{}", s)
    }
}

/// Remediation action lifecycle status. See `fleet_remediation` for the transition table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Approved,
    Rejected,
    Executing,
    Completed,
    Failed,
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Approved => "approved",
            ActionStatus::Rejected => "rejected",
            ActionStatus::Executing => "executing",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A remediation action row, as persisted and mutated through its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub insight_id: Option<Uuid>,
    pub endpoint_id: EndpointId,
    pub container_id: ContainerId,
    pub container_name: String,
    pub action_type: ActionType,
    pub rationale: String,
    pub status: ActionStatus,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_result: Option<String>,
    pub execution_duration_ms: Option<i64>,
}

/// Counters accumulated during a single monitoring cycle, persisted as a snapshot row.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SnapshotCounters {
    pub containers_running: u32,
    pub containers_stopped: u32,
    pub containers_unhealthy: u32,
    pub endpoints_up: u32,
    pub endpoints_down: u32,
    pub skipped_circuit_breaker: u32,
    pub container_fetch_failures: u32,
}

/// A persisted record of a completed monitoring cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringCycleRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub counters: SnapshotCounters,
    pub total_insights: u32,
}

/// Notification delivery channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Teams,
    Email,
    Discord,
    Telegram,
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotificationChannel::Teams => "teams",
            NotificationChannel::Email => "email",
            NotificationChannel::Discord => "discord",
            NotificationChannel::Telegram => "telegram",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a single notification delivery attempt, written to `notification_log`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}
