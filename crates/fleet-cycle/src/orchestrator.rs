//! The fifteen-phase monitoring cycle orchestrator.
//!
//! Generalizes the predecessor's `PipelineGuard`: a single background task
//! spawned in `new()`, looping on `tokio::time::interval`, aborted by
//! `Drop` rather than a cooperative shutdown signal. Reentrancy is
//! skip-if-running rather than queued, so a slow upstream never grows an
//! unbounded backlog of pending ticks.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fleet_common::config::{AiConfig, AnomalyConfig, InsightsConfig, PredictiveConfig};
use fleet_common::{
    ContainerId, DetectionMethod, Endpoint, Error, Insight, MetricType, MonitoringCycleRecord, Result, Severity,
    SnapshotCounters,
};
use fleet_detector::{AnomalyDetector, BatchDetectionItem, DetectorConfig};
use fleet_events::{DomainEvent, EventBus, WebsocketHub};
use fleet_insights::InsightStore;
use fleet_inventory::InventoryClient;
use fleet_remediation::RemediationEngine;

use crate::capability::{ActionSuggester, CapacityForecaster, Correlator, Investigator, LMClient, Notifier, SecurityScanner, SuggestedAction, Trend};
use crate::cooldown::CooldownMap;
use crate::metrics_reader::MetricsReader;

const SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);
const ANOMALY_METRICS: [MetricType; 2] = [MetricType::Cpu, MetricType::Memory];

/// Every collaborator the orchestrator needs, expressed as capability
/// interfaces (see `capability.rs`) plus the three concrete crates
/// (`fleet-inventory`, `fleet-insights`, `fleet-events`) that have no
/// cyclic dependency on this one and so need no abstraction.
pub struct CycleDependencies {
    pub inventory: Arc<InventoryClient>,
    pub insights: Arc<InsightStore>,
    pub events: EventBus,
    pub hub: Arc<WebsocketHub>,
    pub remediation: Arc<RemediationEngine>,
    pub metrics_reader: Arc<dyn MetricsReader>,
    pub security_scanner: Arc<dyn SecurityScanner>,
    pub capacity_forecaster: Arc<dyn CapacityForecaster>,
    pub investigator: Arc<dyn Investigator>,
    pub action_suggester: Arc<dyn ActionSuggester>,
    pub correlator: Arc<dyn Correlator>,
    pub lm_client: Arc<dyn LMClient>,
    pub notifier: Arc<dyn Notifier>,
}

/// Tuning the cycle reads from `fleet_common::Config` at startup. Not
/// hot-reloaded: a config change takes effect on the next process restart,
/// matching how the rest of this workspace treats `Config`.
#[derive(Debug, Clone)]
pub struct CycleConfig {
    pub anomaly: AnomalyConfig,
    pub predictive: PredictiveConfig,
    pub ai: AiConfig,
    pub insights: InsightsConfig,
    pub max_fanout_workers: usize,
}

impl CycleConfig {
    pub fn from_config(config: &fleet_common::Config) -> Self {
        Self {
            anomaly: config.anomaly,
            predictive: config.predictive,
            ai: config.ai,
            insights: config.insights,
            max_fanout_workers: 64,
        }
    }
}

/// Outcome of one cycle run, returned to `run_cycle_now()` callers (e.g.
/// an HTTP-triggered manual run) and used to drive delta-based logging.
#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    pub skipped: bool,
    pub duration_ms: i64,
    pub counters: SnapshotCounters,
    pub total_insights: u32,
    pub incidents_created: u32,
    pub suggested_actions: Vec<SuggestedAction>,
}

struct Inner {
    deps: CycleDependencies,
    detector: AnomalyDetector,
    config: CycleConfig,
    cooldowns: CooldownMap,
    running: AtomicBool,
}

/// Owns the background cycle-ticker and cooldown-sweeper tasks. Dropping
/// this value aborts both.
pub struct MonitoringCycle {
    inner: Arc<Inner>,
    cycle_handle: JoinHandle<()>,
    sweep_handle: JoinHandle<()>,
}

impl MonitoringCycle {
    pub fn new(deps: CycleDependencies, config: CycleConfig) -> Self {
        let detector = AnomalyDetector::new(DetectorConfig::from(config.anomaly));
        let inner = Arc::new(Inner {
            deps,
            detector,
            config,
            cooldowns: CooldownMap::new(),
            running: AtomicBool::new(false),
        });

        let cycle_inner = inner.clone();
        let tick_interval = Duration::from_secs(inner.config.insights.cycle_interval_seconds.max(1));
        let cycle_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = run_cycle(&cycle_inner).await {
                    warn!(error = %e, "monitoring cycle run failed");
                }
            }
        });

        let sweep_inner = inner.clone();
        let sweep_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let evicted = sweep_inner.cooldowns.sweep(sweep_inner.config.anomaly.cooldown_minutes);
                if evicted > 0 {
                    debug!(evicted, "swept expired anomaly cooldowns");
                }
            }
        });

        Self {
            inner,
            cycle_handle,
            sweep_handle,
        }
    }

    /// Manual trigger, used by both the background ticker and an
    /// operator-initiated HTTP request. Skip-if-running applies equally to
    /// both callers: a manual trigger while a tick is already in flight is
    /// a no-op, not a queued second run.
    pub async fn run_cycle_now(&self) -> Result<CycleSummary> {
        run_cycle(&self.inner).await
    }
}

impl Drop for MonitoringCycle {
    fn drop(&mut self) {
        self.cycle_handle.abort();
        self.sweep_handle.abort();
    }
}

/// RAII guard resetting the reentrancy flag on every exit path, including
/// an early `?`-propagated error.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn run_cycle(inner: &Arc<Inner>) -> Result<CycleSummary> {
    if inner.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
        debug!("monitoring cycle already running, skipping this tick");
        return Ok(CycleSummary {
            skipped: true,
            ..Default::default()
        });
    }
    let _guard = RunningGuard(&inner.running);

    let started_at = Utc::now();
    let deadline = Instant::now() + Duration::from_secs(inner.config.insights.cycle_deadline_seconds.max(1));

    let mut counters = SnapshotCounters::default();
    let mut all_insights: Vec<Insight> = Vec::new();
    let mut incidents_created = 0u32;
    let mut suggested_actions = Vec::new();

    // --- Phase 1: snapshot fetch -------------------------------------
    let endpoints = inner.deps.inventory.get_endpoints().await.unwrap_or_else(|e| {
        warn!(error = %e, "failed to fetch endpoints, treating as empty for this cycle");
        Arc::new(Vec::new())
    });

    let mut active_endpoints: Vec<&Endpoint> = Vec::new();
    for endpoint in endpoints.iter() {
        match endpoint.status {
            fleet_common::EndpointStatus::Up => counters.endpoints_up += 1,
            fleet_common::EndpointStatus::Down => counters.endpoints_down += 1,
        }

        if inner.deps.inventory.is_circuit_open(endpoint.id) || inner.deps.inventory.is_endpoint_degraded(endpoint.id) {
            counters.skipped_circuit_breaker += 1;
            continue;
        }
        active_endpoints.push(endpoint);
    }

    let worker_pool = inner.config.max_fanout_workers.min(active_endpoints.len().max(1));
    let fetch_results: Vec<(EndpointRef, Result<Vec<fleet_common::Container>>)> = stream::iter(active_endpoints.iter().map(|e| (e.id, e.name.clone(), e.capabilities)))
        .map(|(endpoint_id, endpoint_name, capabilities)| {
            let inventory = inner.deps.inventory.clone();
            async move {
                let result = inventory.get_containers(endpoint_id, &endpoint_name).await;
                (EndpointRef { id: endpoint_id, name: endpoint_name, capabilities }, result)
            }
        })
        .buffer_unordered(worker_pool)
        .collect()
        .await;

    let mut containers: Vec<fleet_common::Container> = Vec::new();
    let mut live_stats_container_ids: Vec<ContainerId> = Vec::new();
    for (endpoint_ref, result) in &fetch_results {
        match result {
            Ok(fetched) => {
                for container in fetched {
                    match container.state {
                        fleet_common::ContainerState::Running => counters.containers_running += 1,
                        fleet_common::ContainerState::Stopped | fleet_common::ContainerState::Dead => counters.containers_stopped += 1,
                        _ => {}
                    }
                    if container.health_status.as_deref() == Some("unhealthy") {
                        counters.containers_unhealthy += 1;
                    }
                    if endpoint_ref.capabilities.live_stats && container.state == fleet_common::ContainerState::Running {
                        live_stats_container_ids.push(container.id.clone());
                    }
                    containers.push(container.clone());
                }
            }
            Err(Error::CircuitOpen { .. }) => {
                counters.skipped_circuit_breaker += 1;
            }
            Err(e) => {
                warn!(endpoint_id = endpoint_ref.id, error = %e, "failed to fetch containers for endpoint");
                counters.container_fetch_failures += 1;
            }
        }
    }

    // --- Phase 2: metrics read ----------------------------------------
    let metrics_batch = if past_deadline(deadline) {
        HashMap::new()
    } else {
        inner
            .deps
            .metrics_reader
            .get_latest_metrics_batch(&live_stats_container_ids)
            .await
            .unwrap_or_default()
    };

    // --- Phase 3: security scan -----------------------------------------
    let mut security_findings: Vec<(fleet_common::Container, crate::capability::SecurityFinding)> = Vec::new();
    if !past_deadline(deadline) {
        for container in &containers {
            for finding in inner.deps.security_scanner.scan_container(container) {
                security_findings.push((container.clone(), finding));
            }
        }
    }

    // --- Phase 4: statistical anomaly detection (batched) --------------
    let mut flagged_keys: HashSet<String> = HashSet::new();
    let mut flagged_containers: HashSet<ContainerId> = HashSet::new();
    let baseline_window = chrono::Duration::hours(inner.config.anomaly.moving_average_window.max(1) as i64);

    if !past_deadline(deadline) {
        let mut items = Vec::new();
        for container in &containers {
            if let Some(values) = metrics_batch.get(&container.id) {
                for metric_type in ANOMALY_METRICS {
                    if let Some(&value) = values.get(&metric_type) {
                        if let Some(stats) = inner
                            .deps
                            .metrics_reader
                            .get_moving_average(&container.id, metric_type, baseline_window)
                            .await
                            .unwrap_or(None)
                        {
                            items.push(BatchDetectionItem {
                                container_id: container.id.clone(),
                                metric_type,
                                current_value: value,
                                stats,
                            });
                        }
                    }
                }
            }
        }

        let method = inner.config.anomaly.detection_method;
        let verdicts = inner.detector.detect_batch(&items, method);
        for (key, verdict) in &verdicts {
            if !verdict.is_anomalous {
                continue;
            }
            flagged_keys.insert(key.clone());
            if let Some((container_id, metric_type)) = split_key(key) {
                flagged_containers.insert(container_id.clone());
                if inner.cooldowns.check_and_set(key, inner.config.anomaly.cooldown_minutes) {
                    continue;
                }
                let container = containers.iter().find(|c| c.id == container_id);
                all_insights.push(anomaly_insight(container, &container_id, metric_type, verdict, method));
            }
        }
    }

    // --- Phase 5: threshold pass -----------------------------------------
    if !past_deadline(deadline) && inner.config.anomaly.hard_threshold_enabled {
        for container in &containers {
            let Some(values) = metrics_batch.get(&container.id) else { continue };
            for (metric_type, &value) in values {
                let base_key = format!("{}:{}", container.id, metric_type);
                if flagged_keys.contains(&base_key) {
                    continue;
                }
                if !inner.detector.evaluate_threshold(value).is_anomalous {
                    continue;
                }
                let key = format!("{base_key}:threshold");
                if inner.cooldowns.check_and_set(&key, inner.config.anomaly.cooldown_minutes) {
                    continue;
                }
                let severity = if value > 95.0 { Severity::Critical } else { Severity::Warning };
                all_insights.push(Insight {
                    id: Uuid::new_v4(),
                    endpoint_id: Some(container.endpoint_id),
                    endpoint_name: Some(container.endpoint_name.clone()),
                    container_id: Some(container.id.clone()),
                    container_name: Some(container.name.clone()),
                    severity,
                    category: "anomaly".to_string(),
                    title: format!("{metric_type} above hard threshold on {}", container.name),
                    description: format!(
                        "{} is {value:.1} on {metric_type}, above the configured {:.1} threshold",
                        container.name, inner.config.anomaly.threshold_pct
                    ),
                    suggested_action: None,
                    created_at: Utc::now(),
                    is_acknowledged: false,
                });
                flagged_containers.insert(container.id.clone());
            }
        }
    }

    // --- Phase 6: multivariate pass (optional) ---------------------------
    if !past_deadline(deadline) && inner.config.anomaly.isolation_forest_enabled {
        for container in &containers {
            if flagged_containers.contains(&container.id) {
                continue;
            }
            let Some(values) = metrics_batch.get(&container.id) else { continue };
            let (Some(&cpu), Some(&mem)) = (values.get(&MetricType::Cpu), values.get(&MetricType::Memory)) else {
                continue;
            };
            let (Some(cpu_stats), Some(mem_stats)) = (
                inner
                    .deps
                    .metrics_reader
                    .get_moving_average(&container.id, MetricType::Cpu, baseline_window)
                    .await
                    .unwrap_or(None),
                inner
                    .deps
                    .metrics_reader
                    .get_moving_average(&container.id, MetricType::Memory, baseline_window)
                    .await
                    .unwrap_or(None),
            ) else {
                continue;
            };

            let verdict = inner.detector.evaluate_isolation_forest(cpu, cpu_stats, mem, mem_stats);
            if verdict.is_anomalous {
                all_insights.push(Insight {
                    id: Uuid::new_v4(),
                    endpoint_id: Some(container.endpoint_id),
                    endpoint_name: Some(container.endpoint_name.clone()),
                    container_id: Some(container.id.clone()),
                    container_name: Some(container.name.clone()),
                    severity: Severity::Warning,
                    category: "anomaly".to_string(),
                    title: format!("Joint resource deviation on {}", container.name),
                    description: format!(
                        "{} shows a combined cpu/memory deviation score of {:.2} (isolation-forest)",
                        container.name, verdict.z_score
                    ),
                    suggested_action: None,
                    created_at: Utc::now(),
                    is_acknowledged: false,
                });
                flagged_containers.insert(container.id.clone());
            }
        }
    }

    // --- Phase 7: predictive alerting (optional) --------------------------
    if !past_deadline(deadline) && inner.config.predictive.enabled {
        for forecast in inner.deps.capacity_forecaster.recent_forecasts().await {
            if forecast.trend != Trend::Increasing {
                continue;
            }
            if forecast.time_to_threshold_hours > inner.config.predictive.alert_threshold_hours {
                continue;
            }
            if forecast.confidence == fleet_common::CorrelationConfidence::Low {
                continue;
            }
            let severity = if forecast.time_to_threshold_hours < 4.0 {
                Severity::Critical
            } else if forecast.time_to_threshold_hours < 12.0 {
                Severity::Warning
            } else {
                Severity::Info
            };
            all_insights.push(Insight {
                id: Uuid::new_v4(),
                endpoint_id: None,
                endpoint_name: None,
                container_id: Some(forecast.container_id.clone()),
                container_name: Some(forecast.container_name.clone()),
                severity,
                category: "predictive".to_string(),
                title: format!("{} trending toward {} exhaustion", forecast.container_name, forecast.metric_type),
                description: format!(
                    "{} is projected to cross its {} threshold in {:.1}h",
                    forecast.container_name, forecast.metric_type, forecast.time_to_threshold_hours
                ),
                suggested_action: None,
                created_at: Utc::now(),
                is_acknowledged: false,
            });
        }
    }

    // --- Phase 8: anomaly explanation (optional) --------------------------
    if !past_deadline(deadline) && inner.config.ai.anomaly_explanation_enabled && inner.deps.lm_client.is_available() {
        let anomaly_insights: Vec<Insight> = all_insights.iter().filter(|i| i.category == "anomaly").cloned().collect();
        if !anomaly_insights.is_empty() {
            let explanations = inner
                .deps
                .lm_client
                .explain_anomalies(&anomaly_insights, inner.config.ai.anomaly_explanation_max_per_cycle)
                .await;
            let by_id: HashMap<Uuid, String> = explanations.into_iter().collect();
            for insight in all_insights.iter_mut() {
                if let Some(text) = by_id.get(&insight.id) {
                    insight.description = format!("{}\n\nAI Analysis: {}", insight.description, text);
                }
            }
        }
    }

    // --- Phase 9: log analysis (optional) ----------------------------------
    if !past_deadline(deadline) && inner.config.ai.nlp_log_analysis_enabled && inner.deps.lm_client.is_available() {
        let log_insights = inner
            .deps
            .lm_client
            .analyze_logs(&containers, inner.config.ai.nlp_log_analysis_max_per_cycle, inner.config.ai.nlp_log_analysis_tail_lines)
            .await;
        all_insights.extend(log_insights);
    }

    // --- Phase 10: security-derived insights -------------------------------
    for (container, finding) in &security_findings {
        all_insights.push(Insight {
            id: Uuid::new_v4(),
            endpoint_id: Some(container.endpoint_id),
            endpoint_name: Some(container.endpoint_name.clone()),
            container_id: Some(container.id.clone()),
            container_name: Some(container.name.clone()),
            severity: finding.severity,
            category: format!("security:{}", finding.category),
            title: finding.title.clone(),
            description: finding.description.clone(),
            suggested_action: None,
            created_at: Utc::now(),
            is_acknowledged: false,
        });
    }

    // --- Phase 11: asynchronous AI infra analysis (fire-and-forget) -------
    if inner.config.ai.ai_analysis_enabled && inner.deps.lm_client.is_available() {
        let lm_client = inner.deps.lm_client.clone();
        let insights_store = inner.deps.insights.clone();
        let hub = inner.deps.hub.clone();
        let events = inner.deps.events.clone();
        let endpoints_count = active_endpoints.len();
        let containers_count = containers.len();
        tokio::spawn(async move {
            let context = format!("{endpoints_count} endpoints, {containers_count} containers under observation");
            match lm_client.infra_chat(&context).await {
                Ok(summary) => {
                    let insight = Insight {
                        id: Uuid::new_v4(),
                        endpoint_id: None,
                        endpoint_name: None,
                        container_id: None,
                        container_name: None,
                        severity: Severity::Info,
                        category: "ai-analysis".to_string(),
                        title: "Infrastructure analysis".to_string(),
                        description: summary,
                        suggested_action: None,
                        created_at: Utc::now(),
                        is_acknowledged: false,
                    };
                    match insights_store.insert_insight(&insight).await {
                        Ok(()) => {
                            hub.broadcast_insight(&insight);
                            events.emit(DomainEvent::InsightCreated { insight: Box::new(insight) });
                        }
                        Err(e) => warn!(error = %e, "failed to persist ai-analysis insight"),
                    }
                }
                Err(e) => warn!(error = %e, "infra chat analysis failed"),
            }
        });
    }

    // --- Phase 12: cap, persist, broadcast ---------------------------------
    let max_insights = inner.config.insights.max_insights_per_cycle as usize;
    if all_insights.len() > max_insights {
        debug!(dropped = all_insights.len() - max_insights, "truncating insights to the configured per-cycle cap");
        all_insights.truncate(max_insights);
    }

    let inserted_ids = if all_insights.is_empty() {
        HashSet::new()
    } else {
        inner.deps.insights.insert_insights(&all_insights).await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to persist insight batch for this cycle");
            HashSet::new()
        })
    };

    // --- Phase 13: broadcast + post-processing -----------------------------
    if !all_insights.is_empty() {
        inner.deps.hub.broadcast_insights_batch(&all_insights);
        for insight in &all_insights {
            inner.deps.hub.broadcast_insight(insight);
        }
    }

    for insight in &all_insights {
        let event = if insight.category == "anomaly" {
            DomainEvent::AnomalyDetected {
                insight: Box::new(insight.clone()),
            }
        } else {
            DomainEvent::InsightCreated {
                insight: Box::new(insight.clone()),
            }
        };
        inner.deps.events.emit(event);

        if matches!(insight.severity, Severity::Critical | Severity::Warning) {
            let notifier = inner.deps.notifier.clone();
            let insight_for_task = insight.clone();
            tokio::spawn(async move {
                notifier.notify_insight(&insight_for_task).await;
            });
        }

        let is_inserted = inserted_ids.contains(&insight.id);
        let warrants_investigation =
            insight.category == "anomaly" || (insight.category == "predictive" && insight.severity != Severity::Info);
        if is_inserted && warrants_investigation {
            let investigator = inner.deps.investigator.clone();
            let insight_for_task = insight.clone();
            tokio::spawn(async move {
                investigator.investigate(&insight_for_task).await;
            });
        }

        if let Some(action_type) = inner.deps.action_suggester.suggest_action(insight) {
            suggested_actions.push(SuggestedAction {
                insight_id: insight.id,
                action_type,
            });
        }
    }

    // --- Phase 14: correlation -----------------------------------------------
    let inserted_insights: Vec<Insight> = all_insights.iter().filter(|i| inserted_ids.contains(&i.id)).cloned().collect();
    if !inserted_insights.is_empty() {
        let incidents = inner.deps.correlator.correlate(&inserted_insights);
        incidents_created = incidents.len() as u32;
        for incident in &incidents {
            match inner.deps.insights.insert_incident(incident).await {
                Ok(()) => inner.deps.events.emit(DomainEvent::IncidentCreated {
                    incident: Box::new(incident.clone()),
                }),
                Err(e) => warn!(error = %e, "failed to persist correlated incident"),
            }
        }
        if incidents_created > 0 {
            info!(incidents_created, "correlated insights into incidents this cycle");
        }
    }

    // --- Phase 15: finalization (always runs) ---------------------------------
    let duration_ms = (Utc::now() - started_at).num_milliseconds();
    let total_insights = inserted_ids.len() as u32;

    let previous = inner.deps.insights.get_previous_cycle_counters().await.unwrap_or(None);
    log_delta(&counters, previous.as_ref());

    let record = MonitoringCycleRecord {
        id: Uuid::new_v4(),
        started_at,
        duration_ms,
        counters,
        total_insights,
    };
    if let Err(e) = inner.deps.insights.insert_cycle_record(&record).await {
        warn!(error = %e, "failed to persist monitoring cycle record");
    }

    inner
        .deps
        .hub
        .broadcast_cycle_complete(duration_ms, active_endpoints.len() as u32, containers.len() as u32, total_insights);

    Ok(CycleSummary {
        skipped: false,
        duration_ms,
        counters,
        total_insights,
        incidents_created,
        suggested_actions,
    })
}

struct EndpointRef {
    id: fleet_common::EndpointId,
    name: String,
    capabilities: fleet_common::EndpointCapabilities,
}

fn past_deadline(deadline: Instant) -> bool {
    Instant::now() >= deadline
}

fn split_key(key: &str) -> Option<(ContainerId, MetricType)> {
    let (container_id, metric) = key.rsplit_once(':')?;
    let metric_type = match metric {
        "cpu" => MetricType::Cpu,
        "memory" => MetricType::Memory,
        "memory_bytes" => MetricType::MemoryBytes,
        "network_rx" => MetricType::NetworkRx,
        "network_tx" => MetricType::NetworkTx,
        _ => return None,
    };
    Some((container_id.to_string(), metric_type))
}

fn anomaly_insight(
    container: Option<&fleet_common::Container>,
    container_id: &ContainerId,
    metric_type: MetricType,
    verdict: &fleet_common::AnomalyVerdict,
    method: DetectionMethod,
) -> Insight {
    let name = container.map(|c| c.name.as_str()).unwrap_or(container_id.as_str());
    let distance = if verdict.z_score.is_finite() {
        verdict.z_score.abs()
    } else {
        f64::INFINITY
    };
    let severity = if distance > 4.0 { Severity::Critical } else { Severity::Warning };

    Insight {
        id: Uuid::new_v4(),
        endpoint_id: container.map(|c| c.endpoint_id),
        endpoint_name: container.map(|c| c.endpoint_name.clone()),
        container_id: Some(container_id.clone()),
        container_name: Some(name.to_string()),
        severity,
        category: "anomaly".to_string(),
        title: format!("{metric_type} anomaly on {name}"),
        description: format!(
            "{name} {metric_type} is {:.1} (mean {:.1}, {distance:.1}\u{3c3} from baseline, z-score {:.2}, method {method})",
            verdict.current_value, verdict.mean, verdict.z_score
        ),
        suggested_action: None,
        created_at: Utc::now(),
        is_acknowledged: false,
    }
}

fn log_delta(current: &SnapshotCounters, previous: Option<&SnapshotCounters>) {
    let Some(previous) = previous else {
        info!(?current, "first monitoring cycle completed, no previous counters to diff against");
        return;
    };

    let changed = [
        counter_changed(previous.containers_running, current.containers_running),
        counter_changed(previous.containers_stopped, current.containers_stopped),
        counter_changed(previous.containers_unhealthy, current.containers_unhealthy),
        counter_changed(previous.endpoints_up, current.endpoints_up),
        counter_changed(previous.endpoints_down, current.endpoints_down),
        counter_changed(previous.skipped_circuit_breaker, current.skipped_circuit_breaker),
        counter_changed(previous.container_fetch_failures, current.container_fetch_failures),
    ]
    .into_iter()
    .any(|changed| changed);

    if changed {
        info!(?current, ?previous, "monitoring cycle counters shifted by more than 10% since the previous cycle");
    } else {
        debug!(?current, "monitoring cycle counters stable since the previous cycle");
    }
}

/// A counter "changed" if it moved by more than 10%, or went from zero to
/// a positive value (a 0->N change has no finite percentage, so it is
/// always treated as a change when N > 0).
fn counter_changed(previous: u32, current: u32) -> bool {
    if previous == 0 {
        return current > 0;
    }
    let delta = (current as f64 - previous as f64).abs() / previous as f64;
    delta > 0.10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_to_positive_counter_always_counts_as_changed() {
        assert!(counter_changed(0, 1));
        assert!(!counter_changed(0, 0));
    }

    #[test]
    fn small_changes_under_ten_percent_do_not_count() {
        assert!(!counter_changed(100, 105));
        assert!(counter_changed(100, 115));
    }

    #[test]
    fn split_key_recovers_container_and_metric() {
        let (container_id, metric_type) = split_key("abc123:cpu").unwrap();
        assert_eq!(container_id, "abc123");
        assert_eq!(metric_type, MetricType::Cpu);
    }

    #[test]
    fn split_key_rejects_unknown_metric_suffix() {
        assert!(split_key("abc123:bogus").is_none());
    }
}
