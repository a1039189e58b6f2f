//! Composition root: wires every crate in the workspace into one running
//! service.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use fleet_cache::SwrCache;
use fleet_common::{Config, Error, Result};
use fleet_cycle::{
    capability::{
        DefaultActionSuggester, DefaultSecurityScanner, NotifyAdapter, NullCapacityForecaster, NullInvestigator,
        NullLmClient, TemporalCorrelator,
    },
    CycleConfig, CycleDependencies, MonitoringCycle, SqlMetricsReader,
};
use fleet_events::{EventBus, WebsocketHub};
use fleet_insights::InsightStore;
use fleet_inventory::InventoryClient;
use fleet_notify::Notifier as ChannelNotifier;
use fleet_remediation::RemediationEngine;

use crate::health::HealthChecker;

/// Environment-sourced connection strings that fall outside
/// [`fleet_common::Config`]'s scope, mirroring how the reference gateway's
/// `mcp-gateway` binary reads its storage DSNs straight from the process
/// environment rather than the layered config tree.
struct ConnectionStrings {
    database_url: String,
    metrics_database_url: String,
    inventory_base_url: String,
    inventory_api_token: Option<String>,
    admin_api_token: Option<String>,
}

impl ConnectionStrings {
    fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| Error::Configuration("DATABASE_URL must be set".to_string()))?;
        let metrics_database_url = std::env::var("METRICS_DATABASE_URL")
            .map_err(|_| Error::Configuration("METRICS_DATABASE_URL must be set".to_string()))?;
        let inventory_base_url = std::env::var("INVENTORY_BASE_URL")
            .map_err(|_| Error::Configuration("INVENTORY_BASE_URL must be set".to_string()))?;
        Ok(Self {
            database_url,
            metrics_database_url,
            inventory_base_url,
            inventory_api_token: std::env::var("INVENTORY_API_TOKEN").ok(),
            admin_api_token: std::env::var("ADMIN_API_TOKEN").ok(),
        })
    }
}

/// Every live service the HTTP layer and the monitoring cycle share.
pub struct Gateway {
    config: Config,
    started_at: DateTime<Utc>,
    admin_api_token: Option<String>,
    pub inventory: Arc<InventoryClient>,
    pub insights: Arc<InsightStore>,
    pub events: EventBus,
    pub hub: Arc<WebsocketHub>,
    pub remediation: Arc<RemediationEngine>,
    pub health: HealthChecker,
    // Held only to keep the background cycle loop and sweeper alive for
    // the process lifetime; `run_cycle_now` also serves the force-check path.
    cycle: Arc<MonitoringCycle>,
}

impl Gateway {
    pub async fn new(config: Config) -> Result<Self> {
        info!("initializing fleet gateway");
        let conn = ConnectionStrings::from_env()?;

        let cache = SwrCache::new(
            None,
            Duration::from_millis(config.cache.l2_failure_backoff_base_ms),
            Duration::from_millis(config.cache.l2_failure_backoff_max_ms),
        );
        let circuits = fleet_common::CircuitBreakerRegistry::new(config.circuit_breaker.into());

        let inventory = Arc::new(InventoryClient::new(
            conn.inventory_base_url,
            conn.inventory_api_token,
            cache.clone(),
            circuits,
            Duration::from_secs(config.cache.endpoints_ttl_seconds),
            Duration::from_secs(config.cache.containers_ttl_seconds),
        )?);

        let insights = InsightStore::connect(&conn.database_url).await?;
        let metrics_reader: Arc<dyn fleet_cycle::MetricsReader> =
            Arc::new(SqlMetricsReader::connect(&conn.metrics_database_url).await?);

        let events = EventBus::new(256);
        let hub = WebsocketHub::new();
        let remediation = RemediationEngine::new(events.clone(), hub.clone(), inventory.clone());

        let channel_notifier = ChannelNotifier::new(config.notifications.clone());
        let lm_client = Arc::new(NullLmClient);

        let health = HealthChecker::new(
            cache,
            insights.clone(),
            metrics_reader.clone(),
            inventory.clone(),
            lm_client.clone(),
        );

        let cycle_deps = CycleDependencies {
            inventory: inventory.clone(),
            insights: insights.clone(),
            events: events.clone(),
            hub: hub.clone(),
            remediation: remediation.clone(),
            metrics_reader,
            security_scanner: Arc::new(DefaultSecurityScanner),
            capacity_forecaster: Arc::new(NullCapacityForecaster),
            investigator: Arc::new(NullInvestigator),
            action_suggester: Arc::new(DefaultActionSuggester),
            correlator: Arc::new(TemporalCorrelator),
            lm_client,
            notifier: Arc::new(NotifyAdapter::new(channel_notifier)),
        };
        let cycle_config = CycleConfig::from_config(&config);
        let cycle = Arc::new(MonitoringCycle::new(cycle_deps, cycle_config));

        info!("fleet gateway initialized");

        Ok(Self {
            config,
            started_at: Utc::now(),
            admin_api_token: conn.admin_api_token,
            inventory,
            insights,
            events,
            hub,
            remediation,
            health,
            cycle,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// `None` means the detail route is open to any caller; this mirrors
    /// the reference gateway's own default-permissive posture on routes
    /// that have no configured credential.
    pub fn authorize_admin(&self, bearer_token: Option<&str>) -> bool {
        match &self.admin_api_token {
            Some(expected) => bearer_token == Some(expected.as_str()),
            None => true,
        }
    }

    pub async fn run_cycle_now(&self) -> Result<fleet_cycle::CycleSummary> {
        self.cycle.run_cycle_now().await
    }
}
