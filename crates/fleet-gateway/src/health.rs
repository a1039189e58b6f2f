//! Dependency health aggregation feeding `/health/ready` and
//! `/health/ready/detail`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleet_common::{ComponentHealth, HealthStatus};
use fleet_cycle::LMClient;
use fleet_inventory::InventoryClient;
use fleet_insights::InsightStore;

/// `/health/ready` is probed frequently by external load balancers; cache
/// the aggregate for 30s so a probe storm never hammers every dependency.
const READINESS_CACHE_TTL: Duration = Duration::from_secs(30);

/// Runs and caches the `appDb`/`metricsDb`/`portainer`/`ollama` dependency
/// checks behind a stale-while-revalidate cache. `redis` is omitted: this
/// deployment has no L2 cache backend configured, matching the optional
/// `redis?` entry in the documented check set.
pub struct HealthChecker {
    cache: Arc<fleet_cache::SwrCache>,
    insights: Arc<InsightStore>,
    metrics_reader: Arc<dyn fleet_cycle::MetricsReader>,
    inventory: Arc<InventoryClient>,
    lm_client: Arc<dyn LMClient>,
}

impl HealthChecker {
    pub fn new(
        cache: Arc<fleet_cache::SwrCache>,
        insights: Arc<InsightStore>,
        metrics_reader: Arc<dyn fleet_cycle::MetricsReader>,
        inventory: Arc<InventoryClient>,
        lm_client: Arc<dyn LMClient>,
    ) -> Self {
        Self {
            cache,
            insights,
            metrics_reader,
            inventory,
            lm_client,
        }
    }

    /// The full aggregate, including `url`/`error` per check. Callers
    /// serving the redacted `/health/ready` route must map each entry
    /// through [`fleet_common::ComponentHealth::redacted`] themselves.
    pub async fn readiness(&self) -> Arc<HealthStatus> {
        let insights = self.insights.clone();
        let metrics_reader = self.metrics_reader.clone();
        let inventory = self.inventory.clone();
        let lm_client = self.lm_client.clone();

        self.cache
            .cached_fetch_swr("health:ready", READINESS_CACHE_TTL, move || async move {
                Ok::<HealthStatus, fleet_common::Error>(Self::check_all(insights, metrics_reader, inventory, lm_client).await)
            })
            .await
            .unwrap_or_else(|_| Arc::new(HealthStatus::from_checks(HashMap::new())))
    }

    async fn check_all(
        insights: Arc<InsightStore>,
        metrics_reader: Arc<dyn fleet_cycle::MetricsReader>,
        inventory: Arc<InventoryClient>,
        lm_client: Arc<dyn LMClient>,
    ) -> HealthStatus {
        let mut checks = HashMap::new();

        let now = Utc::now();
        checks.insert(
            "appDb".to_string(),
            if insights.ping().await {
                ComponentHealth::healthy(now)
            } else {
                ComponentHealth::unhealthy("insights store", "ping failed", now)
            },
        );

        let metrics_ok = metrics_reader.get_latest_metrics_batch(&[]).await.is_ok();
        checks.insert(
            "metricsDb".to_string(),
            if metrics_ok {
                ComponentHealth::healthy(now)
            } else {
                ComponentHealth::unhealthy("metrics store", "query failed", now)
            },
        );

        checks.insert(
            "portainer".to_string(),
            if inventory.health_check().await {
                ComponentHealth::healthy(now)
            } else {
                ComponentHealth::unhealthy("inventory API", "health check failed", now)
            },
        );

        // Absence of an optional LM backend is a `DependencyUnavailable`
        // (see fleet_common::Error), not a hard failure: it downgrades the
        // aggregate to `degraded`, it never flips it to `unhealthy`.
        checks.insert(
            "ollama".to_string(),
            if lm_client.is_available() {
                ComponentHealth::healthy(now)
            } else {
                ComponentHealth::degraded("ollama", "no LM backend configured", now)
            },
        );

        HealthStatus::from_checks(checks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    #[test]
    fn unreachable_checks_aggregate_to_unhealthy_overall() {
        let mut checks = Map::new();
        checks.insert("appDb".to_string(), ComponentHealth::unhealthy("db", "down", Utc::now()));
        let status = HealthStatus::from_checks(checks);
        assert_eq!(status.overall, fleet_common::HealthLevel::Unhealthy);
    }
}
