//! Fifteen-phase monitoring cycle orchestrator.
//!
//! Runs on a fixed interval in the background, fanning out across every
//! reachable endpoint and container to detect anomalies, derive insights,
//! and correlate them into incidents. Generalizes the predecessor's
//! `PipelineGuard`/`HealthMonitor`/`AlertManager` trio into a single
//! orchestrator built against the capability interfaces in `capability`,
//! so it depends only on abstractions rather than on the concrete
//! security/AI/notification crates directly.

pub mod capability;
pub mod cooldown;
pub mod metrics_reader;
pub mod orchestrator;

pub use capability::{
    ActionSuggester, CapacityForecast, CapacityForecaster, Correlator, DefaultActionSuggester, DefaultSecurityScanner,
    Explanation, Investigator, LMClient, NotifyAdapter, Notifier, NullCapacityForecaster, NullInvestigator, NullLmClient,
    SecurityFinding, SecurityScanner, SuggestedAction, TemporalCorrelator, Trend,
};
pub use cooldown::{CooldownKey, CooldownMap};
pub use metrics_reader::{select_rollup_table, MetricsBatch, MetricsReader, SqlMetricsReader};
pub use orchestrator::{CycleConfig, CycleDependencies, CycleSummary, MonitoringCycle};
