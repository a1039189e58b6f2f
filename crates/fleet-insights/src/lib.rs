//! Transactional, deduplicating insight and incident store.
//!
//! Generalizes the predecessor's `PersistentQueue` (embedded storage,
//! explicit stats, `AtomicU64` sequencing, a `health_check()` reporting
//! capacity pressure) from an offline request queue into a relational
//! store: the dedup + atomic-commit semantics insights need are
//! transactional-batch-insert shaped, not queue shaped, so this crate
//! swaps `sled` for `sqlx` against SQLite.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use uuid::Uuid;

use fleet_common::{
    CorrelationConfidence, CorrelationType, Error, Incident, Insight, MonitoringCycleRecord, Result,
    Severity, SnapshotCounters,
};

const CREATE_INSIGHTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS insights (
    id TEXT PRIMARY KEY,
    endpoint_id INTEGER,
    endpoint_name TEXT,
    container_id TEXT,
    container_name TEXT,
    severity TEXT NOT NULL,
    category TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    suggested_action TEXT,
    created_at TEXT NOT NULL,
    is_acknowledged INTEGER NOT NULL DEFAULT 0,
    dedup_key TEXT NOT NULL UNIQUE
)
"#;

const CREATE_INCIDENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS incidents (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    severity TEXT NOT NULL,
    root_cause_insight_id TEXT NOT NULL,
    related_insight_ids TEXT NOT NULL,
    affected_containers TEXT NOT NULL,
    correlation_type TEXT NOT NULL,
    correlation_confidence TEXT NOT NULL,
    insight_count INTEGER NOT NULL,
    created_at TEXT NOT NULL
)
"#;

const CREATE_MONITORING_CYCLES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS monitoring_cycles (
    id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    counters TEXT NOT NULL,
    total_insights INTEGER NOT NULL
)
"#;

/// Single-row table holding the most recently completed cycle's counters,
/// read back at the start of the next cycle to compute the delta used for
/// threshold-based logging. Separate from `monitoring_cycles`, which keeps
/// the full history.
const CREATE_MONITORING_SNAPSHOTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS monitoring_snapshots (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    counters TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// Running counters, mirroring the predecessor's `QueueStats` shape.
#[derive(Debug, Default)]
pub struct InsightStoreStats {
    pub total_inserted: AtomicU64,
    pub total_deduplicated: AtomicU64,
}

/// SQLite-backed insight and incident store.
pub struct InsightStore {
    pool: SqlitePool,
    stats: InsightStoreStats,
}

impl InsightStore {
    /// Opens (creating if absent) the SQLite database at `database_url`
    /// (e.g. `sqlite://fleet.db` or `sqlite::memory:`) and ensures the
    /// schema exists.
    pub async fn connect(database_url: &str) -> Result<Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("connecting to insight store: {e}")))?;

        sqlx::query(CREATE_INSIGHTS_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("creating insights table: {e}")))?;
        sqlx::query(CREATE_INCIDENTS_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("creating incidents table: {e}")))?;
        sqlx::query(CREATE_MONITORING_CYCLES_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("creating monitoring_cycles table: {e}")))?;
        sqlx::query(CREATE_MONITORING_SNAPSHOTS_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("creating monitoring_snapshots table: {e}")))?;

        Ok(Arc::new(Self {
            pool,
            stats: InsightStoreStats::default(),
        }))
    }

    /// Deduplication key: stable across repeated cycles reporting the same
    /// condition within the same minute.
    fn dedup_key(insight: &Insight) -> String {
        let bucket = insight.created_at.format("%Y-%m-%dT%H:%M");
        let title_prefix: String = insight.title.chars().take(40).collect();
        format!(
            "{}:{}:{}:{}",
            insight.category,
            insight.container_id.as_deref().unwrap_or(""),
            title_prefix,
            bucket
        )
    }

    /// Single-row upsert; silently a no-op if the row is a duplicate.
    pub async fn insert_insight(&self, insight: &Insight) -> Result<()> {
        self.insert_insights(std::slice::from_ref(insight)).await?;
        Ok(())
    }

    /// Transactional batch insert. Rows rejected by the dedup key are not
    /// members of the returned set; any failure aborts and rolls back the
    /// whole batch.
    pub async fn insert_insights(&self, insights: &[Insight]) -> Result<HashSet<Uuid>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("beginning insight batch transaction: {e}")))?;

        let mut inserted = HashSet::new();

        for insight in insights {
            let dedup_key = Self::dedup_key(insight);
            let row = sqlx::query(
                r#"
                INSERT INTO insights (
                    id, endpoint_id, endpoint_name, container_id, container_name,
                    severity, category, title, description, suggested_action,
                    created_at, is_acknowledged, dedup_key
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(dedup_key) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(insight.id.to_string())
            .bind(insight.endpoint_id)
            .bind(&insight.endpoint_name)
            .bind(&insight.container_id)
            .bind(&insight.container_name)
            .bind(insight.severity.to_string())
            .bind(&insight.category)
            .bind(&insight.title)
            .bind(&insight.description)
            .bind(&insight.suggested_action)
            .bind(insight.created_at.to_rfc3339())
            .bind(insight.is_acknowledged as i64)
            .bind(&dedup_key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("inserting insight {}: {e}", insight.id)))?;

            match row {
                Some(_) => {
                    inserted.insert(insight.id);
                    self.stats.total_inserted.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    self.stats.total_deduplicated.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("committing insight batch: {e}")))?;

        Ok(inserted)
    }

    /// Every insight created within the last `minutes` minutes, newest first.
    pub async fn get_recent_insights(&self, minutes: i64) -> Result<Vec<Insight>> {
        let since = (Utc::now() - chrono::Duration::minutes(minutes)).to_rfc3339();
        let rows = sqlx::query(
            "SELECT id, endpoint_id, endpoint_name, container_id, container_name, severity, category, \
             title, description, suggested_action, created_at, is_acknowledged \
             FROM insights WHERE created_at >= ? ORDER BY created_at DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::DependencyUnavailable(format!("reading recent insights: {e}")))?;

        rows.iter().map(row_to_insight).collect()
    }

    /// Persists a correlated incident, JSONB-native-array fields included.
    pub async fn insert_incident(&self, incident: &Incident) -> Result<()> {
        let related_ids: Vec<String> = incident.related_insight_ids.iter().map(|id| id.to_string()).collect();

        sqlx::query(
            r#"
            INSERT INTO incidents (
                id, title, severity, root_cause_insight_id, related_insight_ids,
                affected_containers, correlation_type, correlation_confidence,
                insight_count, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(incident.id.to_string())
        .bind(&incident.title)
        .bind(incident.severity.to_string())
        .bind(incident.root_cause_insight_id.to_string())
        .bind(serde_json::to_string(&related_ids).map_err(Error::from)?)
        .bind(serde_json::to_string(&incident.affected_containers).map_err(Error::from)?)
        .bind(correlation_type_str(incident.correlation_type))
        .bind(correlation_confidence_str(incident.correlation_confidence))
        .bind(incident.insight_count)
        .bind(incident.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::DependencyUnavailable(format!("inserting incident {}: {e}", incident.id)))?;

        Ok(())
    }

    /// Incidents created within the last `minutes` minutes, newest first,
    /// with array columns round-tripped as native sequences.
    pub async fn get_recent_incidents(&self, minutes: i64) -> Result<Vec<Incident>> {
        let since = (Utc::now() - chrono::Duration::minutes(minutes)).to_rfc3339();
        let rows = sqlx::query(
            "SELECT id, title, severity, root_cause_insight_id, related_insight_ids, \
             affected_containers, correlation_type, correlation_confidence, insight_count, created_at \
             FROM incidents WHERE created_at >= ? ORDER BY created_at DESC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::DependencyUnavailable(format!("reading recent incidents: {e}")))?;

        rows.iter().map(row_to_incident).collect()
    }

    /// Persists a completed cycle's history row and upserts the single-row
    /// `monitoring_snapshots` counters used to compute the next cycle's
    /// delta-based log level. Both writes happen in one transaction so a
    /// reader never observes a history row without the matching snapshot.
    pub async fn insert_cycle_record(&self, record: &MonitoringCycleRecord) -> Result<()> {
        let counters_json = serde_json::to_string(&record.counters).map_err(Error::from)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("beginning cycle record transaction: {e}")))?;

        sqlx::query(
            "INSERT INTO monitoring_cycles (id, started_at, duration_ms, counters, total_insights) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.started_at.to_rfc3339())
        .bind(record.duration_ms)
        .bind(&counters_json)
        .bind(record.total_insights)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::DependencyUnavailable(format!("inserting monitoring cycle {}: {e}", record.id)))?;

        sqlx::query(
            "INSERT INTO monitoring_snapshots (id, counters, updated_at) VALUES (1, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET counters = excluded.counters, updated_at = excluded.updated_at",
        )
        .bind(&counters_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::DependencyUnavailable(format!("updating monitoring snapshot: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("committing cycle record: {e}")))?;

        Ok(())
    }

    /// The previous cycle's counters, if any cycle has ever completed.
    /// `None` on the very first cycle, which the caller treats as "every
    /// counter went from zero" for delta-logging purposes.
    pub async fn get_previous_cycle_counters(&self) -> Result<Option<SnapshotCounters>> {
        let row = sqlx::query("SELECT counters FROM monitoring_snapshots WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("reading monitoring snapshot: {e}")))?;

        match row {
            Some(row) => {
                let counters_json: String = row.try_get("counters").map_err(|e| Error::Internal(e.into()))?;
                let counters = serde_json::from_str(&counters_json).map_err(Error::from)?;
                Ok(Some(counters))
            }
            None => Ok(None),
        }
    }

    /// Cycle history, newest first, capped at `limit` rows.
    pub async fn get_recent_cycles(&self, limit: i64) -> Result<Vec<MonitoringCycleRecord>> {
        let rows = sqlx::query(
            "SELECT id, started_at, duration_ms, counters, total_insights \
             FROM monitoring_cycles ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::DependencyUnavailable(format!("reading recent cycles: {e}")))?;

        rows.iter().map(row_to_cycle_record).collect()
    }

    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    pub fn stats(&self) -> (u64, u64) {
        (
            self.stats.total_inserted.load(Ordering::Relaxed),
            self.stats.total_deduplicated.load(Ordering::Relaxed),
        )
    }
}

fn row_to_insight(row: &sqlx::sqlite::SqliteRow) -> Result<Insight> {
    let id: String = row.try_get("id").map_err(|e| Error::Internal(e.into()))?;
    let created_at: String = row.try_get("created_at").map_err(|e| Error::Internal(e.into()))?;
    let severity: String = row.try_get("severity").map_err(|e| Error::Internal(e.into()))?;
    let is_acknowledged: i64 = row.try_get("is_acknowledged").map_err(|e| Error::Internal(e.into()))?;

    Ok(Insight {
        id: Uuid::from_str(&id).map_err(|e| Error::Internal(e.into()))?,
        endpoint_id: row.try_get("endpoint_id").map_err(|e| Error::Internal(e.into()))?,
        endpoint_name: row.try_get("endpoint_name").map_err(|e| Error::Internal(e.into()))?,
        container_id: row.try_get("container_id").map_err(|e| Error::Internal(e.into()))?,
        container_name: row.try_get("container_name").map_err(|e| Error::Internal(e.into()))?,
        severity: parse_severity(&severity)?,
        category: row.try_get("category").map_err(|e| Error::Internal(e.into()))?,
        title: row.try_get("title").map_err(|e| Error::Internal(e.into()))?,
        description: row.try_get("description").map_err(|e| Error::Internal(e.into()))?,
        suggested_action: row.try_get("suggested_action").map_err(|e| Error::Internal(e.into()))?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| Error::Internal(e.into()))?
            .with_timezone(&Utc),
        is_acknowledged: is_acknowledged != 0,
    })
}

fn row_to_incident(row: &sqlx::sqlite::SqliteRow) -> Result<Incident> {
    let id: String = row.try_get("id").map_err(|e| Error::Internal(e.into()))?;
    let root_cause_insight_id: String = row.try_get("root_cause_insight_id").map_err(|e| Error::Internal(e.into()))?;
    let related_insight_ids: String = row.try_get("related_insight_ids").map_err(|e| Error::Internal(e.into()))?;
    let affected_containers: String = row.try_get("affected_containers").map_err(|e| Error::Internal(e.into()))?;
    let severity: String = row.try_get("severity").map_err(|e| Error::Internal(e.into()))?;
    let correlation_type: String = row.try_get("correlation_type").map_err(|e| Error::Internal(e.into()))?;
    let correlation_confidence: String =
        row.try_get("correlation_confidence").map_err(|e| Error::Internal(e.into()))?;
    let created_at: String = row.try_get("created_at").map_err(|e| Error::Internal(e.into()))?;

    let related_ids: Vec<String> = serde_json::from_str(&related_insight_ids).map_err(Error::from)?;
    let related_insight_ids = related_ids
        .iter()
        .map(|s| Uuid::from_str(s).map_err(|e| Error::Internal(e.into())))
        .collect::<Result<Vec<_>>>()?;

    Ok(Incident {
        id: Uuid::from_str(&id).map_err(|e| Error::Internal(e.into()))?,
        title: row.try_get("title").map_err(|e| Error::Internal(e.into()))?,
        severity: parse_severity(&severity)?,
        root_cause_insight_id: Uuid::from_str(&root_cause_insight_id).map_err(|e| Error::Internal(e.into()))?,
        related_insight_ids,
        affected_containers: serde_json::from_str(&affected_containers).map_err(Error::from)?,
        correlation_type: parse_correlation_type(&correlation_type)?,
        correlation_confidence: parse_correlation_confidence(&correlation_confidence)?,
        insight_count: row.try_get::<i64, _>("insight_count").map_err(|e| Error::Internal(e.into()))? as u32,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| Error::Internal(e.into()))?
            .with_timezone(&Utc),
    })
}

fn row_to_cycle_record(row: &sqlx::sqlite::SqliteRow) -> Result<MonitoringCycleRecord> {
    let id: String = row.try_get("id").map_err(|e| Error::Internal(e.into()))?;
    let started_at: String = row.try_get("started_at").map_err(|e| Error::Internal(e.into()))?;
    let counters_json: String = row.try_get("counters").map_err(|e| Error::Internal(e.into()))?;

    Ok(MonitoringCycleRecord {
        id: Uuid::from_str(&id).map_err(|e| Error::Internal(e.into()))?,
        started_at: DateTime::parse_from_rfc3339(&started_at)
            .map_err(|e| Error::Internal(e.into()))?
            .with_timezone(&Utc),
        duration_ms: row.try_get("duration_ms").map_err(|e| Error::Internal(e.into()))?,
        counters: serde_json::from_str(&counters_json).map_err(Error::from)?,
        total_insights: row.try_get::<i64, _>("total_insights").map_err(|e| Error::Internal(e.into()))? as u32,
    })
}

fn parse_severity(s: &str) -> Result<Severity> {
    match s {
        "critical" => Ok(Severity::Critical),
        "warning" => Ok(Severity::Warning),
        "info" => Ok(Severity::Info),
        other => Err(Error::Internal(anyhow::anyhow!("unknown severity in store: {other}"))),
    }
}

fn correlation_type_str(t: CorrelationType) -> &'static str {
    match t {
        CorrelationType::Temporal => "temporal",
        CorrelationType::Cascade => "cascade",
        CorrelationType::Semantic => "semantic",
        CorrelationType::Dedup => "dedup",
    }
}

fn parse_correlation_type(s: &str) -> Result<CorrelationType> {
    match s {
        "temporal" => Ok(CorrelationType::Temporal),
        "cascade" => Ok(CorrelationType::Cascade),
        "semantic" => Ok(CorrelationType::Semantic),
        "dedup" => Ok(CorrelationType::Dedup),
        other => Err(Error::Internal(anyhow::anyhow!("unknown correlation type in store: {other}"))),
    }
}

fn correlation_confidence_str(c: CorrelationConfidence) -> &'static str {
    match c {
        CorrelationConfidence::Low => "low",
        CorrelationConfidence::Medium => "medium",
        CorrelationConfidence::High => "high",
    }
}

fn parse_correlation_confidence(s: &str) -> Result<CorrelationConfidence> {
    match s {
        "low" => Ok(CorrelationConfidence::Low),
        "medium" => Ok(CorrelationConfidence::Medium),
        "high" => Ok(CorrelationConfidence::High),
        other => Err(Error::Internal(anyhow::anyhow!("unknown correlation confidence in store: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_insight(category: &str, title: &str) -> Insight {
        Insight {
            id: Uuid::new_v4(),
            endpoint_id: Some(1),
            endpoint_name: Some("prod-1".to_string()),
            container_id: Some("abc123".to_string()),
            container_name: Some("web".to_string()),
            severity: Severity::Warning,
            category: category.to_string(),
            title: title.to_string(),
            description: "cpu spike".to_string(),
            suggested_action: None,
            created_at: Utc::now(),
            is_acknowledged: false,
        }
    }

    #[tokio::test]
    async fn insert_and_read_back_recent_insights() {
        let store = InsightStore::connect("sqlite::memory:").await.unwrap();
        let insight = sample_insight("anomaly", "CPU spike on web");
        let inserted = store.insert_insights(&[insight.clone()]).await.unwrap();
        assert!(inserted.contains(&insight.id));

        let recent = store.get_recent_insights(60).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].title, "CPU spike on web");
    }

    #[tokio::test]
    async fn duplicate_dedup_key_is_rejected_from_the_committed_set() {
        let store = InsightStore::connect("sqlite::memory:").await.unwrap();
        let mut first = sample_insight("anomaly", "CPU spike on web");
        first.created_at = Utc::now();
        let mut second = first.clone();
        second.id = Uuid::new_v4();

        let inserted = store.insert_insights(&[first.clone(), second.clone()]).await.unwrap();
        assert_eq!(inserted.len(), 1);
        assert!(inserted.contains(&first.id));
        assert!(!inserted.contains(&second.id));

        let (total_inserted, total_deduplicated) = store.stats();
        assert_eq!(total_inserted, 1);
        assert_eq!(total_deduplicated, 1);
    }

    #[tokio::test]
    async fn incident_array_columns_round_trip_as_native_sequences() {
        let store = InsightStore::connect("sqlite::memory:").await.unwrap();
        let root = Uuid::new_v4();
        let related = vec![Uuid::new_v4(), Uuid::new_v4()];
        let incident = Incident {
            id: Uuid::new_v4(),
            title: "cascading restarts on prod-1".to_string(),
            severity: Severity::Critical,
            root_cause_insight_id: root,
            related_insight_ids: related.clone(),
            affected_containers: vec!["web".to_string(), "worker".to_string()],
            correlation_type: CorrelationType::Cascade,
            correlation_confidence: CorrelationConfidence::High,
            insight_count: 3,
            created_at: Utc::now(),
        };
        store.insert_incident(&incident).await.unwrap();

        let recent = store.get_recent_incidents(60).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].related_insight_ids, related);
        assert_eq!(recent[0].affected_containers, vec!["web".to_string(), "worker".to_string()]);
    }

    #[tokio::test]
    async fn ping_succeeds_against_an_open_pool() {
        let store = InsightStore::connect("sqlite::memory:").await.unwrap();
        assert!(store.ping().await);
    }

    #[tokio::test]
    async fn previous_cycle_counters_is_none_before_any_cycle_completes() {
        let store = InsightStore::connect("sqlite::memory:").await.unwrap();
        assert!(store.get_previous_cycle_counters().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cycle_record_round_trips_and_updates_the_snapshot() {
        let store = InsightStore::connect("sqlite::memory:").await.unwrap();
        let counters = fleet_common::SnapshotCounters {
            containers_running: 10,
            containers_stopped: 2,
            containers_unhealthy: 1,
            endpoints_up: 3,
            endpoints_down: 0,
            skipped_circuit_breaker: 0,
            container_fetch_failures: 0,
        };
        let record = MonitoringCycleRecord {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration_ms: 1500,
            counters,
            total_insights: 4,
        };
        store.insert_cycle_record(&record).await.unwrap();

        let snapshot = store.get_previous_cycle_counters().await.unwrap().unwrap();
        assert_eq!(snapshot.containers_running, 10);

        let recent = store.get_recent_cycles(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].total_insights, 4);
    }

    #[tokio::test]
    async fn a_second_cycle_record_overwrites_the_single_row_snapshot() {
        let store = InsightStore::connect("sqlite::memory:").await.unwrap();
        let first = MonitoringCycleRecord {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration_ms: 100,
            counters: fleet_common::SnapshotCounters {
                containers_running: 5,
                ..Default::default()
            },
            total_insights: 1,
        };
        let second = MonitoringCycleRecord {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration_ms: 100,
            counters: fleet_common::SnapshotCounters {
                containers_running: 8,
                ..Default::default()
            },
            total_insights: 2,
        };
        store.insert_cycle_record(&first).await.unwrap();
        store.insert_cycle_record(&second).await.unwrap();

        let snapshot = store.get_previous_cycle_counters().await.unwrap().unwrap();
        assert_eq!(snapshot.containers_running, 8);
        assert_eq!(store.get_recent_cycles(10).await.unwrap().len(), 2);
    }
}
