//! Batched metrics reads against an external metrics store, plus the
//! rollup-table selection rule used to answer moving-average queries over
//! windows wider than the raw-sample retention period.
//!
//! The metrics themselves are written by a separate ingestion path (out of
//! scope here: this service is explicitly not a general-purpose metrics
//! store); `insert_sample` exists only so this crate's own tests can
//! populate fixtures without a live collector.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::warn;

use fleet_common::{ContainerId, Error, MetricType, MovingAverageStats, Result};

/// One batch metrics read: `containerId -> (metricType -> latest value)`.
pub type MetricsBatch = HashMap<ContainerId, HashMap<MetricType, f64>>;

#[async_trait]
pub trait MetricsReader: Send + Sync {
    /// Single batched read of the latest value per (container, metric),
    /// replacing N per-container round trips. Callers treat a failed read
    /// as an empty batch and continue the cycle rather than abort it.
    async fn get_latest_metrics_batch(&self, container_ids: &[ContainerId]) -> Result<MetricsBatch>;

    /// Baseline statistics over `window` for one (container, metric) pair,
    /// read from whichever rollup table `select_rollup_table` picks.
    async fn get_moving_average(
        &self,
        container_id: &ContainerId,
        metric_type: MetricType,
        window: chrono::Duration,
    ) -> Result<Option<MovingAverageStats>>;
}

/// Picks the coarsest rollup table that still covers `window` at native
/// resolution. Boundaries are inclusive on the lower side: a window of
/// exactly 6 hours still reads raw samples, not the 5-minute rollup.
pub fn select_rollup_table(window: chrono::Duration) -> &'static str {
    let hours = window.num_seconds() as f64 / 3600.0;
    if hours <= 6.0 {
        "metrics"
    } else if hours <= 24.0 * 7.0 {
        "metrics_5min"
    } else if hours <= 24.0 * 90.0 {
        "metrics_1hour"
    } else {
        "metrics_1day"
    }
}

const CREATE_METRICS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS metrics (
    container_id TEXT NOT NULL,
    metric_type TEXT NOT NULL,
    value REAL NOT NULL,
    timestamp TEXT NOT NULL
)
"#;

fn create_rollup_table(name: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {name} (
            container_id TEXT NOT NULL,
            metric_type TEXT NOT NULL,
            bucket TEXT NOT NULL,
            avg_value REAL NOT NULL
        )
        "#
    )
}

/// `sqlx`-backed `MetricsReader`, following the same raw-query-plus-manual-
/// `Row`-extraction idiom used throughout the insight store, since there is
/// no live `DATABASE_URL` to validate `query!`/`FromRow` against.
pub struct SqlMetricsReader {
    pool: SqlitePool,
}

impl SqlMetricsReader {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("connecting to metrics store: {e}")))?;

        sqlx::query(CREATE_METRICS_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("creating metrics table: {e}")))?;
        for table in ["metrics_5min", "metrics_1hour", "metrics_1day"] {
            sqlx::query(&create_rollup_table(table))
                .execute(&pool)
                .await
                .map_err(|e| Error::DependencyUnavailable(format!("creating {table} table: {e}")))?;
        }

        Ok(Self { pool })
    }

    /// Test/fixture helper: records one raw sample.
    pub async fn insert_sample(&self, container_id: &str, metric_type: MetricType, value: f64, timestamp: DateTime<Utc>) -> Result<()> {
        sqlx::query("INSERT INTO metrics (container_id, metric_type, value, timestamp) VALUES (?, ?, ?, ?)")
            .bind(container_id)
            .bind(metric_type.as_str())
            .bind(value)
            .bind(timestamp.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("inserting metric sample: {e}")))?;
        Ok(())
    }

    /// Test/fixture helper: records one rollup bucket.
    pub async fn insert_rollup_bucket(&self, table: &str, container_id: &str, metric_type: MetricType, bucket: DateTime<Utc>, avg_value: f64) -> Result<()> {
        let query = format!("INSERT INTO {table} (container_id, metric_type, bucket, avg_value) VALUES (?, ?, ?, ?)");
        sqlx::query(&query)
            .bind(container_id)
            .bind(metric_type.as_str())
            .bind(bucket.to_rfc3339())
            .bind(avg_value)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::DependencyUnavailable(format!("inserting rollup bucket into {table}: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl MetricsReader for SqlMetricsReader {
    async fn get_latest_metrics_batch(&self, container_ids: &[ContainerId]) -> Result<MetricsBatch> {
        if container_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = container_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!(
            "SELECT container_id, metric_type, value FROM metrics m \
             WHERE container_id IN ({placeholders}) \
             AND timestamp = (SELECT MAX(timestamp) FROM metrics WHERE container_id = m.container_id AND metric_type = m.metric_type)"
        );

        let mut q = sqlx::query(&query);
        for id in container_ids {
            q = q.bind(id);
        }

        let rows = match q.fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "batched metrics read failed, treating as empty");
                return Ok(HashMap::new());
            }
        };

        let mut batch: MetricsBatch = HashMap::new();
        for row in rows {
            let container_id: String = row.try_get("container_id").map_err(|e| Error::Internal(e.into()))?;
            let metric_type: String = row.try_get("metric_type").map_err(|e| Error::Internal(e.into()))?;
            let value: f64 = row.try_get("value").map_err(|e| Error::Internal(e.into()))?;
            if let Some(metric_type) = parse_metric_type(&metric_type) {
                batch.entry(container_id).or_default().insert(metric_type, value);
            }
        }

        Ok(batch)
    }

    async fn get_moving_average(
        &self,
        container_id: &ContainerId,
        metric_type: MetricType,
        window: chrono::Duration,
    ) -> Result<Option<MovingAverageStats>> {
        let table = select_rollup_table(window);
        let since = (Utc::now() - window).to_rfc3339();

        let values: Vec<f64> = if table == "metrics" {
            let rows = sqlx::query("SELECT value FROM metrics WHERE container_id = ? AND metric_type = ? AND timestamp >= ?")
                .bind(container_id)
                .bind(metric_type.as_str())
                .bind(&since)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| Error::DependencyUnavailable(format!("reading raw metrics: {e}")))?;
            rows.iter()
                .map(|r| r.try_get::<f64, _>("value").map_err(|e| Error::Internal(e.into())))
                .collect::<Result<Vec<_>>>()?
        } else {
            let query = format!("SELECT avg_value FROM {table} WHERE container_id = ? AND metric_type = ? AND bucket >= ?");
            let rows = sqlx::query(&query)
                .bind(container_id)
                .bind(metric_type.as_str())
                .bind(&since)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| Error::DependencyUnavailable(format!("reading rollup metrics from {table}: {e}")))?;
            rows.iter()
                .map(|r| r.try_get::<f64, _>("avg_value").map_err(|e| Error::Internal(e.into())))
                .collect::<Result<Vec<_>>>()?
        };

        if values.is_empty() {
            return Ok(None);
        }

        let sample_count = values.len() as u32;
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;

        Ok(Some(MovingAverageStats {
            mean,
            std_dev: variance.sqrt(),
            sample_count,
        }))
    }
}

fn parse_metric_type(s: &str) -> Option<MetricType> {
    match s {
        "cpu" => Some(MetricType::Cpu),
        "memory" => Some(MetricType::Memory),
        "memory_bytes" => Some(MetricType::MemoryBytes),
        "network_rx" => Some(MetricType::NetworkRx),
        "network_tx" => Some(MetricType::NetworkTx),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollup_boundaries_are_exact() {
        assert_eq!(select_rollup_table(chrono::Duration::hours(6)), "metrics");
        assert_eq!(select_rollup_table(chrono::Duration::hours(6) + chrono::Duration::seconds(1)), "metrics_5min");
        assert_eq!(select_rollup_table(chrono::Duration::days(7)), "metrics_5min");
        assert_eq!(select_rollup_table(chrono::Duration::days(7) + chrono::Duration::seconds(1)), "metrics_1hour");
        assert_eq!(select_rollup_table(chrono::Duration::days(90)), "metrics_1hour");
        assert_eq!(select_rollup_table(chrono::Duration::days(90) + chrono::Duration::seconds(1)), "metrics_1day");
    }

    #[test]
    fn rollup_selection_is_monotone() {
        let windows = [1.0, 6.0, 7.0, 24.0, 168.0, 169.0, 2000.0, 2200.0, 3000.0];
        let ranks: Vec<u8> = windows
            .iter()
            .map(|h| match select_rollup_table(chrono::Duration::hours(*h as i64)) {
                "metrics" => 0,
                "metrics_5min" => 1,
                "metrics_1hour" => 2,
                _ => 3,
            })
            .collect();
        assert!(ranks.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[tokio::test]
    async fn latest_batch_picks_the_most_recent_sample_per_metric() {
        let reader = SqlMetricsReader::connect("sqlite::memory:").await.unwrap();
        let now = Utc::now();
        reader.insert_sample("web", MetricType::Cpu, 40.0, now - chrono::Duration::minutes(5)).await.unwrap();
        reader.insert_sample("web", MetricType::Cpu, 95.0, now).await.unwrap();

        let batch = reader.get_latest_metrics_batch(&["web".to_string()]).await.unwrap();
        assert_eq!(batch["web"][&MetricType::Cpu], 95.0);
    }

    #[tokio::test]
    async fn moving_average_over_raw_window_computes_mean_and_stddev() {
        let reader = SqlMetricsReader::connect("sqlite::memory:").await.unwrap();
        let now = Utc::now();
        for value in [10.0, 20.0, 30.0] {
            reader.insert_sample("web", MetricType::Cpu, value, now).await.unwrap();
        }

        let stats = reader
            .get_moving_average(&"web".to_string(), MetricType::Cpu, chrono::Duration::hours(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.sample_count, 3);
        assert_eq!(stats.mean, 20.0);
    }

    #[tokio::test]
    async fn moving_average_over_wide_window_reads_the_daily_rollup() {
        let reader = SqlMetricsReader::connect("sqlite::memory:").await.unwrap();
        reader
            .insert_rollup_bucket("metrics_1day", "web", MetricType::Memory, Utc::now(), 55.0)
            .await
            .unwrap();

        let stats = reader
            .get_moving_average(&"web".to_string(), MetricType::Memory, chrono::Duration::days(120))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.mean, 55.0);
    }

    #[tokio::test]
    async fn moving_average_with_no_samples_is_none() {
        let reader = SqlMetricsReader::connect("sqlite::memory:").await.unwrap();
        let stats = reader
            .get_moving_average(&"ghost".to_string(), MetricType::Cpu, chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(stats.is_none());
    }
}
