//! Statistical and heuristic anomaly detection over container metric samples.
//!
//! Pure and synchronous: callers supply the baseline `MovingAverageStats`
//! (read from the metrics store by `fleet-cycle`) alongside the current
//! value. No I/O happens here, which keeps the detection math trivially
//! testable.

use fleet_common::{AnomalyVerdict, ContainerId, DetectionMethod, MetricType, MovingAverageStats};

/// Tuning knobs for the statistical detectors. Mirrors `fleet_common::config::AnomalyConfig`.
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    pub zscore_threshold: f64,
    pub min_samples: u32,
    pub threshold_pct: f64,
}

impl From<fleet_common::config::AnomalyConfig> for DetectorConfig {
    fn from(c: fleet_common::config::AnomalyConfig) -> Self {
        Self {
            zscore_threshold: c.zscore_threshold,
            min_samples: c.min_samples,
            threshold_pct: c.threshold_pct,
        }
    }
}

const BOLLINGER_K: f64 = 2.0;
const ADAPTIVE_CV_THRESHOLD: f64 = 0.3;

/// One item in a batch anomaly-detection call.
#[derive(Debug, Clone)]
pub struct BatchDetectionItem {
    pub container_id: ContainerId,
    pub metric_type: MetricType,
    pub current_value: f64,
    pub stats: MovingAverageStats,
}

/// Stateless anomaly detector. Cheap to construct; holds only tuning config.
#[derive(Debug, Clone, Copy)]
pub struct AnomalyDetector {
    config: DetectorConfig,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Evaluates a single (container, metric) pair using `method`. Returns
    /// `None` when `stats.sample_count < min_samples`.
    pub fn detect(
        &self,
        current_value: f64,
        stats: MovingAverageStats,
        method: DetectionMethod,
    ) -> Option<AnomalyVerdict> {
        if stats.sample_count < self.config.min_samples {
            return None;
        }

        match method {
            DetectionMethod::Zscore => Some(self.zscore(current_value, stats, self.config.zscore_threshold)),
            DetectionMethod::Bollinger => Some(self.bollinger(current_value, stats)),
            DetectionMethod::Adaptive => Some(self.adaptive(current_value, stats)),
            DetectionMethod::Threshold | DetectionMethod::IsolationForest => {
                // These are driven through their dedicated entry points
                // below, not through the generic batch call.
                None
            }
        }
    }

    fn zscore(&self, current: f64, stats: MovingAverageStats, threshold: f64) -> AnomalyVerdict {
        let z = if stats.std_dev == 0.0 {
            if (current - stats.mean).abs() > 0.001 {
                f64::INFINITY
            } else {
                0.0
            }
        } else {
            (current - stats.mean) / stats.std_dev
        };

        AnomalyVerdict {
            is_anomalous: z.abs() > threshold,
            z_score: z,
            mean: stats.mean,
            current_value: current,
            method: DetectionMethod::Zscore,
        }
    }

    fn bollinger(&self, current: f64, stats: MovingAverageStats) -> AnomalyVerdict {
        let upper = stats.mean + BOLLINGER_K * stats.std_dev;
        let lower = (stats.mean - BOLLINGER_K * stats.std_dev).max(0.0);
        let z = if stats.std_dev == 0.0 {
            0.0
        } else {
            (current - stats.mean) / stats.std_dev
        };

        AnomalyVerdict {
            is_anomalous: current > upper || current < lower,
            z_score: z,
            mean: stats.mean,
            current_value: current,
            method: DetectionMethod::Bollinger,
        }
    }

    fn adaptive(&self, current: f64, stats: MovingAverageStats) -> AnomalyVerdict {
        let cv = if stats.mean == 0.0 { 0.0 } else { stats.std_dev / stats.mean };
        let threshold = if cv > ADAPTIVE_CV_THRESHOLD {
            self.config.zscore_threshold * cv.max(1.0)
        } else {
            self.config.zscore_threshold
        };

        let mut verdict = self.zscore(current, stats, threshold);
        verdict.method = DetectionMethod::Adaptive;
        verdict
    }

    /// Batch variant, composing `"containerId:metricType"` keys.
    pub fn detect_batch(
        &self,
        items: &[BatchDetectionItem],
        method: DetectionMethod,
    ) -> Vec<(String, AnomalyVerdict)> {
        items
            .iter()
            .filter_map(|item| {
                let verdict = self.detect(item.current_value, item.stats, method)?;
                Some((format!("{}:{}", item.container_id, item.metric_type), verdict))
            })
            .collect()
    }

    /// Fixed-threshold pass, independent of baseline statistics. Used for
    /// the hard-ceiling check that runs after the statistical passes.
    pub fn evaluate_threshold(&self, current_value: f64) -> AnomalyVerdict {
        AnomalyVerdict {
            is_anomalous: current_value > self.config.threshold_pct,
            z_score: 0.0,
            mean: self.config.threshold_pct,
            current_value,
            method: DetectionMethod::Threshold,
        }
    }

    /// Simplified isolation-forest style scoring over two metrics: a mean
    /// path-length proxy rather than a trained ensemble, since training is
    /// out of scope. Values further from their respective baselines along
    /// either axis shorten the proxy path length, raising the score.
    pub fn evaluate_isolation_forest(&self, cpu: f64, cpu_stats: MovingAverageStats, mem: f64, mem_stats: MovingAverageStats) -> AnomalyVerdict {
        let cpu_dev = normalized_deviation(cpu, cpu_stats);
        let mem_dev = normalized_deviation(mem, mem_stats);
        let combined = (cpu_dev.powi(2) + mem_dev.powi(2)).sqrt();

        AnomalyVerdict {
            is_anomalous: combined > self.config.zscore_threshold,
            z_score: combined,
            mean: (cpu_stats.mean + mem_stats.mean) / 2.0,
            current_value: (cpu + mem) / 2.0,
            method: DetectionMethod::IsolationForest,
        }
    }
}

fn normalized_deviation(value: f64, stats: MovingAverageStats) -> f64 {
    if stats.std_dev == 0.0 {
        0.0
    } else {
        ((value - stats.mean) / stats.std_dev).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DetectorConfig {
        DetectorConfig {
            zscore_threshold: 3.0,
            min_samples: 10,
            threshold_pct: 90.0,
        }
    }

    fn stats(mean: f64, std_dev: f64, sample_count: u32) -> MovingAverageStats {
        MovingAverageStats {
            mean,
            std_dev,
            sample_count,
        }
    }

    #[test]
    fn below_min_samples_returns_none() {
        let detector = AnomalyDetector::new(config());
        let verdict = detector.detect(50.0, stats(40.0, 5.0, 3), DetectionMethod::Zscore);
        assert!(verdict.is_none());
    }

    #[test]
    fn zscore_flags_value_beyond_threshold() {
        let detector = AnomalyDetector::new(config());
        let verdict = detector.detect(80.0, stats(40.0, 5.0, 20), DetectionMethod::Zscore).unwrap();
        assert!(verdict.is_anomalous);
        assert_eq!(verdict.z_score, 8.0);
    }

    #[test]
    fn zscore_with_zero_std_dev_and_small_delta_is_not_anomalous() {
        let detector = AnomalyDetector::new(config());
        let verdict = detector
            .detect(40.0005, stats(40.0, 0.0, 20), DetectionMethod::Zscore)
            .unwrap();
        assert!(!verdict.is_anomalous);
        assert_eq!(verdict.z_score, 0.0);
    }

    #[test]
    fn zscore_with_zero_std_dev_and_large_delta_reports_infinite_z() {
        let detector = AnomalyDetector::new(config());
        let verdict = detector
            .detect(45.0, stats(40.0, 0.0, 20), DetectionMethod::Zscore)
            .unwrap();
        assert!(verdict.is_anomalous);
        assert!(verdict.z_score.is_infinite());
    }

    #[test]
    fn bollinger_lower_band_clamps_at_zero() {
        let detector = AnomalyDetector::new(config());
        // mean=2, k*std=10 -> raw lower = -8, clamped to 0. A value below
        // zero falls below the clamped band even though it is above the
        // unclamped one.
        let verdict = detector
            .detect(-0.5, stats(2.0, 5.0, 20), DetectionMethod::Bollinger)
            .unwrap();
        assert!(verdict.is_anomalous);
    }

    #[test]
    fn bollinger_within_bands_is_not_anomalous() {
        let detector = AnomalyDetector::new(config());
        let verdict = detector
            .detect(45.0, stats(40.0, 5.0, 20), DetectionMethod::Bollinger)
            .unwrap();
        assert!(!verdict.is_anomalous);
    }

    #[test]
    fn adaptive_widens_threshold_for_high_variance() {
        let detector = AnomalyDetector::new(config());
        // cv = 20/40 = 0.5 > 0.3, so effective threshold = 3.0 * 0.5.max(1.0) = 3.0
        let high_variance = detector
            .detect(100.0, stats(40.0, 20.0, 20), DetectionMethod::Adaptive)
            .unwrap();
        assert_eq!(high_variance.method, DetectionMethod::Adaptive);
    }

    #[test]
    fn adaptive_behaves_like_zscore_for_low_variance() {
        let detector = AnomalyDetector::new(config());
        let low_variance = detector
            .detect(80.0, stats(40.0, 5.0, 20), DetectionMethod::Adaptive)
            .unwrap();
        assert!(low_variance.is_anomalous);
    }

    #[test]
    fn batch_composes_container_metric_keys() {
        let detector = AnomalyDetector::new(config());
        let items = vec![
            BatchDetectionItem {
                container_id: "abc123".to_string(),
                metric_type: MetricType::Cpu,
                current_value: 95.0,
                stats: stats(40.0, 5.0, 20),
            },
            BatchDetectionItem {
                container_id: "def456".to_string(),
                metric_type: MetricType::Memory,
                current_value: 50.0,
                stats: stats(48.0, 5.0, 20),
            },
        ];
        let results = detector.detect_batch(&items, DetectionMethod::Zscore);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "abc123:cpu");
        assert_eq!(results[1].0, "def456:memory");
        assert!(results[0].1.is_anomalous);
        assert!(!results[1].1.is_anomalous);
    }

    #[test]
    fn threshold_pass_flags_values_above_configured_pct() {
        let detector = AnomalyDetector::new(config());
        assert!(detector.evaluate_threshold(95.0).is_anomalous);
        assert!(!detector.evaluate_threshold(50.0).is_anomalous);
    }

    #[test]
    fn isolation_forest_flags_joint_deviation() {
        let detector = AnomalyDetector::new(config());
        let verdict = detector.evaluate_isolation_forest(
            90.0,
            stats(40.0, 5.0, 20),
            90.0,
            stats(40.0, 5.0, 20),
        );
        assert!(verdict.is_anomalous);
        assert_eq!(verdict.method, DetectionMethod::IsolationForest);
    }
}
