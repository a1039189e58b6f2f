//! Layered configuration for the fleet observability service.
//!
//! Mirrors the nested-struct-per-subsystem shape used throughout this
//! workspace's predecessor gateway config, but the fields are the ones
//! this service actually reads: anomaly detection tuning, predictive
//! alerting, optional AI-assisted analysis, and notification channel
//! credentials.

use serde::{Deserialize, Serialize};
use std::env;

use crate::error::{Error, Result};
use crate::types::DetectionMethod;

/// Root configuration tree, assembled from environment variables with
/// documented defaults via [`Config::from_env`].
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub anomaly: AnomalyConfig,
    pub predictive: PredictiveConfig,
    pub ai: AiConfig,
    pub insights: InsightsConfig,
    pub notifications: NotificationsConfig,
    pub cache: CacheConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl std::fmt::Debug for Config {
    /// Hand-written so sensitive fields never appear verbatim, independent
    /// of whatever redaction the HTTP layer applies to API responses.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("gateway", &self.gateway)
            .field("anomaly", &self.anomaly)
            .field("predictive", &self.predictive)
            .field("ai", &self.ai)
            .field("insights", &self.insights)
            .field("notifications", &"<redacted>")
            .field("cache", &self.cache)
            .field("circuit_breaker", &self.circuit_breaker)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub bind_address: String,
    pub port: u16,
    pub request_timeout_ms: u64,
    pub cors_origins: Vec<String>,
}

/// `ANOMALY_*` options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnomalyConfig {
    pub zscore_threshold: f64,
    pub moving_average_window: u32,
    pub min_samples: u32,
    pub detection_method: DetectionMethod,
    pub cooldown_minutes: u32,
    pub hard_threshold_enabled: bool,
    pub threshold_pct: f64,
    pub isolation_forest_enabled: bool,
}

/// `PREDICTIVE_*` options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PredictiveConfig {
    pub enabled: bool,
    pub alert_threshold_hours: f64,
}

/// `AI_ANALYSIS_*`, `ANOMALY_EXPLANATION_*`, and `NLP_LOG_ANALYSIS_*` options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AiConfig {
    pub ai_analysis_enabled: bool,
    pub anomaly_explanation_enabled: bool,
    pub anomaly_explanation_max_per_cycle: u32,
    pub nlp_log_analysis_enabled: bool,
    pub nlp_log_analysis_max_per_cycle: u32,
    pub nlp_log_analysis_tail_lines: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InsightsConfig {
    pub max_insights_per_cycle: u32,
    pub cycle_interval_seconds: u64,
    pub cycle_deadline_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub cooldown_minutes: u32,
    pub teams_webhook_url: Option<String>,
    pub discord_webhook_url: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub email_recipients: Vec<String>,
    pub teams_enabled: bool,
    pub email_enabled: bool,
    pub discord_enabled: bool,
    pub telegram_enabled: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheConfig {
    pub endpoints_ttl_seconds: u64,
    pub containers_ttl_seconds: u64,
    pub l2_failure_backoff_base_ms: u64,
    pub l2_failure_backoff_max_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_cooldown_seconds: u64,
    pub half_open_max_probes: u32,
    pub degraded_latency_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 8080,
                request_timeout_ms: 30_000,
                cors_origins: vec!["*".to_string()],
            },
            anomaly: AnomalyConfig {
                zscore_threshold: 3.0,
                moving_average_window: 20,
                min_samples: 10,
                detection_method: DetectionMethod::Zscore,
                cooldown_minutes: 15,
                hard_threshold_enabled: true,
                threshold_pct: 90.0,
                isolation_forest_enabled: false,
            },
            predictive: PredictiveConfig {
                enabled: false,
                alert_threshold_hours: 12.0,
            },
            ai: AiConfig {
                ai_analysis_enabled: false,
                anomaly_explanation_enabled: false,
                anomaly_explanation_max_per_cycle: 5,
                nlp_log_analysis_enabled: false,
                nlp_log_analysis_max_per_cycle: 5,
                nlp_log_analysis_tail_lines: 200,
            },
            insights: InsightsConfig {
                max_insights_per_cycle: 50,
                cycle_interval_seconds: 60,
                cycle_deadline_seconds: 300,
            },
            notifications: NotificationsConfig {
                cooldown_minutes: 15,
                teams_webhook_url: None,
                discord_webhook_url: None,
                telegram_bot_token: None,
                telegram_chat_id: None,
                smtp_host: None,
                smtp_port: 587,
                smtp_username: None,
                smtp_password: None,
                email_recipients: Vec::new(),
                teams_enabled: false,
                email_enabled: false,
                discord_enabled: false,
                telegram_enabled: false,
            },
            cache: CacheConfig {
                endpoints_ttl_seconds: 30,
                containers_ttl_seconds: 15,
                l2_failure_backoff_base_ms: 500,
                l2_failure_backoff_max_ms: 60_000,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                open_cooldown_seconds: 60,
                half_open_max_probes: 1,
                degraded_latency_ms: 2_000,
            },
        }
    }
}

impl Config {
    /// Build configuration from a default tree overridden by `FLEET_*`
    /// environment variables. Unset variables fall back to the documented
    /// defaults above; malformed values are rejected rather than silently
    /// ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(v) = env::var("FLEET_GATEWAY_PORT") {
            config.gateway.port = v
                .parse()
                .map_err(|_| Error::Configuration(format!("invalid FLEET_GATEWAY_PORT: {v}")))?;
        }
        if let Ok(v) = env::var("ANOMALY_ZSCORE_THRESHOLD") {
            config.anomaly.zscore_threshold = v.parse().map_err(|_| {
                Error::Configuration(format!("invalid ANOMALY_ZSCORE_THRESHOLD: {v}"))
            })?;
        }
        if let Ok(v) = env::var("ANOMALY_MOVING_AVERAGE_WINDOW") {
            config.anomaly.moving_average_window = v.parse().map_err(|_| {
                Error::Configuration(format!("invalid ANOMALY_MOVING_AVERAGE_WINDOW: {v}"))
            })?;
        }
        if let Ok(v) = env::var("ANOMALY_MIN_SAMPLES") {
            config.anomaly.min_samples = v
                .parse()
                .map_err(|_| Error::Configuration(format!("invalid ANOMALY_MIN_SAMPLES: {v}")))?;
        }
        if let Ok(v) = env::var("ANOMALY_DETECTION_METHOD") {
            config.anomaly.detection_method = match v.to_lowercase().as_str() {
                "zscore" => DetectionMethod::Zscore,
                "bollinger" => DetectionMethod::Bollinger,
                "adaptive" => DetectionMethod::Adaptive,
                other => {
                    return Err(Error::Configuration(format!(
                        "invalid ANOMALY_DETECTION_METHOD: {other}"
                    )))
                }
            };
        }
        if let Ok(v) = env::var("ANOMALY_COOLDOWN_MINUTES") {
            config.anomaly.cooldown_minutes = v.parse().map_err(|_| {
                Error::Configuration(format!("invalid ANOMALY_COOLDOWN_MINUTES: {v}"))
            })?;
        }
        if let Ok(v) = env::var("ANOMALY_HARD_THRESHOLD_ENABLED") {
            config.anomaly.hard_threshold_enabled = parse_bool(&v)?;
        }
        if let Ok(v) = env::var("ANOMALY_THRESHOLD_PCT") {
            config.anomaly.threshold_pct = v
                .parse()
                .map_err(|_| Error::Configuration(format!("invalid ANOMALY_THRESHOLD_PCT: {v}")))?;
        }
        if let Ok(v) = env::var("ISOLATION_FOREST_ENABLED") {
            config.anomaly.isolation_forest_enabled = parse_bool(&v)?;
        }
        if let Ok(v) = env::var("PREDICTIVE_ALERTING_ENABLED") {
            config.predictive.enabled = parse_bool(&v)?;
        }
        if let Ok(v) = env::var("PREDICTIVE_ALERT_THRESHOLD_HOURS") {
            config.predictive.alert_threshold_hours = v.parse().map_err(|_| {
                Error::Configuration(format!("invalid PREDICTIVE_ALERT_THRESHOLD_HOURS: {v}"))
            })?;
        }
        if let Ok(v) = env::var("AI_ANALYSIS_ENABLED") {
            config.ai.ai_analysis_enabled = parse_bool(&v)?;
        }
        if let Ok(v) = env::var("ANOMALY_EXPLANATION_ENABLED") {
            config.ai.anomaly_explanation_enabled = parse_bool(&v)?;
        }
        if let Ok(v) = env::var("ANOMALY_EXPLANATION_MAX_PER_CYCLE") {
            config.ai.anomaly_explanation_max_per_cycle = v.parse().map_err(|_| {
                Error::Configuration(format!(
                    "invalid ANOMALY_EXPLANATION_MAX_PER_CYCLE: {v}"
                ))
            })?;
        }
        if let Ok(v) = env::var("NLP_LOG_ANALYSIS_ENABLED") {
            config.ai.nlp_log_analysis_enabled = parse_bool(&v)?;
        }
        if let Ok(v) = env::var("NLP_LOG_ANALYSIS_MAX_PER_CYCLE") {
            config.ai.nlp_log_analysis_max_per_cycle = v.parse().map_err(|_| {
                Error::Configuration(format!("invalid NLP_LOG_ANALYSIS_MAX_PER_CYCLE: {v}"))
            })?;
        }
        if let Ok(v) = env::var("NLP_LOG_ANALYSIS_TAIL_LINES") {
            config.ai.nlp_log_analysis_tail_lines = v.parse().map_err(|_| {
                Error::Configuration(format!("invalid NLP_LOG_ANALYSIS_TAIL_LINES: {v}"))
            })?;
        }
        if let Ok(v) = env::var("MAX_INSIGHTS_PER_CYCLE") {
            config.insights.max_insights_per_cycle = v.parse().map_err(|_| {
                Error::Configuration(format!("invalid MAX_INSIGHTS_PER_CYCLE: {v}"))
            })?;
        }

        config.notifications.teams_webhook_url = env::var("TEAMS_WEBHOOK_URL").ok();
        config.notifications.discord_webhook_url = env::var("DISCORD_WEBHOOK_URL").ok();
        config.notifications.telegram_bot_token = env::var("TELEGRAM_BOT_TOKEN").ok();
        config.notifications.telegram_chat_id = env::var("TELEGRAM_CHAT_ID").ok();
        config.notifications.smtp_host = env::var("SMTP_HOST").ok();
        config.notifications.smtp_username = env::var("SMTP_USERNAME").ok();
        config.notifications.smtp_password = env::var("SMTP_PASSWORD").ok();
        if let Ok(v) = env::var("SMTP_PORT") {
            config.notifications.smtp_port = v
                .parse()
                .map_err(|_| Error::Configuration(format!("invalid SMTP_PORT: {v}")))?;
        }
        if let Ok(v) = env::var("EMAIL_RECIPIENTS") {
            config.notifications.email_recipients =
                v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env::var("TEAMS_ENABLED") {
            config.notifications.teams_enabled = parse_bool(&v)?;
        }
        if let Ok(v) = env::var("EMAIL_ENABLED") {
            config.notifications.email_enabled = parse_bool(&v)?;
        }
        if let Ok(v) = env::var("DISCORD_ENABLED") {
            config.notifications.discord_enabled = parse_bool(&v)?;
        }
        if let Ok(v) = env::var("TELEGRAM_ENABLED") {
            config.notifications.telegram_enabled = parse_bool(&v)?;
        }

        Ok(config)
    }
}

fn parse_bool(v: &str) -> Result<bool> {
    match v.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Configuration(format!("invalid boolean: {other}"))),
    }
}

/// Keys matching these suffixes (or present verbatim) must never be
/// returned or logged in cleartext.
const SENSITIVE_SUFFIXES: &[&str] = &["_password", "_secret", "_token", "_api_key", "_webhook_url"];
const SENSITIVE_ALLOW_LIST: &[&str] = &["smtp_password", "telegram_bot_token"];

/// Whether a settings key must be redacted before leaving the process.
pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_ALLOW_LIST.contains(&lower.as_str())
        || SENSITIVE_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// The fixed redacted value returned in place of a sensitive setting.
pub const REDACTED_VALUE: &str = "••••••••";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.anomaly.cooldown_minutes, 15);
        assert_eq!(config.insights.max_insights_per_cycle, 50);
    }

    #[test]
    fn sensitive_keys_are_detected_by_suffix_and_allow_list() {
        assert!(is_sensitive_key("smtp_password"));
        assert!(is_sensitive_key("teams_webhook_url"));
        assert!(is_sensitive_key("telegram_bot_token"));
        assert!(!is_sensitive_key("anomaly_zscore_threshold"));
    }
}
