//! Per-key anomaly cooldown, shared by the statistical and hard-threshold
//! passes. Mutated directly by the cycle task and periodically swept by a
//! background task so stale keys from containers that no longer exist
//! don't accumulate forever.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// `"containerId:metricType"` for the statistical passes, or
/// `"containerId:metricType:threshold"` for the hard-threshold pass — the
/// `:threshold` suffix is a required, hardcoded convention rather than a
/// configurable one, so the two passes never collide on the same key.
pub type CooldownKey = String;

/// Shared, lock-protected cooldown map. Cheap to clone: every clone shares
/// the same underlying map.
#[derive(Clone)]
pub struct CooldownMap {
    inner: Arc<Mutex<HashMap<CooldownKey, DateTime<Utc>>>>,
}

impl CooldownMap {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// If `key` is still within `cooldown_minutes` of its last trigger,
    /// returns `true` and leaves the stored timestamp untouched. Otherwise
    /// records `now` against `key` and returns `false`.
    pub fn check_and_set(&self, key: &str, cooldown_minutes: u32) -> bool {
        let now = Utc::now();
        let mut map = self.inner.lock();
        if let Some(last) = map.get(key) {
            if now - *last < chrono::Duration::minutes(cooldown_minutes as i64) {
                return true;
            }
        }
        map.insert(key.to_string(), now);
        false
    }

    /// Drops every entry older than `cooldown_minutes`, so containers that
    /// disappeared between cycles don't leak keys forever.
    pub fn sweep(&self, cooldown_minutes: u32) -> usize {
        let cutoff = Utc::now() - chrono::Duration::minutes(cooldown_minutes as i64);
        let mut map = self.inner.lock();
        let before = map.len();
        map.retain(|_, last| *last >= cutoff);
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CooldownMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_trigger_is_never_in_cooldown() {
        let map = CooldownMap::new();
        assert!(!map.check_and_set("web:cpu", 15));
    }

    #[test]
    fn second_trigger_within_window_is_suppressed() {
        let map = CooldownMap::new();
        assert!(!map.check_and_set("web:cpu", 15));
        assert!(map.check_and_set("web:cpu", 15));
    }

    #[test]
    fn threshold_suffix_is_a_distinct_key_from_the_statistical_pass() {
        let map = CooldownMap::new();
        assert!(!map.check_and_set("web:cpu", 15));
        assert!(!map.check_and_set("web:cpu:threshold", 15));
    }

    #[test]
    fn sweep_evicts_expired_entries() {
        let map = CooldownMap::new();
        map.inner.lock().insert("stale:cpu".to_string(), Utc::now() - chrono::Duration::minutes(30));
        assert_eq!(map.sweep(15), 1);
        assert!(map.is_empty());
    }
}
