//! Rate and cumulative calculators, spec §4.4 / §8 (C5).
//!
//! Grounded on the teacher's `ac_for` memoising-cache pattern in
//! `util.rs` (a `Lazy`-guarded shared map keyed by a canonical hash) but
//! adapted to a single exclusive-lock map per spec §5, since calculator
//! state mutates on every observation rather than being built once.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

const DEFAULT_EXPIRATION_CHECK_INTERVAL_SECS: i64 = 20 * 60;
const DEFAULT_EXPIRATION_AGE_SECS: i64 = 20 * 60;

/// `(name, canonical-JSON of attributes)`, spec §3 "MetricIdentity".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricIdentity {
    pub name: String,
    attrs_key: String,
}

impl MetricIdentity {
    pub fn new(name: &str, attributes: &BTreeMap<String, serde_json::Value>) -> Self {
        // BTreeMap already iterates in sorted key order, so `to_string` is a
        // deterministic canonical encoding.
        let attrs_key = serde_json::to_string(attributes).unwrap_or_default();
        Self {
            name: name.to_string(),
            attrs_key,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LastValue {
    when: DateTime<Utc>,
    value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaugeResult {
    pub value: f64,
    pub valid: bool,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CountResult {
    pub value: f64,
    pub valid: bool,
    pub interval_ms: u64,
}

pub struct Calculators {
    state: Mutex<CalculatorState>,
}

struct CalculatorState {
    values: std::collections::HashMap<MetricIdentity, LastValue>,
    last_clean: Option<DateTime<Utc>>,
    expiration_check_interval: ChronoDuration,
    expiration_age: ChronoDuration,
}

impl Default for Calculators {
    fn default() -> Self {
        Self::new()
    }
}

impl Calculators {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CalculatorState {
                values: std::collections::HashMap::new(),
                last_clean: None,
                expiration_check_interval: ChronoDuration::seconds(
                    DEFAULT_EXPIRATION_CHECK_INTERVAL_SECS,
                ),
                expiration_age: ChronoDuration::seconds(DEFAULT_EXPIRATION_AGE_SECS),
            }),
        }
    }

    /// `rate(name, attrs, value, now)`. The stored "last" value is only ever
    /// written on first observation; subsequent calls compute against that
    /// fixed sentinel without advancing it (spec §4.4 / §9 open question,
    /// resolved to match the documented end-to-end test in spec §8).
    pub fn rate(
        &self,
        name: &str,
        attrs: &BTreeMap<String, serde_json::Value>,
        value: f64,
        now: DateTime<Utc>,
    ) -> GaugeResult {
        let id = MetricIdentity::new(name, attrs);
        let mut state = self.state.lock().unwrap();
        match state.values.get(&id) {
            None => {
                state.values.insert(id, LastValue { when: now, value });
                GaugeResult {
                    value: 0.0,
                    valid: false,
                    interval_ms: 0,
                }
            }
            Some(last) => {
                if now <= last.when {
                    return GaugeResult {
                        value: 0.0,
                        valid: false,
                        interval_ms: 0,
                    };
                }
                let interval_ms = (now - last.when).num_milliseconds() as u64;
                let elapsed = interval_ms as f64 / 1000.0;
                if elapsed <= 0.0 {
                    return GaugeResult {
                        value: 0.0,
                        valid: false,
                        interval_ms: 0,
                    };
                }
                GaugeResult {
                    value: value / elapsed,
                    valid: true,
                    interval_ms,
                }
            }
        }
    }

    /// `cumulative_rate(name, attrs, value, now)`. Rejects counter resets;
    /// updates both the stored value and timestamp on every accepted
    /// observation.
    pub fn cumulative_rate(
        &self,
        name: &str,
        attrs: &BTreeMap<String, serde_json::Value>,
        value: f64,
        now: DateTime<Utc>,
    ) -> GaugeResult {
        let id = MetricIdentity::new(name, attrs);
        let mut state = self.state.lock().unwrap();
        match state.values.get(&id).copied() {
            None => {
                state.values.insert(id, LastValue { when: now, value });
                GaugeResult {
                    value: 0.0,
                    valid: false,
                    interval_ms: 0,
                }
            }
            Some(last) => {
                if now <= last.when {
                    return GaugeResult {
                        value: 0.0,
                        valid: false,
                        interval_ms: 0,
                    };
                }
                let interval_ms = (now - last.when).num_milliseconds() as u64;
                let elapsed = interval_ms as f64 / 1000.0;
                let delta = value - last.value;
                state.values.insert(id, LastValue { when: now, value });
                if delta < 0.0 || elapsed <= 0.0 {
                    return GaugeResult {
                        value: 0.0,
                        valid: false,
                        interval_ms: 0,
                    };
                }
                GaugeResult {
                    value: delta / elapsed,
                    valid: true,
                    interval_ms,
                }
            }
        }
    }

    /// `cumulative_count(name, attrs, value, now)`. A reset (new < last)
    /// is skipped but `last` still advances to the observed value, so the
    /// next accepted delta is computed relative to the reset point (spec §9
    /// open question, "advance" resolution; see spec §8 end-to-end test 3).
    pub fn cumulative_count(
        &self,
        name: &str,
        attrs: &BTreeMap<String, serde_json::Value>,
        value: f64,
        now: DateTime<Utc>,
    ) -> CountResult {
        let id = MetricIdentity::new(name, attrs);
        let mut state = self.state.lock().unwrap();
        match state.values.get(&id).copied() {
            None => {
                state.values.insert(id, LastValue { when: now, value });
                CountResult {
                    value: 0.0,
                    valid: false,
                    interval_ms: 0,
                }
            }
            Some(last) => {
                let interval_ms = (now - last.when).num_milliseconds().max(0) as u64;
                if now <= last.when {
                    return CountResult {
                        value: 0.0,
                        valid: false,
                        interval_ms: 0,
                    };
                }
                let delta = value - last.value;
                state.values.insert(id, LastValue { when: now, value });
                if delta < 0.0 {
                    return CountResult {
                        value: 0.0,
                        valid: false,
                        interval_ms,
                    };
                }
                CountResult {
                    value: delta,
                    valid: true,
                    interval_ms,
                }
            }
        }
    }

    /// Unconditional value delta against the previous observation, with no
    /// reset rejection. Backs the Prometheus-composite `_sum` expansion
    /// (spec §4.6 step 1), which has no counter-reset semantics of its own.
    /// `None` on the first observation for a given identity.
    pub fn delta(
        &self,
        name: &str,
        attrs: &BTreeMap<String, serde_json::Value>,
        value: f64,
        now: DateTime<Utc>,
    ) -> Option<f64> {
        let id = MetricIdentity::new(name, attrs);
        let mut state = self.state.lock().unwrap();
        match state.values.insert(id, LastValue { when: now, value }) {
            None => None,
            Some(last) => Some(value - last.value),
        }
    }

    /// Evicts every identity whose `last.when` is older than
    /// `expiration_age`, but only when `expiration_check_interval` has
    /// elapsed since the previous clean. Idempotent: a second call before
    /// the interval elapses is a no-op; identities removed stay removed
    /// until a fresh observation re-inserts them.
    pub fn clean(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        if let Some(last) = state.last_clean {
            if now - last < state.expiration_check_interval {
                return;
            }
        }
        let cutoff = now - state.expiration_age;
        state.values.retain(|_, v| v.when >= cutoff);
        state.last_clean = Some(now);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state.lock().unwrap().values.len()
    }
}
