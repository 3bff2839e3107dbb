//! Core data model shared across the agent (spec §3).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type EntityKey = String;
pub type EntityId = u64;

/// `(Category, Term)` identifying one plugin, spec §3 "Plugin".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginId {
    pub category: String,
    pub term: String,
}

impl PluginId {
    pub fn new(category: impl Into<String>, term: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            term: term.into(),
        }
    }

    /// The delta-journal "source" string: `category/term`.
    pub fn source(&self) -> String {
        format!("{}/{}", self.category, self.term)
    }
}

/// One inventory delta record, spec §3 "RawDelta".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawDelta {
    pub source: String,
    pub id: u64,
    pub timestamp: u64,
    pub diff: serde_json::Value,
    #[serde(rename = "full_diff")]
    pub full_diff: bool,
}

/// The unit of a per-entity payload in a bulk POST, spec §3 "PostDeltaBody".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PostDeltaBody {
    pub external_keys: Vec<String>,
    pub is_agent: bool,
    pub deltas: Vec<RawDelta>,
}

/// Metric value shapes, spec §3 "Metric (protocol)".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Summary {
        count: f64,
        sum: f64,
        min: f64,
        max: f64,
    },
    PrometheusSummary {
        sample_count: f64,
        sample_sum: f64,
        quantiles: Vec<Quantile>,
    },
    PrometheusHistogram {
        sample_count: f64,
        sample_sum: f64,
        buckets: Vec<HistogramBucket>,
    },
    Raw(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quantile {
    pub quantile: f64,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistogramBucket {
    pub cumulative_count: f64,
    pub upper_bound: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetricType {
    Gauge,
    Count,
    Summary,
    Rate,
    CumulativeRate,
    CumulativeCount,
    PrometheusSummary,
    PrometheusHistogram,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metric {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub value: MetricValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// Per-dataset attributes and timing applied to every metric lacking its
/// own, spec §3 "Common block".
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CommonBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EntityInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// One logical entity's telemetry within a payload, spec §3 "Dataset".
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Dataset {
    pub entity: EntityInfo,
    #[serde(default)]
    pub common: CommonBlock,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub inventory: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
    #[serde(default)]
    pub ignore_entity: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrationInfo {
    pub name: String,
    pub version: String,
}

/// A v4 integration payload, spec §3 "DataV4 payload".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataV4 {
    pub protocol_version: String,
    pub integration: IntegrationInfo,
    pub data: Vec<Dataset>,
}

/// Closed set of detectable cloud providers, spec §3 "CloudType".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloudType {
    NoCloud,
    InProgress,
    Aws,
    Azure,
    Gcp,
    Alibaba,
    Oci,
}

impl Default for CloudType {
    fn default() -> Self {
        CloudType::InProgress
    }
}

/// Entity requested for registration, spec §6 "Register batch request".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRegisterRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRegisterResponse {
    pub id: EntityId,
    pub key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

pub const RESERVED_ENTITY_ID_ATTR: &str = "nr.entity.id";
pub const SYSTEM_ENTITY_BUCKET: &str = "system";
