//! Emitter (C8) and Feature-flag dispatcher (C11), spec §4.7 / §4.9.
//!
//! Grounded on the teacher's `PluginPipeline` (`plugins/mod.rs`): a
//! first-class orchestration type that loops over a heterogeneous set of
//! producers, aggregates per-item failures into one summary instead of
//! aborting the batch, and logs a single rollup line at the end.

pub mod dispatcher;
pub mod noregister;
pub mod register;
pub mod rewrite;

pub use dispatcher::{Dispatcher, FeatureFlagSource};
pub use noregister::NoRegisterEmitter;
pub use register::RegisterEmitter;
pub use rewrite::{apply_rewrites, EntityRewrite, RewriteField};

use crate::error::AgentError;
use crate::model::{CommonBlock, DataV4, EntityId, Metric};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// `ParseV4Payload`, spec §4.7/§8 "Boundary behaviours". Runs ahead of
/// either emitter mode: an empty payload or a disabled `protocol_v4` flag
/// aborts the whole payload before any per-dataset work starts, with no
/// emission at all.
pub fn parse_v4_payload(payload: &DataV4, flags: &dyn FeatureFlagSource) -> Result<(), AgentError> {
    if payload.data.is_empty() {
        return Err(AgentError::NoContentToParse);
    }
    if !flags.is_enabled(dispatcher::FLAG_PROTOCOL_V4) {
        return Err(AgentError::ProtocolV4NotEnabled);
    }
    Ok(())
}

/// Everything downstream of "resolve an ID" that both emitter modes need:
/// dimensional-metric submission, inventory routing, and event routing.
/// Kept as a trait so tests can stub the Agent Context's `SendData` path
/// (spec §4.1) without constructing a full context.
#[async_trait]
pub trait EmitTransport: Send + Sync {
    async fn send_metrics(&self, common: CommonBlock, metrics: Vec<Metric>) -> Result<(), AgentError>;
    async fn send_inventory(&self, entity_key: &str, dataset: Value) -> Result<(), AgentError>;
    async fn send_event(&self, event: Value) -> Result<(), AgentError>;
}

/// Result of emitting one payload: how many datasets were dropped and why,
/// aggregated into the single log line spec §4.7 requires ("N out of M
/// datasets could not be emitted. Reasons: ...").
#[derive(Debug, Default)]
pub struct EmitSummary {
    pub total: usize,
    pub failures: Vec<String>,
}

impl EmitSummary {
    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.failures.push(reason.into());
    }

    pub fn log_if_any_failed(&self) {
        if self.failures.is_empty() {
            return;
        }
        tracing::warn!(
            failed = self.failures.len(),
            total = self.total,
            "{} out of {} datasets could not be emitted. Reasons: {}",
            self.failures.len(),
            self.total,
            self.failures.join("; ")
        );
    }
}

/// Shared integration-level context applied to every event in a payload.
pub struct EventContext<'a> {
    pub integration_user: &'a str,
}

/// Enriches one raw event object per spec §4.7 "Event emission". Returns
/// `Err` with the drop reason when the event is malformed; callers must
/// drop only that event, never the whole dataset.
pub fn enrich_event(
    event: &Value,
    ctx: &EventContext,
    entity_metadata: &std::collections::BTreeMap<String, Value>,
    entity_id: Option<EntityId>,
) -> Result<Value, String> {
    let obj = event
        .as_object()
        .ok_or_else(|| "event is not a JSON object".to_string())?;
    let has_summary = obj
        .get("summary")
        .and_then(Value::as_str)
        .map(|s| !s.is_empty())
        .unwrap_or(false);
    if !has_summary {
        return Err("event is missing a required non-empty \"summary\" field".to_string());
    }

    let mut out: Map<String, Value> = obj.clone();
    out.insert("eventType".to_string(), json!("InfrastructureEvent"));
    out.entry("category".to_string())
        .or_insert_with(|| json!("notifications"));
    out.insert("integrationUser".to_string(), json!(ctx.integration_user));
    for (key, value) in entity_metadata {
        out.entry(format!("entity.{key}")).or_insert_with(|| value.clone());
    }
    if let Some(id) = entity_id {
        out.insert(
            crate::model::RESERVED_ENTITY_ID_ATTR.to_string(),
            json!(id.to_string()),
        );
    }
    Ok(Value::Object(out))
}
