//! No-register-mode emitter, spec §4.7: same pipeline as the register
//! emitter but without ID resolution; entities carry no `nr.entity.id` and
//! are synthesised server-side.

use super::{apply_rewrites, enrich_event, EmitSummary, EmitTransport, EntityRewrite, EventContext};
use crate::model::DataV4;
use serde_json::json;

pub struct NoRegisterEmitter<'a> {
    transport: &'a dyn EmitTransport,
    rewrites: Vec<EntityRewrite>,
    agent_short_name: String,
    integration_user: String,
}

impl<'a> NoRegisterEmitter<'a> {
    pub fn new(
        transport: &'a dyn EmitTransport,
        rewrites: Vec<EntityRewrite>,
        agent_short_name: impl Into<String>,
        integration_user: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            rewrites,
            agent_short_name: agent_short_name.into(),
            integration_user: integration_user.into(),
        }
    }

    pub async fn emit(&self, mut payload: DataV4) -> EmitSummary {
        let mut summary = EmitSummary {
            total: payload.data.len(),
            failures: Vec::new(),
        };

        for dataset in payload.data.iter_mut() {
            apply_rewrites(&mut dataset.entity, &self.rewrites, &self.agent_short_name);

            if !dataset.inventory.is_empty() {
                let inventory_payload = json!({
                    "integrationUser": self.integration_user,
                    "integration": {
                        "name": payload.integration.name,
                        "version": payload.integration.version,
                    },
                    "agent": self.agent_short_name,
                    "items": dataset.inventory,
                });
                if let Err(err) = self
                    .transport
                    .send_inventory(&dataset.entity.name, inventory_payload)
                    .await
                {
                    summary.record_failure(format!("{}: {}", dataset.entity.name, err));
                    continue;
                }
            }

            let ctx = EventContext {
                integration_user: &self.integration_user,
            };
            for event in &dataset.events {
                match enrich_event(event, &ctx, &dataset.entity.metadata, None) {
                    Ok(enriched) => {
                        if let Err(err) = self.transport.send_event(enriched).await {
                            tracing::warn!(entity = %dataset.entity.name, error = %err, "failed to emit event");
                        }
                    }
                    Err(reason) => {
                        tracing::warn!(entity = %dataset.entity.name, reason = %reason, "dropping malformed event");
                    }
                }
            }

            if !dataset.metrics.is_empty() {
                if let Err(err) = self
                    .transport
                    .send_metrics(dataset.common.clone(), dataset.metrics.clone())
                    .await
                {
                    summary.record_failure(format!("{}: {}", dataset.entity.name, err));
                }
            }
        }

        summary.log_if_any_failed();
        summary
    }
}
