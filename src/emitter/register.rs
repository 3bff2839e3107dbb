//! Register-mode emitter, spec §4.7.

use super::{apply_rewrites, enrich_event, EmitSummary, EmitTransport, EntityRewrite, EventContext};
use crate::id_provider::IdProvider;
use crate::model::{DataV4, EntityRegisterRequest, RESERVED_ENTITY_ID_ATTR};
use serde_json::json;

pub struct RegisterEmitter<'a> {
    id_provider: &'a IdProvider,
    transport: &'a dyn EmitTransport,
    rewrites: Vec<EntityRewrite>,
    agent_short_name: String,
    agent_entity_id: u64,
    integration_user: String,
}

impl<'a> RegisterEmitter<'a> {
    pub fn new(
        id_provider: &'a IdProvider,
        transport: &'a dyn EmitTransport,
        rewrites: Vec<EntityRewrite>,
        agent_short_name: impl Into<String>,
        agent_entity_id: u64,
        integration_user: impl Into<String>,
    ) -> Self {
        Self {
            id_provider,
            transport,
            rewrites,
            agent_short_name: agent_short_name.into(),
            agent_entity_id,
            integration_user: integration_user.into(),
        }
    }

    /// `emit(payload)`: resolves entity IDs via §4.5, decorates, then routes
    /// inventory/event/metric emission per dataset (spec §4.7 "Register mode").
    pub async fn emit(&self, mut payload: DataV4) -> EmitSummary {
        let mut summary = EmitSummary {
            total: payload.data.len(),
            failures: Vec::new(),
        };

        let requests: Vec<EntityRegisterRequest> = payload
            .data
            .iter()
            .map(|d| EntityRegisterRequest {
                name: d.entity.name.clone(),
                entity_type: d.entity.entity_type.clone(),
                display_name: d.entity.display_name.clone(),
                metadata: d.entity.metadata.clone(),
            })
            .collect();
        let (registered, unregistered) = self.id_provider.resolve(self.agent_entity_id, &requests).await;
        for entity in &unregistered {
            summary.record_failure(format!("{}: {}", entity.entity, entity.error));
        }

        for dataset in payload.data.iter_mut() {
            let entity_id = registered.get(&dataset.entity.name).copied();
            if entity_id.is_none() {
                // Already recorded in `unregistered`; skip this dataset entirely.
                continue;
            }
            let entity_id = entity_id.unwrap();

            apply_rewrites(&mut dataset.entity, &self.rewrites, &self.agent_short_name);
            // Spec §8 boundary behaviour: ignore_entity=true still emits
            // metrics/inventory/events, just without the resolved ID attached.
            if !dataset.ignore_entity {
                dataset.common.attributes.insert(
                    RESERVED_ENTITY_ID_ATTR.to_string(),
                    json!(entity_id.to_string()),
                );
            }

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
                match enrich_event(event, &ctx, &dataset.entity.metadata, Some(entity_id)) {
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
