//! ID Provider, spec §4.5 / §8 (C6).
//!
//! Grounded on the teacher's `ExternalHttpPlugin` (`plugins/external_http.rs`):
//! a `reqwest::Client` held alongside config, issuing one POST per batch and
//! interpreting the JSON response defensively. The write-through cache uses
//! `dashmap::DashMap`, the same concurrent-map primitive the teacher uses
//! for its Aho-Corasick automaton cache in `util.rs`.

use crate::error::AgentError;
use crate::model::{EntityId, EntityRegisterRequest, EntityRegisterResponse};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisteredReason {
    ClientError,
    EntityError,
}

#[derive(Debug, Clone)]
pub struct UnregisteredEntity {
    pub entity: String,
    pub reason: UnregisteredReason,
    pub error: String,
}

/// Batched register transport, spec §6 "Register batch request". Kept as a
/// trait so tests can stub the HTTP boundary the way
/// `tests/external_http*.rs` stub the teacher's outbound calls.
#[async_trait]
pub trait RegisterClient: Send + Sync {
    async fn register_batch(
        &self,
        agent_entity_id: EntityId,
        entities: &[EntityRegisterRequest],
    ) -> Result<Vec<EntityRegisterResponse>, AgentError>;
}

/// `reqwest`-backed register client POSTing to the collector's batch
/// register endpoint (spec §6 submission conventions; exact route
/// documented in SPEC_FULL.md "Register client batching transport").
pub struct HttpRegisterClient {
    client: reqwest::Client,
    collector_url: String,
    license_key: String,
}

impl HttpRegisterClient {
    pub fn new(collector_url: impl Into<String>, license_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client"),
            collector_url: collector_url.into(),
            license_key: license_key.into(),
        }
    }
}

#[async_trait]
impl RegisterClient for HttpRegisterClient {
    async fn register_batch(
        &self,
        agent_entity_id: EntityId,
        entities: &[EntityRegisterRequest],
    ) -> Result<Vec<EntityRegisterResponse>, AgentError> {
        let url = format!("{}/identity/v1/register/batch", self.collector_url);
        let body = serde_json::json!({
            "agentEntityId": agent_entity_id,
            "entities": entities,
        });
        let resp = self
            .client
            .post(&url)
            .header("X-License-Key", &self.license_key)
            .json(&body)
            .send()
            .await
            .map_err(AgentError::transport)?;
        if !resp.status().is_success() {
            return Err(AgentError::Transport(format!(
                "register batch returned status {}",
                resp.status()
            )));
        }
        resp.json::<Vec<EntityRegisterResponse>>()
            .await
            .map_err(AgentError::transport)
    }
}

struct CacheEntry {
    id: EntityId,
    last_used: Instant,
}

pub struct IdProvider {
    client: Box<dyn RegisterClient>,
    cache: DashMap<String, CacheEntry>,
    cache_ttl: Duration,
    max_batch_size: usize,
}

impl IdProvider {
    pub fn new(client: Box<dyn RegisterClient>, cache_ttl: Duration, max_batch_size: usize) -> Self {
        Self {
            client,
            cache: DashMap::new(),
            cache_ttl,
            max_batch_size: max_batch_size.max(1),
        }
    }

    fn cache_get(&self, key: &str) -> Option<EntityId> {
        let mut entry = self.cache.get_mut(key)?;
        if entry.last_used.elapsed() > self.cache_ttl {
            return None;
        }
        entry.last_used = Instant::now();
        Some(entry.id)
    }

    fn cache_put(&self, key: String, id: EntityId) {
        self.cache.insert(
            key,
            CacheEntry {
                id,
                last_used: Instant::now(),
            },
        );
    }

    /// `resolve(agent_id, entities)`, spec §4.5.
    pub async fn resolve(
        &self,
        agent_entity_id: EntityId,
        entities: &[EntityRegisterRequest],
    ) -> (BTreeMap<String, EntityId>, Vec<UnregisteredEntity>) {
        let mut registered = BTreeMap::new();
        let mut unregistered = Vec::new();
        let mut misses = Vec::new();

        for entity in entities {
            match self.cache_get(&entity.name) {
                Some(id) => {
                    registered.insert(entity.name.clone(), id);
                }
                None => misses.push(entity.clone()),
            }
        }

        for batch in misses.chunks(self.max_batch_size) {
            match self.client.register_batch(agent_entity_id, batch).await {
                Err(err) => {
                    for entity in batch {
                        unregistered.push(UnregisteredEntity {
                            entity: entity.name.clone(),
                            reason: UnregisteredReason::ClientError,
                            error: err.to_string(),
                        });
                    }
                }
                Ok(responses) => {
                    for resp in responses {
                        match resp.err {
                            Some(err) if !err.is_empty() => {
                                unregistered.push(UnregisteredEntity {
                                    entity: resp.key,
                                    reason: UnregisteredReason::EntityError,
                                    error: err,
                                });
                            }
                            _ => {
                                self.cache_put(resp.key.clone(), resp.id);
                                registered.insert(resp.key, resp.id);
                            }
                        }
                    }
                }
            }
        }

        (registered, unregistered)
    }
}
