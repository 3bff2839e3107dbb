//! Harvester abstraction, spec GLOSSARY: "an abstraction over a remote
//! metric/event ingestion client; submits batches on a period."
//!
//! Grounded on the teacher's `TelemetrySink` (`lib.rs`): a cheap `Clone`
//! handle wrapping shared writer state, lazily initialised and safe to pass
//! around widely. Here the "writer" is an outbound HTTP submission instead
//! of a rotating file, matching spec §6's dimensional-metric submission
//! contract.

use crate::error::AgentError;
use crate::model::{CommonBlock, Metric};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// One batch of already-converted transport metrics plus the common
/// attributes/timing to apply to entries lacking their own (spec §4.6
/// step 3, "one 'infra metrics' batch").
#[derive(Debug, Clone)]
pub struct InfraMetricsBatch {
    pub common: CommonBlock,
    pub metrics: Vec<Metric>,
}

#[async_trait]
pub trait Harvester: Send + Sync {
    async fn submit_infra_metrics(&self, batch: InfraMetricsBatch) -> Result<(), AgentError>;
}

/// `reqwest`-backed harvester, POSTing to `<metric_api_url>` with the
/// headers from spec §6 ("Dimensional-metric submission"). A leading
/// `Api-Key` header is never set here; only `X-License-Key` and
/// `X-NRI-Agent-Entity-Id` are attached, satisfying "a leading `Api-Key`
/// header, if present, MUST be stripped before sending" by construction.
pub struct HttpHarvester {
    client: reqwest::Client,
    metric_api_url: String,
    license_key: String,
    agent_entity_id: Mutex<String>,
}

impl HttpHarvester {
    pub fn new(metric_api_url: impl Into<String>, license_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("failed to build reqwest client"),
            metric_api_url: metric_api_url.into(),
            license_key: license_key.into(),
            agent_entity_id: Mutex::new(String::new()),
        }
    }

    pub fn set_agent_entity_id(&self, id: impl Into<String>) {
        *self.agent_entity_id.lock().unwrap() = id.into();
    }
}

#[async_trait]
impl Harvester for HttpHarvester {
    async fn submit_infra_metrics(&self, batch: InfraMetricsBatch) -> Result<(), AgentError> {
        let agent_id = self.agent_entity_id.lock().unwrap().clone();
        let body = serde_json::json!({
            "common": batch.common,
            "metrics": batch.metrics,
        });
        let resp = self
            .client
            .post(&self.metric_api_url)
            .header("X-License-Key", &self.license_key)
            .header("X-NRI-Agent-Entity-Id", agent_id)
            .json(&body)
            .send()
            .await
            .map_err(AgentError::transport)?;
        if !resp.status().is_success() {
            return Err(AgentError::Transport(format!(
                "metric submission returned status {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// Wraps a `Harvester` so construction can be deferred until the first
/// batch is actually sent (spec §1 "lazily-initialised remote harvester").
pub struct LazyHarvester<F>
where
    F: Fn() -> Box<dyn Harvester> + Send + Sync,
{
    factory: F,
    inner: tokio::sync::OnceCell<Box<dyn Harvester>>,
}

impl<F> LazyHarvester<F>
where
    F: Fn() -> Box<dyn Harvester> + Send + Sync,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            inner: tokio::sync::OnceCell::new(),
        }
    }

    pub async fn submit(&self, batch: InfraMetricsBatch) -> Result<(), AgentError> {
        let harvester = self
            .inner
            .get_or_init(|| async { (self.factory)() })
            .await;
        harvester.submit_infra_metrics(batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHarvester(Arc<AtomicUsize>);

    #[async_trait]
    impl Harvester for CountingHarvester {
        async fn submit_infra_metrics(&self, _batch: InfraMetricsBatch) -> Result<(), AgentError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn lazy_harvester_initialises_once() {
        let init_count = Arc::new(AtomicUsize::new(0));
        let submit_count = Arc::new(AtomicUsize::new(0));
        let init_count2 = init_count.clone();
        let submit_count2 = submit_count.clone();
        let lazy = LazyHarvester::new(move || {
            init_count2.fetch_add(1, Ordering::SeqCst);
            Box::new(CountingHarvester(submit_count2.clone())) as Box<dyn Harvester>
        });

        let batch = InfraMetricsBatch {
            common: CommonBlock::default(),
            metrics: vec![],
        };
        lazy.submit(batch.clone()).await.unwrap();
        lazy.submit(batch).await.unwrap();
        assert_eq!(init_count.load(Ordering::SeqCst), 1);
        assert_eq!(submit_count.load(Ordering::SeqCst), 2);
    }
}
