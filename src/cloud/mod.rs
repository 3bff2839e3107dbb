//! Cloud Harvester Detector, spec §4.8 (C1).
//!
//! Grounded on the teacher's `PluginPipeline` first-match evaluation
//! (`plugins/mod.rs`): an ordered list of candidates tried in sequence,
//! first success wins. Here the candidates are cloud-metadata harvesters
//! instead of blocking rules, and failure fans out into a retry scheduler
//! instead of a pass-through verdict.

pub mod alibaba;
pub mod aws;
pub mod azure;
pub mod gcp;
pub mod oci;
pub mod timeout;

pub use alibaba::AlibabaHarvester;
pub use aws::AwsHarvester;
pub use azure::AzureHarvester;
pub use gcp::GcpHarvester;
pub use oci::OciHarvester;
pub use timeout::Timeout;

use crate::error::AgentError;
use crate::model::CloudType;
use async_trait::async_trait;
use std::sync::RwLock;
use std::time::Duration;

/// One provider's metadata client, spec §4.8. Detection order across
/// providers is fixed: AWS → Azure → GCP → Alibaba → OCI.
#[async_trait]
pub trait CloudHarvester: Send + Sync {
    fn cloud_type(&self) -> CloudType;
    async fn get_instance_id(&self) -> Result<String, AgentError>;
}

#[derive(Debug, Default)]
struct DetectorState {
    cloud_type: Option<CloudType>,
    instance_id: Option<String>,
    in_progress: bool,
    initialized: bool,
    attempts: u32,
}

/// Orchestrates ordered best-hit detection with a retry/backoff scheduler,
/// spec §4.8. `GetCloudType()` reports `in_progress` while running,
/// `no_cloud` once every retry is exhausted, or the winning provider.
pub struct CloudDetector {
    harvesters: Vec<Box<dyn CloudHarvester>>,
    max_retries: u32,
    retry_backoff: Duration,
    disable_cloud_metadata: bool,
    state: RwLock<DetectorState>,
}

impl CloudDetector {
    pub fn new(
        harvesters: Vec<Box<dyn CloudHarvester>>,
        max_retries: u32,
        retry_backoff: Duration,
        disable_cloud_metadata: bool,
    ) -> Self {
        Self {
            harvesters,
            max_retries,
            retry_backoff,
            disable_cloud_metadata,
            state: RwLock::new(DetectorState {
                in_progress: !disable_cloud_metadata,
                ..Default::default()
            }),
        }
    }

    /// Default detection order: AWS, Azure, GCP, Alibaba, OCI, each hit
    /// against the real link-local metadata address.
    pub fn with_default_harvesters(max_retries: u32, retry_backoff: Duration, disable_cloud_metadata: bool) -> Self {
        Self::new(
            vec![
                Box::new(AwsHarvester::new()),
                Box::new(AzureHarvester::new()),
                Box::new(GcpHarvester::new()),
                Box::new(AlibabaHarvester::new()),
                Box::new(OciHarvester::new()),
            ],
            max_retries,
            retry_backoff,
            disable_cloud_metadata,
        )
    }

    pub fn cloud_type(&self) -> CloudType {
        let state = self.state.read().unwrap();
        if self.disable_cloud_metadata {
            return CloudType::NoCloud;
        }
        match state.cloud_type {
            Some(t) => t,
            None if state.in_progress => CloudType::InProgress,
            None => CloudType::NoCloud,
        }
    }

    pub fn instance_id(&self) -> Option<String> {
        self.state.read().unwrap().instance_id.clone()
    }

    pub fn attempts(&self) -> u32 {
        self.state.read().unwrap().attempts
    }

    /// Runs the synchronous attempt followed by up to `max_retries`
    /// backoff-delayed retries, spec §4.8. When `disable_cloud_metadata` is
    /// set, finalises to `no_cloud` immediately without any network call.
    pub async fn run(&self) {
        if self.disable_cloud_metadata {
            let mut state = self.state.write().unwrap();
            state.in_progress = false;
            state.initialized = true;
            return;
        }

        for attempt in 0..=self.max_retries {
            {
                let mut state = self.state.write().unwrap();
                state.attempts = attempt + 1;
            }
            for harvester in &self.harvesters {
                match harvester.get_instance_id().await {
                    Ok(instance_id) => {
                        let mut state = self.state.write().unwrap();
                        state.cloud_type = Some(harvester.cloud_type());
                        state.instance_id = Some(instance_id);
                        state.in_progress = false;
                        state.initialized = true;
                        return;
                    }
                    Err(err) => {
                        tracing::debug!(provider = ?harvester.cloud_type(), error = %err, "cloud metadata probe failed");
                    }
                }
            }
            if attempt < self.max_retries {
                tokio::time::sleep(self.retry_backoff).await;
            }
        }

        let mut state = self.state.write().unwrap();
        state.cloud_type = Some(CloudType::NoCloud);
        state.in_progress = false;
        state.initialized = true;
    }
}
