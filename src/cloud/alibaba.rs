//! Alibaba Cloud metadata harvester, spec §4.8 / §6.

use crate::error::AgentError;
use crate::model::CloudType;
use std::time::Duration;

use super::CloudHarvester;

const DEFAULT_BASE_URL: &str = "http://169.254.169.254";

pub struct AlibabaHarvester {
    client: reqwest::Client,
    base_url: String,
}

impl AlibabaHarvester {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(2))
                .build()
                .expect("failed to build reqwest client"),
            base_url: base_url.into(),
        }
    }
}

impl Default for AlibabaHarvester {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CloudHarvester for AlibabaHarvester {
    fn cloud_type(&self) -> CloudType {
        CloudType::Alibaba
    }

    async fn get_instance_id(&self) -> Result<String, AgentError> {
        let resp = self
            .client
            .get(format!("{}/latest/dynamic/instance-identity/document", self.base_url))
            .send()
            .await
            .map_err(AgentError::transport)?;
        if !resp.status().is_success() {
            return Err(AgentError::Transport(format!(
                "Alibaba instance-identity document returned status {}",
                resp.status()
            )));
        }
        let doc: serde_json::Value = resp.json().await.map_err(AgentError::transport)?;
        doc.get("instance-id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| AgentError::Parse("Alibaba instance-identity document missing instance-id".into()))
    }
}
