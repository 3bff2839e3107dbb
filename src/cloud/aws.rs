//! AWS IMDSv2 harvester, spec §4.8 / §6.

use crate::error::AgentError;
use crate::model::CloudType;
use std::sync::Mutex;
use std::time::Duration;

use super::{CloudHarvester, Timeout};

const DEFAULT_BASE_URL: &str = "http://169.254.169.254";
const TOKEN_TTL_SECS: u64 = 21600;

pub struct AwsHarvester {
    client: reqwest::Client,
    base_url: String,
    token: Mutex<Option<String>>,
    token_timeout: Mutex<Timeout>,
}

impl AwsHarvester {
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
            token: Mutex::new(None),
            token_timeout: Mutex::new(Timeout::new(Duration::from_secs(TOKEN_TTL_SECS))),
        }
    }

    async fn token(&self) -> Result<String, AgentError> {
        let needs_refresh = self.token_timeout.lock().unwrap().is_expired();
        if !needs_refresh {
            if let Some(token) = self.token.lock().unwrap().clone() {
                return Ok(token);
            }
        }
        let resp = self
            .client
            .put(format!("{}/latest/api/token", self.base_url))
            .header("X-aws-ec2-metadata-token-ttl-seconds", TOKEN_TTL_SECS.to_string())
            .send()
            .await
            .map_err(AgentError::transport)?;
        if !resp.status().is_success() {
            return Err(AgentError::Transport(format!(
                "IMDSv2 token request returned status {}",
                resp.status()
            )));
        }
        let token = resp.text().await.map_err(AgentError::transport)?;
        *self.token.lock().unwrap() = Some(token.clone());
        self.token_timeout.lock().unwrap().mark_fetched();
        Ok(token)
    }
}

impl Default for AwsHarvester {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CloudHarvester for AwsHarvester {
    fn cloud_type(&self) -> CloudType {
        CloudType::Aws
    }

    async fn get_instance_id(&self) -> Result<String, AgentError> {
        let token = self.token().await?;
        let resp = self
            .client
            .get(format!("{}/latest/dynamic/instance-identity/document", self.base_url))
            .header("X-aws-ec2-metadata-token", token)
            .send()
            .await
            .map_err(AgentError::transport)?;
        if !resp.status().is_success() {
            return Err(AgentError::Transport(format!(
                "AWS instance-identity document returned status {}",
                resp.status()
            )));
        }
        let doc: serde_json::Value = resp.json().await.map_err(AgentError::transport)?;
        doc.get("instanceId")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| AgentError::Parse("AWS instance-identity document missing instanceId".into()))
    }
}
