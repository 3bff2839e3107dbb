//! Core of a host-resident telemetry agent: plugin lifecycle, inventory
//! delta engine, dimensional-metric pipeline, and cloud/host identity
//! resolution. See DESIGN.md for the grounding of each module.

pub mod calculators;
pub mod cloud;
pub mod config;
pub mod connectivity;
pub mod context;
pub mod delta;
pub mod emitter;
pub mod error;
pub mod harvester;
pub mod id_provider;
pub mod identity;
pub mod metric_sender;
pub mod model;
pub mod plugin;
pub mod status;

pub use config::Config;
pub use context::AgentContext;
pub use error::{AgentError, AgentResult};

use std::sync::Arc;
use std::time::Duration;

/// Wires the long-lived collaborators a running agent needs: the Agent
/// Context, the cloud detector, and the status HTTP surface. Left for
/// `main.rs` to drive — registering concrete plugins and entering
/// `AgentContext::run` is a composition-root decision, not a library one.
pub struct Agent {
    pub context: Arc<AgentContext>,
    pub cloud: Arc<cloud::CloudDetector>,
    pub calculators: Arc<calculators::Calculators>,
    pub delta_store: Arc<delta::DeltaStore>,
}

impl Agent {
    pub fn new(config: &Config, data_dir: impl Into<std::path::PathBuf>, version: &str) -> AgentResult<Self> {
        let data_dir = data_dir.into();
        let context = Arc::new(AgentContext::new(
            data_dir.clone(),
            version.to_string(),
            Duration::from_secs(10),
        ));
        // The cloud detector's own retry budget is independent of the
        // connectivity prober's `startup_connection_retries` (spec §4.8 has
        // no dedicated config key; a small fixed budget matches its
        // "background scheduler, then give up" description).
        let cloud = Arc::new(cloud::CloudDetector::with_default_harvesters(
            3,
            Duration::from_secs(2),
            config.disable_cloud_metadata,
        ));
        let delta_store = Arc::new(delta::DeltaStore::new(
            data_dir,
            config.max_inventory_size,
            config.ignored_inventory_paths.clone(),
        )?);

        Ok(Self {
            context,
            cloud,
            calculators: Arc::new(calculators::Calculators::new()),
            delta_store,
        })
    }
}
