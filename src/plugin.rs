//! Plugin capability set, spec §9 design note: "model as a capability set
//! `{Run, Kill, Id, IsExternal, GetExternalPluginName, ScheduleHealthCheck}`
//! rather than inheritance". Reconnect capability is a separate mix-in
//! test on the Agent Context, not part of this trait.

use crate::error::AgentError;
use crate::model::PluginId;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait Plugin: Send + Sync {
    fn id(&self) -> PluginId;

    /// Invoked exactly once per plugin lifecycle (spec §3 "Plugin").
    /// Reconnect-capable plugins are re-invoked by the context whenever
    /// identity changes (spec §4.1 `Reconnect`); this method body re-runs
    /// from the top each time.
    async fn run(&self) -> Result<(), AgentError>;

    /// Requested at termination; must return promptly once the context's
    /// grace period (§5) elapses.
    async fn kill(&self);

    fn is_external(&self) -> bool {
        false
    }

    fn external_plugin_name(&self) -> Option<&str> {
        None
    }

    /// Health-check cadence, if the plugin schedules one; `None` means no
    /// periodic health check is registered.
    fn schedule_health_check(&self) -> Option<Duration> {
        None
    }
}
