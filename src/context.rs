//! Agent Context & Plugin Runner, spec §4.1 (C9).
//!
//! Grounded on the teacher's `AppState` (`lib.rs`): process-wide shared
//! state wrapped in cheap `Arc` handles, passed explicitly rather than
//! reached for through globals (spec §9 "no global state beyond the Agent
//! Context").

use crate::error::{AgentError, AgentResult};
use crate::identity::IdentityLookup;
use crate::plugin::Plugin;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

struct RegisteredPlugin {
    plugin: Arc<dyn Plugin>,
    reconnecting: bool,
}

/// Owns process-wide state: configuration, identity lookup, the reconnect
/// broadcast, the plugin registry, termination, and outdated-entity
/// reaping (spec §4.1).
pub struct AgentContext {
    data_dir: PathBuf,
    version: String,
    identity: RwLock<IdentityLookup>,
    plugins: Mutex<Vec<RegisteredPlugin>>,
    reconnect_tx: broadcast::Sender<()>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
    termination_grace: Duration,
}

impl AgentContext {
    pub fn new(data_dir: impl Into<PathBuf>, version: impl Into<String>, termination_grace: Duration) -> Self {
        let (reconnect_tx, _) = broadcast::channel(16);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            data_dir: data_dir.into(),
            version: version.into(),
            identity: RwLock::new(IdentityLookup::new()),
            plugins: Mutex::new(Vec::new()),
            reconnect_tx,
            cancel_tx,
            cancel_rx,
            termination_grace,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn set_identity_source(&self, source: &'static str, value: impl Into<String>) {
        self.identity.write().unwrap().set(source, value);
    }

    pub fn short_name(&self) -> Option<String> {
        self.identity.read().unwrap().short_name().map(str::to_string)
    }

    pub fn cancellation(&self) -> watch::Receiver<bool> {
        self.cancel_rx.clone()
    }

    /// `RegisterPlugin(p)`, spec §4.1. `reconnecting` mirrors the context's
    /// separate `AddReconnecting` mix-in test (spec §9 design note).
    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>, reconnecting: bool) {
        self.plugins.lock().unwrap().push(RegisteredPlugin { plugin, reconnecting });
    }

    /// `Run()`, spec §4.1: starts every plugin concurrently, then blocks
    /// until cancellation. Returns success even if individual plugins
    /// faulted — a panicking plugin must not take down the agent (spec §7).
    pub async fn run(&self) -> AgentResult<()> {
        let registered: Vec<RegisteredPlugin> = {
            let mut guard = self.plugins.lock().unwrap();
            std::mem::take(&mut *guard)
        };

        let mut handles = Vec::with_capacity(registered.len());
        for entry in registered {
            let plugin = entry.plugin.clone();
            let mut reconnect_rx = self.reconnect_tx.subscribe();
            let mut cancel_rx = self.cancel_rx.clone();
            let reconnecting = entry.reconnecting;
            let id = plugin.id();

            let handle = tokio::spawn(async move {
                loop {
                    if let Err(err) = plugin.run().await {
                        tracing::warn!(plugin = %id.source(), error = %err, "plugin run returned an error");
                    }
                    if !reconnecting {
                        break;
                    }
                    tokio::select! {
                        _ = reconnect_rx.recv() => continue,
                        _ = cancel_rx.changed() => break,
                    }
                }
            });
            handles.push(handle);
        }

        let mut cancel_rx = self.cancel_rx.clone();
        while !*cancel_rx.borrow() {
            if cancel_rx.changed().await.is_err() {
                break;
            }
        }

        for handle in handles {
            if let Err(join_err) = handle.await {
                tracing::warn!(error = %join_err, "plugin task panicked; continuing shutdown");
            }
        }
        Ok(())
    }

    /// `Terminate()`, spec §4.1: kills every plugin exactly once, bounded
    /// by `termination_grace`, then signals cancellation.
    pub async fn terminate(&self) {
        let registered: Vec<Arc<dyn Plugin>> = self
            .plugins
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.plugin.clone())
            .collect();

        let handles: Vec<_> = registered
            .into_iter()
            .map(|p| tokio::spawn(async move { p.kill().await }))
            .collect();
        let _ = tokio::time::timeout(self.termination_grace, async {
            for h in handles {
                let _ = h.await;
            }
        })
        .await;

        let _ = self.cancel_tx.send(true);
    }

    /// `Reconnect()`, spec §4.1: one broadcast fans out to every
    /// reconnect-capable plugin without coalescing.
    pub fn reconnect(&self) {
        let _ = self.reconnect_tx.send(());
    }

    /// `removeOutdatedEntities(reporting)`, spec §4.1: deletes the
    /// per-plugin directories of any entity absent from `reporting`,
    /// via rename-then-remove (spec §5 "atomic directory deletion").
    pub fn remove_outdated_entities(&self, reporting: &HashSet<String>) -> AgentResult<()> {
        if !self.data_dir.exists() {
            return Ok(());
        }
        for category_entry in fs::read_dir(&self.data_dir).map_err(AgentError::Io)? {
            let category_entry = category_entry.map_err(AgentError::Io)?;
            if !category_entry.file_type().map_err(AgentError::Io)?.is_dir() {
                continue;
            }
            for entity_entry in fs::read_dir(category_entry.path()).map_err(AgentError::Io)? {
                let entity_entry = entity_entry.map_err(AgentError::Io)?;
                if !entity_entry.file_type().map_err(AgentError::Io)?.is_dir() {
                    continue;
                }
                let entity_name = entity_entry.file_name().to_string_lossy().to_string();
                if reporting.contains(&entity_name) {
                    continue;
                }
                let path = entity_entry.path();
                let deleting = path.with_extension("deleting");
                if fs::rename(&path, &deleting).is_ok() {
                    let _ = fs::remove_dir_all(&deleting);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::model::PluginId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct CountingPlugin {
        id: PluginId,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Plugin for CountingPlugin {
        fn id(&self) -> PluginId {
            self.id.clone()
        }
        async fn run(&self) -> AgentResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn kill(&self) {}
    }

    #[tokio::test]
    async fn run_invokes_every_registered_plugin_once() {
        let dir = tempdir().unwrap();
        let ctx = AgentContext::new(dir.path(), "1.0.0", Duration::from_secs(1));
        let runs = Arc::new(AtomicUsize::new(0));
        ctx.register_plugin(
            Arc::new(CountingPlugin {
                id: PluginId::new("inventory", "disk"),
                runs: runs.clone(),
            }),
            false,
        );

        let ctx = Arc::new(ctx);
        let ctx2 = ctx.clone();
        let handle = tokio::spawn(async move { ctx2.run().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.terminate().await;
        handle.await.unwrap().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_outdated_entities_deletes_unreported_directories() {
        let dir = tempdir().unwrap();
        let category_dir = dir.path().join("inventory");
        fs::create_dir_all(category_dir.join("stale-host")).unwrap();
        fs::create_dir_all(category_dir.join("fresh-host")).unwrap();

        let ctx = AgentContext::new(dir.path(), "1.0.0", Duration::from_secs(1));
        let mut reporting = HashSet::new();
        reporting.insert("fresh-host".to_string());
        ctx.remove_outdated_entities(&reporting).unwrap();

        assert!(!category_dir.join("stale-host").exists());
        assert!(category_dir.join("fresh-host").exists());
    }
}
