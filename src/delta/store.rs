//! Inventory Delta Store, spec §4.2 (C3).
//!
//! Grounded on the teacher's `RotatingWriter` (`lib.rs`): an append-only
//! file wrapper that rotates and gzip-compresses old content. The Delta
//! Store reuses that exact rotate-then-compress idiom for archiving
//! deltas once a per-entity journal grows past `max_inventory_size`.

use crate::delta::diff::{compute_diff, is_empty_diff, strip_ignored_paths};
use crate::error::AgentError;
use crate::model::{PluginId, RawDelta, SYSTEM_ENTITY_BUCKET};
use dashmap::DashMap;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Replaces path-unsafe characters with `_`; an empty key maps to the
/// reserved `system` bucket (spec §4.2).
pub fn sanitize_entity_key(key: &str) -> String {
    if key.is_empty() {
        return SYSTEM_ENTITY_BUCKET.to_string();
    }
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

struct EntitySeries {
    next_id: AtomicU64,
    pending_count: AtomicU64,
    archive_index: AtomicU64,
}

pub struct DeltaStore {
    data_dir: PathBuf,
    max_inventory_size: u64,
    ignore_paths: HashSet<String>,
    series: DashMap<(String, String), EntitySeries>,
    write_lock: Mutex<()>,
}

impl DeltaStore {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        max_inventory_size: u64,
        ignore_paths: HashSet<String>,
    ) -> AgentResult<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            max_inventory_size,
            ignore_paths,
            series: DashMap::new(),
            write_lock: Mutex::new(()),
        })
    }

    fn entity_dir(&self, plugin: &PluginId, entity: &str) -> PathBuf {
        self.data_dir
            .join(&plugin.category)
            .join(sanitize_entity_key(entity))
    }

    fn snapshot_path(&self, plugin: &PluginId, entity: &str) -> PathBuf {
        self.entity_dir(plugin, entity)
            .join(format!("{}.json", plugin.term))
    }

    fn journal_path(&self, plugin: &PluginId, entity: &str) -> PathBuf {
        self.entity_dir(plugin, entity)
            .join(format!("{}.deltas.jsonl", plugin.term))
    }

    fn archive_path(&self, plugin: &PluginId, entity: &str, index: u64) -> PathBuf {
        self.entity_dir(plugin, entity)
            .join(format!("{}.deltas.{}.json.gz", plugin.term, index))
    }

    /// Sidecar tracking the next delta id to assign, written atomically
    /// alongside every append. Unlike the journal, `archive()` never
    /// deletes this file — it is the only thing `bootstrap_series` can
    /// rely on to keep ids monotonic across a restart that happens after
    /// an archive (spec §8 "Delta IDs are monotonic per (source, entity)").
    fn high_water_path(&self, plugin: &PluginId, entity: &str) -> PathBuf {
        self.entity_dir(plugin, entity)
            .join(format!("{}.next_id", plugin.term))
    }

    fn read_high_water(path: &Path) -> Option<u64> {
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    fn write_high_water_atomic(path: &Path, next_id: u64) -> AgentResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("next_id.tmp");
        fs::write(&tmp, next_id.to_string())?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_snapshot(path: &Path) -> AgentResult<Option<serde_json::Value>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write_snapshot_atomic(path: &Path, value: &serde_json::Value) -> AgentResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn current_time_secs() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    /// Reconstructs a series' counters after a restart. `next_id` comes
    /// from the `high_water` sidecar when present (it survives archiving);
    /// falling back to counting journal lines only covers state written
    /// before this sidecar existed. `archive_index` is reconstructed from
    /// the existing `*.deltas.N.json.gz` files so a restart after an
    /// archive doesn't reuse (and overwrite) an already-used index.
    fn bootstrap_series(&self, plugin: &PluginId, entity: &str, journal: &Path) -> EntitySeries {
        let high_water = self.high_water_path(plugin, entity);
        let pending = fs::read_to_string(journal)
            .map(|s| s.lines().filter(|l| !l.trim().is_empty()).count() as u64)
            .unwrap_or(0);
        let next_id = Self::read_high_water(&high_water).unwrap_or(pending + 1);
        EntitySeries {
            next_id: AtomicU64::new(next_id),
            pending_count: AtomicU64::new(pending),
            archive_index: AtomicU64::new(self.bootstrap_archive_index(plugin, entity)),
        }
    }

    fn bootstrap_archive_index(&self, plugin: &PluginId, entity: &str) -> u64 {
        let prefix = format!("{}.deltas.", plugin.term);
        fs::read_dir(self.entity_dir(plugin, entity))
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_suffix(".json.gz"))
                    .and_then(|idx| idx.parse::<u64>().ok())
            })
            .max()
            .unwrap_or(0)
    }

    /// Implements spec §4.2's `storePluginOutput` algorithm. Returns
    /// `Ok(None)` when the computed diff was empty (no delta produced).
    pub fn store_plugin_output(
        &self,
        plugin: &PluginId,
        entity: &str,
        dataset: &impl serde::Serialize,
    ) -> AgentResult<Option<RawDelta>> {
        let _guard = self.write_lock.lock().unwrap();

        let mut canonical = serde_json::to_value(dataset)?;
        strip_ignored_paths(&mut canonical, &self.ignore_paths);

        let snapshot_path = self.snapshot_path(plugin, entity);
        let prior = Self::read_snapshot(&snapshot_path)?;
        let diff = compute_diff(prior.as_ref(), &canonical);
        if is_empty_diff(&diff) {
            return Ok(None);
        }
        let full_diff = prior.is_none();

        Self::write_snapshot_atomic(&snapshot_path, &canonical)?;

        let key = (plugin.source(), entity.to_string());
        let journal = self.journal_path(plugin, entity);
        if !self.series.contains_key(&key) {
            let bootstrapped = self.bootstrap_series(plugin, entity, &journal);
            self.series.insert(key.clone(), bootstrapped);
        }
        let series = self.series.get(&key).unwrap();
        let id = series.next_id.fetch_add(1, Ordering::SeqCst);
        Self::write_high_water_atomic(&self.high_water_path(plugin, entity), id + 1)?;

        let raw_delta = RawDelta {
            source: plugin.source(),
            id,
            timestamp: Self::current_time_secs(),
            diff,
            full_diff,
        };

        self.append_journal(&journal, &raw_delta)?;
        let pending = series.pending_count.fetch_add(1, Ordering::SeqCst) + 1;

        if pending > self.max_inventory_size {
            drop(series);
            self.archive(plugin, entity, &key, &journal, &snapshot_path)?;
        }

        Ok(Some(raw_delta))
    }

    fn append_journal(&self, journal: &Path, delta: &RawDelta) -> AgentResult<()> {
        if let Some(parent) = journal.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(journal)?;
        writeln!(file, "{}", serde_json::to_string(delta)?)?;
        Ok(())
    }

    /// Flushes the journal into a gzip archive (spec §4.2 step 5) and
    /// removes the current snapshot so the next store forces a full
    /// re-snapshot, per §4.2's "start a fresh full snapshot on next pass".
    fn archive(
        &self,
        plugin: &PluginId,
        entity: &str,
        key: &(String, String),
        journal: &Path,
        snapshot_path: &Path,
    ) -> AgentResult<()> {
        let content = fs::read(journal).unwrap_or_default();
        let series = self.series.get(key).unwrap();
        let index = series.archive_index.fetch_add(1, Ordering::SeqCst) + 1;
        let archive_path = self.archive_path(plugin, entity, index);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&content)?;
        let compressed = encoder.finish()?;
        fs::write(&archive_path, compressed)?;

        let _ = fs::remove_file(journal);
        let _ = fs::remove_file(snapshot_path);
        series.pending_count.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Removes the on-disk directory for `entity` under `category`,
    /// rename-then-remove so a concurrent reader never observes a
    /// half-deleted directory (spec §5).
    pub fn remove_entity(&self, category: &str, entity: &str) -> AgentResult<()> {
        let dir = self.data_dir.join(category).join(sanitize_entity_key(entity));
        if !dir.exists() {
            return Ok(());
        }
        let tmp = dir.with_extension("deleting");
        fs::rename(&dir, &tmp)?;
        fs::remove_dir_all(&tmp)?;
        Ok(())
    }
}

type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn plugin() -> PluginId {
        PluginId::new("process", "inventory")
    }

    #[test]
    fn first_store_is_a_full_diff_and_persists_snapshot() {
        let dir = tempdir().unwrap();
        let store = DeltaStore::new(dir.path(), 1000, HashSet::new()).unwrap();
        let delta = store
            .store_plugin_output(&plugin(), "host-1", &json!({"version": "1.0"}))
            .unwrap()
            .expect("non-empty diff");
        assert!(delta.full_diff);
        assert_eq!(delta.id, 1);

        let snapshot_path = store.snapshot_path(&plugin(), "host-1");
        let persisted: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(snapshot_path).unwrap()).unwrap();
        assert_eq!(persisted, json!({"version": "1.0"}));
    }

    #[test]
    fn unchanged_dataset_produces_no_delta() {
        let dir = tempdir().unwrap();
        let store = DeltaStore::new(dir.path(), 1000, HashSet::new()).unwrap();
        store
            .store_plugin_output(&plugin(), "host-1", &json!({"version": "1.0"}))
            .unwrap();
        let second = store
            .store_plugin_output(&plugin(), "host-1", &json!({"version": "1.0"}))
            .unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn ids_are_monotonic_per_source_and_entity() {
        let dir = tempdir().unwrap();
        let mut ignore = HashSet::new();
        ignore.insert("ignored".to_string());
        let store = DeltaStore::new(dir.path(), 1000, ignore).unwrap();
        let d1 = store
            .store_plugin_output(&plugin(), "host-1", &json!({"version": "1.0"}))
            .unwrap()
            .unwrap();
        let d2 = store
            .store_plugin_output(&plugin(), "host-1", &json!({"version": "2.0"}))
            .unwrap()
            .unwrap();
        assert_eq!(d1.id, 1);
        assert_eq!(d2.id, 2);
        assert!(!d2.full_diff);
        assert_eq!(d2.diff, json!({"version": "2.0"}));
    }

    #[test]
    fn ignore_path_is_applied_before_diffing() {
        let dir = tempdir().unwrap();
        let mut ignore = HashSet::new();
        ignore.insert("noisy".to_string());
        let store = DeltaStore::new(dir.path(), 1000, ignore).unwrap();
        store
            .store_plugin_output(&plugin(), "host-1", &json!({"version": "1.0", "noisy": "a"}))
            .unwrap();
        let second = store
            .store_plugin_output(&plugin(), "host-1", &json!({"version": "1.0", "noisy": "b"}))
            .unwrap();
        assert!(second.is_none(), "ignored field must not trigger a delta");
    }

    #[test]
    fn exceeding_max_inventory_size_archives_and_forces_full_diff() {
        let dir = tempdir().unwrap();
        let store = DeltaStore::new(dir.path(), 2, HashSet::new()).unwrap();
        for i in 0..4 {
            store
                .store_plugin_output(&plugin(), "host-1", &json!({"n": i}))
                .unwrap();
        }
        let archive = store.archive_path(&plugin(), "host-1", 1);
        assert!(archive.exists(), "archive file should have been written");

        let next = store
            .store_plugin_output(&plugin(), "host-1", &json!({"n": 99}))
            .unwrap()
            .unwrap();
        assert!(next.full_diff, "snapshot should have been reset after archiving");
    }

    #[test]
    fn next_id_survives_a_restart_after_an_archive() {
        let dir = tempdir().unwrap();
        {
            let store = DeltaStore::new(dir.path(), 2, HashSet::new()).unwrap();
            for i in 0..4 {
                store
                    .store_plugin_output(&plugin(), "host-1", &json!({"n": i}))
                    .unwrap();
            }
        }
        // Archived after the 3rd store; the journal that `bootstrap_series`
        // used to derive `next_id` from is gone — a fresh `DeltaStore`
        // (simulating a process restart) must still continue from the
        // high-water mark, not restart the id sequence at 1.
        let store = DeltaStore::new(dir.path(), 2, HashSet::new()).unwrap();
        let delta = store
            .store_plugin_output(&plugin(), "host-1", &json!({"n": 99}))
            .unwrap()
            .unwrap();
        assert_eq!(delta.id, 5);

        let first_archive = store.archive_path(&plugin(), "host-1", 1);
        let first_archive_contents = fs::read(&first_archive).unwrap();
        store
            .store_plugin_output(&plugin(), "host-1", &json!({"n": 100}))
            .unwrap();

        let second_archive = store.archive_path(&plugin(), "host-1", 2);
        assert!(
            second_archive.exists(),
            "archiving after a restart must continue the index sequence, not restart at 1"
        );
        assert_eq!(
            fs::read(&first_archive).unwrap(),
            first_archive_contents,
            "the pre-restart archive must not be overwritten by a post-restart archive reusing its index"
        );
    }

    #[test]
    fn empty_entity_key_maps_to_system_bucket() {
        assert_eq!(sanitize_entity_key(""), "system");
        assert_eq!(sanitize_entity_key("a/b c"), "a_b_c");
    }

    #[test]
    fn remove_entity_deletes_directory() {
        let dir = tempdir().unwrap();
        let store = DeltaStore::new(dir.path(), 1000, HashSet::new()).unwrap();
        store
            .store_plugin_output(&plugin(), "host-1", &json!({"a": 1}))
            .unwrap();
        let entity_dir = store.entity_dir(&plugin(), "host-1");
        assert!(entity_dir.exists());
        store.remove_entity("process", "host-1").unwrap();
        assert!(!entity_dir.exists());
    }
}
