//! Bulk Buffer, spec §4.3 / §8 (C4).
//!
//! Single-consumer by contract, not by construction: like the teacher's
//! `RotatingWriter` (mutated only behind a caller-held lock in
//! `TelemetrySink`), this type does not take an internal mutex; callers
//! that need concurrent access must wrap it themselves.

use crate::error::AgentError;
use crate::model::{EntityKey, PostDeltaBody};
use std::collections::HashMap;

pub struct BulkBuffer {
    capacity: usize,
    current_size: usize,
    contents: HashMap<EntityKey, PostDeltaBody>,
}

impl BulkBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            current_size: 0,
            contents: HashMap::new(),
        }
    }

    /// Upper-bound byte-size estimate of a body: its serialised JSON length.
    /// Never underestimates, satisfying spec §4.3.
    fn estimate_size(body: &PostDeltaBody) -> Result<usize, AgentError> {
        Ok(serde_json::to_vec(body)?.len())
    }

    /// Adds `body` under `entity`. On any error the buffer is left
    /// completely unchanged (spec §4.3, §8 invariant).
    pub fn add(&mut self, entity: EntityKey, body: PostDeltaBody) -> Result<(), AgentError> {
        if self.contents.contains_key(&entity) {
            return Err(AgentError::DuplicateEntity(entity));
        }
        let size = Self::estimate_size(&body)?;
        if self.current_size + size > self.capacity {
            return Err(AgentError::Capacity {
                needed: size,
                available: self.capacity.saturating_sub(self.current_size),
            });
        }
        self.current_size += size;
        self.contents.insert(entity, body);
        Ok(())
    }

    pub fn get(&self, entity: &str) -> Option<&PostDeltaBody> {
        self.contents.get(entity)
    }

    pub fn as_slice(&self) -> Vec<&PostDeltaBody> {
        self.contents.values().collect()
    }

    pub fn clear(&mut self) {
        self.contents.clear();
        self.current_size = 0;
    }

    pub fn entries(&self) -> usize {
        self.contents.len()
    }

    pub fn current_size(&self) -> usize {
        self.current_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawDelta;

    fn body(n: u64) -> PostDeltaBody {
        PostDeltaBody {
            external_keys: vec![],
            is_agent: false,
            deltas: vec![RawDelta {
                source: "test/plugin".into(),
                id: n,
                timestamp: 0,
                diff: serde_json::json!({"k": "v"}),
                full_diff: true,
            }],
        }
    }

    #[test]
    fn capacity_scenario_from_spec() {
        let size = BulkBuffer::estimate_size(&body(1)).unwrap();
        let capacity = (size as f64 * 2.5) as usize;
        let mut buf = BulkBuffer::new(capacity);

        buf.add("entity1".into(), body(1)).unwrap();
        buf.add("entity2".into(), body(2)).unwrap();
        let err = buf.add("entity3".into(), body(3));
        assert!(matches!(err, Err(AgentError::Capacity { .. })));
        assert!(buf.get("entity3").is_none());
        assert_eq!(buf.entries(), 2);

        buf.clear();
        assert_eq!(buf.entries(), 0);
        assert_eq!(buf.current_size(), 0);
        buf.add("entity3".into(), body(3)).unwrap();
        assert!(buf.get("entity1").is_none());
        assert!(buf.get("entity2").is_none());
        assert!(buf.get("entity3").is_some());
    }

    #[test]
    fn duplicate_add_fails_without_mutation() {
        let mut buf = BulkBuffer::new(1_000_000);
        buf.add("entity1".into(), body(1)).unwrap();
        let size_before = buf.current_size();
        let err = buf.add("entity1".into(), body(2));
        assert!(matches!(err, Err(AgentError::DuplicateEntity(_))));
        assert_eq!(buf.current_size(), size_before);
        assert_eq!(buf.entries(), 1);
    }

    #[test]
    fn failed_add_never_changes_current_size() {
        let mut buf = BulkBuffer::new(10);
        let before = buf.current_size();
        let err = buf.add("entity1".into(), body(1));
        assert!(err.is_err());
        assert_eq!(buf.current_size(), before);
        assert_eq!(buf.entries(), 0);
    }
}
