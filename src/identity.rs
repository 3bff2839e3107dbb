//! Host-identity source resolution, spec §3 "Identity Lookup" / §6
//! "Host-identity source priority".
//!
//! Grounded on the teacher's `Precomputed`/`EvalContext` pattern in
//! `util.rs`: a small immutable-once-built struct assembled from several
//! inputs, consulted cheaply afterwards.

use std::collections::HashMap;

/// Fixed priority order, highest first. Exact list from spec §6.
pub const PRIORITY_ORDER: &[&str] = &[
    "instance-id",
    "azure_vm_id",
    "gcp_vm_id",
    "alibaba_vm_id",
    "oci_vm_id",
    "display_name",
    "hostname",
];

/// Ordered mapping from host-source name to value. Empty values are never
/// stored; `resolve` always walks the fixed priority order regardless of
/// insertion order.
#[derive(Debug, Clone, Default)]
pub struct IdentityLookup {
    sources: HashMap<String, String>,
}

impl IdentityLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value for `source`. Empty values are skipped (spec §3).
    pub fn set(&mut self, source: &str, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        self.sources.insert(source.to_string(), value);
    }

    pub fn get(&self, source: &str) -> Option<&str> {
        self.sources.get(source).map(String::as_str)
    }

    /// Returns the first present, non-empty source in priority order along
    /// with its value. This is the agent's short name.
    pub fn resolve(&self) -> Option<(&'static str, &str)> {
        for source in PRIORITY_ORDER {
            if let Some(v) = self.sources.get(*source) {
                if !v.is_empty() {
                    return Some((source, v.as_str()));
                }
            }
        }
        None
    }

    pub fn short_name(&self) -> Option<&str> {
        self.resolve().map(|(_, v)| v)
    }
}
