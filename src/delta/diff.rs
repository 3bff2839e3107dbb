//! Structural JSON diffing used by the Delta Store (spec §4.2 step 3).

use serde_json::{Map, Value};
use std::collections::HashSet;

/// Marker inserted for keys present in the old snapshot but absent from the
/// new one, since a removed key can't be represented as "new value".
pub const DELETED_MARKER: &str = "__deleted__";

/// Computes a structural diff between `old` and `new`. `old = None` means
/// no prior snapshot existed, in which case the whole of `new` is the diff
/// (a "full diff", spec §4.2 step 4).
pub fn compute_diff(old: Option<&Value>, new: &Value) -> Value {
    match old {
        None => new.clone(),
        Some(old) => diff_value(old, new),
    }
}

fn diff_value(old: &Value, new: &Value) -> Value {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let mut out = Map::new();
            for (key, new_val) in new_map {
                match old_map.get(key) {
                    None => {
                        out.insert(key.clone(), new_val.clone());
                    }
                    Some(old_val) if old_val != new_val => {
                        if old_val.is_object() && new_val.is_object() {
                            let sub = diff_value(old_val, new_val);
                            if !sub.as_object().map(Map::is_empty).unwrap_or(true) {
                                out.insert(key.clone(), sub);
                            }
                        } else {
                            out.insert(key.clone(), new_val.clone());
                        }
                    }
                    Some(_) => {}
                }
            }
            for key in old_map.keys() {
                if !new_map.contains_key(key) {
                    out.insert(key.clone(), serde_json::json!({ DELETED_MARKER: true }));
                }
            }
            Value::Object(out)
        }
        _ => {
            if old != new {
                new.clone()
            } else {
                Value::Object(Map::new())
            }
        }
    }
}

pub fn is_empty_diff(diff: &Value) -> bool {
    match diff {
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Removes every configured dotted path (`a.b.c`) from `value` in place,
/// applied before hashing/diffing per spec §4.2 invariant.
pub fn strip_ignored_paths(value: &mut Value, ignore_paths: &HashSet<String>) {
    for path in ignore_paths {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        remove_path(value, &segments);
    }
}

fn remove_path(value: &mut Value, segments: &[&str]) {
    if segments.is_empty() {
        return;
    }
    if let Value::Object(map) = value {
        if segments.len() == 1 {
            map.remove(segments[0]);
        } else if let Some(next) = map.get_mut(segments[0]) {
            remove_path(next, &segments[1..]);
        }
    }
}
