//! Per-request memo of entity fetch results.
//!
//! One cache lives for the duration of a single execution and is owned by
//! the executor's coordinating task, so it needs no locking. Entries are
//! keyed on everything that determines a subgraph's answer: the subgraph,
//! the rendered selection, the entity type and the canonical
//! representation.

use std::collections::HashMap;

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityCacheKey {
    pub subgraph: String,
    pub selection: String,
    pub type_name: String,
    pub representation: String,
}

impl EntityCacheKey {
    pub fn new(subgraph: &str, selection: &str, type_name: &str, representation: &Value) -> Self {
        EntityCacheKey {
            subgraph: subgraph.to_string(),
            selection: selection.to_string(),
            type_name: type_name.to_string(),
            representation: canonical_json(representation),
        }
    }
}

#[derive(Debug, Default)]
pub struct EntityCache {
    entries: HashMap<EntityCacheKey, Value>,
    hits: usize,
    misses: usize,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a resolved entity, counting the hit or miss.
    pub fn get(&mut self, key: &EntityCacheKey) -> Option<Value> {
        match self.entries.get(key) {
            Some(value) => {
                self.hits += 1;
                Some(value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: EntityCacheKey, value: Value) {
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }
}

/// JSON text with object keys sorted, so equal representations produce
/// equal keys regardless of field order.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (index, (key, value)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
