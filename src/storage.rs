//! Persistent key-value areas backing the durable session store.
//!
//! An area is a synchronous, string-keyed surface scoped to one origin. Reads
//! never fail; writes go through [`KeyValueArea::apply`] so that several keys
//! can change in one logical operation.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::ConsoleResult;

pub mod file_area;

pub use file_area::FileArea;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AreaOp {
    Set(String, String),
    Remove(String),
}

pub trait KeyValueArea: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Apply every op as a single unit. Either all of them become visible or none do.
    fn apply(&self, ops: Vec<AreaOp>) -> ConsoleResult<()>;

    fn keys(&self) -> Vec<String>;

    fn set(&self, key: &str, value: &str) -> ConsoleResult<()> {
        self.apply(vec![AreaOp::Set(key.to_string(), value.to_string())])
    }

    fn remove(&self, key: &str) -> ConsoleResult<()> {
        self.apply(vec![AreaOp::Remove(key.to_string())])
    }
}

pub(crate) fn apply_ops<M: MapLike>(map: &mut M, ops: Vec<AreaOp>) {
    for op in ops {
        match op {
            AreaOp::Set(k, v) => map.put(k, v),
            AreaOp::Remove(k) => map.delete(&k),
        }
    }
}

pub(crate) trait MapLike {
    fn put(&mut self, key: String, value: String);
    fn delete(&mut self, key: &str);
}

impl MapLike for HashMap<String, String> {
    fn put(&mut self, key: String, value: String) { self.insert(key, value); }
    fn delete(&mut self, key: &str) { self.remove(key); }
}

impl MapLike for BTreeMap<String, String> {
    fn put(&mut self, key: String, value: String) { self.insert(key, value); }
    fn delete(&mut self, key: &str) { self.remove(key); }
}

/// Volatile area. Clones share the same map, which is how two consumers in the
/// same origin (e.g. two tabs) observe each other's writes.
#[derive(Clone, Default)]
pub struct MemoryArea {
    map: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryArea {
    pub fn new() -> Self { Self::default() }
}

impl KeyValueArea for MemoryArea {
    fn get(&self, key: &str) -> Option<String> { self.map.read().get(key).cloned() }

    fn apply(&self, ops: Vec<AreaOp>) -> ConsoleResult<()> {
        let mut map = self.map.write();
        apply_ops(&mut *map, ops);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.map.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_area_batch_and_share() {
        let a = MemoryArea::new();
        let b = a.clone();
        a.apply(vec![
            AreaOp::Set("t".into(), "1".into()),
            AreaOp::Set("u".into(), "{}".into()),
        ])
        .unwrap();
        assert_eq!(b.get("t").as_deref(), Some("1"));
        assert_eq!(b.keys(), vec!["t".to_string(), "u".to_string()]);

        b.apply(vec![AreaOp::Remove("t".into()), AreaOp::Remove("u".into())]).unwrap();
        assert!(a.get("t").is_none());
        assert!(a.get("u").is_none());
    }

    #[test]
    fn remove_missing_key_is_noop() {
        let a = MemoryArea::new();
        a.remove("nothing").unwrap();
        assert!(a.keys().is_empty());
    }
}
