//! Namespaced Property Containers
//!
//! String key/value storage attached to resources, definitions, volumes and
//! storage pools. Keys are namespaced with `/` separators; iteration over a
//! namespace yields every key below that prefix. Layer strategies consult
//! these containers for kind-specific configuration such as the backing
//! storage pool name or a thin-pool override.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known property keys
pub mod keys {
    /// Name of the storage pool backing a volume
    pub const STOR_POOL_NAME: &str = "StorPoolName";

    /// Thin pool inside an LVM volume group
    pub const THIN_POOL: &str = "StorDriver/ThinPool";
}

/// A namespaced string key/value container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropsContainer {
    map: BTreeMap<String, String>,
}

impl PropsContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a property value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// Set a property, returning the previous value if any
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.map.insert(key.into(), value.into())
    }

    /// Remove a property, returning the removed value if any
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.map.remove(key)
    }

    /// Iterate all properties in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterate all properties below a namespace prefix.
    ///
    /// The prefix is matched on whole path components: `"StorDriver"`
    /// matches `"StorDriver/ThinPool"` but not `"StorDriverX"`.
    pub fn iter_namespace<'a>(
        &'a self,
        namespace: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.map.iter().filter_map(move |(k, v)| {
            let rest = k.strip_prefix(namespace)?;
            if rest.is_empty() || rest.starts_with('/') {
                Some((k.as_str(), v.as_str()))
            } else {
                None
            }
        })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let mut props = PropsContainer::new();
        assert_eq!(props.set(keys::STOR_POOL_NAME, "thinpool"), None);
        assert_eq!(props.get(keys::STOR_POOL_NAME), Some("thinpool"));

        let prev = props.set(keys::STOR_POOL_NAME, "ssdpool");
        assert_eq!(prev.as_deref(), Some("thinpool"));

        assert_eq!(props.remove(keys::STOR_POOL_NAME).as_deref(), Some("ssdpool"));
        assert!(props.is_empty());
    }

    #[test]
    fn test_namespace_iteration() {
        let mut props = PropsContainer::new();
        props.set("StorDriver/ThinPool", "thin");
        props.set("StorDriver/ZPool", "tank");
        props.set("StorDriverX", "not-in-namespace");
        props.set("Other/Key", "x");

        let keys: Vec<&str> = props
            .iter_namespace("StorDriver")
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["StorDriver/ThinPool", "StorDriver/ZPool"]);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut props = PropsContainer::new();
        props.set(keys::STOR_POOL_NAME, "pool-a");

        let json = serde_json::to_string(&props).unwrap();
        let back: PropsContainer = serde_json::from_str(&json).unwrap();
        assert_eq!(back, props);
    }
}
