//! The driver's in-memory record of locally created volumes.
//!
//! One mutex guards the whole map. It is only ever held for the duration of
//! a lookup, insert or copy, never across an `.await`.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::types::{Volume, VolumeList};

#[derive(Debug)]
struct Entry {
    volume: Volume,
    /// Caller ids currently holding a mount.
    holders: HashSet<String>,
}

/// Name-keyed map of volumes plus the callers holding each one mounted.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Mutex<HashMap<String, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the volume registered under `name`.
    pub fn get(&self, name: &str) -> Option<Volume> {
        self.entries.lock().get(name).map(|e| e.volume.clone())
    }

    /// Register `volume`, replacing any previous record of the same name but
    /// keeping its mount holders.
    pub fn insert(&self, volume: Volume) {
        let mut entries = self.entries.lock();
        match entries.get_mut(&volume.name) {
            Some(entry) => entry.volume = volume,
            None => {
                entries.insert(
                    volume.name.clone(),
                    Entry {
                        volume,
                        holders: HashSet::new(),
                    },
                );
            }
        }
    }

    pub fn remove(&self, name: &str) -> Option<Volume> {
        self.entries.lock().remove(name).map(|e| e.volume)
    }

    /// Copy of every registered volume.
    pub fn snapshot(&self) -> VolumeList {
        self.entries
            .lock()
            .values()
            .map(|e| e.volume.clone())
            .collect()
    }

    /// Number of callers holding `name` mounted.
    pub fn holders(&self, name: &str) -> usize {
        self.entries
            .lock()
            .get(name)
            .map_or(0, |e| e.holders.len())
    }

    /// Number of callers other than `id` holding `name` mounted.
    pub fn other_holders(&self, name: &str, id: &str) -> usize {
        self.entries.lock().get(name).map_or(0, |e| {
            e.holders.len() - usize::from(e.holders.contains(id))
        })
    }

    /// Record that `id` holds `name` mounted. Returns `false` if the volume
    /// is no longer registered.
    pub fn attach(&self, name: &str, id: &str) -> bool {
        match self.entries.lock().get_mut(name) {
            Some(entry) => {
                entry.holders.insert(id.to_owned());
                true
            }
            None => false,
        }
    }

    /// Release `id`'s hold on `name`.
    pub fn detach(&self, name: &str, id: &str) {
        if let Some(entry) = self.entries.lock().get_mut(name) {
            entry.holders.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Filesystem;

    fn volume(name: &str, mount_path: &str) -> Volume {
        Volume::new(
            name,
            &format!("/{name}"),
            Filesystem::new("fsA", mount_path, "dp", "mp"),
        )
    }

    #[test]
    fn insert_replaces_by_name() {
        let registry = Registry::new();
        registry.insert(volume("v", "/a"));
        registry.insert(volume("v", "/b"));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("v").unwrap().filesystem.mount_path,
            std::path::PathBuf::from("/b")
        );
    }

    #[test]
    fn reinsert_keeps_holders() {
        let registry = Registry::new();
        registry.insert(volume("v", "/a"));
        assert!(registry.attach("v", "c1"));
        registry.insert(volume("v", "/a"));
        assert_eq!(registry.holders("v"), 1);
    }

    #[test]
    fn holder_accounting() {
        let registry = Registry::new();
        registry.insert(volume("v", "/a"));
        registry.attach("v", "c1");
        registry.attach("v", "c2");
        registry.attach("v", "c1");
        assert_eq!(registry.holders("v"), 2);
        assert_eq!(registry.other_holders("v", "c1"), 1);
        assert_eq!(registry.other_holders("v", "c3"), 2);

        registry.detach("v", "c1");
        registry.detach("v", "c2");
        assert_eq!(registry.holders("v"), 0);
        assert!(!registry.attach("missing", "c1"));
    }

    #[test]
    fn remove_and_snapshot() {
        let registry = Registry::new();
        registry.insert(volume("a", "/a"));
        registry.insert(volume("b", "/b"));
        assert_eq!(registry.snapshot().len(), 2);
        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(registry.snapshot().by_name("b").is_some());
    }
}
