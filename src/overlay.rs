// src/overlay.rs
//
// Fake values layered over a real getter. Used for settings and labs flags.

use parking_lot::RwLock;
use serde_json::Value;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::services::{LabsSource, SettingsSource};

/// Key/value overlay consulted before a fallback source.
///
/// Keys never set here are left to the fallback, so everything not
/// explicitly faked keeps its real behaviour.
#[derive(Debug)]
pub struct OverlayStore<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> OverlayStore<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Adds or overwrites `key`, returning the previous fake if any.
    pub fn set(&self, key: K, value: V) -> Option<V> {
        self.entries.write().insert(key, value)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.read().get(key).cloned()
    }

    /// The overlaid value, or whatever `fallback` produces for un-faked keys.
    pub fn lookup<Q, F>(&self, key: &Q, fallback: F) -> V
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        F: FnOnce(&Q) -> V,
    {
        match self.get(key) {
            Some(value) => value,
            None => fallback(key),
        }
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.read().contains_key(key)
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.write().remove(key)
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<K: Clone + Ord, V> OverlayStore<K, V> {
    /// Overlaid keys, sorted.
    pub fn keys(&self) -> Vec<K> {
        let mut keys: Vec<K> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl<K, V> Default for OverlayStore<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Settings source answering from faked settings first.
pub struct SettingsOverride {
    overlay: Arc<OverlayStore<String, Value>>,
    original: Arc<dyn SettingsSource>,
}

impl SettingsOverride {
    pub fn new(overlay: Arc<OverlayStore<String, Value>>, original: Arc<dyn SettingsSource>) -> Self {
        Self { overlay, original }
    }
}

impl SettingsSource for SettingsOverride {
    fn get(&self, key: &str) -> Option<Value> {
        // a faked null is still a fake
        self.overlay.get(key).or_else(|| self.original.get(key))
    }
}

/// Labs source answering from faked flags first.
pub struct LabsOverride {
    overlay: Arc<OverlayStore<String, bool>>,
    original: Arc<dyn LabsSource>,
}

impl LabsOverride {
    pub fn new(overlay: Arc<OverlayStore<String, bool>>, original: Arc<dyn LabsSource>) -> Self {
        Self { overlay, original }
    }
}

impl LabsSource for LabsOverride {
    fn is_set(&self, flag: &str) -> bool {
        self.overlay.lookup(flag, |f| self.original.is_set(f))
    }
}
