use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use tollgate_api::target::TargetConfig;

macro_rules! no_poison {
    ($guard:expr) => {
        $guard.expect("ConfigManager was poisoned: this is a bug in tollgate")
    };
}

/// Tracks which targets every source object is synced to, along with the
/// current config of each target.
///
/// A source can be associated with any number of targets and a target with any
/// number of sources. Associations are replaced whole with [update], which
/// reports the targets a source is no longer associated with so that callers
/// can clean up after it.
///
/// [update]: ConfigManager::update
#[derive(Debug)]
pub struct ConfigManager<K, T, V = TargetConfig> {
    inner: Mutex<Inner<K, T, V>>,
}

#[derive(Debug)]
struct Inner<K, T, V> {
    targets: BTreeMap<K, BTreeSet<T>>,
    sources: BTreeMap<T, BTreeSet<K>>,
    configs: BTreeMap<T, V>,
}

impl<K, T, V> Default for ConfigManager<K, T, V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                targets: BTreeMap::new(),
                sources: BTreeMap::new(),
                configs: BTreeMap::new(),
            }),
        }
    }
}

impl<K, T, V> ConfigManager<K, T, V>
where
    K: Ord + Clone,
    T: Ord + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set of targets for `source`, returning any targets that
    /// were previously associated with it and no longer are.
    pub fn update<I>(&self, source: K, targets: I) -> Vec<T>
    where
        I: IntoIterator<Item = T>,
    {
        let mut inner = no_poison!(self.inner.lock());
        let targets: BTreeSet<T> = targets.into_iter().collect();

        for target in &targets {
            inner
                .sources
                .entry(target.clone())
                .or_default()
                .insert(source.clone());
        }

        let previous = inner.targets.insert(source.clone(), targets.clone());
        let discarded: Vec<T> = previous
            .unwrap_or_default()
            .into_iter()
            .filter(|t| !targets.contains(t))
            .collect();

        for target in &discarded {
            inner.unlink(&source, target);
        }

        if targets.is_empty() {
            inner.targets.remove(&source);
        }

        discarded
    }

    /// Remove every target association for `source`, returning the targets it
    /// was associated with.
    pub fn delete(&self, source: &K) -> Vec<T> {
        let mut inner = no_poison!(self.inner.lock());
        let previous: Vec<T> = inner
            .targets
            .remove(source)
            .unwrap_or_default()
            .into_iter()
            .collect();

        for target in &previous {
            inner.unlink(source, target);
        }

        previous
    }

    /// The targets `source` is currently associated with.
    pub fn get(&self, source: &K) -> Vec<T> {
        let inner = no_poison!(self.inner.lock());
        inner
            .targets
            .get(source)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The sources currently associated with `target`.
    pub fn sources_of(&self, target: &T) -> Vec<K> {
        let inner = no_poison!(self.inner.lock());
        inner
            .sources
            .get(target)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Set the config for a target, returning the previous config.
    pub fn set_config(&self, target: T, config: V) -> Option<V> {
        let mut inner = no_poison!(self.inner.lock());
        inner.configs.insert(target, config)
    }

    pub fn get_config(&self, target: &T) -> Option<V> {
        let inner = no_poison!(self.inner.lock());
        inner.configs.get(target).cloned()
    }

    /// Every target with a config.
    pub fn configs(&self) -> Vec<(T, V)> {
        let inner = no_poison!(self.inner.lock());
        inner
            .configs
            .iter()
            .map(|(t, v)| (t.clone(), v.clone()))
            .collect()
    }

    /// Remove the config for a target and every source association with it.
    pub fn delete_config(&self, target: &T) -> Option<V> {
        let mut inner = no_poison!(self.inner.lock());

        if let Some(sources) = inner.sources.remove(target) {
            for source in sources {
                if let Some(targets) = inner.targets.get_mut(&source) {
                    targets.remove(target);
                    if targets.is_empty() {
                        inner.targets.remove(&source);
                    }
                }
            }
        }

        inner.configs.remove(target)
    }
}

impl<K: Ord, T: Ord, V> Inner<K, T, V> {
    fn unlink(&mut self, source: &K, target: &T) {
        if let Some(sources) = self.sources.get_mut(target) {
            sources.remove(source);
            if sources.is_empty() {
                self.sources.remove(target);
            }
        }
    }
}
