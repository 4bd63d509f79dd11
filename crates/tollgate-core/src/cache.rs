//! The per-target resource cache.
//!
//! The [Store] keeps the latest translated contribution of every owner for
//! every sync target, and is the source of truth for what a target's full
//! configuration should be. Owners are identified by their provenance labels
//! and contributions are always replaced whole: an owner's previous records
//! for a resource type are deleted and its new records inserted under a
//! single lock, so a concurrent reader never sees half of an update.
//!
//! Routes and stream routes are nested inside their services, so they are
//! stored and replaced along with them.
//!
//! Everything that goes into or comes out of the store is a deep copy. Nothing
//! returned from a Store aliases its internal state.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use tollgate_api::label::{Labels, OwnerKey};
use tollgate_api::resources::{Consumer, Plugins, ResourceType, Resources, Service, Ssl};

use crate::{Error, Result};

macro_rules! no_poison {
    ($guard:expr) => {
        $guard.expect("Store was poisoned: this is a bug in tollgate")
    };
}

/// A record that can be kept in a [Table].
pub trait Record: Clone {
    /// The unique key for this record within its table.
    fn primary_key(&self) -> &str;

    /// The provenance labels of this record.
    fn labels(&self) -> &Labels;

    fn labels_mut(&mut self) -> &mut Labels;
}

impl Record for Service {
    fn primary_key(&self) -> &str {
        &self.metadata.id
    }

    fn labels(&self) -> &Labels {
        &self.metadata.labels
    }

    fn labels_mut(&mut self) -> &mut Labels {
        &mut self.metadata.labels
    }
}

impl Record for Ssl {
    fn primary_key(&self) -> &str {
        &self.metadata.id
    }

    fn labels(&self) -> &Labels {
        &self.metadata.labels
    }

    fn labels_mut(&mut self) -> &mut Labels {
        &mut self.metadata.labels
    }
}

// consumers are keyed by username, not by a derived id.
impl Record for Consumer {
    fn primary_key(&self) -> &str {
        &self.username
    }

    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn labels_mut(&mut self) -> &mut Labels {
        &mut self.labels
    }
}

/// One owner's global rules, tagged with the order they were inserted in so
/// rules from different owners can be merged deterministically.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalRuleRecord {
    pub id: String,
    pub labels: Labels,
    pub plugins: Plugins,
    pub seq: u64,
}

impl Record for GlobalRuleRecord {
    fn primary_key(&self) -> &str {
        &self.id
    }

    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn labels_mut(&mut self) -> &mut Labels {
        &mut self.labels
    }
}

/// An indexed collection of records of a single resource type.
///
/// Records are addressable by primary key and by owner. Owner lookups take an
/// [OwnerKey] that may be partial, so it's possible to list everything owned
/// by a kind or by a namespace.
#[derive(Debug, Clone)]
pub struct Table<T> {
    resource_type: ResourceType,
    records: BTreeMap<String, T>,
    owners: BTreeMap<OwnerKey, BTreeSet<String>>,
}

impl<T: Record> Table<T> {
    pub fn new(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            records: BTreeMap::new(),
            owners: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert a record, replacing any existing record with the same primary
    /// key.
    pub fn insert(&mut self, record: T) {
        let key = record.primary_key().to_string();
        if let Some(previous) = self.records.remove(&key) {
            self.unindex(&key, &OwnerKey::from_labels(previous.labels()));
        }

        self.owners
            .entry(OwnerKey::from_labels(record.labels()))
            .or_default()
            .insert(key.clone());
        self.records.insert(key, record);
    }

    /// Remove a record by primary key, returning it.
    pub fn delete(&mut self, key: &str) -> Result<T> {
        let record = self
            .records
            .remove(key)
            .ok_or_else(|| Error::not_found(self.resource_type, key))?;
        self.unindex(key, &OwnerKey::from_labels(record.labels()));
        Ok(record)
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.records.get(key).cloned()
    }

    /// List copies of every record selected by `selector`, or all records if
    /// there is no selector. Records are returned in primary key order.
    pub fn list(&self, selector: Option<&OwnerKey>) -> Vec<T> {
        let Some(selector) = selector else {
            return self.records.values().cloned().collect();
        };

        let mut keys: Vec<&String> = self
            .owners
            .iter()
            .filter(|(owner, _)| selector.selects(owner))
            .flat_map(|(_, keys)| keys)
            .collect();
        keys.sort();

        keys.into_iter()
            .filter_map(|k| self.records.get(k).cloned())
            .collect()
    }

    /// Delete every record selected by `selector`, returning the number of
    /// records removed.
    fn delete_owned(&mut self, selector: &OwnerKey) -> Result<usize> {
        let owned = self.list(Some(selector));
        for record in &owned {
            self.delete(record.primary_key())?;
        }
        Ok(owned.len())
    }

    fn unindex(&mut self, key: &str, owner: &OwnerKey) {
        if let Some(keys) = self.owners.get_mut(owner) {
            keys.remove(key);
            if keys.is_empty() {
                self.owners.remove(owner);
            }
        }
    }
}

/// Everything known about a single target.
#[derive(Debug, Clone)]
struct Cache {
    services: Table<Service>,
    ssls: Table<Ssl>,
    consumers: Table<Consumer>,
    global_rules: Table<GlobalRuleRecord>,
    plugin_metadata: Plugins,
    next_seq: u64,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            services: Table::new(ResourceType::Service),
            ssls: Table::new(ResourceType::Ssl),
            consumers: Table::new(ResourceType::Consumer),
            global_rules: Table::new(ResourceType::GlobalRule),
            plugin_metadata: Plugins::new(),
            next_seq: 0,
        }
    }
}

impl Cache {
    fn is_empty(&self) -> bool {
        self.services.is_empty()
            && self.ssls.is_empty()
            && self.consumers.is_empty()
            && self.global_rules.is_empty()
            && self.plugin_metadata.is_empty()
    }

    fn resources(&self, selector: Option<&OwnerKey>) -> Resources {
        let mut global_rules = self.global_rules.list(selector);
        global_rules.sort_by_key(|r| r.seq);

        let mut merged = Plugins::new();
        for rule in global_rules {
            merged.extend(rule.plugins);
        }

        let plugin_metadata = match selector {
            Some(_) => Plugins::new(),
            None => self.plugin_metadata.clone(),
        };

        Resources {
            services: self.services.list(selector),
            ssls: self.ssls.list(selector),
            consumers: self.consumers.list(selector),
            global_rules: merged,
            plugin_metadata,
        }
    }
}

/// The tables a set of resource types is stored in. Routes and stream routes
/// are nested in services, so they all map to the service table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum TableKind {
    Service,
    Ssl,
    Consumer,
    GlobalRule,
    PluginMetadata,
}

fn table_kinds(types: &[ResourceType]) -> BTreeSet<TableKind> {
    types
        .iter()
        .map(|t| match t {
            ResourceType::Service | ResourceType::Route | ResourceType::StreamRoute => {
                TableKind::Service
            }
            ResourceType::Ssl => TableKind::Ssl,
            ResourceType::Consumer => TableKind::Consumer,
            ResourceType::GlobalRule => TableKind::GlobalRule,
            ResourceType::PluginMetadata => TableKind::PluginMetadata,
        })
        .collect()
}

fn owner_selector(owner: &Labels) -> Result<OwnerKey> {
    let selector = OwnerKey::from_labels(owner);
    if selector == OwnerKey::default() {
        return Err(Error::MissingOwner);
    }
    Ok(selector)
}

// stamp owner labels on a record if translation didn't. every cached record
// must be attributable to an owner.
fn with_owner<T: Record>(mut record: T, owner: &Labels) -> T {
    if record.labels().is_empty() {
        *record.labels_mut() = owner.clone();
    }
    record
}

/// The resource cache for every sync target.
#[derive(Debug, Default)]
pub struct Store {
    caches: Mutex<BTreeMap<String, Cache>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything `owner` contributes to `target` for each of
    /// `resource_types` with the matching records from `resources`.
    pub fn insert(
        &self,
        target: &str,
        resource_types: &[ResourceType],
        resources: &Resources,
        owner: &Labels,
    ) -> Result<()> {
        let selector = owner_selector(owner)?;

        let mut caches = no_poison!(self.caches.lock());
        let cache = caches.entry(target.to_string()).or_default();

        for kind in table_kinds(resource_types) {
            match kind {
                TableKind::Service => {
                    cache.services.delete_owned(&selector)?;
                    for service in &resources.services {
                        cache.services.insert(with_owner(service.clone(), owner));
                    }
                }
                TableKind::Ssl => {
                    cache.ssls.delete_owned(&selector)?;
                    for ssl in &resources.ssls {
                        cache.ssls.insert(with_owner(ssl.clone(), owner));
                    }
                }
                TableKind::Consumer => {
                    cache.consumers.delete_owned(&selector)?;
                    for consumer in &resources.consumers {
                        cache.consumers.insert(with_owner(consumer.clone(), owner));
                    }
                }
                TableKind::GlobalRule => {
                    cache.global_rules.delete_owned(&selector)?;
                    if !resources.global_rules.is_empty() {
                        let seq = cache.next_seq;
                        cache.next_seq += 1;
                        cache.global_rules.insert(GlobalRuleRecord {
                            id: selector.to_string(),
                            labels: owner.clone(),
                            plugins: resources.global_rules.clone(),
                            seq,
                        });
                    }
                }
                TableKind::PluginMetadata => {
                    if !resources.plugin_metadata.is_empty() {
                        cache.plugin_metadata = resources.plugin_metadata.clone();
                    }
                }
            }
        }

        tracing::trace!(%target, owner = %selector, "replaced owner resources");
        Ok(())
    }

    /// Remove everything `owner` contributes to `target` for each of
    /// `resource_types`.
    ///
    /// An empty list of resource types drops the target's entire cache,
    /// regardless of owner. Plugin metadata isn't owned, so asking to delete it
    /// clears it for the whole target.
    pub fn delete(
        &self,
        target: &str,
        resource_types: &[ResourceType],
        owner: &Labels,
    ) -> Result<()> {
        let mut caches = no_poison!(self.caches.lock());

        if resource_types.is_empty() {
            if caches.remove(target).is_some() {
                tracing::debug!(%target, "dropped target cache");
            }
            return Ok(());
        }

        let selector = owner_selector(owner)?;
        let Some(cache) = caches.get_mut(target) else {
            return Ok(());
        };

        for kind in table_kinds(resource_types) {
            match kind {
                TableKind::Service => {
                    cache.services.delete_owned(&selector)?;
                }
                TableKind::Ssl => {
                    cache.ssls.delete_owned(&selector)?;
                }
                TableKind::Consumer => {
                    cache.consumers.delete_owned(&selector)?;
                }
                TableKind::GlobalRule => {
                    cache.global_rules.delete_owned(&selector)?;
                }
                TableKind::PluginMetadata => cache.plugin_metadata.clear(),
            }
        }

        if cache.is_empty() {
            caches.remove(target);
        }

        tracing::trace!(%target, owner = %selector, "deleted owner resources");
        Ok(())
    }

    /// The full, merged configuration for a target. Unknown targets have an
    /// empty configuration.
    pub fn get_resources(&self, target: &str) -> Resources {
        let caches = no_poison!(self.caches.lock());
        caches
            .get(target)
            .map(|c| c.resources(None))
            .unwrap_or_default()
    }

    /// Everything in a target selected by a (possibly partial) owner key.
    ///
    /// Plugin metadata isn't owned and is never included.
    pub fn list(&self, target: &str, selector: &OwnerKey) -> Resources {
        let caches = no_poison!(self.caches.lock());
        caches
            .get(target)
            .map(|c| c.resources(Some(selector)))
            .unwrap_or_default()
    }

    /// Find the labels of the resource with the given type and id in a target.
    ///
    /// Routes and stream routes are looked up inside their services, consumers
    /// by username, and global rules by plugin name, in which case the owner
    /// whose rule currently wins is returned.
    pub fn get_resource_labels(
        &self,
        target: &str,
        resource_type: ResourceType,
        id: &str,
    ) -> Option<Labels> {
        let caches = no_poison!(self.caches.lock());
        let cache = caches.get(target)?;

        match resource_type {
            ResourceType::Service => cache.services.get(id).map(|s| s.metadata.labels),
            ResourceType::Route => cache.services.records.values().find_map(|s| {
                s.routes
                    .iter()
                    .find(|r| r.metadata.id == id)
                    .map(|r| route_labels(&r.metadata.labels, s))
            }),
            ResourceType::StreamRoute => cache.services.records.values().find_map(|s| {
                s.stream_routes
                    .iter()
                    .find(|r| r.metadata.id == id)
                    .map(|r| route_labels(&r.metadata.labels, s))
            }),
            ResourceType::Ssl => cache.ssls.get(id).map(|s| s.metadata.labels),
            ResourceType::Consumer => cache.consumers.get(id).map(|c| c.labels),
            ResourceType::GlobalRule => cache
                .global_rules
                .records
                .values()
                .filter(|r| r.plugins.contains_key(id))
                .max_by_key(|r| r.seq)
                .map(|r| r.labels.clone()),
            ResourceType::PluginMetadata => None,
        }
    }

    /// The names of every target with cached resources.
    pub fn targets(&self) -> Vec<String> {
        let caches = no_poison!(self.caches.lock());
        caches.keys().cloned().collect()
    }
}

fn route_labels(labels: &Labels, service: &Service) -> Labels {
    if labels.is_empty() {
        service.metadata.labels.clone()
    } else {
        labels.clone()
    }
}
