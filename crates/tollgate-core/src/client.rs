//! Reconciliation: keeping the cache, the target associations, and the
//! gateways themselves in step with translated objects.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tollgate_api::label::{Labels, OwnerKey};
use tollgate_api::resources::{ResourceType, Resources};
use tollgate_api::target::{BackendMode, TargetConfig};

use crate::cache::Store;
use crate::config::Config;
use crate::config_manager::ConfigManager;
use crate::sync::{self, Executor, Failure, SyncError, SyncErrors, Task};
use crate::{Error, Result};

macro_rules! no_poison {
    ($guard:expr) => {
        $guard.expect("Client was poisoned: this is a bug in tollgate")
    };
}

/// The outcome of a push, attributed to the objects that own the pushed
/// resources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReport {
    /// Every owner with at least one failure, and what went wrong.
    pub failed: BTreeMap<OwnerKey, Vec<String>>,

    /// Owners that failed on a previous push and were pushed cleanly this
    /// time.
    pub recovered: BTreeSet<OwnerKey>,

    /// The raw errors behind `failed`.
    pub errors: Vec<SyncError>,
}

impl StatusReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert this report into an error if anything failed to sync.
    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            return Ok(());
        }
        Err(Error::Sync(SyncErrors(self.errors)))
    }
}

/// Keeps gateways in sync with the objects translated for them.
///
/// Every object sync runs on the read side of a sync lock so that many
/// objects can be synced at once, while [Client::sync_all] takes the write
/// side so a full resync never observes a half-applied object change.
pub struct Client {
    store: Store,
    configs: ConfigManager<OwnerKey, String>,
    executor: Box<dyn Executor>,
    sync_lock: RwLock<()>,
    failing: Mutex<BTreeSet<OwnerKey>>,
}

// a single push: one target, and what to send it.
struct Push {
    config: TargetConfig,
    resources: Resources,
}

impl Client {
    /// Build a client that syncs with the transport named in `config`.
    pub fn new(config: &Config) -> Self {
        Self::with_executor(sync::executor(&config.sync))
    }

    pub fn with_executor(executor: Box<dyn Executor>) -> Self {
        Self {
            store: Store::new(),
            configs: ConfigManager::new(),
            executor,
            sync_lock: RwLock::new(()),
            failing: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The targets `owner` is currently synced to.
    pub fn targets_of(&self, owner: &OwnerKey) -> Vec<String> {
        self.configs.get(owner)
    }

    /// Add or replace the config for a target.
    pub fn set_target(&self, config: TargetConfig) {
        self.configs.set_config(config.name.clone(), config);
    }

    /// Forget a target entirely, dropping everything cached for it. Nothing
    /// is pushed to the target.
    pub fn remove_target(&self, name: &str) -> Result<Option<TargetConfig>> {
        let removed = self.configs.delete_config(&name.to_string());
        self.store.delete(name, &[], &Labels::new())?;
        Ok(removed)
    }

    /// Replace everything `owner` contributes to the gateway with
    /// `resources`, and push the change to every target in `targets`.
    ///
    /// Targets the owner was previously synced to and isn't anymore have its
    /// resources removed. An empty list of resource types replaces every type
    /// except plugin metadata.
    pub async fn update(
        &self,
        cancel: &CancellationToken,
        owner: &Labels,
        targets: &[TargetConfig],
        resource_types: &[ResourceType],
        resources: &Resources,
    ) -> Result<StatusReport> {
        let key = owner_key(owner)?;
        let resource_types = expand(resource_types);
        let _guard = self.sync_lock.read().await;

        for config in targets {
            self.set_target(config.clone());
        }
        let discarded = self
            .configs
            .update(key.clone(), targets.iter().map(|t| t.name.clone()));

        for target in &discarded {
            self.store.delete(target, &resource_types, owner)?;
        }
        for config in targets {
            self.store
                .insert(&config.name, &resource_types, resources, owner)?;
        }

        let mut pushes: Vec<_> = targets
            .iter()
            .map(|config| Push {
                config: config.clone(),
                resources: resources.clone(),
            })
            .collect();
        pushes.extend(self.teardown_pushes(&discarded));

        tracing::debug!(
            owner = %key,
            targets = targets.len(),
            discarded = discarded.len(),
            "updating owner"
        );
        Ok(self
            .push(cancel, &key, owner, &resource_types, pushes)
            .await)
    }

    /// Remove the `resource_types` that `owner` contributes to the gateway
    /// from every target it was synced to.
    ///
    /// An empty list of resource types removes everything and forgets the
    /// owner's targets. Otherwise a target is only forgotten once the owner
    /// has nothing left cached for it.
    pub async fn delete(
        &self,
        cancel: &CancellationToken,
        owner: &Labels,
        resource_types: &[ResourceType],
    ) -> Result<StatusReport> {
        let key = owner_key(owner)?;
        let delete_all = resource_types.is_empty();
        let resource_types = expand(resource_types);
        let _guard = self.sync_lock.read().await;

        let prior = self.configs.get(&key);
        for target in &prior {
            self.store.delete(target, &resource_types, owner)?;
        }

        let remaining: Vec<_> = prior
            .iter()
            .filter(|target| !delete_all && !self.store.list(target, &key).is_empty())
            .cloned()
            .collect();
        if remaining.is_empty() {
            self.configs.delete(&key);
        } else {
            self.configs.update(key.clone(), remaining);
        }

        let pushes = self.teardown_pushes(&prior);
        tracing::debug!(owner = %key, targets = prior.len(), "deleting owner");
        Ok(self
            .push(cancel, &key, owner, &resource_types, pushes)
            .await)
    }

    /// Push the full configuration of every known target.
    pub async fn sync_all(&self, cancel: &CancellationToken) -> StatusReport {
        let _guard = self.sync_lock.write().await;

        let tasks: Vec<_> = self
            .configs
            .configs()
            .into_iter()
            .map(|(_, config)| self.full_task("sync-all", config))
            .collect();

        tracing::debug!(targets = tasks.len(), "syncing all targets");
        let errors = self.execute(cancel, &tasks).await;

        let scope = tasks
            .iter()
            .flat_map(|t| &t.configs)
            .flat_map(|c| self.configs.sources_of(&c.name))
            .collect();
        self.report(None, scope, errors)
    }

    // pushes that remove an owner's resources from targets it no longer
    // contributes to. targets without a known config can't be pushed to.
    fn teardown_pushes(&self, targets: &[String]) -> Vec<Push> {
        targets
            .iter()
            .filter_map(|name| {
                let config = self.configs.get_config(name);
                if config.is_none() {
                    tracing::debug!(%name, "skipping push to unknown target");
                }
                config
            })
            .map(|config| Push {
                config,
                resources: Resources::default(),
            })
            .collect()
    }

    async fn push(
        &self,
        cancel: &CancellationToken,
        key: &OwnerKey,
        owner: &Labels,
        resource_types: &[ResourceType],
        pushes: Vec<Push>,
    ) -> StatusReport {
        let name = key.to_string();
        let mut scope = BTreeSet::from([key.clone()]);

        let tasks: Vec<_> = pushes
            .into_iter()
            .map(|push| match push.config.backend_mode {
                BackendMode::Apisix => Task {
                    name: name.clone(),
                    configs: vec![push.config],
                    labels: owner.clone(),
                    resource_types: resource_types.to_vec(),
                    resources: push.resources,
                },
                BackendMode::ApisixStandalone => {
                    scope.extend(self.configs.sources_of(&push.config.name));
                    self.full_task(&name, push.config)
                }
            })
            .collect();

        let errors = self.execute(cancel, &tasks).await;
        self.report(Some(key), scope, errors)
    }

    fn full_task(&self, name: &str, config: TargetConfig) -> Task {
        Task {
            name: name.to_string(),
            resources: self.store.get_resources(&config.name),
            configs: vec![config],
            ..Default::default()
        }
    }

    async fn execute(&self, cancel: &CancellationToken, tasks: &[Task]) -> Vec<SyncError> {
        let results = futures::future::join_all(
            tasks
                .iter()
                .map(|task| sync::execute_task(self.executor.as_ref(), cancel, task)),
        )
        .await;

        results
            .into_iter()
            .filter_map(|r| r.err())
            .flatten()
            .collect()
    }

    /// Attribute sync errors to the owners of the resources that failed.
    ///
    /// Rejected resources are attributed through their provenance labels.
    /// Anything that can't be attributed to a resource is attributed to
    /// `owner`, or to every owner of the failed target when there's no single
    /// owner to blame. Owners in `scope` that previously failed and didn't
    /// fail now are reported as recovered.
    fn report(
        &self,
        owner: Option<&OwnerKey>,
        scope: BTreeSet<OwnerKey>,
        errors: Vec<SyncError>,
    ) -> StatusReport {
        let mut failed: BTreeMap<OwnerKey, Vec<String>> = BTreeMap::new();

        for error in &errors {
            let blame_all = || match owner {
                Some(owner) => vec![owner.clone()],
                None => self.configs.sources_of(&error.target),
            };

            for server_error in error {
                let server = &server_error.server;
                // a rejection that doesn't name its resources can't be
                // attributed any better than a transport failure.
                let resources: &[sync::FailedResource] = match &server_error.failure {
                    Failure::Resources(resources) => resources,
                    _ => &[],
                };
                if resources.is_empty() {
                    let message = format!("{}: {server_error}", error.target);
                    for key in blame_all() {
                        failed.entry(key).or_default().push(message.clone());
                    }
                    continue;
                }

                for resource in resources {
                    let message = format!("{}: {server}: {resource}", error.target);
                    let owners = match self.resource_owner(&error.target, resource) {
                        Some(key) => vec![key],
                        None => blame_all(),
                    };
                    for key in owners {
                        failed.entry(key).or_default().push(message.clone());
                    }
                }
            }
        }

        let mut failing = no_poison!(self.failing.lock());
        let recovered: BTreeSet<_> = scope
            .iter()
            .filter(|key| failing.contains(*key) && !failed.contains_key(*key))
            .cloned()
            .collect();
        failing.retain(|key| !scope.contains(key));
        failing.extend(failed.keys().cloned());

        for key in &recovered {
            tracing::debug!(owner = %key, "owner recovered");
        }
        for (key, messages) in &failed {
            tracing::warn!(owner = %key, failures = messages.len(), "owner failed to sync");
        }

        StatusReport {
            failed,
            recovered,
            errors,
        }
    }

    fn resource_owner(&self, target: &str, resource: &sync::FailedResource) -> Option<OwnerKey> {
        let resource_type = resource.resource_type()?;
        let labels = self
            .store
            .get_resource_labels(target, resource_type, &resource.resource_id)
            .or_else(|| {
                self.store
                    .get_resource_labels(target, resource_type, &resource.resource_name)
            })?;

        Some(OwnerKey::from_labels(&labels))
    }
}

fn owner_key(owner: &Labels) -> Result<OwnerKey> {
    let key = OwnerKey::from_labels(owner);
    if key == OwnerKey::default() {
        return Err(Error::MissingOwner);
    }
    Ok(key)
}

// an empty list means every owned type. plugin metadata is shared by the whole
// target and is only touched when asked for by name.
fn expand(resource_types: &[ResourceType]) -> Vec<ResourceType> {
    if resource_types.is_empty() {
        return ResourceType::ALL
            .into_iter()
            .filter(|t| *t != ResourceType::PluginMetadata)
            .collect();
    }
    resource_types.to_vec()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sync::{FailedResource, ServerError};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tollgate_api::label::owner_labels;
    use tollgate_api::resources::{Consumer, Metadata, Service};

    #[derive(Clone, Default)]
    struct Recorder {
        pushed: Arc<Mutex<Vec<(String, Task)>>>,
        failures: Arc<Mutex<BTreeMap<String, Failure>>>,
    }

    impl Recorder {
        fn fail(&self, target: &str, failure: Failure) {
            self.failures
                .lock()
                .unwrap()
                .insert(target.to_string(), failure);
        }

        fn heal(&self) {
            self.failures.lock().unwrap().clear();
        }

        fn take(&self) -> Vec<(String, Task)> {
            std::mem::take(&mut *self.pushed.lock().unwrap())
        }
    }

    #[async_trait::async_trait]
    impl Executor for Recorder {
        async fn execute(
            &self,
            _cancel: &CancellationToken,
            config: &TargetConfig,
            task: &Task,
        ) -> std::result::Result<(), SyncError> {
            self.pushed
                .lock()
                .unwrap()
                .push((config.name.clone(), task.clone()));

            match self.failures.lock().unwrap().get(&config.name) {
                Some(failure) => Err(SyncError {
                    target: config.name.clone(),
                    total: 1,
                    errors: vec![ServerError {
                        server: "http://gw:9180".to_string(),
                        failure: failure.clone(),
                    }],
                }),
                None => Ok(()),
            }
        }
    }

    fn target(name: &str, backend_mode: BackendMode) -> TargetConfig {
        TargetConfig {
            name: name.to_string(),
            server_addrs: vec!["http://gw:9180".to_string()],
            token: "secret".to_string(),
            tls_verify: true,
            backend_mode,
        }
    }

    fn owner(name: &str) -> Labels {
        owner_labels("HTTPRoute", "default", name, "tollgate")
    }

    fn resources(id: &str) -> Resources {
        Resources {
            services: vec![Service {
                metadata: Metadata {
                    id: id.to_string(),
                    name: id.to_string(),
                    ..Default::default()
                },
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn client() -> (Client, Recorder) {
        let recorder = Recorder::default();
        (Client::with_executor(Box::new(recorder.clone())), recorder)
    }

    fn service_ids(resources: &Resources) -> Vec<&str> {
        resources
            .services
            .iter()
            .map(|s| s.metadata.id.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_update_label_scoped() {
        let (client, recorder) = client();
        let cancel = CancellationToken::new();
        let gw = target("gw", BackendMode::Apisix);

        let report = client
            .update(
                &cancel,
                &owner("a"),
                &[gw.clone()],
                &[ResourceType::Service],
                &resources("svc-a"),
            )
            .await
            .unwrap();
        assert!(report.is_ok());

        let pushed = recorder.take();
        assert_eq!(pushed.len(), 1);
        let (name, task) = &pushed[0];
        assert_eq!(name, "gw");
        assert_eq!(task.labels, owner("a"));
        assert_eq!(task.resource_types, vec![ResourceType::Service]);
        assert_eq!(service_ids(&task.resources), vec!["svc-a"]);

        // a second owner only pushes its own resources, but both are cached
        client
            .update(&cancel, &owner("b"), &[gw], &[], &resources("svc-b"))
            .await
            .unwrap();
        let pushed = recorder.take();
        assert_eq!(service_ids(&pushed[0].1.resources), vec!["svc-b"]);
        assert!(!pushed[0]
            .1
            .resource_types
            .contains(&ResourceType::PluginMetadata));
        assert!(pushed[0].1.resource_types.contains(&ResourceType::Ssl));
        assert_eq!(
            service_ids(&client.store().get_resources("gw")),
            vec!["svc-a", "svc-b"]
        );
    }

    #[tokio::test]
    async fn test_update_standalone_full_view() {
        let (client, recorder) = client();
        let cancel = CancellationToken::new();
        let gw = target("gw", BackendMode::ApisixStandalone);

        for name in ["a", "b"] {
            client
                .update(
                    &cancel,
                    &owner(name),
                    &[gw.clone()],
                    &[ResourceType::Service],
                    &resources(&format!("svc-{name}")),
                )
                .await
                .unwrap();
        }

        let pushed = recorder.take();
        let (_, last) = pushed.last().unwrap();
        assert!(last.labels.is_empty());
        assert!(last.resource_types.is_empty());
        assert_eq!(service_ids(&last.resources), vec!["svc-a", "svc-b"]);
    }

    #[tokio::test]
    async fn test_update_discards_targets() {
        let (client, recorder) = client();
        let cancel = CancellationToken::new();
        let (one, two) = (
            target("one", BackendMode::Apisix),
            target("two", BackendMode::Apisix),
        );

        client
            .update(
                &cancel,
                &owner("a"),
                &[one.clone(), two.clone()],
                &[ResourceType::Service],
                &resources("svc-a"),
            )
            .await
            .unwrap();
        recorder.take();

        let key = OwnerKey::from_labels(&owner("a"));
        client
            .update(
                &cancel,
                &owner("a"),
                &[two],
                &[ResourceType::Service],
                &resources("svc-a"),
            )
            .await
            .unwrap();
        assert_eq!(client.targets_of(&key), vec!["two"]);

        // the discarded target gets an empty, label-scoped push
        let mut pushed = recorder.take();
        pushed.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(pushed[0].0, "one");
        assert!(pushed[0].1.resources.is_empty());
        assert_eq!(pushed[0].1.labels, owner("a"));
        assert_eq!(pushed[1].0, "two");
        assert!(client.store().get_resources("one").is_empty());
    }

    #[tokio::test]
    async fn test_delete() {
        let (client, recorder) = client();
        let cancel = CancellationToken::new();
        let gw = target("gw", BackendMode::ApisixStandalone);

        for name in ["a", "b"] {
            client
                .update(
                    &cancel,
                    &owner(name),
                    &[gw.clone()],
                    &[ResourceType::Service],
                    &resources(&format!("svc-{name}")),
                )
                .await
                .unwrap();
        }
        recorder.take();

        client
            .delete(&cancel, &owner("a"), &[ResourceType::Service])
            .await
            .unwrap();

        let pushed = recorder.take();
        assert_eq!(pushed.len(), 1);
        assert_eq!(service_ids(&pushed[0].1.resources), vec!["svc-b"]);
        assert!(client
            .targets_of(&OwnerKey::from_labels(&owner("a")))
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_some_types() {
        let (client, recorder) = client();
        let cancel = CancellationToken::new();
        let gw = target("gw", BackendMode::Apisix);
        let key = OwnerKey::from_labels(&owner("a"));

        let mut owned = resources("svc-a");
        owned.consumers.push(Consumer {
            username: "jack".to_string(),
            ..Default::default()
        });
        client
            .update(&cancel, &owner("a"), &[gw], &[], &owned)
            .await
            .unwrap();
        recorder.take();

        // the consumer is still cached, so gw is still a target of a
        client
            .delete(&cancel, &owner("a"), &[ResourceType::Service])
            .await
            .unwrap();
        assert_eq!(client.targets_of(&key), vec!["gw"]);
        let cached = client.store().get_resources("gw");
        assert!(cached.services.is_empty());
        assert_eq!(cached.consumers.len(), 1);

        let pushed = recorder.take();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].1.resource_types, vec![ResourceType::Service]);

        // deleting the last cached type forgets the target
        client
            .delete(&cancel, &owner("a"), &[ResourceType::Consumer])
            .await
            .unwrap();
        assert!(client.targets_of(&key).is_empty());
        assert!(client.store().get_resources("gw").consumers.is_empty());

        let pushed = recorder.take();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].0, "gw");
        assert_eq!(pushed[0].1.resource_types, vec![ResourceType::Consumer]);
    }

    #[tokio::test]
    async fn test_missing_owner() {
        let (client, recorder) = client();
        let cancel = CancellationToken::new();

        let err = client
            .update(
                &cancel,
                &Labels::new(),
                &[target("gw", BackendMode::Apisix)],
                &[],
                &Resources::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingOwner));
        assert!(recorder.take().is_empty());
    }

    #[tokio::test]
    async fn test_sync_all() {
        let (client, recorder) = client();
        let cancel = CancellationToken::new();

        client
            .update(
                &cancel,
                &owner("a"),
                &[target("one", BackendMode::Apisix)],
                &[ResourceType::Service],
                &resources("svc-a"),
            )
            .await
            .unwrap();
        client
            .update(
                &cancel,
                &owner("b"),
                &[target("two", BackendMode::Apisix)],
                &[ResourceType::Service],
                &resources("svc-b"),
            )
            .await
            .unwrap();
        recorder.take();

        let report = client.sync_all(&cancel).await;
        assert!(report.is_ok());

        let mut pushed = recorder.take();
        pushed.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(pushed.len(), 2);
        for (_, task) in &pushed {
            assert!(task.labels.is_empty());
            assert!(task.resource_types.is_empty());
        }
        assert_eq!(service_ids(&pushed[0].1.resources), vec!["svc-a"]);
        assert_eq!(service_ids(&pushed[1].1.resources), vec!["svc-b"]);
    }

    #[tokio::test]
    async fn test_report_attribution() {
        let (client, recorder) = client();
        let cancel = CancellationToken::new();
        let gw = target("gw", BackendMode::ApisixStandalone);

        client
            .update(
                &cancel,
                &owner("a"),
                &[gw.clone()],
                &[ResourceType::Service],
                &resources("svc-a"),
            )
            .await
            .unwrap();

        // a full-view push fails because of a resource owned by someone else
        recorder.fail(
            "gw",
            Failure::Resources(vec![FailedResource {
                resource_type: "service".to_string(),
                resource_id: "svc-a".to_string(),
                reason: "invalid upstream".to_string(),
                ..Default::default()
            }]),
        );
        let report = client
            .update(
                &cancel,
                &owner("b"),
                &[gw.clone()],
                &[ResourceType::Service],
                &resources("svc-b"),
            )
            .await
            .unwrap();

        let a = OwnerKey::from_labels(&owner("a"));
        assert_eq!(report.failed.keys().collect::<Vec<_>>(), vec![&a]);
        assert_eq!(
            report.failed[&a],
            vec!["gw: http://gw:9180: service svc-a: invalid upstream"]
        );
        assert!(report.recovered.is_empty());
        assert!(matches!(report.into_result(), Err(Error::Sync(_))));

        // once the gateway accepts the config again, a recovers
        recorder.heal();
        let report = client.sync_all(&cancel).await;
        assert!(report.failed.is_empty());
        assert_eq!(report.recovered, BTreeSet::from([a]));
    }

    #[tokio::test]
    async fn test_report_transport_failure() {
        let (client, recorder) = client();
        let cancel = CancellationToken::new();
        recorder.fail("gw", Failure::Transport("connection refused".to_string()));

        let report = client
            .update(
                &cancel,
                &owner("a"),
                &[target("gw", BackendMode::Apisix)],
                &[ResourceType::Service],
                &resources("svc-a"),
            )
            .await
            .unwrap();

        let a = OwnerKey::from_labels(&owner("a"));
        assert_eq!(
            report.failed[&a],
            vec!["gw: http://gw:9180: connection refused"]
        );

        // cached state is kept so that a later resync can retry
        assert_eq!(service_ids(&client.store().get_resources("gw")), vec!["svc-a"]);
    }

    #[tokio::test]
    async fn test_report_rejection_without_details() {
        let (client, recorder) = client();
        let cancel = CancellationToken::new();
        let gw = target("gw", BackendMode::Apisix);
        let a = OwnerKey::from_labels(&owner("a"));

        recorder.fail("gw", Failure::Transport("connection refused".to_string()));
        let report = client
            .update(
                &cancel,
                &owner("a"),
                &[gw.clone()],
                &[ResourceType::Service],
                &resources("svc-a"),
            )
            .await
            .unwrap();
        assert!(report.failed.contains_key(&a));

        // the gateway rejects the push but doesn't say what it rejected
        recorder.fail("gw", Failure::Resources(vec![]));
        let report = client
            .update(
                &cancel,
                &owner("a"),
                &[gw],
                &[ResourceType::Service],
                &resources("svc-a"),
            )
            .await
            .unwrap();
        assert_eq!(
            report.failed[&a],
            vec!["gw: http://gw:9180: resources failed without details"]
        );
        assert!(report.recovered.is_empty());
        assert!(!report.is_ok());
    }

    // an executor that holds full syncs until released, recording the order
    // tasks finish in.
    #[derive(Clone, Default)]
    struct Gated {
        started: Arc<Notify>,
        release: Arc<Notify>,
        finished: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl Executor for Gated {
        async fn execute(
            &self,
            _cancel: &CancellationToken,
            _config: &TargetConfig,
            task: &Task,
        ) -> std::result::Result<(), SyncError> {
            if task.name == "sync-all" {
                self.started.notify_one();
                self.release.notified().await;
            }
            self.finished.lock().unwrap().push(task.name.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_update_waits_for_sync_all() {
        let gated = Gated::default();
        let client = Arc::new(Client::with_executor(Box::new(gated.clone())));
        let gw = target("gw", BackendMode::Apisix);

        client
            .update(
                &CancellationToken::new(),
                &owner("a"),
                &[gw.clone()],
                &[ResourceType::Service],
                &resources("svc-a"),
            )
            .await
            .unwrap();
        gated.finished.lock().unwrap().clear();

        let sync = tokio::spawn({
            let client = client.clone();
            async move { client.sync_all(&CancellationToken::new()).await }
        });
        gated.started.notified().await;

        let mut update = tokio::spawn({
            let client = client.clone();
            async move {
                client
                    .update(
                        &CancellationToken::new(),
                        &owner("b"),
                        &[gw],
                        &[ResourceType::Service],
                        &resources("svc-b"),
                    )
                    .await
            }
        });

        // the update can't start while the full sync is in flight
        let pending = tokio::time::timeout(Duration::from_millis(50), &mut update).await;
        assert!(pending.is_err());
        assert!(gated.finished.lock().unwrap().is_empty());
        assert!(client
            .targets_of(&OwnerKey::from_labels(&owner("b")))
            .is_empty());

        gated.release.notify_one();
        assert!(sync.await.unwrap().is_ok());
        assert!(update.await.unwrap().unwrap().is_ok());

        let b = OwnerKey::from_labels(&owner("b")).to_string();
        assert_eq!(
            *gated.finished.lock().unwrap(),
            vec!["sync-all".to_string(), b]
        );
    }

    #[tokio::test]
    async fn test_remove_target() {
        let (client, _recorder) = client();
        let cancel = CancellationToken::new();

        client
            .update(
                &cancel,
                &owner("a"),
                &[target("gw", BackendMode::Apisix)],
                &[ResourceType::Service],
                &resources("svc-a"),
            )
            .await
            .unwrap();

        let removed = client.remove_target("gw").unwrap();
        assert_eq!(removed.map(|c| c.name), Some("gw".to_string()));
        assert!(client.store().targets().is_empty());
        assert!(client.remove_target("gw").unwrap().is_none());
    }
}
