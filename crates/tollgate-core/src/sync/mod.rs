//! Pushing configuration to gateways.
//!
//! A [Task] is delivered to every server of every target it names. Servers are
//! synced independently: a failure on one server never stops the others, and
//! all failures for a target are collected into a single [SyncError] that can
//! be inspected per server.
//!
//! There are two transports. The [ProcessExecutor] runs the sync binary
//! locally once per server, and the [HttpExecutor] hands the same work to a
//! remote sync service. Both accept the same inputs and report results the
//! same way.

mod network;
mod process;

pub use network::HttpExecutor;
pub use process::ProcessExecutor;

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tollgate_api::label::Labels;
use tollgate_api::resources::{ResourceType, Resources};
use tollgate_api::target::TargetConfig;

use crate::config::{SyncConfig, SyncMode};

/// A unit of sync work.
#[derive(Debug, Clone, Default)]
pub struct Task {
    /// A name for this task, used in logs.
    pub name: String,

    /// The targets to push to.
    pub configs: Vec<TargetConfig>,

    /// Only resources with these labels are replaced on the gateway. An empty
    /// set of labels replaces everything.
    pub labels: Labels,

    /// Only resources of these types are replaced on the gateway. An empty
    /// list replaces every type.
    pub resource_types: Vec<ResourceType>,

    pub resources: Resources,
}

/// A sync transport.
#[async_trait::async_trait]
pub trait Executor: Send + Sync {
    /// Push a task to every server of a single target.
    async fn execute(
        &self,
        cancel: &CancellationToken,
        config: &TargetConfig,
        task: &Task,
    ) -> Result<(), SyncError>;
}

/// Build the executor for a sync config.
pub fn executor(config: &SyncConfig) -> Box<dyn Executor> {
    match config.mode {
        SyncMode::Process => Box::new(ProcessExecutor::new(
            config.binary_path.clone(),
            *config.timeout,
            config.feature_flags.clone(),
        )),
        SyncMode::Http => Box::new(HttpExecutor::new(
            config.endpoint.clone(),
            *config.timeout,
            config.feature_flags.clone(),
        )),
    }
}

/// Run a task against every one of its targets, collecting failures.
pub async fn execute_task(
    executor: &dyn Executor,
    cancel: &CancellationToken,
    task: &Task,
) -> Result<(), SyncErrors> {
    let results = futures::future::join_all(
        task.configs
            .iter()
            .map(|config| executor.execute(cancel, config, task)),
    )
    .await;

    let errors: Vec<_> = results.into_iter().filter_map(Result::err).collect();
    if errors.is_empty() {
        tracing::debug!(task = %task.name, targets = task.configs.len(), "sync complete");
        Ok(())
    } else {
        Err(SyncErrors(errors))
    }
}

/// The result of a sync reported by the sync tooling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub total_resources: u64,

    #[serde(default)]
    pub success_count: u64,

    #[serde(default)]
    pub failed_count: u64,

    #[serde(default)]
    pub failed: Vec<FailedResource>,
}

impl SyncResult {
    /// Parse a sync result. An empty body means there was nothing to report.
    pub(crate) fn parse(body: &[u8]) -> Result<Self, Failure> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(SyncResult::default());
        }

        serde_json::from_slice(body)
            .map_err(|e| Failure::Transport(format!("invalid sync result: {e}")))
    }

    /// Convert this result into an error if any resources failed.
    pub(crate) fn into_result(self) -> Result<SyncResult, Failure> {
        if self.failed_count > 0 || !self.failed.is_empty() {
            return Err(Failure::Resources(self.failed));
        }
        Ok(self)
    }
}

/// A single resource the gateway rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawFailedResource", into = "RawFailedResource")]
pub struct FailedResource {
    pub resource_type: String,
    pub resource_id: String,
    pub resource_name: String,
    pub reason: String,
    pub status: Option<u16>,
    pub headers: BTreeMap<String, String>,
}

impl FailedResource {
    /// The type of the failed resource, if it's one tollgate manages.
    pub fn resource_type(&self) -> Option<ResourceType> {
        self.resource_type.parse().ok()
    }
}

impl std::fmt::Display for FailedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = if self.resource_name.is_empty() {
            &self.resource_id
        } else {
            &self.resource_name
        };
        write!(f, "{} {}: {}", self.resource_type, name, self.reason)?;
        if let Some(status) = self.status {
            write!(f, " (status {status})")?;
        }
        Ok(())
    }
}

// the shape failures come back in on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawFailedResource {
    #[serde(default)]
    event: RawEvent,

    #[serde(default)]
    reason: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    response: Option<RawResponse>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(default)]
    resource_type: String,

    #[serde(default)]
    resource_id: String,

    #[serde(default)]
    resource_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawResponse {
    #[serde(default)]
    status: Option<u16>,

    #[serde(default)]
    headers: BTreeMap<String, String>,
}

impl From<RawFailedResource> for FailedResource {
    fn from(raw: RawFailedResource) -> Self {
        let (status, headers) = match raw.response {
            Some(r) => (r.status, r.headers),
            None => (None, BTreeMap::new()),
        };
        Self {
            resource_type: raw.event.resource_type,
            resource_id: raw.event.resource_id,
            resource_name: raw.event.resource_name,
            reason: raw.reason,
            status,
            headers,
        }
    }
}

impl From<FailedResource> for RawFailedResource {
    fn from(f: FailedResource) -> Self {
        let response = (f.status.is_some() || !f.headers.is_empty()).then(|| RawResponse {
            status: f.status,
            headers: f.headers,
        });
        Self {
            event: RawEvent {
                resource_type: f.resource_type,
                resource_id: f.resource_id,
                resource_name: f.resource_name,
            },
            reason: f.reason,
            response,
        }
    }
}

/// Why a sync to a single server failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// The sync could not be carried out at all.
    Transport(String),

    /// The sync ran past the per-server ceiling.
    Timeout(Duration),

    /// The sync was canceled by the caller.
    Canceled,

    /// The sync ran, but the gateway rejected some resources.
    Resources(Vec<FailedResource>),
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Transport(msg) => f.write_str(msg),
            Failure::Timeout(d) => write!(f, "timed out after {d:?}"),
            Failure::Canceled => f.write_str("canceled"),
            Failure::Resources(failed) if failed.is_empty() => {
                f.write_str("resources failed without details")
            }
            Failure::Resources(failed) => {
                write!(f, "{} resources failed", failed.len())?;
                for (i, resource) in failed.iter().enumerate() {
                    let sep = if i == 0 { ": " } else { "; " };
                    write!(f, "{sep}{resource}")?;
                }
                Ok(())
            }
        }
    }
}

/// A failed sync to one server.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{server}: {failure}")]
pub struct ServerError {
    pub server: String,
    pub failure: Failure,
}

/// Every failed server for a single target.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub struct SyncError {
    pub target: String,
    pub total: usize,
    pub errors: Vec<ServerError>,
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sync to {} failed on {} of {} servers: {}",
            self.target,
            self.errors.len(),
            self.total,
            join(&self.errors),
        )
    }
}

impl SyncError {
    pub fn iter(&self) -> impl Iterator<Item = &ServerError> {
        self.errors.iter()
    }

    /// Every resource-level failure reported by any server.
    pub fn failed_resources(&self) -> impl Iterator<Item = (&str, &FailedResource)> {
        self.errors.iter().flat_map(|e| {
            let failed: &[FailedResource] = match &e.failure {
                Failure::Resources(failed) => failed,
                _ => &[],
            };
            failed.iter().map(move |f| (e.server.as_str(), f))
        })
    }
}

impl<'a> IntoIterator for &'a SyncError {
    type Item = &'a ServerError;
    type IntoIter = std::slice::Iter<'a, ServerError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}

/// Every failed target for a task.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub struct SyncErrors(pub Vec<SyncError>);

impl std::fmt::Display for SyncErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&join(&self.0))
    }
}

impl SyncErrors {
    pub fn iter(&self) -> impl Iterator<Item = &SyncError> {
        self.0.iter()
    }
}

impl IntoIterator for SyncErrors {
    type Item = SyncError;
    type IntoIter = std::vec::IntoIter<SyncError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Sync every server of a target with `sync_one`, collecting failures.
///
/// Every attempt is bounded by `timeout` and by `cancel`, and all attempts run
/// to completion regardless of whether their siblings fail.
pub(crate) async fn sync_servers<'a, F, Fut>(
    config: &'a TargetConfig,
    timeout: Duration,
    cancel: &CancellationToken,
    sync_one: F,
) -> Result<(), SyncError>
where
    F: Fn(&'a str) -> Fut,
    Fut: Future<Output = Result<SyncResult, Failure>>,
{
    let attempts = config.server_addrs.iter().map(|server| {
        let attempt = sync_one(server.as_str());
        async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => Err(Failure::Canceled),
                res = tokio::time::timeout(timeout, attempt) => {
                    res.unwrap_or(Err(Failure::Timeout(timeout)))
                },
            };
            (server, result)
        }
    });

    let mut errors = vec![];
    for (server, result) in futures::future::join_all(attempts).await {
        match result {
            Ok(result) => {
                tracing::debug!(
                    target_name = %config.name,
                    %server,
                    total = result.total_resources,
                    success = result.success_count,
                    "synced server"
                );
            }
            Err(failure) => {
                tracing::warn!(target_name = %config.name, %server, %failure, "sync failed");
                errors.push(ServerError {
                    server: server.clone(),
                    failure,
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SyncError {
            target: config.name.clone(),
            total: config.server_addrs.len(),
            errors,
        })
    }
}
