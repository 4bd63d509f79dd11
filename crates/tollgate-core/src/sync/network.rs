use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tollgate_api::label::Labels;
use tollgate_api::resources::{ResourceType, Resources};
use tollgate_api::target::TargetConfig;

use super::{sync_servers, Executor, Failure, SyncError, SyncResult, Task};

/// Syncs by handing each server's work to a remote sync service.
///
/// Each server gets its own `PUT {endpoint}/sync`. Any 2xx response means the
/// service accepted the task; resource-level failures are reported in the
/// response body.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    feature_flags: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SyncRequest<'a> {
    task: SyncRequestTask<'a>,
}

#[derive(Debug, Serialize)]
struct SyncRequestTask<'a> {
    opts: SyncOpts<'a>,
    config: &'a Resources,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncOpts<'a> {
    backend: &'a str,
    server: &'a str,
    token: &'a str,
    label_selector: &'a Labels,
    include_resource_type: &'a [ResourceType],
    tls_skip_verify: bool,

    #[serde(skip_serializing_if = "no_flags")]
    experimental_feature_flags: &'a [String],
}

fn no_flags(flags: &&[String]) -> bool {
    flags.is_empty()
}

impl HttpExecutor {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, feature_flags: Vec<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint, timeout, feature_flags)
    }

    pub fn with_client(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        timeout: Duration,
        feature_flags: Vec<String>,
    ) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            client,
            endpoint,
            timeout,
            feature_flags,
        }
    }

    async fn sync_one(
        &self,
        config: &TargetConfig,
        server: &str,
        task: &Task,
    ) -> Result<SyncResult, Failure> {
        let body = SyncRequest {
            task: SyncRequestTask {
                opts: SyncOpts {
                    backend: config.backend_mode.as_str(),
                    server,
                    token: &config.token,
                    label_selector: &task.labels,
                    include_resource_type: &task.resource_types,
                    tls_skip_verify: !config.tls_verify,
                    experimental_feature_flags: &self.feature_flags,
                },
                config: &task.resources,
            },
        };

        let url = format!("{}/sync", self.endpoint);
        tracing::trace!(target_name = %config.name, %server, %url, "sending sync request");

        let response = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Failure::Transport(format!("request failed: {e}")))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Failure::Transport(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes);
            return Err(Failure::Transport(format!(
                "unexpected status {status}: {}",
                body.trim()
            )));
        }

        SyncResult::parse(&bytes)?.into_result()
    }
}

#[async_trait::async_trait]
impl Executor for HttpExecutor {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        config: &TargetConfig,
        task: &Task,
    ) -> Result<(), SyncError> {
        sync_servers(config, self.timeout, cancel, |server| {
            self.sync_one(config, server, task)
        })
        .await
    }
}
