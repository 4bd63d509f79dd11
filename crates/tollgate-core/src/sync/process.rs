use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tollgate_api::target::TargetConfig;

use super::{sync_servers, Executor, Failure, ServerError, SyncError, SyncResult, Task};

/// Syncs by running the sync binary once for each server.
///
/// The task's resources are written to a temporary file that every run reads.
/// Server addresses and credentials are passed to the binary through its
/// environment and never on the command line.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    binary: PathBuf,
    timeout: Duration,
    feature_flags: Vec<String>,
}

impl ProcessExecutor {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration, feature_flags: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            feature_flags,
        }
    }

    fn command(&self, config: &TargetConfig, server: &str, file: &Path, task: &Task) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("sync").arg("-f").arg(file);

        for (key, value) in &task.labels {
            cmd.arg("--label-selector").arg(format!("{key}={value}"));
        }
        for resource_type in &task.resource_types {
            cmd.arg("--include-resource-type")
                .arg(resource_type.as_str());
        }
        if !config.tls_verify {
            cmd.arg("--tls-skip-verify");
        }
        cmd.arg("--timeout")
            .arg(format!("{}s", self.timeout.as_secs().max(1)));

        cmd.env("ADC_BACKEND", config.backend_mode.as_str())
            .env("ADC_SERVER", server)
            .env("ADC_TOKEN", &config.token)
            .env(
                "ADC_EXPERIMENTAL_FEATURE_FLAGS",
                self.feature_flags.join(","),
            );

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd
    }

    async fn sync_one(
        &self,
        config: &TargetConfig,
        server: &str,
        file: &Path,
        task: &Task,
    ) -> Result<SyncResult, Failure> {
        tracing::trace!(target_name = %config.name, %server, binary = ?self.binary, "running sync");

        let output = self
            .command(config, server, file, task)
            .output()
            .await
            .map_err(|e| Failure::Transport(format!("failed to run {}: {e}", self.binary.display())))?;

        if output.status.success() {
            return SyncResult::parse(&output.stdout)?.into_result();
        }

        // a failed run may still report which resources were rejected.
        if let Ok(result) = SyncResult::parse(&output.stdout) {
            if result.failed_count > 0 {
                return result.into_result();
            }
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(Failure::Transport(format!(
            "sync exited with {}: {}",
            output.status,
            stderr.trim()
        )))
    }
}

fn write_resources(task: &Task) -> std::io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("tollgate-sync-")
        .suffix(".json")
        .tempfile()?;
    serde_json::to_writer(&mut file, &task.resources)?;
    file.flush()?;
    Ok(file)
}

#[async_trait::async_trait]
impl Executor for ProcessExecutor {
    async fn execute(
        &self,
        cancel: &CancellationToken,
        config: &TargetConfig,
        task: &Task,
    ) -> Result<(), SyncError> {
        let file = match write_resources(task) {
            Ok(file) => file,
            Err(e) => {
                let failure = Failure::Transport(format!("failed to write sync file: {e}"));
                return Err(SyncError {
                    target: config.name.clone(),
                    total: config.server_addrs.len(),
                    errors: config
                        .server_addrs
                        .iter()
                        .map(|server| ServerError {
                            server: server.clone(),
                            failure: failure.clone(),
                        })
                        .collect(),
                });
            }
        };

        // the file has to outlive every run. it's removed when dropped.
        let path = file.path();
        sync_servers(config, self.timeout, cancel, |server| {
            self.sync_one(config, server, path, task)
        })
        .await
    }
}
