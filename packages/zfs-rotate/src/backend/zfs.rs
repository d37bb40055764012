// zfs(8) command-line backend
use super::{BackendError, Dataset, SnapshotBackend, SNAPSHOT_SEPARATOR};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Default location of the zfs binary
pub const DEFAULT_ZFS_PATH: &str = "/sbin/zfs";

/// Backend that shells out to `zfs(8)`
///
/// Every call runs one `zfs` process and waits for it. Failures are mapped
/// onto [`BackendError`] by inspecting the command's stderr.
pub struct ZfsCli {
    binary: PathBuf,
}

impl ZfsCli {
    pub fn new<P: AsRef<Path>>(binary: P) -> Self {
        Self {
            binary: binary.as_ref().to_path_buf(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run `zfs <args>` and return its stdout
    async fn zfs(&self, args: &[&str]) -> Result<String, ZfsFailure> {
        tracing::debug!("Running {} {}", self.binary.display(), args.join(" "));

        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                ZfsFailure::Spawn(format!("failed to run {}: {}", self.binary.display(), e))
            })?;

        if !output.status.success() {
            return Err(ZfsFailure::Exit {
                command: format!("zfs {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for ZfsCli {
    fn default() -> Self {
        Self::new(DEFAULT_ZFS_PATH)
    }
}

/// Raw failure of a single zfs invocation, before it is classified
#[derive(Debug)]
enum ZfsFailure {
    Spawn(String),
    Exit { command: String, stderr: String },
}

impl ZfsFailure {
    fn into_command_error(self) -> BackendError {
        match self {
            ZfsFailure::Spawn(message) => BackendError::Unavailable(message),
            ZfsFailure::Exit { command, stderr } => BackendError::Command {
                command,
                message: stderr,
            },
        }
    }

    fn stderr(&self) -> &str {
        match self {
            ZfsFailure::Spawn(_) => "",
            ZfsFailure::Exit { stderr, .. } => stderr,
        }
    }
}

fn is_missing_dataset(stderr: &str) -> bool {
    stderr.contains("dataset does not exist")
}

fn is_existing_snapshot(stderr: &str) -> bool {
    stderr.contains("dataset already exists")
}

/// Older zfs reports a missing snapshot as a missing dataset, naming the
/// snapshot path in quotes
fn is_missing_snapshot(stderr: &str) -> bool {
    stderr.contains("could not find any snapshots to destroy")
        || (is_missing_dataset(stderr)
            && quoted_name(stderr).is_some_and(|name| name.contains(SNAPSHOT_SEPARATOR)))
}

/// First `'...'` quoted name in a zfs error message
fn quoted_name(stderr: &str) -> Option<&str> {
    let (_, rest) = stderr.split_once('\'')?;
    rest.split_once('\'').map(|(name, _)| name)
}

/// Non-empty, trimmed lines of `zfs list -H -o name` output
fn parse_names(stdout: &str) -> impl Iterator<Item = &str> {
    stdout.lines().map(str::trim).filter(|line| !line.is_empty())
}

/// Snapshot names of `dataset`, with the `dataset@` part removed
fn parse_snapshots(dataset: &Dataset, stdout: &str) -> Vec<String> {
    parse_names(stdout)
        .filter_map(|line| {
            line.strip_prefix(dataset.path())
                .and_then(|rest| rest.strip_prefix(SNAPSHOT_SEPARATOR))
        })
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl SnapshotBackend for ZfsCli {
    async fn list_datasets(&self) -> Result<Vec<Dataset>, BackendError> {
        let stdout = self
            .zfs(&["list", "-H", "-t", "filesystem,volume", "-o", "name"])
            .await
            .map_err(|e| match e {
                ZfsFailure::Spawn(message) => BackendError::Unavailable(message),
                ZfsFailure::Exit { stderr, .. } => BackendError::Unavailable(stderr),
            })?;

        let datasets: Vec<Dataset> = parse_names(&stdout).map(Dataset::new).collect();
        if datasets.is_empty() {
            return Err(BackendError::Unavailable(
                "no datasets found on system".to_string(),
            ));
        }

        Ok(datasets)
    }

    async fn list_snapshots(&self, dataset: &Dataset) -> Result<Vec<String>, BackendError> {
        let stdout = self
            .zfs(&[
                "list",
                "-H",
                "-t",
                "snapshot",
                "-d",
                "1",
                "-o",
                "name",
                dataset.path(),
            ])
            .await
            .map_err(|e| {
                if is_missing_dataset(e.stderr()) {
                    BackendError::DatasetNotFound(dataset.path().to_string())
                } else {
                    e.into_command_error()
                }
            })?;

        Ok(parse_snapshots(dataset, &stdout))
    }

    async fn create_snapshot(&self, dataset: &Dataset, name: &str) -> Result<(), BackendError> {
        let target = dataset.snapshot_path(name);

        self.zfs(&["snapshot", target.as_str()]).await.map_err(|e| {
            if is_existing_snapshot(e.stderr()) {
                BackendError::SnapshotExists {
                    dataset: dataset.path().to_string(),
                    snapshot: name.to_string(),
                }
            } else if is_missing_dataset(e.stderr()) {
                BackendError::DatasetNotFound(dataset.path().to_string())
            } else {
                e.into_command_error()
            }
        })?;

        tracing::info!("Created snapshot {}", target);
        Ok(())
    }

    async fn destroy_snapshot(&self, dataset: &Dataset, name: &str) -> Result<(), BackendError> {
        let target = dataset.snapshot_path(name);

        self.zfs(&["destroy", target.as_str()]).await.map_err(|e| {
            if is_missing_snapshot(e.stderr()) {
                BackendError::SnapshotNotFound {
                    dataset: dataset.path().to_string(),
                    snapshot: name.to_string(),
                }
            } else if is_missing_dataset(e.stderr()) {
                BackendError::DatasetNotFound(dataset.path().to_string())
            } else {
                e.into_command_error()
            }
        })?;

        tracing::info!("Destroyed snapshot {}", target);
        Ok(())
    }
}
