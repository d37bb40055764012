// Storage backend trait and implementations
use async_trait::async_trait;
use thiserror::Error;

pub mod dry_run;
#[cfg(test)]
pub mod memory;
pub mod zfs;

pub use dry_run::DryRun;
pub use zfs::ZfsCli;

/// Separator between a dataset path and a snapshot name (`pool/fs@snap`)
pub const SNAPSHOT_SEPARATOR: char = '@';

/// Separator between the components of a dataset path
pub const PATH_SEPARATOR: char = '/';

/// A filesystem or volume reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dataset {
    path: String,
}

impl Dataset {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path of the parent dataset, `None` for a pool root
    pub fn parent(&self) -> Option<&str> {
        self.path.rsplit_once(PATH_SEPARATOR).map(|(parent, _)| parent)
    }

    /// Full `dataset@snapshot` form
    pub fn snapshot_path(&self, snapshot: &str) -> String {
        format!("{}{}{}", self.path, SNAPSHOT_SEPARATOR, snapshot)
    }
}

/// Errors reported by a storage backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("snapshot already exists: {dataset}@{snapshot}")]
    SnapshotExists { dataset: String, snapshot: String },

    #[error("snapshot not found: {dataset}@{snapshot}")]
    SnapshotNotFound { dataset: String, snapshot: String },

    #[error("{command} failed: {message}")]
    Command { command: String, message: String },

    #[error("operation cancelled")]
    Cancelled,
}

/// Narrow interface over the storage system's snapshot commands
///
/// Implementations only talk to the storage system. Every decision about what
/// to create or destroy is made by the caller.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Enumerate every filesystem and volume
    async fn list_datasets(&self) -> Result<Vec<Dataset>, BackendError>;

    /// Names of the snapshots taken directly on `dataset`, without the
    /// `dataset@` part
    async fn list_snapshots(&self, dataset: &Dataset) -> Result<Vec<String>, BackendError>;

    /// Take a snapshot of `dataset` called `name`
    async fn create_snapshot(&self, dataset: &Dataset, name: &str) -> Result<(), BackendError>;

    /// Destroy the snapshot `dataset@name`
    async fn destroy_snapshot(&self, dataset: &Dataset, name: &str) -> Result<(), BackendError>;

    /// True when creates and destroys are only logged, never performed
    fn is_dry_run(&self) -> bool {
        false
    }
}
