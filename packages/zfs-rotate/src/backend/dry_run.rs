// Read-only wrapper that logs mutations instead of performing them
use super::{BackendError, Dataset, SnapshotBackend};
use async_trait::async_trait;

/// Forwards listing calls to the inner backend and only logs creates and
/// destroys
pub struct DryRun<B> {
    inner: B,
}

impl<B: SnapshotBackend> DryRun<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<B: SnapshotBackend> SnapshotBackend for DryRun<B> {
    async fn list_datasets(&self) -> Result<Vec<Dataset>, BackendError> {
        self.inner.list_datasets().await
    }

    async fn list_snapshots(&self, dataset: &Dataset) -> Result<Vec<String>, BackendError> {
        self.inner.list_snapshots(dataset).await
    }

    async fn create_snapshot(&self, dataset: &Dataset, name: &str) -> Result<(), BackendError> {
        tracing::info!("Dry run: would create {}", dataset.snapshot_path(name));
        Ok(())
    }

    async fn destroy_snapshot(&self, dataset: &Dataset, name: &str) -> Result<(), BackendError> {
        tracing::info!("Dry run: would destroy {}", dataset.snapshot_path(name));
        Ok(())
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}
