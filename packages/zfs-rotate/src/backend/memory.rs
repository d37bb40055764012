// In-memory backend used by the tests
use super::{BackendError, Dataset, SnapshotBackend};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Backend call recorded by [`MemoryBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListDatasets,
    ListSnapshots(String),
    Create(String),
    Destroy(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Op {
    List,
    Create,
    Destroy,
}

/// Dataset tree and snapshots held in memory, with injectable failures
#[derive(Default)]
pub struct MemoryBackend {
    datasets: Mutex<BTreeMap<String, BTreeSet<String>>>,
    failures: Mutex<HashMap<(Op, String), BackendError>>,
    calls: Mutex<Vec<Call>>,
    unavailable: Mutex<bool>,
    cancel_after: Mutex<HashMap<Op, CancellationToken>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset<I, S>(self, path: &str, snapshots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.datasets.lock().unwrap().insert(
            path.to_string(),
            snapshots.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn set_unavailable(&self) {
        *self.unavailable.lock().unwrap() = true;
    }

    /// Make `list_snapshots` on `dataset` fail with `err`
    pub fn fail_list(&self, dataset: &str, err: BackendError) {
        self.failures
            .lock()
            .unwrap()
            .insert((Op::List, dataset.to_string()), err);
    }

    /// Make `create_snapshot` on `dataset` fail with `err`
    pub fn fail_create(&self, dataset: &str, err: BackendError) {
        self.failures
            .lock()
            .unwrap()
            .insert((Op::Create, dataset.to_string()), err);
    }

    /// Make destroying `dataset@snapshot` fail with `err`
    pub fn fail_destroy(&self, dataset: &str, snapshot: &str, err: BackendError) {
        self.failures
            .lock()
            .unwrap()
            .insert((Op::Destroy, format!("{dataset}@{snapshot}")), err);
    }

    /// Cancel `token` once any `list_snapshots` call has returned
    pub fn cancel_after_list(&self, token: CancellationToken) {
        self.cancel_after.lock().unwrap().insert(Op::List, token);
    }

    /// Cancel `token` once any `create_snapshot` call has returned
    pub fn cancel_after_create(&self, token: CancellationToken) {
        self.cancel_after.lock().unwrap().insert(Op::Create, token);
    }

    /// Current snapshots of `dataset`, sorted by name
    pub fn snapshots(&self, dataset: &str) -> Vec<String> {
        self.datasets
            .lock()
            .unwrap()
            .get(dataset)
            .map(|snaps| snaps.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn trip(&self, op: Op) {
        if let Some(token) = self.cancel_after.lock().unwrap().get(&op) {
            token.cancel();
        }
    }

    fn injected(&self, op: Op, key: String) -> Result<(), BackendError> {
        match self.failures.lock().unwrap().get(&(op, key)) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SnapshotBackend for MemoryBackend {
    async fn list_datasets(&self) -> Result<Vec<Dataset>, BackendError> {
        self.record(Call::ListDatasets);
        if *self.unavailable.lock().unwrap() {
            return Err(BackendError::Unavailable("backend offline".to_string()));
        }

        Ok(self
            .datasets
            .lock()
            .unwrap()
            .keys()
            .map(Dataset::new)
            .collect())
    }

    async fn list_snapshots(&self, dataset: &Dataset) -> Result<Vec<String>, BackendError> {
        self.record(Call::ListSnapshots(dataset.path().to_string()));
        self.injected(Op::List, dataset.path().to_string())?;

        let listed = self
            .datasets
            .lock()
            .unwrap()
            .get(dataset.path())
            .map(|snaps| snaps.iter().cloned().collect())
            .ok_or_else(|| BackendError::DatasetNotFound(dataset.path().to_string()));
        self.trip(Op::List);
        listed
    }

    async fn create_snapshot(&self, dataset: &Dataset, name: &str) -> Result<(), BackendError> {
        self.record(Call::Create(dataset.snapshot_path(name)));
        self.injected(Op::Create, dataset.path().to_string())?;

        let created = match self.datasets.lock().unwrap().get_mut(dataset.path()) {
            None => Err(BackendError::DatasetNotFound(dataset.path().to_string())),
            Some(snaps) => {
                if !snaps.insert(name.to_string()) {
                    Err(BackendError::SnapshotExists {
                        dataset: dataset.path().to_string(),
                        snapshot: name.to_string(),
                    })
                } else {
                    Ok(())
                }
            }
        };
        self.trip(Op::Create);
        created
    }

    async fn destroy_snapshot(&self, dataset: &Dataset, name: &str) -> Result<(), BackendError> {
        self.record(Call::Destroy(dataset.snapshot_path(name)));
        self.injected(Op::Destroy, dataset.snapshot_path(name))?;

        let mut datasets = self.datasets.lock().unwrap();
        let removed = datasets
            .get_mut(dataset.path())
            .map(|snaps| snaps.remove(name))
            .unwrap_or(false);

        if !removed {
            return Err(BackendError::SnapshotNotFound {
                dataset: dataset.path().to_string(),
                snapshot: name.to_string(),
            });
        }
        Ok(())
    }
}
