// Rotation orchestrator: list, decide, create, prune for each dataset
use crate::backend::{BackendError, Dataset, SnapshotBackend};
use crate::naming::{NameError, NamingCodec, SnapshotName};
use crate::period::Period;
use crate::retention::{RetentionPolicy, Snapshot};
use crate::walker::Selection;
use chrono::NaiveDateTime;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Datasets rotated at once unless configured otherwise
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Backend step a dataset stopped at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Listing,
    Creating,
    Pruning,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Listing => "listing",
            Stage::Creating => "creating",
            Stage::Pruning => "pruning",
        };
        f.write_str(label)
    }
}

/// Terminal state of one dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum DatasetState {
    Done,
    Failed { stage: Stage, error: String },
}

/// What happened to the snapshot this run wanted to create
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateStatus {
    Created,
    AlreadyPresent,
    NotAttempted,
    /// Dry run: the snapshot was missing and would have been created
    WouldCreate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PruneFailure {
    pub snapshot: String,
    pub error: String,
}

/// Outcome of rotating one dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetReport {
    pub dataset: String,
    #[serde(flatten)]
    pub state: DatasetState,
    /// Name of the snapshot for the current period slot
    pub snapshot: String,
    pub create: CreateStatus,
    /// Snapshots the policy retained, newest first
    pub kept: Vec<String>,
    /// Snapshots destroyed by this run, or only selected for it in a dry run
    pub pruned: Vec<String>,
    pub prune_failures: Vec<PruneFailure>,
    /// Snapshots that are not this tool's for this period and were ignored
    pub foreign: usize,
}

impl DatasetReport {
    fn new(dataset: &str, snapshot: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            state: DatasetState::Done,
            snapshot: snapshot.to_string(),
            create: CreateStatus::NotAttempted,
            kept: Vec::new(),
            pruned: Vec::new(),
            prune_failures: Vec::new(),
            foreign: 0,
        }
    }

    fn fail(mut self, stage: Stage, error: impl fmt::Display) -> Self {
        tracing::error!("{}: {} failed: {}", self.dataset, stage, error);
        self.state = DatasetState::Failed {
            stage,
            error: error.to_string(),
        };
        self
    }

    pub fn is_success(&self) -> bool {
        self.state == DatasetState::Done && self.prune_failures.is_empty()
    }
}

/// Aggregate outcome of one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationReport {
    pub period: Period,
    /// Nothing was created or destroyed
    pub dry_run: bool,
    pub datasets: Vec<DatasetReport>,
}

impl RotationReport {
    pub fn is_success(&self) -> bool {
        self.datasets.iter().all(DatasetReport::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &DatasetReport> {
        self.datasets.iter().filter(|report| !report.is_success())
    }
}

impl fmt::Display for RotationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pruned = if self.dry_run { "would prune" } else { "pruned" };
        for report in &self.datasets {
            match &report.state {
                DatasetState::Done => writeln!(
                    f,
                    "{}: ok ({} {:?}, kept {}, {} {})",
                    report.dataset,
                    report.snapshot,
                    report.create,
                    report.kept.len(),
                    pruned,
                    report.pruned.len()
                )?,
                DatasetState::Failed { stage, error } => {
                    writeln!(f, "{}: FAILED while {}: {}", report.dataset, stage, error)?
                }
            }
            for failure in &report.prune_failures {
                writeln!(
                    f,
                    "{}: could not destroy {}: {}",
                    report.dataset, failure.snapshot, failure.error
                )?;
            }
        }

        let failed = self.failures().count();
        write!(
            f,
            "{} rotation{}: {} datasets, {} failed",
            self.period,
            if self.dry_run { " (dry run)" } else { "" },
            self.datasets.len(),
            failed
        )
    }
}

/// Drives snapshot rotation for one period across a set of datasets
pub struct Rotator<'a, B: SnapshotBackend + ?Sized> {
    backend: &'a B,
    codec: NamingCodec,
    policy: RetentionPolicy,
    period: Period,
    suffix: Option<String>,
    concurrency: usize,
    cancel: CancellationToken,
}

impl<'a, B: SnapshotBackend + ?Sized> Rotator<'a, B> {
    pub fn new(backend: &'a B, codec: NamingCodec, policy: RetentionPolicy, period: Period) -> Self {
        Self {
            backend,
            codec,
            policy,
            period,
            suffix: None,
            concurrency: DEFAULT_CONCURRENCY,
            cancel: CancellationToken::new(),
        }
    }

    /// Label appended to the snapshots this run creates
    pub fn with_suffix(mut self, suffix: Option<String>) -> Self {
        self.suffix = suffix;
        self
    }

    /// Upper bound on datasets processed at the same time
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Rotate every selected dataset.
    ///
    /// `now` is the creation instant of the new snapshots. Selectors that
    /// matched nothing are reported as datasets that failed while listing.
    /// Only an unusable snapshot name for `now` fails the whole run.
    pub async fn run(
        &self,
        selection: Selection,
        now: NaiveDateTime,
    ) -> Result<RotationReport, NameError> {
        let target = SnapshotName::new(self.period, now, self.suffix.clone())?;
        let target = self.codec.encode(&target);

        tracing::info!(
            "Rotating {} '{}' snapshots on {} datasets (keep {}, new snapshot {})",
            self.period,
            self.codec.prefix(),
            selection.datasets.len(),
            self.policy.keep_count(self.period),
            target
        );

        let mut datasets: Vec<DatasetReport> = selection
            .missing
            .iter()
            .map(|selector| {
                DatasetReport::new(selector, &target).fail(
                    Stage::Listing,
                    BackendError::DatasetNotFound(selector.clone()),
                )
            })
            .collect();

        let rotated: Vec<DatasetReport> = stream::iter(selection.datasets)
            .map(|dataset| self.rotate_dataset(dataset, &target))
            .buffered(self.concurrency)
            .collect()
            .await;
        datasets.extend(rotated);

        Ok(RotationReport {
            period: self.period,
            dry_run: self.backend.is_dry_run(),
            datasets,
        })
    }

    async fn rotate_dataset(&self, dataset: Dataset, target: &str) -> DatasetReport {
        let mut report = DatasetReport::new(dataset.path(), target);

        // Listing
        let raw = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BackendError::Cancelled),
            listed = self.backend.list_snapshots(&dataset) => listed,
        };
        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => return report.fail(Stage::Listing, e),
        };

        // Deciding
        let mut candidates = Vec::new();
        let mut target_exists = false;
        for encoded in raw {
            if encoded == target {
                target_exists = true;
                continue;
            }
            match self.codec.decode(&encoded) {
                Ok(name) if name.period() == self.period => candidates.push(Snapshot {
                    dataset: dataset.path().to_string(),
                    name,
                    encoded,
                }),
                Ok(_) => report.foreign += 1,
                Err(e) => {
                    tracing::debug!("{}: ignoring {}", dataset.path(), e);
                    report.foreign += 1;
                }
            }
        }

        let decision = self.policy.decide(self.period, candidates);
        report.kept = decision.keep.iter().map(|s| s.encoded.clone()).collect();
        tracing::debug!(
            "{}: keeping {}, pruning {}, ignoring {} foreign",
            dataset.path(),
            decision.keep.len(),
            decision.prune.len(),
            report.foreign
        );

        // Creating
        if self.cancel.is_cancelled() {
            return report.fail(Stage::Creating, BackendError::Cancelled);
        }
        if target_exists {
            tracing::debug!("{}: {} already exists", dataset.path(), target);
            report.create = CreateStatus::AlreadyPresent;
        } else {
            match self.backend.create_snapshot(&dataset, target).await {
                Ok(()) if self.backend.is_dry_run() => {
                    report.create = CreateStatus::WouldCreate;
                }
                Ok(()) => report.create = CreateStatus::Created,
                Err(BackendError::SnapshotExists { .. }) => {
                    tracing::debug!("{}: {} appeared concurrently", dataset.path(), target);
                    report.create = CreateStatus::AlreadyPresent;
                }
                Err(e) => return report.fail(Stage::Creating, e),
            }
        }

        // Pruning
        for snapshot in decision.prune {
            if self.cancel.is_cancelled() {
                return report.fail(Stage::Pruning, BackendError::Cancelled);
            }

            match self
                .backend
                .destroy_snapshot(&dataset, &snapshot.encoded)
                .await
            {
                Ok(()) => report.pruned.push(snapshot.encoded),
                Err(BackendError::SnapshotNotFound { .. }) => {
                    tracing::warn!(
                        "{}: {} was already gone",
                        snapshot.dataset,
                        snapshot.encoded
                    );
                    report.pruned.push(snapshot.encoded);
                }
                Err(e) => {
                    tracing::warn!(
                        "{}: failed to destroy {}: {}",
                        snapshot.dataset,
                        snapshot.encoded,
                        e
                    );
                    report.prune_failures.push(PruneFailure {
                        snapshot: snapshot.encoded,
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }
}
