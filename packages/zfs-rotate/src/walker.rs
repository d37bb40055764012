// Dataset tree resolution
use crate::backend::{BackendError, Dataset, SnapshotBackend};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Parent/child view of the datasets reported by the backend
#[derive(Debug, Clone, Default)]
pub struct DatasetTree {
    children: BTreeMap<String, BTreeSet<String>>,
    roots: BTreeSet<String>,
}

impl DatasetTree {
    pub fn new<I: IntoIterator<Item = Dataset>>(datasets: I) -> Self {
        let paths: BTreeSet<String> = datasets
            .into_iter()
            .map(|dataset| dataset.path().to_string())
            .collect();

        let mut tree = Self::default();
        for path in &paths {
            tree.children.entry(path.clone()).or_default();
            match Dataset::new(path.as_str()).parent() {
                Some(parent) if paths.contains(parent) => {
                    tree.children
                        .entry(parent.to_string())
                        .or_default()
                        .insert(path.clone());
                }
                // Pool roots, and anything whose parent the backend did not report.
                _ => {
                    tree.roots.insert(path.clone());
                }
            }
        }

        tree
    }

    /// Build the tree from a fresh `list_datasets` call
    pub async fn load(backend: &dyn SnapshotBackend) -> Result<Self, BackendError> {
        let datasets = backend.list_datasets().await?;
        tracing::debug!("Backend reported {} datasets", datasets.len());
        Ok(Self::new(datasets))
    }

    /// Top-level datasets, ordered by path
    pub fn roots(&self) -> impl Iterator<Item = Dataset> + '_ {
        self.roots.iter().map(|path| Dataset::new(path.as_str()))
    }

    /// Resolve one selector.
    ///
    /// Without `recursive` the walk yields exactly the selected dataset. With
    /// it, the walk is pre-order: the dataset, then each child subtree in
    /// path order.
    pub fn resolve(&self, selector: &str, recursive: bool) -> Result<Walk<'_>, BackendError> {
        let (root, _) = self
            .children
            .get_key_value(selector)
            .ok_or_else(|| BackendError::DatasetNotFound(selector.to_string()))?;

        Ok(Walk {
            tree: self,
            stack: vec![root.as_str()],
            recursive,
        })
    }

    /// Resolve a list of selectors into one ordered, duplicate-free list.
    ///
    /// An empty list selects every top-level dataset. Selectors the backend
    /// does not know are returned separately so the caller can report them
    /// without dropping the others.
    pub fn select(&self, selectors: &[String], recursive: bool) -> Selection {
        let selectors: Vec<String> = if selectors.is_empty() {
            self.roots()
                .map(|dataset| dataset.path().to_string())
                .collect()
        } else {
            selectors.to_vec()
        };

        let mut selection = Selection::default();
        let mut seen = HashSet::new();
        for selector in &selectors {
            match self.resolve(selector, recursive) {
                Ok(walk) => {
                    for dataset in walk {
                        if seen.insert(dataset.path().to_string()) {
                            selection.datasets.push(dataset);
                        }
                    }
                }
                Err(_) => selection.missing.push(selector.clone()),
            }
        }

        selection
    }
}

/// Datasets chosen for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub datasets: Vec<Dataset>,
    /// Selectors that named no known dataset
    pub missing: Vec<String>,
}

/// Lazy pre-order traversal started by [`DatasetTree::resolve`]
pub struct Walk<'a> {
    tree: &'a DatasetTree,
    stack: Vec<&'a str>,
    recursive: bool,
}

impl Iterator for Walk<'_> {
    type Item = Dataset;

    fn next(&mut self) -> Option<Dataset> {
        let path = self.stack.pop()?;

        if self.recursive {
            if let Some(children) = self.tree.children.get(path) {
                // Reversed so the smallest path is popped first.
                self.stack
                    .extend(children.iter().rev().map(String::as_str));
            }
        }

        Some(Dataset::new(path))
    }
}
