//! Partition loading and validation.

use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    dataset::{open_dataset, Dataset, MetadataMode, OpenDatasetError},
    partition::PartitionPaths,
    store::{StoreClient, StoreClientError},
};

/// A partition could not be opened.
#[derive(Debug, Error)]
pub enum PartitionOpenError {
    /// The location is not addressable.
    #[error("cannot address {path}: {source}")]
    Store {
        /// The attempted path.
        path: String,
        /// The underlying error.
        source: StoreClientError,
    },
    /// The store at the location could not be opened as a dataset.
    #[error("cannot open {path} ({mode} metadata): {source}")]
    Open {
        /// The attempted path.
        path: String,
        /// The metadata mode.
        mode: MetadataMode,
        /// The underlying error.
        source: OpenDatasetError,
    },
}

/// A partition opened, but does not hold a usable dataset.
#[derive(Debug, Error)]
pub enum PartitionSchemaError {
    /// Neither the primary nor the fallback location holds a data variable.
    #[error("{path} has no data variables")]
    NoDataVariables {
        /// The path of the last location opened.
        path: String,
    },
    /// The dataset lacks the temporal coordinate.
    #[error("{path} has no {coordinate} coordinate")]
    MissingTemporalCoordinate {
        /// The path of the dataset.
        path: String,
        /// The name of the temporal coordinate.
        coordinate: String,
    },
}

/// Why a partition was rejected.
#[derive(Debug, Error)]
pub enum Rejection {
    /// The partition could not be opened.
    #[error(transparent)]
    Open(#[from] PartitionOpenError),
    /// The partition does not hold a usable dataset.
    #[error(transparent)]
    Schema(#[from] PartitionSchemaError),
}

/// A validated partition dataset.
#[derive(Debug, Clone)]
pub struct LoadedPartition {
    /// The dataset.
    pub dataset: Dataset,
    /// The path the dataset was opened from.
    pub path: String,
    /// True if the dataset was opened from the fallback location.
    pub via_fallback: bool,
}

/// The outcome of loading a partition.
#[derive(Debug)]
pub enum LoadOutcome {
    /// The partition was opened and validated.
    Loaded(LoadedPartition),
    /// The partition was rejected.
    Rejected(Rejection),
}

/// Opens and validates partitions.
pub struct PartitionLoader<'a> {
    client: &'a dyn StoreClient,
    temporal_coordinate: String,
}

impl<'a> PartitionLoader<'a> {
    /// Create a loader reading through `client` and requiring `temporal_coordinate`.
    #[must_use]
    pub fn new(client: &'a dyn StoreClient, temporal_coordinate: impl Into<String>) -> Self {
        Self {
            client,
            temporal_coordinate: temporal_coordinate.into(),
        }
    }

    fn open(&self, path: &str, mode: MetadataMode) -> Result<Dataset, PartitionOpenError> {
        let mapper = self
            .client
            .get_mapper(path)
            .map_err(|source| PartitionOpenError::Store {
                path: path.to_string(),
                source,
            })?;
        open_dataset(mapper.storage(), mapper.path(), mode).map_err(|source| {
            PartitionOpenError::Open {
                path: path.to_string(),
                mode,
                source,
            }
        })
    }

    fn open_with_fallback(
        &self,
        paths: &PartitionPaths,
    ) -> Result<LoadedPartition, Rejection> {
        let dataset = self.open(&paths.primary, MetadataMode::NonConsolidated)?;
        let loaded = if dataset.data_vars().is_empty() {
            warn!(
                path = %paths.primary,
                fallback = %paths.fallback,
                "No data variables, trying nested path"
            );
            let dataset = self.open(&paths.fallback, MetadataMode::Consolidated)?;
            LoadedPartition {
                dataset,
                path: paths.fallback.clone(),
                via_fallback: true,
            }
        } else {
            LoadedPartition {
                dataset,
                path: paths.primary.clone(),
                via_fallback: false,
            }
        };
        if loaded.dataset.data_vars().is_empty() {
            return Err(PartitionSchemaError::NoDataVariables { path: loaded.path }.into());
        }
        Ok(loaded)
    }

    /// Load the partition at `paths`.
    ///
    /// The primary location is opened with [`MetadataMode::NonConsolidated`].
    /// If it holds no data variables, the fallback location is opened with [`MetadataMode::Consolidated`] instead.
    /// The dataset is accepted if it has at least one data variable and the temporal coordinate.
    ///
    /// Failures are logged and returned as [`LoadOutcome::Rejected`].
    pub fn load(&self, paths: &PartitionPaths) -> LoadOutcome {
        info!(period = %paths.period, path = %paths.primary, "Opening partition");
        let loaded = match self.open_with_fallback(paths) {
            Ok(loaded) => loaded,
            Err(Rejection::Open(err)) => {
                error!(period = %paths.period, error = %err, "Failed to open partition");
                return LoadOutcome::Rejected(Rejection::Open(err));
            }
            Err(Rejection::Schema(err)) => {
                warn!(period = %paths.period, error = %err, "Rejecting partition");
                return LoadOutcome::Rejected(Rejection::Schema(err));
            }
        };

        let dataset = &loaded.dataset;
        info!(
            path = %loaded.path,
            data_vars = ?dataset.data_vars().keys().collect::<Vec<_>>(),
            coords = ?dataset.coords().keys().collect::<Vec<_>>(),
            "Opened dataset"
        );
        if !dataset.has_coord(&self.temporal_coordinate) {
            let err = PartitionSchemaError::MissingTemporalCoordinate {
                path: loaded.path.clone(),
                coordinate: self.temporal_coordinate.clone(),
            };
            warn!(period = %paths.period, error = %err, "Rejecting partition");
            return LoadOutcome::Rejected(err.into());
        }
        info!(
            path = %loaded.path,
            coordinate = %self.temporal_coordinate,
            "Found temporal coordinate"
        );
        LoadOutcome::Loaded(loaded)
    }
}
