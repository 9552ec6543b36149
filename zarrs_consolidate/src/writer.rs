//! Archive persistence.

use thiserror::Error;
use tracing::{error, info};
use zarrs::storage::{ReadableWritableListableStorage, StorageError, StorePrefixError, WritableStorageTraits};

use crate::{
    dataset::{write_dataset, Dataset, WriteDatasetError},
    store::node_prefix,
};

/// An archive write error.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The destination path is not a valid node path.
    #[error("invalid destination {path}: {source}")]
    Destination {
        /// The destination path.
        path: String,
        /// The underlying error.
        source: StorePrefixError,
    },
    /// The previous archive could not be removed.
    #[error("failed to clear {path}: {source}")]
    Clear {
        /// The destination path.
        path: String,
        /// The underlying error.
        source: StorageError,
    },
    /// The dataset could not be written.
    #[error("failed to write {path}: {source}")]
    Write {
        /// The destination path.
        path: String,
        /// The underlying error.
        source: WriteDatasetError,
    },
}

/// Writes the consolidated archive, replacing anything at the destination.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveWriter;

impl ArchiveWriter {
    /// Write `dataset` to `path` in `storage` with consolidated metadata.
    ///
    /// Every key under `path` is erased first, so no part of a previous archive survives.
    ///
    /// # Errors
    /// Returns a [`WriteError`] if the destination cannot be cleared or written.
    pub fn write(
        &self,
        dataset: &Dataset,
        storage: &ReadableWritableListableStorage,
        path: &str,
    ) -> Result<(), WriteError> {
        let result = Self::overwrite(dataset, storage, path);
        match &result {
            Ok(()) => info!(path, "Wrote archive"),
            Err(err) => error!(path, error = %err, "Failed to write archive"),
        }
        result
    }

    fn overwrite(
        dataset: &Dataset,
        storage: &ReadableWritableListableStorage,
        path: &str,
    ) -> Result<(), WriteError> {
        let prefix = node_prefix(path).map_err(|source| WriteError::Destination {
            path: path.to_string(),
            source,
        })?;
        storage
            .erase_prefix(&prefix)
            .map_err(|source| WriteError::Clear {
                path: path.to_string(),
                source,
            })?;
        if let Some(plan) = dataset.chunk_plan() {
            info!(path, chunks = %plan, "Writing archive");
        } else {
            info!(path, "Writing archive");
        }
        write_dataset(dataset, storage, path).map_err(|source| WriteError::Write {
            path: path.to_string(),
            source,
        })
    }
}
