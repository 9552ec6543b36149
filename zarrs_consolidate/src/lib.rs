//! `zarrs_consolidate` merges time-partitioned [Zarr](https://zarr.dev) datasets into a single archive.
//!
//! Upstream producers often publish one xarray-style Zarr group per period (e.g. one per month of a year).
//! This crate loads every partition, merges them along the temporal coordinate, sorts and deduplicates the result, re-chunks it, and writes one Zarr V2 archive with consolidated metadata.
//!
//! The run is a single sequential pass:
//! 1. [`PathResolver`] maps each period key to a primary location and a nested fallback location.
//! 2. [`PartitionLoader`] opens each partition through a [`StoreClient`], falling back to the nested location if the primary holds no data variables, and rejects partitions without the temporal coordinate.
//! 3. [`Consolidator`] concatenates the accepted partitions, sorts by temporal instant, and drops duplicate instants per a [`DuplicatePolicy`].
//!    Data variables without the temporal dimension are stacked along it.
//! 4. [`ChunkPlanner`] chunks the temporal dimension by a fixed length and every other dimension in full, stripping stale source chunk encodings.
//! 5. [`ArchiveWriter`] replaces the destination with the result.
//!
//! [`Pipeline`] drives the steps from a [`ConsolidateConfig`] and returns a [`RunReport`].
//!
//! ## Example
//! ```rust,no_run
//! # use std::sync::Arc;
//! use zarrs_consolidate::{ConsolidateConfig, Pipeline, StorageClient};
//! use zarrs::{filesystem::FilesystemStore, storage::ReadableWritableListableStorage};
//!
//! let config = ConsolidateConfig {
//!     base_location: "partitions/".to_string(),
//!     ..Default::default()
//! };
//! let client = StorageClient::filesystem(".");
//! let destination: ReadableWritableListableStorage = Arc::new(FilesystemStore::new(".")?);
//! let report = Pipeline::new(&config, &client).run(&destination, &config.output)?;
//! println!("{report}");
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Data model
//! A partition is read as a [`Dataset`]: every array in the group is a [`Variable`] with named dimensions, taken from Zarr V3 `dimension_names` or the xarray `_ARRAY_DIMENSIONS` attribute.
//! Variables named after a dimension, or listed in a `coordinates` attribute, are coordinates.
//! CF-encoded temporal coordinates (`units = "<unit> since <reference>"`) are compared by absolute instant, so partitions may use different reference dates.
//!
//! ## Logging
//! The library logs with [`tracing`]. The `zarrs_consolidate` binary installs a [`tracing_subscriber`] formatter filtered by `--log-level` or `RUST_LOG`.

pub mod chunk_plan;
pub mod config;
pub mod consolidate;
pub mod dataset;
pub mod loader;
pub mod partition;
pub mod pipeline;
pub mod store;
pub mod temporal;
pub mod writer;

pub use chunk_plan::{normalize_chunk_encoding, ChunkPlan, ChunkPlanner};
pub use config::{ConfigError, ConsolidateConfig, StoreConfig};
pub use consolidate::{Consolidated, ConsolidationError, Consolidator, DuplicatePolicy};
pub use dataset::{open_dataset, write_dataset, Dataset, MetadataMode, Variable, VariableData};
pub use loader::{
    LoadOutcome, LoadedPartition, PartitionLoader, PartitionOpenError, PartitionSchemaError,
    Rejection,
};
pub use partition::{PartitionPaths, PathResolver};
pub use pipeline::{Pipeline, PipelineError, RunReport};
pub use store::{StorageClient, StoreClient, StoreClientError, StoreMapper};
pub use writer::{ArchiveWriter, WriteError};
