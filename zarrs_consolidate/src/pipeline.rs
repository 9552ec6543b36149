//! The consolidation run.
//!
//! Partitions are resolved and loaded one at a time in period order.
//! Accepted partitions are consolidated, chunked, and written; any failure after loading aborts the run with nothing written.

use thiserror::Error;
use tracing::{error, info};
use zarrs::storage::ReadableWritableListableStorage;

use crate::{
    chunk_plan::{ChunkPlan, ChunkPlanner},
    config::ConsolidateConfig,
    consolidate::{ConsolidationError, Consolidator},
    dataset::Dataset,
    loader::{LoadOutcome, PartitionLoader, Rejection},
    partition::PathResolver,
    store::StoreClient,
    writer::{ArchiveWriter, WriteError},
};

/// A run failure.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No partition was accepted.
    #[error("no datasets loaded ({rejected} partitions rejected)")]
    NoValidPartitions {
        /// The number of rejected partitions.
        rejected: usize,
    },
    /// The accepted partitions could not be consolidated.
    #[error("consolidation failed: {0}")]
    Consolidation(#[from] ConsolidationError),
    /// The archive could not be written.
    #[error("write failed: {0}")]
    Write(#[from] WriteError),
}

/// A partition included in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedPartition {
    /// The period key.
    pub period: String,
    /// The path the partition was opened from.
    pub path: String,
    /// True if the partition was opened from its nested fallback location.
    pub via_fallback: bool,
}

/// A partition excluded from the archive.
#[derive(Debug)]
pub struct RejectedPartition {
    /// The period key.
    pub period: String,
    /// Why the partition was rejected.
    pub reason: Rejection,
}

/// A summary of a successful run.
#[derive(Debug)]
pub struct RunReport {
    /// The accepted partitions, in load order.
    pub accepted: Vec<AcceptedPartition>,
    /// The rejected partitions, in load order.
    pub rejected: Vec<RejectedPartition>,
    /// The length of the temporal dimension of the archive.
    pub temporal_len: u64,
    /// The number of duplicate temporal entries dropped.
    pub duplicates_dropped: usize,
    /// The chunk plan of the archive.
    pub chunk_plan: ChunkPlan,
    /// The archive path.
    pub destination: String,
}

impl core::fmt::Display for RunReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "wrote {} ({} entries, {} duplicates dropped, chunks {}) from {} partitions",
            self.destination,
            self.temporal_len,
            self.duplicates_dropped,
            self.chunk_plan,
            self.accepted.len(),
        )?;
        let fallbacks = self.accepted.iter().filter(|p| p.via_fallback).count();
        if fallbacks > 0 {
            write!(f, " ({fallbacks} nested)")?;
        }
        if !self.rejected.is_empty() {
            let periods: Vec<&str> = self.rejected.iter().map(|p| p.period.as_str()).collect();
            write!(f, ", rejected {}", periods.join(", "))?;
        }
        Ok(())
    }
}

/// Consolidates the partitions of one year into an archive.
pub struct Pipeline<'a> {
    client: &'a dyn StoreClient,
    resolver: PathResolver,
    periods: Vec<String>,
    temporal_coordinate: String,
    consolidator: Consolidator,
    planner: ChunkPlanner,
    writer: ArchiveWriter,
}

impl<'a> Pipeline<'a> {
    /// Create a pipeline for `config`, reading partitions through `client`.
    #[must_use]
    pub fn new(config: &ConsolidateConfig, client: &'a dyn StoreClient) -> Self {
        Self {
            client,
            resolver: config.path_resolver(),
            periods: config.periods.clone(),
            temporal_coordinate: config.temporal_coordinate.clone(),
            consolidator: Consolidator::new(&config.temporal_coordinate, config.duplicate_policy),
            planner: ChunkPlanner::new(&config.temporal_coordinate, config.temporal_chunk_length),
            writer: ArchiveWriter,
        }
    }

    /// Load every partition, consolidate the accepted ones, and write the archive to `path` in `destination`.
    ///
    /// Rejected partitions are skipped. Nothing is written unless every step before the write succeeds.
    ///
    /// # Errors
    /// Returns a [`PipelineError`] if no partition is accepted, consolidation fails, or the write fails.
    pub fn run(
        &self,
        destination: &ReadableWritableListableStorage,
        path: &str,
    ) -> Result<RunReport, PipelineError> {
        let loader = PartitionLoader::new(self.client, &self.temporal_coordinate);
        // The loader rejects partitions without the temporal coordinate.
        let mut datasets: Vec<Dataset> = Vec::new();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for period in &self.periods {
            let paths = self.resolver.resolve(period);
            match loader.load(&paths) {
                LoadOutcome::Loaded(partition) => {
                    accepted.push(AcceptedPartition {
                        period: period.clone(),
                        path: partition.path,
                        via_fallback: partition.via_fallback,
                    });
                    datasets.push(partition.dataset);
                }
                LoadOutcome::Rejected(reason) => rejected.push(RejectedPartition {
                    period: period.clone(),
                    reason,
                }),
            }
        }

        if datasets.is_empty() {
            let err = PipelineError::NoValidPartitions {
                rejected: rejected.len(),
            };
            error!(error = %err, "Aborting");
            return Err(err);
        }

        let consolidated = self.consolidator.consolidate(&datasets).map_err(|err| {
            error!(error = %err, "Consolidation failed");
            PipelineError::from(err)
        })?;
        drop(datasets);

        let dataset = self.planner.plan_and_apply(consolidated.dataset);
        let chunk_plan = self.planner.plan(&dataset);
        info!(chunks = %chunk_plan, "Rechunked");

        self.writer.write(&dataset, destination, path)?;

        let report = RunReport {
            accepted,
            rejected,
            temporal_len: dataset.dim_len(&self.temporal_coordinate).unwrap_or(0),
            duplicates_dropped: consolidated.duplicates_dropped,
            chunk_plan,
            destination: path.to_string(),
        };
        info!("{report}");
        Ok(report)
    }
}
