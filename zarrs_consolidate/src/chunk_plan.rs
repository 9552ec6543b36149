//! Chunk planning.
//!
//! The archive is chunked along the temporal dimension only: every other dimension is a single chunk spanning its full length.

use std::collections::BTreeMap;

use crate::dataset::{Dataset, Variable};

/// The chunk length of each dimension of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    chunks: BTreeMap<String, u64>,
}

impl ChunkPlan {
    /// Create a chunk plan from dimension chunk lengths.
    ///
    /// Zero lengths are raised to one.
    #[must_use]
    pub fn new(chunks: BTreeMap<String, u64>) -> Self {
        let chunks = chunks
            .into_iter()
            .map(|(dim, len)| (dim, len.max(1)))
            .collect();
        Self { chunks }
    }

    /// The chunk length of each dimension.
    #[must_use]
    pub const fn chunks(&self) -> &BTreeMap<String, u64> {
        &self.chunks
    }

    /// The chunk length of `dim`.
    #[must_use]
    pub fn chunk_len(&self, dim: &str) -> Option<u64> {
        self.chunks.get(dim).copied()
    }

    /// The chunk shape of `variable`.
    ///
    /// Returns [`None`] if the plan does not cover every dimension of the variable.
    #[must_use]
    pub fn chunk_shape(&self, variable: &Variable) -> Option<Vec<u64>> {
        variable
            .dims()
            .iter()
            .map(|dim| self.chunk_len(dim))
            .collect()
    }

    /// The start offset of every chunk along a dimension of length `len`.
    #[must_use]
    pub fn chunk_boundaries(&self, dim: &str, len: u64) -> Option<Vec<u64>> {
        let chunk_len = self.chunk_len(dim)?;
        Some((0..len).step_by(usize::try_from(chunk_len).ok()?).collect())
    }
}

impl core::fmt::Display for ChunkPlan {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut first = true;
        for (dim, len) in &self.chunks {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{dim}={len}")?;
            first = false;
        }
        Ok(())
    }
}

/// Computes and applies the archive chunk plan.
#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    temporal_dim: String,
    temporal_chunk_length: u64,
}

impl ChunkPlanner {
    /// Create a planner chunking `temporal_dim` by `temporal_chunk_length`.
    #[must_use]
    pub fn new(temporal_dim: impl Into<String>, temporal_chunk_length: u64) -> Self {
        Self {
            temporal_dim: temporal_dim.into(),
            temporal_chunk_length: temporal_chunk_length.max(1),
        }
    }

    /// Compute the chunk plan of `dataset`.
    #[must_use]
    pub fn plan(&self, dataset: &Dataset) -> ChunkPlan {
        let chunks = dataset
            .dims()
            .into_iter()
            .map(|(dim, len)| {
                let chunk_len = if dim == self.temporal_dim {
                    self.temporal_chunk_length.min(len)
                } else {
                    len
                };
                (dim, chunk_len)
            })
            .collect();
        ChunkPlan::new(chunks)
    }

    /// Compute the chunk plan of `dataset`, strip stale chunk encodings, and attach the plan.
    #[must_use]
    pub fn plan_and_apply(&self, mut dataset: Dataset) -> Dataset {
        let plan = self.plan(&dataset);
        normalize_chunk_encoding(&mut dataset);
        dataset.set_chunk_plan(Some(plan));
        dataset
    }
}

/// Remove the source chunk shape from the encoding of every variable.
pub fn normalize_chunk_encoding(dataset: &mut Dataset) {
    for (_, variable) in dataset.variables_mut() {
        variable.encoding_mut().chunks = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::VariableEncoding;
    use ndarray::{Array1, Array2};

    fn dataset(time: usize, ids: usize) -> Dataset {
        let mut dataset = Dataset::new();
        dataset
            .add_coord(
                "time",
                Variable::new(["time"], Array1::<i64>::zeros(time).into_dyn()).unwrap(),
            )
            .unwrap();
        dataset
            .add_coord(
                "id",
                Variable::new(["id"], Array1::<i64>::zeros(ids).into_dyn()).unwrap(),
            )
            .unwrap();
        dataset
            .add_data_var(
                "value",
                Variable::new(["time", "id"], Array2::<f64>::zeros((time, ids)).into_dyn())
                    .unwrap()
                    .with_encoding(VariableEncoding {
                        chunks: Some(vec![7, 1]),
                        fill_value: None,
                    }),
            )
            .unwrap();
        dataset
    }

    #[test]
    fn plan_chunks_time_only() {
        let planner = ChunkPlanner::new("time", 1440);
        let plan = planner.plan(&dataset(4000, 300));
        assert_eq!(plan.chunk_len("time"), Some(1440));
        assert_eq!(plan.chunk_len("id"), Some(300));
        assert_eq!(plan.to_string(), "id=300, time=1440");
        assert_eq!(plan.chunk_boundaries("time", 4000), Some(vec![0, 1440, 2880]));
        assert_eq!(plan.chunk_boundaries("other", 4000), None);
    }

    #[test]
    fn plan_short_time_axis() {
        let plan = ChunkPlanner::new("time", 1440).plan(&dataset(10, 3));
        assert_eq!(plan.chunk_len("time"), Some(10));
        let plan = ChunkPlanner::new("time", 1440).plan(&dataset(0, 3));
        assert_eq!(plan.chunk_len("time"), Some(1));
    }

    #[test]
    fn apply_strips_encoding() {
        let dataset = ChunkPlanner::new("time", 2).plan_and_apply(dataset(5, 3));
        let value = &dataset.data_vars()["value"];
        assert_eq!(value.encoding().chunks, None);
        let plan = dataset.chunk_plan().unwrap();
        assert_eq!(plan.chunk_shape(value), Some(vec![2, 3]));
    }
}
