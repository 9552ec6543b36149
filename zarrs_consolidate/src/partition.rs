//! Partition path resolution.

/// The location of a partition, and the nested location tried when the partition is not at the top level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPaths {
    /// The period key of the partition.
    pub period: String,
    /// `{base}{name}_{year}_{period}.zarr`.
    pub primary: String,
    /// The primary path nested one level under itself, e.g. `.../x.zarr/x.zarr`.
    pub fallback: String,
}

/// Resolves period keys to partition locations.
#[derive(Debug, Clone)]
pub struct PathResolver {
    base_location: String,
    dataset_name: String,
    year: i32,
}

impl PathResolver {
    /// Create a resolver for partitions of `dataset_name` in `year` under `base_location`.
    #[must_use]
    pub fn new(base_location: impl Into<String>, dataset_name: impl Into<String>, year: i32) -> Self {
        let mut base_location = base_location.into();
        if !base_location.is_empty() && !base_location.ends_with('/') {
            base_location.push('/');
        }
        Self {
            base_location,
            dataset_name: dataset_name.into(),
            year,
        }
    }

    /// Resolve the primary and fallback locations of the partition for `period`.
    #[must_use]
    pub fn resolve(&self, period: &str) -> PartitionPaths {
        let primary = format!(
            "{}{}_{}_{period}.zarr",
            self.base_location, self.dataset_name, self.year
        );
        let fallback = fallback_path(&primary);
        PartitionPaths {
            period: period.to_string(),
            primary,
            fallback,
        }
    }
}

/// `path` with its own last segment appended.
#[must_use]
pub fn fallback_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    format!("{trimmed}/{last}")
}
