//! Run configuration.
//!
//! Defaults are defined in code. A TOML file may override any subset of keys, and the binary applies command line overrides on top.
//!
//! ```toml
//! base_location = "s3://ocf-open-data-pvnet/data/uk/pvlive/v1/"
//! dataset_name = "target_data"
//! year = 2023
//! periods = ["01", "02", "03"]
//! temporal_coordinate = "datetime_gmt"
//! temporal_chunk_length = 1440
//! output = "combined_2023_gsp.zarr"
//! duplicate_policy = "keep_first"
//!
//! [store]
//! anonymous = true
//! region = "eu-west-1"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{consolidate::DuplicatePolicy, partition::PathResolver};

/// A configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// The file path.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },
    /// The configuration is not valid TOML for [`ConsolidateConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Object store access options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Skip request signing, for public buckets.
    pub anonymous: bool,
    /// The object store region.
    pub region: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            anonymous: true,
            region: None,
        }
    }
}

/// Configuration of a consolidation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsolidateConfig {
    /// The location holding the partitions.
    pub base_location: String,
    /// The dataset name prefix of every partition.
    pub dataset_name: String,
    /// The year of the partitions.
    pub year: i32,
    /// The period keys of the partitions, in load order.
    pub periods: Vec<String>,
    /// The temporal coordinate, which also names the temporal dimension.
    pub temporal_coordinate: String,
    /// The chunk length of the archive along the temporal dimension.
    pub temporal_chunk_length: u64,
    /// The archive destination.
    pub output: String,
    /// Which entry is retained for duplicate temporal instants.
    pub duplicate_policy: DuplicatePolicy,
    /// Object store access.
    pub store: StoreConfig,
}

impl Default for ConsolidateConfig {
    fn default() -> Self {
        Self {
            base_location: "s3://ocf-open-data-pvnet/data/uk/pvlive/v1/".to_string(),
            dataset_name: "target_data".to_string(),
            year: 2023,
            periods: (1..=12).map(|month| format!("{month:02}")).collect(),
            temporal_coordinate: "datetime_gmt".to_string(),
            temporal_chunk_length: 1440,
            output: "combined_2023_gsp.zarr".to_string(),
            duplicate_policy: DuplicatePolicy::KeepFirst,
            store: StoreConfig::default(),
        }
    }
}

impl ConsolidateConfig {
    /// Parse a TOML configuration, falling back to defaults for absent keys.
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] if `content` is not a valid configuration.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Read a TOML configuration file.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file cannot be read or parsed.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::Invalid(message.to_string()));
        if self.dataset_name.is_empty() {
            return invalid("dataset_name must not be empty");
        }
        if self.periods.is_empty() {
            return invalid("periods must not be empty");
        }
        if let Some(period) = self
            .periods
            .iter()
            .find(|period| period.is_empty() || period.contains('/'))
        {
            return Err(ConfigError::Invalid(format!(
                "period {period:?} must be non-empty and must not contain '/'"
            )));
        }
        if self.temporal_coordinate.is_empty() {
            return invalid("temporal_coordinate must not be empty");
        }
        if self.temporal_chunk_length == 0 {
            return invalid("temporal_chunk_length must be greater than 0");
        }
        if self.output.is_empty() {
            return invalid("output must not be empty");
        }
        Ok(())
    }

    /// The path resolver for the configured partitions.
    #[must_use]
    pub fn path_resolver(&self) -> PathResolver {
        PathResolver::new(&self.base_location, &self.dataset_name, self.year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ConsolidateConfig::default();
        assert_eq!(config.periods.len(), 12);
        assert_eq!(config.periods[0], "01");
        assert_eq!(config.periods[11], "12");
        assert!(config.store.anonymous);
        config.validate().unwrap();
        assert_eq!(
            config.path_resolver().resolve("05").primary,
            "s3://ocf-open-data-pvnet/data/uk/pvlive/v1/target_data_2023_05.zarr"
        );
    }

    #[test]
    fn parse_partial() {
        let config = ConsolidateConfig::from_toml_str(
            r#"
            year = 2024
            periods = ["01", "02"]
            duplicate_policy = "keep_last"

            [store]
            region = "eu-west-1"
            "#,
        )
        .unwrap();
        assert_eq!(config.year, 2024);
        assert_eq!(config.periods, ["01", "02"]);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::KeepLast);
        assert_eq!(config.store.region.as_deref(), Some("eu-west-1"));
        assert!(config.store.anonymous);
        assert_eq!(config.temporal_chunk_length, 1440);
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            ConsolidateConfig::from_toml_str("yaer = 2024"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ConsolidateConfig::from_toml_str(r#"duplicate_policy = "keep_middle""#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ConsolidateConfig::load_from_path("/nonexistent/config.toml"),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn load_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "dataset_name = \"pv\"\noutput = \"pv.zarr\"\n").unwrap();
        let config = ConsolidateConfig::load_from_path(&path).unwrap();
        assert_eq!(config.dataset_name, "pv");
        assert_eq!(config.output, "pv.zarr");
    }

    #[test]
    fn validation() {
        let valid = ConsolidateConfig::default();
        for config in [
            ConsolidateConfig {
                temporal_chunk_length: 0,
                ..valid.clone()
            },
            ConsolidateConfig {
                periods: vec![],
                ..valid.clone()
            },
            ConsolidateConfig {
                periods: vec!["01/02".to_string()],
                ..valid.clone()
            },
            ConsolidateConfig {
                dataset_name: String::new(),
                ..valid.clone()
            },
            ConsolidateConfig {
                output: String::new(),
                ..valid.clone()
            },
        ] {
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }
}
