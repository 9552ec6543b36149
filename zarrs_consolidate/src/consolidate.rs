//! Merging partitions along the temporal dimension.
//!
//! Partitions are concatenated in input order, stably sorted by temporal instant, and deduplicated so each instant appears once.
//! Coordinates that do not vary along the temporal dimension must agree across partitions.
//! Data variables without the temporal dimension are stacked along it, so each entry keeps the value of the partition it came from.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{
    dataset::{
        ConcatenateError, Dataset, DatasetError, ElementType, Variable, VariableData,
        VariableEncoding,
    },
    temporal::{temporal_keys, TimeEncoding, TimeEncodingError, NAT, UNITS_ATTRIBUTE},
};

/// Which entry is retained when several share a temporal instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the entry from the earliest partition in input order.
    #[default]
    KeepFirst,
    /// Keep the entry from the latest partition in input order.
    KeepLast,
}

/// A consolidation error.
#[derive(Debug, Error)]
pub enum ConsolidationError {
    /// There is nothing to consolidate.
    #[error("no datasets to consolidate")]
    Empty,
    /// A dataset lacks the temporal coordinate.
    #[error("dataset {index} has no {coordinate} coordinate")]
    MissingTemporalCoordinate {
        /// The index of the dataset in the input.
        index: usize,
        /// The temporal coordinate name.
        coordinate: String,
    },
    /// The temporal coordinate is not one-dimensional along the temporal dimension.
    #[error("temporal coordinate {coordinate} of dataset {index} has dimensions {dims:?}")]
    TemporalCoordinateShape {
        /// The index of the dataset in the input.
        index: usize,
        /// The temporal coordinate name.
        coordinate: String,
        /// Its dimensions.
        dims: Vec<String>,
    },
    /// The temporal coordinate cannot be decoded.
    #[error("failed to decode the temporal coordinate of dataset {index}: {source}")]
    TimeEncoding {
        /// The index of the dataset in the input.
        index: usize,
        /// The underlying error.
        source: TimeEncodingError,
    },
    /// A dataset has different variables to the first.
    #[error("dataset {index} has variables {got:?}, expected {expected:?}")]
    VariableMismatch {
        /// The index of the dataset in the input.
        index: usize,
        /// The variables of the first dataset.
        expected: Vec<String>,
        /// The variables of the mismatching dataset.
        got: Vec<String>,
    },
    /// A variable has different dimensions to the first dataset.
    #[error("variable {variable} of dataset {index} has dimensions {got:?}, expected {expected:?}")]
    DimensionOrderMismatch {
        /// The variable name.
        variable: String,
        /// The index of the dataset in the input.
        index: usize,
        /// The dimensions in the first dataset.
        expected: Vec<String>,
        /// The mismatching dimensions.
        got: Vec<String>,
    },
    /// A variable has a different element type to the first dataset.
    #[error("variable {variable} of dataset {index} has element type {got}, expected {expected}")]
    ElementTypeMismatch {
        /// The variable name.
        variable: String,
        /// The index of the dataset in the input.
        index: usize,
        /// The element type in the first dataset.
        expected: ElementType,
        /// The mismatching element type.
        got: ElementType,
    },
    /// A non-temporal dimension has a different length to the first dataset.
    #[error("dimension {dim} of dataset {index} has length {got}, expected {expected}")]
    DimensionSizeMismatch {
        /// The dimension name.
        dim: String,
        /// The index of the dataset in the input.
        index: usize,
        /// The length in the first dataset.
        expected: u64,
        /// The mismatching length.
        got: u64,
    },
    /// A coordinate without the temporal dimension differs from the first dataset.
    #[error("variable {variable} of dataset {index} differs from the first dataset")]
    NonTemporalMismatch {
        /// The variable name.
        variable: String,
        /// The index of the dataset in the input.
        index: usize,
    },
    /// A variable could not be concatenated.
    #[error("failed to concatenate variable {variable}: {source}")]
    Concatenate {
        /// The variable name.
        variable: String,
        /// The underlying error.
        source: ConcatenateError,
    },
    /// The merged variables do not form a consistent dataset.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// The result of a consolidation.
#[derive(Debug, Clone)]
pub struct Consolidated {
    /// The merged dataset.
    pub dataset: Dataset,
    /// The temporal length before deduplication.
    pub concatenated_len: usize,
    /// The number of entries dropped as duplicates.
    pub duplicates_dropped: usize,
}

/// Merges datasets along a temporal dimension.
#[derive(Debug, Clone)]
pub struct Consolidator {
    temporal_dim: String,
    policy: DuplicatePolicy,
}

impl Consolidator {
    /// Create a consolidator merging along `temporal_dim`, which must also name a one-dimensional coordinate.
    #[must_use]
    pub fn new(temporal_dim: impl Into<String>, policy: DuplicatePolicy) -> Self {
        Self {
            temporal_dim: temporal_dim.into(),
            policy,
        }
    }

    /// Merge `datasets`, sorted ascending and deduplicated by temporal instant.
    ///
    /// Dataset attributes, and the attributes and encoding of each variable, are taken from the first dataset.
    ///
    /// # Errors
    /// Returns a [`ConsolidationError`] if `datasets` is empty, a temporal coordinate is missing or cannot be decoded, or the datasets are incompatible.
    pub fn consolidate(&self, datasets: &[Dataset]) -> Result<Consolidated, ConsolidationError> {
        let first = datasets.first().ok_or(ConsolidationError::Empty)?;
        for (index, dataset) in datasets.iter().enumerate() {
            self.check_compatible(first, index, dataset)?;
        }
        info!(datasets = datasets.len(), "Concatenating datasets");

        let keys = datasets
            .iter()
            .enumerate()
            .map(|(index, dataset)| {
                let coordinate = self.temporal_coordinate(index, dataset)?;
                temporal_keys(coordinate)
                    .map_err(|source| ConsolidationError::TimeEncoding { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?
            .concat();
        let indices = sort_deduplicate(&keys, self.policy);
        let duplicates_dropped = keys.len() - indices.len();

        let mut output = Dataset::new().with_attributes(first.attributes().clone());
        for (name, variable, is_coord) in first.variables() {
            let variable = if *name == self.temporal_dim {
                self.merge_temporal_coordinate(datasets, variable, &keys, &indices)?
            } else if let Some(axis) = variable.axis_of(&self.temporal_dim) {
                let parts: Vec<&VariableData> = datasets
                    .iter()
                    .filter_map(|dataset| dataset.variable(name))
                    .map(Variable::data)
                    .collect();
                let data = VariableData::concatenate(axis, &parts)
                    .map_err(|source| ConsolidationError::Concatenate {
                        variable: name.clone(),
                        source,
                    })?
                    .select(axis, &indices);
                rebuild(variable, data, variable.encoding().clone())?
            } else if is_coord {
                variable.clone()
            } else {
                self.stack_static(datasets, name, variable, &indices)?
            };
            if is_coord {
                output.add_coord(name.clone(), variable)?;
            } else {
                output.add_data_var(name.clone(), variable)?;
            }
        }

        info!(
            entries = indices.len(),
            duplicates = duplicates_dropped,
            "Sorted and deduplicated along {}",
            self.temporal_dim
        );
        Ok(Consolidated {
            dataset: output,
            concatenated_len: keys.len(),
            duplicates_dropped,
        })
    }

    fn temporal_coordinate<'d>(
        &self,
        index: usize,
        dataset: &'d Dataset,
    ) -> Result<&'d Variable, ConsolidationError> {
        let coordinate = dataset.coords().get(&self.temporal_dim).ok_or_else(|| {
            ConsolidationError::MissingTemporalCoordinate {
                index,
                coordinate: self.temporal_dim.clone(),
            }
        })?;
        if coordinate.dims() != [self.temporal_dim.as_str()] {
            return Err(ConsolidationError::TemporalCoordinateShape {
                index,
                coordinate: self.temporal_dim.clone(),
                dims: coordinate.dims().to_vec(),
            });
        }
        Ok(coordinate)
    }

    fn check_compatible(
        &self,
        first: &Dataset,
        index: usize,
        dataset: &Dataset,
    ) -> Result<(), ConsolidationError> {
        self.temporal_coordinate(index, dataset)?;

        let names = |dataset: &Dataset| -> Vec<String> {
            dataset
                .variables()
                .map(|(name, _, is_coord)| {
                    if is_coord {
                        format!("{name} (coordinate)")
                    } else {
                        name.clone()
                    }
                })
                .collect()
        };
        if !first.coords().keys().eq(dataset.coords().keys())
            || !first.data_vars().keys().eq(dataset.data_vars().keys())
        {
            return Err(ConsolidationError::VariableMismatch {
                index,
                expected: names(first),
                got: names(dataset),
            });
        }

        for (name, expected, is_coord) in first.variables() {
            let Some(variable) = dataset.variable(name) else {
                continue;
            };
            if variable.dims() != expected.dims() {
                return Err(ConsolidationError::DimensionOrderMismatch {
                    variable: name.clone(),
                    index,
                    expected: expected.dims().to_vec(),
                    got: variable.dims().to_vec(),
                });
            }
            if *name == self.temporal_dim {
                // Re-encoded from decoded instants when partitions disagree.
                continue;
            }
            let (expected_type, got_type) =
                (expected.data().element_type(), variable.data().element_type());
            if expected_type != got_type {
                return Err(ConsolidationError::ElementTypeMismatch {
                    variable: name.clone(),
                    index,
                    expected: expected_type,
                    got: got_type,
                });
            }
            if is_coord
                && variable.axis_of(&self.temporal_dim).is_none()
                && !variable.data().identical(expected.data())
            {
                return Err(ConsolidationError::NonTemporalMismatch {
                    variable: name.clone(),
                    index,
                });
            }
        }

        let first_dims = first.dims();
        for (dim, got) in dataset.dims() {
            if dim == self.temporal_dim {
                continue;
            }
            if let Some(&expected) = first_dims.get(&dim) {
                if expected != got {
                    return Err(ConsolidationError::DimensionSizeMismatch {
                        dim,
                        index,
                        expected,
                        got,
                    });
                }
            }
        }
        Ok(())
    }

    /// Stack a data variable without the temporal dimension along a new leading temporal axis.
    ///
    /// Each partition contributes its values once per temporal entry, then the stack is sorted and deduplicated like the temporal coordinate.
    fn stack_static(
        &self,
        datasets: &[Dataset],
        name: &str,
        first: &Variable,
        indices: &[usize],
    ) -> Result<Variable, ConsolidationError> {
        let parts = datasets
            .iter()
            .enumerate()
            .filter_map(|(index, dataset)| {
                let variable = dataset.variable(name)?;
                Some(self.temporal_coordinate(index, dataset).map(|coordinate| {
                    variable.data().repeat_along_new_axis(coordinate.data().len())
                }))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let parts: Vec<&VariableData> = parts.iter().collect();
        let data = VariableData::concatenate(0, &parts)
            .map_err(|source| ConsolidationError::Concatenate {
                variable: name.to_string(),
                source,
            })?
            .select(0, indices);
        let dims = std::iter::once(self.temporal_dim.clone()).chain(first.dims().iter().cloned());
        Ok(Variable::new(dims, data)?
            .with_attributes(first.attributes().clone())
            .with_encoding(VariableEncoding {
                chunks: None,
                fill_value: first.encoding().fill_value.clone(),
            }))
    }

    fn merge_temporal_coordinate(
        &self,
        datasets: &[Dataset],
        first: &Variable,
        keys: &[i64],
        indices: &[usize],
    ) -> Result<Variable, ConsolidationError> {
        let coordinates: Vec<&Variable> = datasets
            .iter()
            .filter_map(|dataset| dataset.coords().get(&self.temporal_dim))
            .collect();
        let units = |variable: &Variable| variable.attributes().get(UNITS_ATTRIBUTE).cloned();
        let first_units = units(first);

        let uniform = coordinates.iter().all(|coordinate| {
            units(coordinate) == first_units
                && coordinate.data().element_type() == first.data().element_type()
        });
        if uniform {
            let parts: Vec<&VariableData> = coordinates.iter().map(|c| c.data()).collect();
            let data = VariableData::concatenate(0, &parts)
                .map_err(|source| ConsolidationError::Concatenate {
                    variable: self.temporal_dim.clone(),
                    source,
                })?
                .select(0, indices);
            return rebuild(first, data, first.encoding().clone());
        }

        let instants: Vec<i64> = indices.iter().map(|&i| keys[i]).collect();
        let encoding = VariableEncoding {
            chunks: first.encoding().chunks.clone(),
            fill_value: None,
        };
        if coordinates.iter().all(|coordinate| units(coordinate).is_none()) {
            return rebuild(first, VariableData::from_i64_values(instants), encoding);
        }

        let first_encoding = TimeEncoding::from_attributes(first.attributes())
            .map_err(|source| ConsolidationError::TimeEncoding { index: 0, source })?;
        let (time_encoding, values) = match first_encoding
            .and_then(|time_encoding| time_encoding.encode(&instants).map(|v| (time_encoding, v)))
        {
            Some(encoded) => encoded,
            None => (TimeEncoding::unix_nanoseconds(), instants),
        };
        info!(
            units = %time_encoding.units(),
            "Partitions disagree on temporal encoding, re-encoding {}",
            self.temporal_dim
        );
        let mut variable = rebuild(first, VariableData::from_i64_values(values), encoding)?;
        variable.attributes_mut().insert(
            UNITS_ATTRIBUTE.to_string(),
            time_encoding.units().to_string().into(),
        );
        Ok(variable)
    }
}

fn rebuild(
    template: &Variable,
    data: VariableData,
    encoding: VariableEncoding,
) -> Result<Variable, ConsolidationError> {
    Ok(Variable::new(template.dims().iter().cloned(), data)?
        .with_attributes(template.attributes().clone())
        .with_encoding(encoding))
}

/// The positions of `keys` in ascending key order, with one position retained per distinct key.
///
/// The sort is stable, so among equal keys input order decides which is retained.
/// [`NAT`] keys sort after every instant.
#[must_use]
pub fn sort_deduplicate(keys: &[i64], policy: DuplicatePolicy) -> Vec<usize> {
    let mut order: Vec<usize> = (0..keys.len()).collect();
    order.sort_by_key(|&i| (keys[i] == NAT, keys[i]));
    let mut kept: Vec<usize> = Vec::with_capacity(order.len());
    for i in order {
        if let Some(last) = kept.last_mut() {
            if keys[*last] == keys[i] {
                if policy == DuplicatePolicy::KeepLast {
                    *last = i;
                }
                continue;
            }
        }
        kept.push(i);
    }
    kept
}
