//! Labeled array collections.
//!
//! A [`Dataset`] is the in-memory form of an xarray-style Zarr group: a set of [`Variable`]s with named dimensions, split into coordinates and data variables.
//! Every variable sharing a dimension name must agree on its length.
//!
//! [`open_dataset`] reads a dataset from a Zarr group and [`write_dataset`] writes one as a Zarr V2 group with consolidated metadata.

mod open;
mod variable;
mod variable_data;
mod write;

use std::collections::BTreeMap;

use thiserror::Error;

pub use open::{open_dataset, MetadataMode, OpenDatasetError};
pub use variable::{Variable, VariableEncoding};
pub(crate) use variable_data::dispatch;
pub use variable_data::{ConcatenateError, ElementType, VariableData};
pub use write::{consolidate_metadata, write_dataset, WriteDatasetError, ZMETADATA};

use crate::chunk_plan::ChunkPlan;

/// The attribute holding the dimension names of a Zarr V2 array written by xarray.
pub const ARRAY_DIMENSIONS_ATTRIBUTE: &str = "_ARRAY_DIMENSIONS";

/// The attribute listing non-index coordinates.
pub const COORDINATES_ATTRIBUTE: &str = "coordinates";

/// A dataset construction error.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// The number of dimension names does not match the dimensionality of the data.
    #[error("dimensions {dims:?} do not match data with {ndim} dimensions")]
    DimensionCountMismatch {
        /// The dimension names.
        dims: Vec<String>,
        /// The dimensionality of the data.
        ndim: usize,
    },
    /// A variable disagrees with the dataset on the length of a dimension.
    #[error("variable {variable} has length {got} along dimension {dim}, expected {expected}")]
    DimensionLengthMismatch {
        /// The variable name.
        variable: String,
        /// The dimension name.
        dim: String,
        /// The length established by other variables.
        expected: u64,
        /// The length of the offending variable.
        got: u64,
    },
    /// A variable with the name already exists.
    #[error("duplicate variable {0}")]
    DuplicateVariable(String),
}

/// A labeled multidimensional array collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    coords: BTreeMap<String, Variable>,
    data_vars: BTreeMap<String, Variable>,
    attributes: serde_json::Map<String, serde_json::Value>,
    chunk_plan: Option<ChunkPlan>,
}

impl Dataset {
    /// Create an empty dataset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dataset attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: serde_json::Map<String, serde_json::Value>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Add a coordinate variable.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] if the name is taken or a dimension length conflicts with existing variables.
    pub fn add_coord(&mut self, name: impl Into<String>, variable: Variable) -> Result<(), DatasetError> {
        let name = name.into();
        self.check_insert(&name, &variable)?;
        self.coords.insert(name, variable);
        Ok(())
    }

    /// Add a data variable.
    ///
    /// # Errors
    /// Returns a [`DatasetError`] if the name is taken or a dimension length conflicts with existing variables.
    pub fn add_data_var(
        &mut self,
        name: impl Into<String>,
        variable: Variable,
    ) -> Result<(), DatasetError> {
        let name = name.into();
        self.check_insert(&name, &variable)?;
        self.data_vars.insert(name, variable);
        Ok(())
    }

    fn check_insert(&self, name: &str, variable: &Variable) -> Result<(), DatasetError> {
        if self.coords.contains_key(name) || self.data_vars.contains_key(name) {
            return Err(DatasetError::DuplicateVariable(name.to_string()));
        }
        let dims = self.dims();
        for (dim, got) in variable.dims().iter().zip(variable.shape()) {
            if let Some(&expected) = dims.get(dim) {
                if expected != got {
                    return Err(DatasetError::DimensionLengthMismatch {
                        variable: name.to_string(),
                        dim: dim.clone(),
                        expected,
                        got,
                    });
                }
            }
        }
        Ok(())
    }

    /// The coordinate variables, by name.
    #[must_use]
    pub const fn coords(&self) -> &BTreeMap<String, Variable> {
        &self.coords
    }

    /// The data variables, by name.
    #[must_use]
    pub const fn data_vars(&self) -> &BTreeMap<String, Variable> {
        &self.data_vars
    }

    /// Returns true if `name` is a coordinate.
    #[must_use]
    pub fn has_coord(&self, name: &str) -> bool {
        self.coords.contains_key(name)
    }

    /// Get a coordinate or data variable by name.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.coords.get(name).or_else(|| self.data_vars.get(name))
    }

    /// Iterate over all variables, coordinates first.
    ///
    /// Each item is `(name, variable, is_coord)`.
    pub fn variables(&self) -> impl Iterator<Item = (&String, &Variable, bool)> {
        self.coords
            .iter()
            .map(|(name, variable)| (name, variable, true))
            .chain(
                self.data_vars
                    .iter()
                    .map(|(name, variable)| (name, variable, false)),
            )
    }

    /// Iterate mutably over all variables, coordinates first.
    pub fn variables_mut(&mut self) -> impl Iterator<Item = (&String, &mut Variable)> {
        self.coords.iter_mut().chain(self.data_vars.iter_mut())
    }

    /// The dimension lengths of the dataset.
    #[must_use]
    pub fn dims(&self) -> BTreeMap<String, u64> {
        let mut dims = BTreeMap::new();
        for (_, variable, _) in self.variables() {
            for (dim, len) in variable.dims().iter().zip(variable.shape()) {
                dims.entry(dim.clone()).or_insert(len);
            }
        }
        dims
    }

    /// The length of dimension `dim`.
    #[must_use]
    pub fn dim_len(&self, dim: &str) -> Option<u64> {
        self.variables().find_map(|(_, variable, _)| {
            variable
                .axis_of(dim)
                .map(|axis| variable.shape()[axis])
        })
    }

    /// The dataset attributes.
    #[must_use]
    pub const fn attributes(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.attributes
    }

    /// Mutable access to the dataset attributes.
    pub fn attributes_mut(&mut self) -> &mut serde_json::Map<String, serde_json::Value> {
        &mut self.attributes
    }

    /// The chunk plan applied to the dataset, if any.
    #[must_use]
    pub const fn chunk_plan(&self) -> Option<&ChunkPlan> {
        self.chunk_plan.as_ref()
    }

    /// Set the chunk plan.
    pub fn set_chunk_plan(&mut self, chunk_plan: Option<ChunkPlan>) {
        self.chunk_plan = chunk_plan;
    }
}
