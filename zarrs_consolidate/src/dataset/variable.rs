use zarrs::metadata::v2::FillValueMetadataV2;

use super::{DatasetError, VariableData};

/// Encoding properties of a variable carried over from its source store.
///
/// These describe how the variable was stored, not what it holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableEncoding {
    /// The chunk shape of the source array.
    pub chunks: Option<Vec<u64>>,
    /// The fill value of the source array.
    pub fill_value: Option<FillValueMetadataV2>,
}

/// A named-dimension array with attributes and encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    dims: Vec<String>,
    data: VariableData,
    attributes: serde_json::Map<String, serde_json::Value>,
    encoding: VariableEncoding,
}

impl Variable {
    /// Create a new variable with dimensions `dims` holding `data`.
    ///
    /// # Errors
    /// Returns [`DatasetError::DimensionCountMismatch`] if the number of dimension names does not match the dimensionality of `data`.
    pub fn new<I, S>(dims: I, data: impl Into<VariableData>) -> Result<Self, DatasetError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dims: Vec<String> = dims.into_iter().map(Into::into).collect();
        let data = data.into();
        if dims.len() != data.ndim() {
            return Err(DatasetError::DimensionCountMismatch {
                dims,
                ndim: data.ndim(),
            });
        }
        Ok(Self {
            dims,
            data,
            attributes: serde_json::Map::default(),
            encoding: VariableEncoding::default(),
        })
    }

    /// Set the attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: serde_json::Map<String, serde_json::Value>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Set the encoding.
    #[must_use]
    pub fn with_encoding(mut self, encoding: VariableEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// The dimension names.
    #[must_use]
    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    /// The values.
    #[must_use]
    pub const fn data(&self) -> &VariableData {
        &self.data
    }

    /// The shape.
    #[must_use]
    pub fn shape(&self) -> Vec<u64> {
        self.data.shape()
    }

    /// The axis of dimension `dim`, if the variable has it.
    #[must_use]
    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    /// The attributes.
    #[must_use]
    pub const fn attributes(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.attributes
    }

    /// Mutable access to the attributes.
    pub fn attributes_mut(&mut self) -> &mut serde_json::Map<String, serde_json::Value> {
        &mut self.attributes
    }

    /// The encoding.
    #[must_use]
    pub const fn encoding(&self) -> &VariableEncoding {
        &self.encoding
    }

    /// Mutable access to the encoding.
    pub fn encoding_mut(&mut self) -> &mut VariableEncoding {
        &mut self.encoding
    }

    /// Replace the values, keeping dimensions, attributes, and encoding.
    ///
    /// # Errors
    /// Returns [`DatasetError::DimensionCountMismatch`] if the dimensionality of `data` differs.
    pub fn with_data(self, data: VariableData) -> Result<Self, DatasetError> {
        if data.ndim() != self.dims.len() {
            return Err(DatasetError::DimensionCountMismatch {
                dims: self.dims,
                ndim: data.ndim(),
            });
        }
        Ok(Self { data, ..self })
    }
}
