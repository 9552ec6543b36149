use std::collections::BTreeSet;

use thiserror::Error;
use zarrs::{
    array::{Array, ArrayCreateError, ArrayError},
    metadata::{
        v2::{ArrayMetadataV2, FillValueMetadataV2},
        v3::ArrayMetadataV3,
        ArrayMetadata,
    },
    storage::{
        ListableStorageTraits, ReadableListableStorage, ReadableListableStorageTraits,
        ReadableStorageTraits, StorageError, StoreKey, StoreKeyError, StorePrefix,
        StorePrefixError,
    },
};

use super::{
    Dataset, DatasetError, ElementType, Variable, VariableData, VariableEncoding,
    ARRAY_DIMENSIONS_ATTRIBUTE, COORDINATES_ATTRIBUTE,
};
use crate::store::{node_path, node_prefix, prefix_key};

type Attributes = serde_json::Map<String, serde_json::Value>;

/// Where the member metadata of a group is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataMode {
    /// Read member metadata from a consolidated metadata document.
    ///
    /// This is `.zmetadata` for Zarr V2 groups, or the inline `consolidated_metadata` of a Zarr V3 `zarr.json`.
    Consolidated,
    /// Discover members by listing the store.
    NonConsolidated,
}

impl core::fmt::Display for MetadataMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Consolidated => f.write_str("consolidated"),
            Self::NonConsolidated => f.write_str("non-consolidated"),
        }
    }
}

/// A dataset open error.
#[derive(Debug, Error)]
pub enum OpenDatasetError {
    /// There is nothing at the path.
    #[error("no zarr node at {0}")]
    NotFound(String),
    /// The path is an array, not a group.
    #[error("{0} is an array, not a group")]
    NotAGroup(String),
    /// Consolidated metadata was requested but is absent.
    #[error("no consolidated metadata at {0}")]
    MissingConsolidatedMetadata(String),
    /// A metadata document is not valid.
    #[error("invalid metadata at {key}: {source}")]
    InvalidMetadata {
        /// The key of the metadata document.
        key: String,
        /// The parse error.
        source: serde_json::Error,
    },
    /// A storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// An invalid store key.
    #[error(transparent)]
    StoreKey(#[from] StoreKeyError),
    /// An invalid store prefix.
    #[error(transparent)]
    StorePrefix(#[from] StorePrefixError),
    /// An array could not be opened.
    #[error("failed to open array {path}: {source}")]
    ArrayCreate {
        /// The array path.
        path: String,
        /// The underlying error.
        source: ArrayCreateError,
    },
    /// An array could not be read.
    #[error("failed to read array {path}: {source}")]
    Array {
        /// The array path.
        path: String,
        /// The underlying error.
        source: ArrayError,
    },
    /// An array has a data type without an in-memory representation.
    #[error("variable {variable} has unsupported data type {data_type}")]
    UnsupportedDataType {
        /// The variable name.
        variable: String,
        /// The data type.
        data_type: String,
    },
    /// An array has no dimension names.
    #[error("variable {0} has no dimension names")]
    MissingDimensionNames(String),
    /// The arrays do not form a consistent dataset.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

type StorageArray = Array<dyn ReadableListableStorageTraits>;

/// Open the group at `path` in `storage` as a [`Dataset`], reading every variable into memory.
///
/// Variables named after a dimension, or listed in a `coordinates` attribute, become coordinates.
/// All other arrays directly in the group become data variables. Nested groups are ignored.
///
/// In [`MetadataMode::NonConsolidated`] mode, a path holding child nodes but no group metadata opens as an empty-attribute group (an implicit group).
///
/// # Errors
/// Returns an [`OpenDatasetError`] if the path holds no group, metadata is missing or invalid, or an array cannot be read.
pub fn open_dataset(
    storage: &ReadableListableStorage,
    path: &str,
    mode: MetadataMode,
) -> Result<Dataset, OpenDatasetError> {
    let path = node_path(path);
    let prefix = node_prefix(&path)?;
    let (attributes, arrays) = match mode {
        MetadataMode::NonConsolidated => list_members(storage, &path, &prefix)?,
        MetadataMode::Consolidated => consolidated_members(storage, &path, &prefix)?,
    };
    build_dataset(attributes, &arrays)
}

fn child_path(path: &str, name: &str) -> String {
    if path == "/" {
        format!("/{name}")
    } else {
        format!("{path}/{name}")
    }
}

fn read_json(
    storage: &ReadableListableStorage,
    key: &StoreKey,
) -> Result<Option<serde_json::Value>, OpenDatasetError> {
    storage
        .get(key)?
        .map(|bytes| {
            serde_json::from_slice(&bytes).map_err(|source| OpenDatasetError::InvalidMetadata {
                key: key.as_str().to_string(),
                source,
            })
        })
        .transpose()
}

fn from_json<T: serde::de::DeserializeOwned>(
    value: serde_json::Value,
    key: &str,
) -> Result<T, OpenDatasetError> {
    serde_json::from_value(value).map_err(|source| OpenDatasetError::InvalidMetadata {
        key: key.to_string(),
        source,
    })
}

fn object(value: Option<&serde_json::Value>) -> Attributes {
    value
        .and_then(serde_json::Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn node_type(zarr_json: Option<&serde_json::Value>) -> Option<&str> {
    zarr_json?.get("node_type")?.as_str()
}

fn is_array(
    storage: &ReadableListableStorage,
    prefix: &StorePrefix,
) -> Result<bool, OpenDatasetError> {
    if storage.get(&prefix_key(prefix, ".zarray")?)?.is_some() {
        return Ok(true);
    }
    let zarr_json = read_json(storage, &prefix_key(prefix, "zarr.json")?)?;
    Ok(node_type(zarr_json.as_ref()) == Some("array"))
}

fn list_members(
    storage: &ReadableListableStorage,
    path: &str,
    prefix: &StorePrefix,
) -> Result<(Attributes, Vec<(String, StorageArray)>), OpenDatasetError> {
    let listing = storage.list_dir(prefix)?;
    if listing.keys().is_empty() && listing.prefixes().is_empty() {
        return Err(OpenDatasetError::NotFound(path.to_string()));
    }
    if is_array(storage, prefix)? {
        return Err(OpenDatasetError::NotAGroup(path.to_string()));
    }

    let attributes = match read_json(storage, &prefix_key(prefix, "zarr.json")?)? {
        Some(zarr_json) => object(zarr_json.get("attributes")),
        None => object(read_json(storage, &prefix_key(prefix, ".zattrs")?)?.as_ref()),
    };

    let mut arrays = Vec::new();
    for child in listing.prefixes() {
        let Some(name) = child
            .as_str()
            .strip_prefix(prefix.as_str())
            .map(|name| name.trim_end_matches('/'))
        else {
            continue;
        };
        if name.is_empty() || !is_array(storage, child)? {
            continue;
        }
        let array_path = child_path(path, name);
        let zarray_key = prefix_key(child, ".zarray")?;
        let array = match read_json(storage, &zarray_key)? {
            Some(zarray) => {
                let array_attributes =
                    object(read_json(storage, &prefix_key(child, ".zattrs")?)?.as_ref());
                let metadata = array_metadata_v2(zarray, array_attributes, zarray_key.as_str())?;
                Array::new_with_metadata(storage.clone(), &array_path, metadata)
            }
            None => Array::open(storage.clone(), &array_path),
        }
        .map_err(|source| OpenDatasetError::ArrayCreate {
            path: array_path.clone(),
            source,
        })?;
        arrays.push((name.to_string(), array));
    }
    Ok((attributes, arrays))
}

/// Replace an undefined (`null`) fill value of a `.zarray` document with the default of its dtype.
///
/// Floats default to `NaN`, booleans and integers to `0`. Other dtypes are left as is.
fn define_fill_value(zarray: &mut serde_json::Value) {
    let Some(zarray) = zarray.as_object_mut() else {
        return;
    };
    if !zarray
        .get("fill_value")
        .is_none_or(serde_json::Value::is_null)
    {
        return;
    }
    let kind = zarray
        .get("dtype")
        .and_then(serde_json::Value::as_str)
        .and_then(|dtype| dtype.chars().nth(1));
    let fill_value = match kind {
        Some('f') => serde_json::Value::from("NaN"),
        Some('b' | 'i' | 'u') => serde_json::Value::from(0),
        _ => return,
    };
    zarray.insert("fill_value".to_string(), fill_value);
}

fn array_metadata_v2(
    mut zarray: serde_json::Value,
    attributes: Attributes,
    key: &str,
) -> Result<ArrayMetadata, OpenDatasetError> {
    define_fill_value(&mut zarray);
    let metadata: ArrayMetadataV2 = from_json(zarray, key)?;
    Ok(ArrayMetadata::V2(metadata.with_attributes(attributes)))
}

fn consolidated_members(
    storage: &ReadableListableStorage,
    path: &str,
    prefix: &StorePrefix,
) -> Result<(Attributes, Vec<(String, StorageArray)>), OpenDatasetError> {
    let zmetadata_key = prefix_key(prefix, ".zmetadata")?;
    let members = if let Some(zmetadata) = read_json(storage, &zmetadata_key)? {
        consolidated_members_v2(zmetadata, zmetadata_key.as_str())?
    } else {
        let zarr_json_key = prefix_key(prefix, "zarr.json")?;
        let zarr_json = read_json(storage, &zarr_json_key)?;
        match zarr_json {
            Some(zarr_json) if node_type(Some(&zarr_json)) == Some("array") => {
                return Err(OpenDatasetError::NotAGroup(path.to_string()));
            }
            Some(zarr_json) if zarr_json.get("consolidated_metadata").is_some() => {
                consolidated_members_v3(zarr_json, zarr_json_key.as_str())?
            }
            _ => {
                return Err(if storage.list_prefix(prefix)?.is_empty() {
                    OpenDatasetError::NotFound(path.to_string())
                } else {
                    OpenDatasetError::MissingConsolidatedMetadata(path.to_string())
                });
            }
        }
    };

    let (attributes, metadata) = members;
    let arrays = metadata
        .into_iter()
        .map(|(name, metadata)| {
            let array_path = child_path(path, &name);
            Array::new_with_metadata(storage.clone(), &array_path, metadata)
                .map(|array| (name, array))
                .map_err(|source| OpenDatasetError::ArrayCreate {
                    path: array_path,
                    source,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((attributes, arrays))
}

type ConsolidatedMembers = (Attributes, Vec<(String, ArrayMetadata)>);

fn consolidated_members_v2(
    zmetadata: serde_json::Value,
    key: &str,
) -> Result<ConsolidatedMembers, OpenDatasetError> {
    let metadata = object(zmetadata.get("metadata"));
    if metadata.get(".zarray").is_some() {
        return Err(OpenDatasetError::NotAGroup(key.to_string()));
    }
    let attributes = object(metadata.get(".zattrs"));
    let mut arrays = Vec::new();
    for (member_key, value) in &metadata {
        let Some(name) = member_key.strip_suffix("/.zarray") else {
            continue;
        };
        if name.contains('/') {
            continue;
        }
        let array_attributes = object(metadata.get(&format!("{name}/.zattrs")));
        let array_metadata = array_metadata_v2(
            value.clone(),
            array_attributes,
            &format!("{key}[{member_key}]"),
        )?;
        arrays.push((name.to_string(), array_metadata));
    }
    Ok((attributes, arrays))
}

fn consolidated_members_v3(
    zarr_json: serde_json::Value,
    key: &str,
) -> Result<ConsolidatedMembers, OpenDatasetError> {
    let attributes = object(zarr_json.get("attributes"));
    let metadata = zarr_json
        .get("consolidated_metadata")
        .and_then(|consolidated| consolidated.get("metadata"))
        .and_then(serde_json::Value::as_object)
        .cloned()
        .unwrap_or_default();
    let mut arrays = Vec::new();
    for (name, value) in metadata {
        if name.contains('/') || node_type(Some(&value)) != Some("array") {
            continue;
        }
        let array_metadata: ArrayMetadataV3 = from_json(value, &format!("{key}[{name}]"))?;
        arrays.push((name, ArrayMetadata::V3(array_metadata)));
    }
    Ok((attributes, arrays))
}

fn coordinate_names(attributes: &Attributes) -> impl Iterator<Item = &str> {
    attributes
        .get(COORDINATES_ATTRIBUTE)
        .and_then(serde_json::Value::as_str)
        .into_iter()
        .flat_map(str::split_whitespace)
}

fn build_dataset(
    mut attributes: Attributes,
    arrays: &[(String, StorageArray)],
) -> Result<Dataset, OpenDatasetError> {
    let mut coordinates: BTreeSet<String> =
        coordinate_names(&attributes).map(str::to_string).collect();
    attributes.remove(COORDINATES_ATTRIBUTE);

    let mut variables = Vec::with_capacity(arrays.len());
    for (name, array) in arrays {
        let variable = read_variable(name, array)?;
        coordinates.extend(coordinate_names(array.attributes()).map(str::to_string));
        if variable.dims().iter().any(|dim| dim == name) {
            coordinates.insert(name.clone());
        }
        variables.push((name, variable));
    }

    let mut dataset = Dataset::new().with_attributes(attributes);
    let (coords, data_vars): (Vec<_>, Vec<_>) = variables
        .into_iter()
        .partition(|(name, _)| coordinates.contains(name.as_str()));
    for (name, variable) in coords {
        dataset.add_coord(name.clone(), variable)?;
    }
    for (name, variable) in data_vars {
        dataset.add_data_var(name.clone(), variable)?;
    }
    Ok(dataset)
}

fn dimension_names(name: &str, array: &StorageArray) -> Result<Vec<String>, OpenDatasetError> {
    if let Some(names) = array.dimension_names() {
        if let Some(names) = names.iter().cloned().collect::<Option<Vec<_>>>() {
            return Ok(names);
        }
    }
    let ndim = array.shape().len();
    match array.attributes().get(ARRAY_DIMENSIONS_ATTRIBUTE) {
        Some(serde_json::Value::Array(names)) => names
            .iter()
            .map(|name| name.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| OpenDatasetError::MissingDimensionNames(name.to_string())),
        _ if ndim == 0 => Ok(Vec::new()),
        _ => Err(OpenDatasetError::MissingDimensionNames(name.to_string())),
    }
}

fn read_data(
    element_type: ElementType,
    array: &StorageArray,
) -> Result<VariableData, OpenDatasetError> {
    let subset = array.subset_all();
    let array_error = |source| OpenDatasetError::Array {
        path: array.path().as_str().to_string(),
        source,
    };
    macro_rules! retrieve {
        ($type:ty) => {
            VariableData::from(
                array
                    .retrieve_array_subset_ndarray::<$type>(&subset)
                    .map_err(array_error)?,
            )
        };
    }
    Ok(match element_type {
        ElementType::Bool => retrieve!(bool),
        ElementType::Int8 => retrieve!(i8),
        ElementType::Int16 => retrieve!(i16),
        ElementType::Int32 => retrieve!(i32),
        ElementType::Int64 => retrieve!(i64),
        ElementType::UInt8 => retrieve!(u8),
        ElementType::UInt16 => retrieve!(u16),
        ElementType::UInt32 => retrieve!(u32),
        ElementType::UInt64 => retrieve!(u64),
        ElementType::Float32 => retrieve!(f32),
        ElementType::Float64 => retrieve!(f64),
    })
}

/// The V2 fill value metadata of a fill value held as native-endian bytes.
pub(super) fn fill_value_metadata(
    element_type: ElementType,
    bytes: &[u8],
) -> Option<FillValueMetadataV2> {
    fn float(value: f64) -> FillValueMetadataV2 {
        if value.is_nan() {
            FillValueMetadataV2::NaN
        } else if value == f64::INFINITY {
            FillValueMetadataV2::Infinity
        } else if value == f64::NEG_INFINITY {
            FillValueMetadataV2::NegInfinity
        } else {
            serde_json::Number::from_f64(value)
                .map_or(FillValueMetadataV2::Null, FillValueMetadataV2::Number)
        }
    }
    macro_rules! number {
        ($type:ty) => {
            FillValueMetadataV2::Number(serde_json::Number::from(<$type>::from_ne_bytes(
                bytes.try_into().ok()?,
            )))
        };
    }
    Some(match element_type {
        ElementType::Bool => number!(u8),
        ElementType::Int8 => number!(i8),
        ElementType::Int16 => number!(i16),
        ElementType::Int32 => number!(i32),
        ElementType::Int64 => number!(i64),
        ElementType::UInt8 => number!(u8),
        ElementType::UInt16 => number!(u16),
        ElementType::UInt32 => number!(u32),
        ElementType::UInt64 => number!(u64),
        ElementType::Float32 => float(f64::from(f32::from_ne_bytes(bytes.try_into().ok()?))),
        ElementType::Float64 => float(f64::from_ne_bytes(bytes.try_into().ok()?)),
    })
}

fn read_variable(name: &str, array: &StorageArray) -> Result<Variable, OpenDatasetError> {
    let element_type = ElementType::from_data_type(array.data_type()).ok_or_else(|| {
        OpenDatasetError::UnsupportedDataType {
            variable: name.to_string(),
            data_type: array.data_type().to_string(),
        }
    })?;
    let dims = dimension_names(name, array)?;
    let data = read_data(element_type, array)?;

    let mut attributes = array.attributes().clone();
    attributes.remove(ARRAY_DIMENSIONS_ATTRIBUTE);
    attributes.remove(COORDINATES_ATTRIBUTE);

    let origin = vec![0; dims.len()];
    let chunks = array
        .chunk_shape(&origin)
        .ok()
        .map(|chunk_shape| chunk_shape.iter().map(|len| len.get()).collect());
    let fill_value = match array.metadata() {
        ArrayMetadata::V2(metadata) => Some(metadata.fill_value.clone()),
        ArrayMetadata::V3(_) => fill_value_metadata(element_type, array.fill_value().as_ne_bytes()),
    };

    Ok(Variable::new(dims, data)?
        .with_attributes(attributes)
        .with_encoding(VariableEncoding { chunks, fill_value }))
}
