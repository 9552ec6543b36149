use std::collections::BTreeMap;

use thiserror::Error;
use zarrs::{
    array::{Array, ArrayCreateError, ArrayError, ChunkShape},
    group::{Group, GroupCreateError},
    metadata::{
        v2::{ArrayMetadataV2, DataTypeMetadataV2, FillValueMetadataV2, GroupMetadataV2},
        ArrayMetadata, GroupMetadata,
    },
    storage::{
        Bytes, ListableStorageTraits, ReadableStorageTraits, ReadableWritableListableStorage,
        StorageError, StoreKeyError, StorePrefixError, WritableStorageTraits,
    },
};

use super::{
    dispatch, Dataset, ElementType, Variable, VariableData, ARRAY_DIMENSIONS_ATTRIBUTE,
    COORDINATES_ATTRIBUTE,
};
use crate::store::{node_path, node_prefix, prefix_key};

/// The consolidated metadata document of a Zarr V2 group.
pub const ZMETADATA: &str = ".zmetadata";

const V2_METADATA_KEYS: [&str; 3] = [".zgroup", ".zattrs", ".zarray"];

/// A dataset write error.
#[derive(Debug, Error)]
pub enum WriteDatasetError {
    /// A storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// An invalid store key.
    #[error(transparent)]
    StoreKey(#[from] StoreKeyError),
    /// An invalid store prefix.
    #[error(transparent)]
    StorePrefix(#[from] StorePrefixError),
    /// The group could not be created.
    #[error("failed to create group {path}: {source}")]
    GroupCreate {
        /// The group path.
        path: String,
        /// The underlying error.
        source: GroupCreateError,
    },
    /// An array could not be created.
    #[error("failed to create array {path}: {source}")]
    ArrayCreate {
        /// The array path.
        path: String,
        /// The underlying error.
        source: ArrayCreateError,
    },
    /// An array could not be written.
    #[error("failed to write array {path}: {source}")]
    Array {
        /// The array path.
        path: String,
        /// The underlying error.
        source: ArrayError,
    },
    /// A variable still carries a source chunk encoding that disagrees with the chunk plan.
    #[error("variable {variable} has encoding chunks {encoding:?} which conflict with planned chunks {planned:?}")]
    ChunkEncodingConflict {
        /// The variable name.
        variable: String,
        /// The chunk shape in the variable encoding.
        encoding: Vec<u64>,
        /// The planned chunk shape.
        planned: Vec<u64>,
    },
    /// A variable has no valid chunk shape.
    #[error("variable {variable} has invalid chunk shape {chunks:?}")]
    InvalidChunkShape {
        /// The variable name.
        variable: String,
        /// The chunk shape.
        chunks: Vec<u64>,
    },
    /// A metadata document could not be serialised or parsed.
    #[error(transparent)]
    Metadata(#[from] serde_json::Error),
}

/// Write `dataset` as a Zarr V2 group at `path`, then consolidate its metadata into `.zmetadata`.
///
/// Arrays are uncompressed. Each array carries its dimension names in the `_ARRAY_DIMENSIONS` attribute, and non-index coordinates are listed in the group `coordinates` attribute, so the result reads back as the same dataset with xarray.
///
/// Chunk shapes follow the dataset [chunk plan](Dataset::chunk_plan). Without a plan, the variable encoding chunks are used, otherwise a single chunk.
///
/// Existing keys under `path` are not removed first.
///
/// # Errors
/// Returns a [`WriteDatasetError`] if a chunk encoding conflicts with the chunk plan or the store cannot be written.
pub fn write_dataset(
    dataset: &Dataset,
    storage: &ReadableWritableListableStorage,
    path: &str,
) -> Result<(), WriteDatasetError> {
    let path = node_path(path);

    let mut attributes = dataset.attributes().clone();
    let non_index_coordinates: Vec<&str> = dataset
        .coords()
        .iter()
        .filter(|(name, variable)| variable.axis_of(name).is_none())
        .map(|(name, _)| name.as_str())
        .collect();
    if !non_index_coordinates.is_empty() {
        attributes.insert(
            COORDINATES_ATTRIBUTE.to_string(),
            non_index_coordinates.join(" ").into(),
        );
    }
    let group_metadata = GroupMetadataV2::new().with_attributes(attributes);
    let group = Group::new_with_metadata(
        storage.clone(),
        &path,
        GroupMetadata::V2(group_metadata),
    )
    .map_err(|source| WriteDatasetError::GroupCreate {
        path: path.clone(),
        source,
    })?;
    group.store_metadata()?;

    for (name, variable, _) in dataset.variables() {
        let chunks = chunk_shape(dataset, name, variable)?;
        let array_path = if path == "/" {
            format!("/{name}")
        } else {
            format!("{path}/{name}")
        };
        write_variable(storage, &array_path, name, variable, chunks)?;
    }

    consolidate_metadata(storage, &path)
}

fn chunk_shape(
    dataset: &Dataset,
    name: &str,
    variable: &Variable,
) -> Result<Vec<u64>, WriteDatasetError> {
    let encoding = variable.encoding().chunks.as_ref();
    let planned = dataset
        .chunk_plan()
        .and_then(|plan| plan.chunk_shape(variable));
    let chunks = match (planned, encoding) {
        (Some(planned), Some(encoding)) if *encoding != planned => {
            return Err(WriteDatasetError::ChunkEncodingConflict {
                variable: name.to_string(),
                encoding: encoding.clone(),
                planned,
            });
        }
        (Some(planned), _) => planned,
        (None, Some(encoding)) => encoding.clone(),
        (None, None) => variable.shape(),
    };
    Ok(chunks.into_iter().map(|len| len.max(1)).collect())
}

/// The fill value written for `element_type` when the encoding defines none.
///
/// Zarr V2 permits a `null` fill value, but it does not round trip through readers that require a defined one.
fn default_fill_value(element_type: ElementType) -> FillValueMetadataV2 {
    if element_type.is_float() {
        FillValueMetadataV2::NaN
    } else {
        FillValueMetadataV2::Number(0.into())
    }
}

fn write_variable(
    storage: &ReadableWritableListableStorage,
    path: &str,
    name: &str,
    variable: &Variable,
    chunks: Vec<u64>,
) -> Result<(), WriteDatasetError> {
    let element_type = variable.data().element_type();

    let mut attributes = variable.attributes().clone();
    attributes.insert(
        ARRAY_DIMENSIONS_ATTRIBUTE.to_string(),
        variable.dims().into(),
    );

    let chunk_shape = ChunkShape::try_from(chunks.clone()).map_err(|_| {
        WriteDatasetError::InvalidChunkShape {
            variable: name.to_string(),
            chunks,
        }
    })?;
    let fill_value = match &variable.encoding().fill_value {
        Some(FillValueMetadataV2::Null) | None => default_fill_value(element_type),
        Some(fill_value) => fill_value.clone(),
    };
    let metadata = ArrayMetadataV2::new(
        variable.shape(),
        chunk_shape,
        DataTypeMetadataV2::Simple(element_type.dtype_v2().to_string()),
        fill_value,
        None,
        None,
    )
    .with_attributes(attributes);

    let array = Array::new_with_metadata(storage.clone(), path, ArrayMetadata::V2(metadata))
        .map_err(|source| WriteDatasetError::ArrayCreate {
            path: path.to_string(),
            source,
        })?;
    array.store_metadata()?;

    if variable.data().is_empty() {
        return Ok(());
    }
    let origin = vec![0; variable.dims().len()];
    let stored =
        dispatch!(variable.data(), data => array.store_array_subset_ndarray(&origin, data.clone()));
    stored.map_err(|source| WriteDatasetError::Array {
        path: path.to_string(),
        source,
    })
}

/// Gather the `.zgroup`, `.zattrs`, and `.zarray` documents under the group at `path` into its `.zmetadata`.
///
/// Members are keyed relative to the group and sorted, so identical groups consolidate to identical bytes.
///
/// # Errors
/// Returns a [`WriteDatasetError`] if the store cannot be read or written, or a document is not valid JSON.
pub fn consolidate_metadata(
    storage: &ReadableWritableListableStorage,
    path: &str,
) -> Result<(), WriteDatasetError> {
    let prefix = node_prefix(path)?;
    let mut members = BTreeMap::new();
    for key in storage.list_prefix(&prefix)? {
        let Some(member) = key.as_str().strip_prefix(prefix.as_str()) else {
            continue;
        };
        let file_name = member.rsplit('/').next().unwrap_or(member);
        if !V2_METADATA_KEYS.contains(&file_name) {
            continue;
        }
        if let Some(bytes) = storage.get(&key)? {
            let document: serde_json::Value = serde_json::from_slice(&bytes)?;
            members.insert(member.to_string(), document);
        }
    }

    let metadata: serde_json::Map<String, serde_json::Value> = members.into_iter().collect();
    let zmetadata = serde_json::json!({
        "metadata": metadata,
        "zarr_consolidated_format": 1,
    });
    let bytes = serde_json::to_vec_pretty(&zmetadata)?;
    storage.set(&prefix_key(&prefix, ZMETADATA)?, Bytes::from(bytes))?;
    Ok(())
}
