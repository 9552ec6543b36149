//! Store clients.
//!
//! A [`StoreClient`] turns a location (a path or URL) into a [`StoreMapper`]: a storage handle and the node path of the location inside it.
//! The client is constructed explicitly and passed to the pipeline, so tests can substitute their own.
//!
//! [`StorageClient`] supports:
//!  - local directories, via [`FilesystemStore`](zarrs::filesystem::FilesystemStore),
//!  - Amazon S3 (`s3://bucket/key`, feature `s3`), via [`object_store`] and [`AsyncObjectStore`], and
//!  - any pre-built [`ReadableListableStorage`], e.g. a [`MemoryStore`](zarrs::storage::store::MemoryStore).

use std::{path::PathBuf, sync::Arc};

use thiserror::Error;
use zarrs::storage::{
    storage_adapter::async_to_sync::{AsyncToSyncBlockOn, AsyncToSyncStorageAdapter},
    ReadableListableStorage, StoreKey, StoreKeyError, StorePrefix, StorePrefixError,
};
use zarrs_object_store::AsyncObjectStore;

/// A [`StoreClient`] error.
#[derive(Debug, Error)]
pub enum StoreClientError {
    /// The location is not addressable by the client.
    #[error("location {location} is not addressable by this client: {reason}")]
    UnsupportedLocation {
        /// The location.
        location: String,
        /// Why it is not addressable.
        reason: String,
    },
    /// Failed to create a filesystem store.
    #[error(transparent)]
    Filesystem(#[from] zarrs::filesystem::FilesystemStoreCreateError),
    /// Failed to create an object store.
    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),
    /// Failed to create the runtime driving asynchronous stores.
    #[error("failed to create runtime: {0}")]
    Runtime(std::io::Error),
}

/// An addressable mapping for a location: a storage handle and a node path within it.
#[derive(Clone)]
pub struct StoreMapper {
    storage: ReadableListableStorage,
    path: String,
}

impl core::fmt::Debug for StoreMapper {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StoreMapper")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl StoreMapper {
    /// Create a mapper for the node at `path` in `storage`.
    #[must_use]
    pub fn new(storage: ReadableListableStorage, path: &str) -> Self {
        Self {
            storage,
            path: node_path(path),
        }
    }

    /// The storage.
    #[must_use]
    pub fn storage(&self) -> &ReadableListableStorage {
        &self.storage
    }

    /// The node path, always starting with `/`.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Provides addressable mappings for locations.
pub trait StoreClient {
    /// Get an addressable mapping for `location`.
    ///
    /// # Errors
    /// Returns a [`StoreClientError`] if the location cannot be addressed.
    fn get_mapper(&self, location: &str) -> Result<StoreMapper, StoreClientError>;
}

/// Runs futures of asynchronous stores on a private current-thread `tokio` runtime.
pub struct TokioBlockOn(tokio::runtime::Runtime);

impl TokioBlockOn {
    /// Create a new current-thread runtime.
    ///
    /// # Errors
    /// Returns an [`std::io::Error`] if the runtime cannot be created.
    pub fn new() -> std::io::Result<Self> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map(Self)
    }
}

impl AsyncToSyncBlockOn for TokioBlockOn {
    fn block_on<F: core::future::Future>(&self, future: F) -> F::Output {
        self.0.block_on(future)
    }
}

/// Wrap an [`object_store::ObjectStore`] as synchronous readable and listable storage.
///
/// # Errors
/// Returns [`StoreClientError::Runtime`] if the runtime cannot be created.
pub fn object_store_storage<T: object_store::ObjectStore>(
    object_store: T,
) -> Result<ReadableListableStorage, StoreClientError> {
    let block_on = TokioBlockOn::new().map_err(StoreClientError::Runtime)?;
    let store = Arc::new(AsyncObjectStore::new(object_store));
    Ok(Arc::new(AsyncToSyncStorageAdapter::new(store, block_on)))
}

enum Backend {
    Filesystem(PathBuf),
    #[cfg(feature = "s3")]
    S3 {
        bucket: String,
        storage: ReadableListableStorage,
    },
    Storage(ReadableListableStorage),
}

/// A [`StoreClient`] over a single storage backend.
pub struct StorageClient {
    backend: Backend,
}

impl StorageClient {
    /// A client for locations under the local directory `root`.
    ///
    /// Relative locations resolve against `root`, absolute locations must lie within it.
    #[must_use]
    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Filesystem(root.into()),
        }
    }

    /// A client for `s3://{bucket}/...` locations.
    ///
    /// With `anonymous`, requests are not signed (public buckets).
    ///
    /// # Errors
    /// Returns a [`StoreClientError`] if the S3 client or its runtime cannot be created.
    #[cfg(feature = "s3")]
    pub fn s3(
        bucket: &str,
        region: Option<&str>,
        anonymous: bool,
    ) -> Result<Self, StoreClientError> {
        let mut builder = object_store::aws::AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_skip_signature(anonymous);
        if let Some(region) = region {
            builder = builder.with_region(region);
        }
        let storage = object_store_storage(builder.build()?)?;
        Ok(Self {
            backend: Backend::S3 {
                bucket: bucket.to_string(),
                storage,
            },
        })
    }

    /// A client for the node paths of `storage`.
    #[must_use]
    pub fn new(storage: ReadableListableStorage) -> Self {
        Self {
            backend: Backend::Storage(storage),
        }
    }

    /// A client for `location`: S3 for `s3://` URLs, otherwise the filesystem.
    ///
    /// # Errors
    /// Returns a [`StoreClientError`] if the client cannot be created.
    pub fn for_location(
        location: &str,
        region: Option<&str>,
        anonymous: bool,
    ) -> Result<Self, StoreClientError> {
        if let Some(rest) = location.strip_prefix("s3://") {
            #[cfg(feature = "s3")]
            {
                let bucket = rest.split('/').next().unwrap_or_default();
                return Self::s3(bucket, region, anonymous);
            }
            #[cfg(not(feature = "s3"))]
            {
                let _ = (rest, region, anonymous);
                return Err(StoreClientError::UnsupportedLocation {
                    location: location.to_string(),
                    reason: "the s3 feature is disabled".to_string(),
                });
            }
        }
        let _ = (region, anonymous);
        let path = location.strip_prefix("file://").unwrap_or(location);
        let root = if PathBuf::from(path).is_absolute() {
            PathBuf::from("/")
        } else {
            PathBuf::from(".")
        };
        Ok(Self::filesystem(root))
    }
}

impl StoreClient for StorageClient {
    fn get_mapper(&self, location: &str) -> Result<StoreMapper, StoreClientError> {
        let unsupported = |reason: &str| StoreClientError::UnsupportedLocation {
            location: location.to_string(),
            reason: reason.to_string(),
        };
        match &self.backend {
            Backend::Filesystem(root) => {
                let path = location.strip_prefix("file://").unwrap_or(location);
                if path.contains("://") {
                    return Err(unsupported("not a filesystem path"));
                }
                let path = PathBuf::from(path);
                let relative = if path.is_absolute() {
                    path.strip_prefix(root)
                        .map_err(|_| unsupported("outside of the client root"))?
                        .to_path_buf()
                } else {
                    path
                };
                let relative = relative
                    .to_str()
                    .ok_or_else(|| unsupported("not valid UTF-8"))?
                    .to_string();
                let storage = Arc::new(zarrs::filesystem::FilesystemStore::new(root)?);
                Ok(StoreMapper::new(storage, &relative))
            }
            #[cfg(feature = "s3")]
            Backend::S3 { bucket, storage } => {
                let rest = location
                    .strip_prefix("s3://")
                    .ok_or_else(|| unsupported("not an s3:// URL"))?;
                let (location_bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
                if location_bucket != bucket {
                    return Err(unsupported("different bucket"));
                }
                Ok(StoreMapper::new(storage.clone(), key))
            }
            Backend::Storage(storage) => Ok(StoreMapper::new(storage.clone(), location)),
        }
    }
}

/// Normalise `path` to a node path: a leading `/` and no trailing `/`.
#[must_use]
pub fn node_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// The store prefix of the node at `path`.
///
/// # Errors
/// Returns a [`StorePrefixError`] if the prefix is invalid.
pub fn node_prefix(path: &str) -> Result<StorePrefix, StorePrefixError> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        Ok(StorePrefix::root())
    } else {
        StorePrefix::new(format!("{trimmed}/"))
    }
}

/// The key `name` under `prefix`.
///
/// # Errors
/// Returns a [`StoreKeyError`] if the key is invalid.
pub fn prefix_key(prefix: &StorePrefix, name: &str) -> Result<StoreKey, StoreKeyError> {
    StoreKey::new(format!("{}{name}", prefix.as_str()))
}
