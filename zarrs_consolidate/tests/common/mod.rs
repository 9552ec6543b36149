#![allow(dead_code)]

use std::sync::Arc;

use ndarray::{Array1, Array2};
use zarrs::storage::{
    store::MemoryStore, ReadableListableStorage, ReadableWritableListableStorage, StoreKey,
};
use zarrs_consolidate::{
    dataset::VariableEncoding, write_dataset, ConsolidateConfig, Dataset, Variable,
};

pub const TIME: &str = "datetime_gmt";
pub const ID: &str = "gsp_id";
pub const GENERATION: &str = "generation_mw";
pub const CAPACITY: &str = "capacity_mwp";

/// A partition in the shape of the upstream monthly datasets.
///
/// `times` are minutes since `reference`, `generation(t, i)` gives the value at time index `t` and id index `i`.
pub fn partition(
    reference: &str,
    times: Vec<i64>,
    ids: &[i64],
    generation: impl Fn(usize, usize) -> f64,
) -> Dataset {
    let n_time = times.len();
    let n_id = ids.len();
    let time_chunk = u64::try_from(n_time.min(100)).unwrap();
    let id_chunk = u64::try_from(n_id).unwrap();

    let mut time_attributes = serde_json::Map::new();
    time_attributes.insert(
        "units".to_string(),
        format!("minutes since {reference}").into(),
    );
    time_attributes.insert("calendar".to_string(), "proleptic_gregorian".into());

    let mut dataset = Dataset::new();
    dataset.attributes_mut().insert("title".to_string(), "PV Live".into());
    dataset
        .add_coord(
            TIME,
            Variable::new([TIME], Array1::from(times).into_dyn())
                .unwrap()
                .with_attributes(time_attributes)
                .with_encoding(VariableEncoding {
                    chunks: Some(vec![time_chunk]),
                    fill_value: None,
                }),
        )
        .unwrap();
    dataset
        .add_coord(ID, Variable::new([ID], Array1::from(ids.to_vec()).into_dyn()).unwrap())
        .unwrap();
    dataset
        .add_data_var(
            CAPACITY,
            Variable::new(
                [ID],
                Array1::from_iter(ids.iter().map(|&id| id as f32 * 10.0)).into_dyn(),
            )
            .unwrap(),
        )
        .unwrap();
    dataset
        .add_data_var(
            GENERATION,
            Variable::new(
                [TIME, ID],
                Array2::from_shape_fn((n_time, n_id), |(t, i)| generation(t, i)).into_dyn(),
            )
            .unwrap()
            .with_encoding(VariableEncoding {
                chunks: Some(vec![time_chunk, id_chunk]),
                fill_value: None,
            }),
        )
        .unwrap();
    dataset
}

/// Minutes of every minute of a month of `days` days.
pub fn minutes(days: i64) -> Vec<i64> {
    (0..1440 * days).collect()
}

pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

pub fn readable(store: &Arc<MemoryStore>) -> ReadableListableStorage {
    store.clone()
}

pub fn writable(store: &Arc<MemoryStore>) -> ReadableWritableListableStorage {
    store.clone()
}

/// Write `dataset` as a partition at `path`.
pub fn write_partition(store: &Arc<MemoryStore>, path: &str, dataset: &Dataset) {
    write_dataset(dataset, &writable(store), path).unwrap();
}

/// Write `dataset` as a group nested one level below `path` with the same name, leaving `path` without a group of its own.
pub fn write_nested_partition(store: &Arc<MemoryStore>, path: &str, dataset: &Dataset) {
    let name = path.rsplit('/').next().unwrap();
    write_dataset(dataset, &writable(store), &format!("{path}/{name}")).unwrap();
}

pub fn config(periods: &[&str]) -> ConsolidateConfig {
    ConsolidateConfig {
        base_location: "pvlive".to_string(),
        dataset_name: "target_data".to_string(),
        year: 2023,
        periods: periods.iter().map(ToString::to_string).collect(),
        output: "combined_2023_gsp.zarr".to_string(),
        ..Default::default()
    }
}

pub fn partition_path(period: &str) -> String {
    format!("pvlive/target_data_2023_{period}.zarr")
}

pub fn get(store: &Arc<MemoryStore>, key: &str) -> Option<Vec<u8>> {
    use zarrs::storage::ReadableStorageTraits;
    store
        .get(&StoreKey::new(key).unwrap())
        .unwrap()
        .map(|bytes| bytes.to_vec())
}

pub fn get_json(store: &Arc<MemoryStore>, key: &str) -> serde_json::Value {
    serde_json::from_slice(&get(store, key).unwrap_or_else(|| panic!("missing {key}"))).unwrap()
}
