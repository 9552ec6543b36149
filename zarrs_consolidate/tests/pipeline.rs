mod common;

use std::{collections::BTreeMap, sync::Arc};

use common::*;
use zarrs::storage::{
    store::MemoryStore, Bytes, ListableStorageTraits, ReadableStorageTraits, StoreKey,
    WritableStorageTraits,
};
use zarrs_consolidate::{
    open_dataset, temporal::temporal_keys, DuplicatePolicy, LoadOutcome, MetadataMode,
    PartitionLoader, PartitionOpenError, PartitionSchemaError, Pipeline, PipelineError,
    Rejection, StorageClient, StoreClient, StoreClientError, StoreMapper,
};

const ARCHIVE: &str = "combined_2023_gsp.zarr";
const IDS: [i64; 3] = [0, 1, 2];

/// Minutes from the start of 2023 to the start of each of the first three months.
const MONTH_OFFSETS: [(&str, &str, i64, i64); 3] = [
    ("01", "2023-01-01 00:00:00", 0, 31),
    ("02", "2023-02-01 00:00:00", 44_640, 28),
    ("03", "2023-03-01 00:00:00", 84_960, 31),
];

fn first_quarter(store: &Arc<MemoryStore>) {
    for (period, reference, offset, days) in MONTH_OFFSETS {
        let dataset = partition(reference, minutes(days), &IDS, |t, i| {
            (offset + t as i64) as f64 + i as f64 / 10.0
        });
        write_partition(store, &partition_path(period), &dataset);
    }
}

fn snapshot(store: &Arc<MemoryStore>) -> BTreeMap<String, Vec<u8>> {
    store
        .list()
        .unwrap()
        .into_iter()
        .map(|key| {
            let value = store.get(&key).unwrap().unwrap().to_vec();
            (key.as_str().to_string(), value)
        })
        .collect()
}

#[test]
fn monthly_partitions_merge_into_chunked_archive() {
    let source = memory_store();
    first_quarter(&source);
    let destination = memory_store();

    let client = StorageClient::new(readable(&source));
    let config = config(&["01", "02", "03"]);
    let report = Pipeline::new(&config, &client)
        .run(&writable(&destination), ARCHIVE)
        .unwrap();

    assert_eq!(report.accepted.len(), 3);
    assert!(report.rejected.is_empty());
    assert!(report.accepted.iter().all(|p| !p.via_fallback));
    assert_eq!(report.temporal_len, 1440 * 90);
    assert_eq!(report.duplicates_dropped, 0);
    assert_eq!(report.chunk_plan.chunk_len(TIME), Some(1440));
    assert_eq!(report.chunk_plan.chunk_len(ID), Some(3));

    let generation = get_json(&destination, &format!("{ARCHIVE}/{GENERATION}/.zarray"));
    assert_eq!(generation["shape"], serde_json::json!([1440 * 90, 3]));
    assert_eq!(generation["chunks"], serde_json::json!([1440, 3]));
    let time = get_json(&destination, &format!("{ARCHIVE}/{TIME}/.zarray"));
    assert_eq!(time["chunks"], serde_json::json!([1440]));
    let capacity = get_json(&destination, &format!("{ARCHIVE}/{CAPACITY}/.zarray"));
    assert_eq!(capacity["shape"], serde_json::json!([1440 * 90, 3]));
    assert_eq!(capacity["chunks"], serde_json::json!([1440, 3]));
    assert_eq!(
        get_json(&destination, &format!("{ARCHIVE}/{CAPACITY}/.zattrs"))["_ARRAY_DIMENSIONS"],
        serde_json::json!([TIME, ID])
    );

    let archive = open_dataset(&readable(&destination), ARCHIVE, MetadataMode::Consolidated).unwrap();
    let time = &archive.coords()[TIME];
    let keys = temporal_keys(time).unwrap();
    assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(
        time.data().to_i64_values().unwrap(),
        (0..1440 * 90).collect::<Vec<i64>>()
    );
    assert_eq!(
        time.attributes()["units"],
        "minutes since 2023-01-01 00:00:00"
    );
    assert_eq!(archive.attributes()["title"], "PV Live");

    let values = archive.data_vars()[GENERATION].data().to_f64_values().unwrap();
    // first minute of March, third id
    assert_eq!(values[84_960 * 3 + 2], 84_960.2);
    assert_eq!(values[values.len() - 1], (1440 * 90 - 1) as f64 + 0.2);
    let capacity = archive.data_vars()[CAPACITY].data().to_f64_values().unwrap();
    assert_eq!(capacity[..3], [0.0, 10.0, 20.0]);
    assert_eq!(capacity[capacity.len() - 3..], [0.0, 10.0, 20.0]);
}

#[test]
fn capacity_changes_are_kept_per_entry() {
    let source = memory_store();
    for (period, reference, _, _) in MONTH_OFFSETS {
        let mut dataset = partition(reference, minutes(1), &IDS, |t, _| t as f64);
        let scale = if period == "02" { 2.0f32 } else { 1.0 };
        let capacity = dataset.data_vars()[CAPACITY].data().to_f64_values().unwrap();
        let capacity = ndarray::Array1::from_iter(capacity.iter().map(|&c| c as f32 * scale));
        let capacity = dataset.data_vars()[CAPACITY]
            .clone()
            .with_data(capacity.into_dyn().into())
            .unwrap();
        for (name, variable) in dataset.variables_mut() {
            if name == CAPACITY {
                *variable = capacity.clone();
            }
        }
        write_partition(&source, &partition_path(period), &dataset);
    }
    let destination = memory_store();

    let client = StorageClient::new(readable(&source));
    let report = Pipeline::new(&config(&["01", "02", "03"]), &client)
        .run(&writable(&destination), ARCHIVE)
        .unwrap();
    assert_eq!(report.temporal_len, 3 * 1440);

    let archive = open_dataset(&readable(&destination), ARCHIVE, MetadataMode::Consolidated).unwrap();
    let capacity = &archive.data_vars()[CAPACITY];
    assert_eq!(capacity.dims(), [TIME, ID]);
    let values = capacity.data().to_f64_values().unwrap();
    let row = |t: usize| values[t * 3..t * 3 + 3].to_vec();
    assert_eq!(row(0), [0.0, 10.0, 20.0]);
    assert_eq!(row(1440), [0.0, 20.0, 40.0]);
    assert_eq!(row(2 * 1440 - 1), [0.0, 20.0, 40.0]);
    assert_eq!(row(2 * 1440), [0.0, 10.0, 20.0]);
}

#[test]
fn identifier_axis_is_one_chunk() {
    let source = memory_store();
    let ids: Vec<i64> = (0..300).collect();
    for (period, reference, _, days) in MONTH_OFFSETS {
        let hours = (0..24 * 60 * days).step_by(60).collect();
        let mut dataset = partition(reference, hours, &ids, |t, i| (t * 300 + i) as f64);
        dataset.attributes_mut().insert("resolution".to_string(), "hourly".into());
        write_partition(&source, &partition_path(period), &dataset);
    }
    let destination = memory_store();

    let client = StorageClient::new(readable(&source));
    let report = Pipeline::new(&config(&["01", "02", "03"]), &client)
        .run(&writable(&destination), ARCHIVE)
        .unwrap();
    assert_eq!(report.temporal_len, 24 * 90);
    assert_eq!(report.chunk_plan.to_string(), "datetime_gmt=1440, gsp_id=300");

    let generation = get_json(&destination, &format!("{ARCHIVE}/{GENERATION}/.zarray"));
    assert_eq!(generation["shape"], serde_json::json!([24 * 90, 300]));
    assert_eq!(generation["chunks"], serde_json::json!([1440, 300]));
    assert!(get(&destination, &format!("{ARCHIVE}/{GENERATION}/1.0")).is_some());
    assert!(get(&destination, &format!("{ARCHIVE}/{GENERATION}/0.1")).is_none());
}

#[test]
fn nested_partition_is_opened_from_fallback() {
    let source = memory_store();
    for (period, reference) in [
        ("04", "2023-04-01 00:00:00"),
        ("05", "2023-05-01 00:00:00"),
        ("06", "2023-06-01 00:00:00"),
    ] {
        let dataset = partition(reference, minutes(2), &IDS, |t, _| t as f64);
        if period == "05" {
            write_nested_partition(&source, &partition_path(period), &dataset);
        } else {
            write_partition(&source, &partition_path(period), &dataset);
        }
    }
    let destination = memory_store();

    let client = StorageClient::new(readable(&source));
    let report = Pipeline::new(&config(&["04", "05", "06"]), &client)
        .run(&writable(&destination), ARCHIVE)
        .unwrap();

    assert_eq!(report.accepted.len(), 3);
    let may = &report.accepted[1];
    assert_eq!(may.period, "05");
    assert!(may.via_fallback);
    assert_eq!(
        may.path,
        "pvlive/target_data_2023_05.zarr/target_data_2023_05.zarr"
    );
    assert!(!report.accepted[0].via_fallback);
    assert_eq!(report.temporal_len, 3 * 2880);
}

#[test]
fn no_valid_partitions_writes_nothing() {
    let source = memory_store();
    let destination = memory_store();
    let stale = format!("{ARCHIVE}/.zgroup");
    destination
        .set(
            &StoreKey::new(stale.as_str()).unwrap(),
            Bytes::from(r#"{"zarr_format":2}"#),
        )
        .unwrap();

    let client = StorageClient::new(readable(&source));
    let config = zarrs_consolidate::ConsolidateConfig {
        periods: (1..=12).map(|month| format!("{month:02}")).collect(),
        ..config(&[])
    };
    let result = Pipeline::new(&config, &client).run(&writable(&destination), ARCHIVE);
    assert!(matches!(
        result,
        Err(PipelineError::NoValidPartitions { rejected: 12 })
    ));
    assert_eq!(destination.list().unwrap().len(), 1);
    assert!(get(&destination, &stale).is_some());
}

fn overlapping_partitions(store: &Arc<MemoryStore>) {
    let january = partition("2023-01-01 00:00:00", vec![0, 1, 2], &IDS, |_, _| 1.0);
    let february = partition("2023-01-01 00:00:00", vec![2, 3, 4], &IDS, |_, _| 2.0);
    write_partition(store, &partition_path("01"), &january);
    write_partition(store, &partition_path("02"), &february);
}

#[test]
fn duplicate_timestamp_appears_once() {
    for (policy, expected) in [(DuplicatePolicy::KeepFirst, 1.0), (DuplicatePolicy::KeepLast, 2.0)] {
        let source = memory_store();
        overlapping_partitions(&source);
        let destination = memory_store();

        let client = StorageClient::new(readable(&source));
        let config = zarrs_consolidate::ConsolidateConfig {
            duplicate_policy: policy,
            ..config(&["01", "02"])
        };
        let report = Pipeline::new(&config, &client)
            .run(&writable(&destination), ARCHIVE)
            .unwrap();
        assert_eq!(report.temporal_len, 5);
        assert_eq!(report.duplicates_dropped, 1);

        let archive =
            open_dataset(&readable(&destination), ARCHIVE, MetadataMode::Consolidated).unwrap();
        assert_eq!(
            archive.coords()[TIME].data().to_i64_values().unwrap(),
            vec![0, 1, 2, 3, 4]
        );
        let values = archive.data_vars()[GENERATION].data().to_f64_values().unwrap();
        assert_eq!(values[2 * 3], expected, "{policy:?}");
        assert_eq!(values[3 * 3], 2.0);
    }
}

#[test]
fn missing_partition_is_skipped() {
    let source = memory_store();
    for (period, reference, _, _) in [MONTH_OFFSETS[0], MONTH_OFFSETS[2]] {
        let dataset = partition(reference, minutes(1), &IDS, |t, _| t as f64);
        write_partition(&source, &partition_path(period), &dataset);
    }
    let destination = memory_store();

    let client = StorageClient::new(readable(&source));
    let report = Pipeline::new(&config(&["01", "02", "03"]), &client)
        .run(&writable(&destination), ARCHIVE)
        .unwrap();
    assert_eq!(
        report.accepted.iter().map(|p| p.period.as_str()).collect::<Vec<_>>(),
        ["01", "03"]
    );
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].period, "02");
    assert!(matches!(report.rejected[0].reason, Rejection::Open(_)));
    assert_eq!(report.temporal_len, 2 * 1440);
    assert!(report.to_string().contains("rejected 02"));
}

#[test]
fn incompatible_partitions_abort_before_writing() {
    let source = memory_store();
    let january = partition("2023-01-01", vec![0, 1], &IDS, |_, _| 1.0);
    let february = partition("2023-02-01", vec![0, 1], &[0, 1, 2, 3], |_, _| 2.0);
    write_partition(&source, &partition_path("01"), &january);
    write_partition(&source, &partition_path("02"), &february);

    let destination = memory_store();
    let previous = format!("{ARCHIVE}/.zgroup");
    destination
        .set(
            &StoreKey::new(previous.as_str()).unwrap(),
            Bytes::from(r#"{"zarr_format":2}"#),
        )
        .unwrap();

    let client = StorageClient::new(readable(&source));
    let result = Pipeline::new(&config(&["01", "02"]), &client).run(&writable(&destination), ARCHIVE);
    assert!(matches!(result, Err(PipelineError::Consolidation(_))));
    assert_eq!(destination.list().unwrap().len(), 1);
    assert!(get(&destination, &previous).is_some());
}

#[test]
fn unwritable_destination_fails_the_run() {
    let source = memory_store();
    overlapping_partitions(&source);
    let client = StorageClient::new(readable(&source));

    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("blocker"), "not a directory").unwrap();
    let destination: zarrs::storage::ReadableWritableListableStorage = Arc::new(
        zarrs::filesystem::FilesystemStore::new(dir.path()).unwrap(),
    );
    let result = Pipeline::new(&config(&["01", "02"]), &client)
        .run(&destination, &format!("blocker/{ARCHIVE}"));
    assert!(matches!(result, Err(PipelineError::Write(_))));
    assert_eq!(
        std::fs::read_to_string(dir.path().join("blocker")).unwrap(),
        "not a directory"
    );
}

#[test]
fn partition_without_temporal_coordinate_is_rejected() {
    let source = memory_store();
    let dataset = partition("2023-01-01", vec![0, 1], &IDS, |_, _| 0.0);
    let static_only = {
        let mut static_only = zarrs_consolidate::Dataset::new();
        static_only
            .add_coord(ID, dataset.coords()[ID].clone())
            .unwrap();
        static_only
            .add_data_var(CAPACITY, dataset.data_vars()[CAPACITY].clone())
            .unwrap();
        static_only
    };
    write_partition(&source, &partition_path("01"), &static_only);

    let client = StorageClient::new(readable(&source));
    let paths = config(&["01"]).path_resolver().resolve("01");
    let outcome = PartitionLoader::new(&client, TIME).load(&paths);
    assert!(matches!(
        outcome,
        LoadOutcome::Rejected(Rejection::Schema(
            PartitionSchemaError::MissingTemporalCoordinate { .. }
        ))
    ));

    let destination = memory_store();
    let result = Pipeline::new(&config(&["01"]), &client).run(&writable(&destination), ARCHIVE);
    assert!(matches!(
        result,
        Err(PipelineError::NoValidPartitions { rejected: 1 })
    ));
    assert!(destination.list().unwrap().is_empty());
}

struct Unreachable;

impl StoreClient for Unreachable {
    fn get_mapper(&self, location: &str) -> Result<StoreMapper, StoreClientError> {
        Err(StoreClientError::UnsupportedLocation {
            location: location.to_string(),
            reason: "offline".to_string(),
        })
    }
}

#[test]
fn unreachable_store_rejects_every_partition() {
    let paths = config(&["01"]).path_resolver().resolve("01");
    let outcome = PartitionLoader::new(&Unreachable, TIME).load(&paths);
    assert!(matches!(
        outcome,
        LoadOutcome::Rejected(Rejection::Open(PartitionOpenError::Store { .. }))
    ));

    let destination = memory_store();
    let result = Pipeline::new(&config(&["01", "02"]), &Unreachable)
        .run(&writable(&destination), ARCHIVE);
    assert!(matches!(
        result,
        Err(PipelineError::NoValidPartitions { rejected: 2 })
    ));
    assert!(destination.list().unwrap().is_empty());
}

#[test]
fn rerun_is_idempotent() {
    let source = memory_store();
    overlapping_partitions(&source);
    let client = StorageClient::new(readable(&source));
    let config = config(&["01", "02"]);
    let pipeline = Pipeline::new(&config, &client);

    let destination = memory_store();
    let first = pipeline.run(&writable(&destination), ARCHIVE).unwrap();
    let written = snapshot(&destination);
    let second = pipeline.run(&writable(&destination), ARCHIVE).unwrap();
    assert_eq!(snapshot(&destination), written);
    assert_eq!(first.chunk_plan, second.chunk_plan);

    let other = memory_store();
    pipeline.run(&writable(&other), ARCHIVE).unwrap();
    assert_eq!(
        get(&other, &format!("{ARCHIVE}/.zmetadata")),
        get(&destination, &format!("{ARCHIVE}/.zmetadata"))
    );
}

#[test]
fn overwrite_replaces_previous_archive() {
    let source = memory_store();
    overlapping_partitions(&source);
    let client = StorageClient::new(readable(&source));

    let dir = tempfile::TempDir::new().unwrap();
    let stale = dir.path().join(ARCHIVE).join("stale");
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::write(stale.join(".zattrs"), "{}").unwrap();

    let destination: zarrs::storage::ReadableWritableListableStorage = Arc::new(
        zarrs::filesystem::FilesystemStore::new(dir.path()).unwrap(),
    );
    let report = Pipeline::new(&config(&["01", "02"]), &client)
        .run(&destination, ARCHIVE)
        .unwrap();
    assert_eq!(report.temporal_len, 5);
    assert!(!stale.join(".zattrs").exists());
    assert!(dir.path().join(ARCHIVE).join(".zmetadata").exists());
    assert!(dir.path().join(ARCHIVE).join(GENERATION).join(".zarray").exists());
}
