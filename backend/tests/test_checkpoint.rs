//! Tests for versioned record persistence
//!
//! CRITICAL: a corrupt or foreign record must never be loaded, and must
//! never prevent startup.

use sentinel_core_rs::orchestrator::{load_record, save_record, VersionedRecord, SCHEMA_VERSION};
use sentinel_core_rs::storage::{FileStore, KeyValueStore, MemoryStore, RecordKind, StoreScope};
use sentinel_core_rs::models::savings_plan::SavingsPlanDraft;
use sentinel_core_rs::{Address, EventLog, ExecutionEvent, SavingsPlan};
use chrono::{NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Sample {
    name: String,
    count: u32,
}

fn sample() -> Sample {
    Sample {
        name: "hosting".to_string(),
        count: 3,
    }
}

fn scope() -> StoreScope {
    StoreScope::new(
        Address::parse("0x1111111111111111111111111111111111111111").unwrap(),
        "sepolia",
    )
}

#[test]
fn test_keys_are_scoped_by_network_and_owner() {
    let key = scope().key(RecordKind::Schedules);
    assert_eq!(
        key,
        "sentinel:sepolia:0x1111111111111111111111111111111111111111:schedules"
    );
    let other = StoreScope::new(
        Address::parse("0x1111111111111111111111111111111111111111").unwrap(),
        "mainnet",
    );
    assert_ne!(other.key(RecordKind::Schedules), key);
}

#[test]
fn test_round_trip_through_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    let key = scope().key(RecordKind::History);

    let mut log = EventLog::new();
    log.log(ExecutionEvent::LowBalance {
        at: Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap(),
        required: 100,
        available: 50,
    });
    save_record(&store, &key, &log).unwrap();

    // A second handle over the same directory sees the record
    let reopened = FileStore::open(dir.path()).unwrap();
    let loaded: Option<EventLog> = load_record(&reopened, &key).unwrap();
    assert_eq!(loaded, Some(log));
}

#[test]
fn test_missing_record_is_none() {
    let store = MemoryStore::new();
    let loaded: Option<Sample> = load_record(&store, "absent").unwrap();
    assert_eq!(loaded, None);
}

#[test]
fn test_record_carries_schema_and_checksum() {
    let store = MemoryStore::new();
    save_record(&store, "k", &sample()).unwrap();

    let raw = store.get("k").unwrap().unwrap();
    let record: VersionedRecord<Sample> = serde_json::from_str(&raw).unwrap();
    assert_eq!(record.schema_version, SCHEMA_VERSION);
    assert_eq!(record.checksum.len(), 64);
    assert!(record.verify().is_ok());
}

#[test]
fn test_tampered_record_is_discarded() {
    let store = MemoryStore::new();
    save_record(&store, "k", &sample()).unwrap();

    let raw = store.get("k").unwrap().unwrap();
    store.put("k", &raw.replace("\"count\":3", "\"count\":4")).unwrap();

    let loaded: Option<Sample> = load_record(&store, "k").unwrap();
    assert_eq!(loaded, None);
}

#[test]
fn test_garbage_and_wrong_shape_are_discarded() {
    let store = MemoryStore::new();
    store.put("garbage", "{not json").unwrap();
    store.put("shape", r#"{"unexpected": true}"#).unwrap();

    assert_eq!(load_record::<Sample>(&store, "garbage").unwrap(), None);
    assert_eq!(load_record::<Sample>(&store, "shape").unwrap(), None);
}

#[test]
fn test_overwrite_replaces_previous_value() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();

    save_record(&store, "k", &sample()).unwrap();
    let mut updated = sample();
    updated.count = 9;
    save_record(&store, "k", &updated).unwrap();

    assert_eq!(load_record::<Sample>(&store, "k").unwrap(), Some(updated));
    store.remove("k").unwrap();
    store.remove("k").unwrap();
    assert_eq!(load_record::<Sample>(&store, "k").unwrap(), None);
}

#[test]
fn test_record_from_older_build_loads_with_defaults() {
    let at = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
    let mut plan = SavingsPlan::new(
        SavingsPlanDraft {
            name: "Emergency fund".to_string(),
            deposit_amount: 100,
            frequency: None,
            lock_duration_days: 30,
            execution_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        },
        at,
    )
    .unwrap();
    plan.set_on_chain_plan_id(7, at);

    // An older build never wrote `cancelled` and knew nothing of the new schema
    let mut json = serde_json::to_value(vec![plan.clone()]).unwrap();
    json[0].as_object_mut().unwrap().remove("cancelled");
    json[0]["legacyNote"] = serde_json::json!("kept by an older build");
    let mut record = VersionedRecord::wrap(json).unwrap();
    record.schema_version = SCHEMA_VERSION - 1;

    let store = MemoryStore::new();
    let key = scope().key(RecordKind::SavingsPlans);
    store.put(&key, &serde_json::to_string(&record).unwrap()).unwrap();

    let loaded: Option<Vec<SavingsPlan>> = load_record(&store, &key).unwrap();
    assert_eq!(loaded, Some(vec![plan]));
}
