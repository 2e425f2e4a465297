mod common;

use chrono::{Duration, Utc};
use common::{get_string, load, map, new_stream, open_store, StreamData};
use refdata_store::core::error::ErrorKind;
use refdata_store::core::types::ProcessingState;

fn days(n: u64) -> std::time::Duration {
    std::time::Duration::from_secs(n * 24 * 60 * 60)
}

#[test]
fn test_purge_old_data_removes_only_stale_streams() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let stale = new_stream(1);
    let fresh = new_stream(2);

    load(&store, &stale, &StreamData::default().key("m", "a", "stale a").key("m", "b", "stale b").range("r", 0, 10, "stale range")).unwrap();
    load(&store, &fresh, &StreamData::default().key("m", "a", "fresh a").range("r", 0, 10, "fresh range")).unwrap();
    assert_eq!(store.get_value_entry_count().unwrap(), 5);

    store.set_last_accessed_time(&stale, Utc::now() - Duration::days(2)).unwrap();
    let counts = store.purge_old_data_with(Utc::now(), days(1)).unwrap();

    assert_eq!(counts.streams_purged, 1);
    assert_eq!(counts.streams_failed, 0);
    assert_eq!(counts.maps_deleted, 2);
    assert_eq!(counts.key_value_entries_deleted, 2);
    assert_eq!(counts.range_value_entries_deleted, 1);
    assert_eq!(counts.values_deleted, 3);

    assert!(!store.exists_stream(&stale).unwrap());
    assert_eq!(store.get_processing_info_entry_count().unwrap(), 1);
    assert_eq!(store.get_key_value_entry_count().unwrap(), 1);
    assert_eq!(store.get_range_value_entry_count().unwrap(), 1);
    assert_eq!(store.get_value_entry_count().unwrap(), 2);
    assert_eq!(store.get_counts().unwrap().map_uid_entries, 2);

    assert_eq!(get_string(&store, &map(&stale, "m"), "a"), None);
    assert_eq!(get_string(&store, &map(&fresh, "m"), "a").as_deref(), Some("fresh a"));
    assert_eq!(get_string(&store, &map(&fresh, "r"), "5").as_deref(), Some("fresh range"));
}

#[test]
fn test_shared_value_survives_purge_of_one_stream() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let first = new_stream(3);
    let second = new_stream(4);
    load(&store, &first, &StreamData::default().key("first_map", "k", "X")).unwrap();
    load(&store, &second, &StreamData::default().key("second_map", "k", "X")).unwrap();

    assert_eq!(store.get_value_entry_count().unwrap(), 1);
    assert_eq!(store.get_value_reference_count(&map(&first, "first_map"), "k").unwrap(), Some(2));

    let counts = store.purge(first.stream_id, None).unwrap();
    assert_eq!(counts.values_dereferenced, 1);
    assert_eq!(counts.values_deleted, 0);

    assert_eq!(store.get_value_entry_count().unwrap(), 1);
    assert_eq!(store.get_value_reference_count(&map(&second, "second_map"), "k").unwrap(), Some(1));
    assert_eq!(get_string(&store, &map(&second, "second_map"), "k").as_deref(), Some("X"));

    store.purge(second.stream_id, None).unwrap();
    assert!(store.is_empty().unwrap());
    assert_eq!(store.get_counts().unwrap(), Default::default());
}

#[test]
fn test_abandoned_streams_purged_whatever_their_age() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let abandoned = new_stream(5);
    let failed = new_stream(6);
    load(&store, &abandoned, &StreamData::default().many_keys("m", 3)).unwrap();
    load(&store, &failed, &StreamData::default().key("m", "k", "v")).unwrap();
    store.set_processing_state(&abandoned, ProcessingState::LoadInProgress).unwrap();
    store.set_processing_state(&failed, ProcessingState::Failed).unwrap();

    let counts = store.purge_old_data_with(Utc::now(), days(30)).unwrap();
    assert_eq!(counts.streams_purged, 1);
    assert!(!store.exists_stream(&abandoned).unwrap());
    assert!(store.exists_stream(&failed).unwrap());
}

#[test]
fn test_zero_purge_age_purges_everything() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    for id in 0..3 {
        load(&store, &new_stream(id), &StreamData::default().many_keys("m", 10)).unwrap();
    }
    let counts = store.purge_old_data_with(Utc::now(), std::time::Duration::ZERO).unwrap();
    assert_eq!(counts.streams_purged, 3);
    assert!(store.is_empty().unwrap());
    assert_eq!(store.get_value_entry_count().unwrap(), 0);
}

#[test]
fn test_nothing_to_purge() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    load(&store, &new_stream(7), &StreamData::default().key("m", "k", "v")).unwrap();
    let counts = store.purge_old_data().unwrap();
    assert_eq!(counts, Default::default());
    assert!(counts.is_ok());
    assert_eq!(store.purge(999, None).unwrap().streams_purged, 0);
}

#[test]
fn test_explicit_purge_of_one_part() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let part_0 = new_stream(8);
    let part_1 = part_0.clone().with_part_index(1);
    load(&store, &part_0, &StreamData::default().key("m", "k", "part 0")).unwrap();
    load(&store, &part_1, &StreamData::default().key("m", "k", "part 1")).unwrap();

    let counts = store.purge(part_0.stream_id, Some(1)).unwrap();
    assert_eq!(counts.streams_purged, 1);
    assert_eq!(get_string(&store, &map(&part_0, "m"), "k").as_deref(), Some("part 0"));
    assert_eq!(get_string(&store, &map(&part_1, "m"), "k"), None);
}

#[test]
fn test_large_purge_spans_many_commits() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let def = new_stream(9);
    load(&store, &def, &StreamData::default().many_keys("a", 300).many_keys("b", 200)).unwrap();

    let counts = store.purge(def.stream_id, None).unwrap();
    assert_eq!(counts.key_value_entries_deleted, 500);
    assert_eq!(counts.maps_deleted, 2);
    // value_N strings repeat across the two maps for N < 200
    assert_eq!(counts.values_deleted, 300);
    assert_eq!(counts.values_dereferenced, 200);
    assert!(store.is_empty().unwrap());
    assert_eq!(store.get_counts().unwrap(), Default::default());
}

#[test]
fn test_terminated_purge_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let def = new_stream(10);
    load(&store, &def, &StreamData::default().key("m", "k", "v")).unwrap();

    store.terminator().terminate();
    let err = store.purge(def.stream_id, None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Terminated);
    assert!(store.exists_stream(&def).unwrap());

    let other = new_stream(11);
    let err = load(&store, &other, &StreamData::default().key("m", "k", "v")).unwrap_err();
    assert!(err.is_terminated());
    assert_eq!(store.get_load_state(&other).unwrap(), Some(ProcessingState::Terminated));

    store.terminator().reset();
    assert!(load(&store, &other, &StreamData::default().key("m", "k", "again")).unwrap());
    assert_eq!(get_string(&store, &map(&other, "m"), "k").as_deref(), Some("again"));
    assert_eq!(store.purge(def.stream_id, None).unwrap().streams_purged, 1);
}

#[test]
fn test_last_accessed_time_range() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    assert_eq!(store.get_last_accessed_time_range().unwrap(), None);

    let old = new_stream(12);
    let recent = new_stream(13);
    load(&store, &old, &StreamData::default().key("m", "k", "v")).unwrap();
    load(&store, &recent, &StreamData::default().key("m", "k", "v")).unwrap();
    let old_time = Utc::now() - Duration::days(10);
    store.set_last_accessed_time(&old, old_time).unwrap();

    let (min, max) = store.get_last_accessed_time_range().unwrap().unwrap();
    assert_eq!(min, old_time);
    assert!(max > old_time);
}
