#![allow(dead_code)]

use std::sync::Arc;
use chrono::Utc;
use refdata_store::core::config::Config;
use refdata_store::core::error::Result;
use refdata_store::core::types::{KeyRange, MapDefinition, ProcessingState, RefDataValue, RefStreamDefinition};
use refdata_store::store::offheap_store::RefDataOffHeapStore;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::with_storage_path(dir.path().join("store"));
    config.max_puts_before_commit = 50;
    config.max_purge_deletes_before_commit = 50;
    config
}

pub fn open_store(dir: &TempDir) -> Arc<RefDataOffHeapStore> {
    init_tracing();
    Arc::new(RefDataOffHeapStore::open(test_config(dir)).unwrap())
}

pub fn stream(pipeline_uuid: &str, stream_id: u64) -> RefStreamDefinition {
    RefStreamDefinition::new(pipeline_uuid, "1", stream_id)
}

pub fn new_stream(stream_id: u64) -> RefStreamDefinition {
    stream(&uuid::Uuid::new_v4().to_string(), stream_id)
}

pub fn map(def: &RefStreamDefinition, name: &str) -> MapDefinition {
    MapDefinition::new(def.clone(), name)
}

/// Test data for one stream: key entries and range entries per map name
#[derive(Default, Clone)]
pub struct StreamData {
    pub keys: Vec<(String, String, String)>,
    pub ranges: Vec<(String, u64, u64, String)>,
}

impl StreamData {
    pub fn key(mut self, map_name: &str, key: &str, value: &str) -> Self {
        self.keys.push((map_name.to_string(), key.to_string(), value.to_string()));
        self
    }

    pub fn range(mut self, map_name: &str, from: u64, to: u64, value: &str) -> Self {
        self.ranges.push((map_name.to_string(), from, to, value.to_string()));
        self
    }

    /// `count` keys `key_0..` in `map_name` with values `value_0..`
    pub fn many_keys(mut self, map_name: &str, count: usize) -> Self {
        for i in 0..count {
            self = self.key(map_name, &format!("key_{}", i), &format!("value_{}", i));
        }
        self
    }
}

/// Load `data` as a complete stream, returning whether any work was done
pub fn load(store: &RefDataOffHeapStore, def: &RefStreamDefinition, data: &StreamData) -> Result<bool> {
    store.do_with_loader_unless_complete(def, Utc::now(), |loader| {
        loader.initialise(false)?;
        for (map_name, key, value) in &data.keys {
            loader.put_key_value(&map(def, map_name), key, RefDataValue::from(value.as_str()))?;
        }
        for (map_name, from, to, value) in &data.ranges {
            loader.put_range_value(&map(def, map_name), KeyRange::new(*from, *to)?, RefDataValue::from(value.as_str()))?;
        }
        loader.complete_processing(ProcessingState::Complete)
    })
}

pub fn get_string(store: &RefDataOffHeapStore, map_definition: &MapDefinition, key: &str) -> Option<String> {
    match store.get_value(map_definition, key).unwrap() {
        Some(RefDataValue::String(s)) => Some(s),
        Some(other) => panic!("Unexpected value {:?}", other),
        None => None,
    }
}
