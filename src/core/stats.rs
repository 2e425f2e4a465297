use std::collections::BTreeMap;
use std::ops::AddAssign;
use serde::{Serialize, Deserialize};
use crate::core::types::{MapDefinition, RefDataProcessingInfo, RefDataValue, RefStreamDefinition};

/// Row counts across the tables of a store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub key_value_entries: u64,
    pub range_value_entries: u64,
    pub value_entries: u64,
    pub value_meta_entries: u64,
    pub map_uid_entries: u64,
    pub processing_info_entries: u64,
}

impl AddAssign for StoreCounts {
    fn add_assign(&mut self, other: StoreCounts) {
        self.key_value_entries += other.key_value_entries;
        self.range_value_entries += other.range_value_entries;
        self.value_entries += other.value_entries;
        self.value_meta_entries += other.value_meta_entries;
        self.map_uid_entries += other.map_uid_entries;
        self.processing_info_entries += other.processing_info_entries;
    }
}

/// Totals for a purge of one or more streams
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeCounts {
    pub streams_purged: usize,
    pub streams_failed: usize,
    pub maps_deleted: u64,
    pub key_value_entries_deleted: u64,
    pub range_value_entries_deleted: u64,
    pub values_deleted: u64,
    pub values_dereferenced: u64,
}

impl PurgeCounts {
    pub fn is_ok(&self) -> bool {
        self.streams_failed == 0
    }

    pub fn entries_deleted(&self) -> u64 {
        self.key_value_entries_deleted + self.range_value_entries_deleted
    }
}

impl AddAssign for PurgeCounts {
    fn add_assign(&mut self, other: PurgeCounts) {
        self.streams_purged += other.streams_purged;
        self.streams_failed += other.streams_failed;
        self.maps_deleted += other.maps_deleted;
        self.key_value_entries_deleted += other.key_value_entries_deleted;
        self.range_value_entries_deleted += other.range_value_entries_deleted;
        self.values_deleted += other.values_deleted;
        self.values_dereferenced += other.values_dereferenced;
    }
}

/// What happened to the puts of one load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderStats {
    pub puts: u64,
    pub new_entries: u64,
    pub null_values_ignored: u64,
    pub dup_key_value_updated: u64,
    pub dup_key_value_identical: u64,
    pub dup_key_entry_removed: u64,
    pub dup_key_ignored: u64,
}

/// One key or range entry, resolved for dumping store contents
#[derive(Debug, Clone, PartialEq)]
pub struct RefStoreEntry {
    pub feed_name: Option<String>,
    pub map_definition: MapDefinition,
    pub key: String,                        // exact key, or "from-to" for ranges
    pub value: RefDataValue,
    pub value_reference_count: u32,
    pub processing_info: Option<RefDataProcessingInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingInfoResponse {
    pub ref_stream_definition: RefStreamDefinition,
    pub processing_info: RefDataProcessingInfo,
    pub map_entry_counts: BTreeMap<String, u64>,
}
