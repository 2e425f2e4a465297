use std::fs;
use std::path::{Path, PathBuf};
use redb::TableDefinition;
use crate::core::error::Result;

pub type BytesTable = TableDefinition<'static, &'static [u8], &'static [u8]>;

pub const MAP_UID_FORWARD: BytesTable = TableDefinition::new("MapUidForward");
pub const MAP_UID_REVERSE: BytesTable = TableDefinition::new("MapUidReverse");
pub const KEY_VALUE_STORE: BytesTable = TableDefinition::new("KeyValueStore");
pub const RANGE_STORE: BytesTable = TableDefinition::new("RangeStore");
pub const VALUE_STORE: BytesTable = TableDefinition::new("ValueStore");
pub const VALUE_STORE_META: BytesTable = TableDefinition::new("ValueStoreMeta");
pub const PROCESSING_INFO: BytesTable = TableDefinition::new("ProcessingInfo");

pub const ALL_TABLES: [BytesTable; 7] = [
    MAP_UID_FORWARD,
    MAP_UID_REVERSE,
    KEY_VALUE_STORE,
    RANGE_STORE,
    VALUE_STORE,
    VALUE_STORE_META,
    PROCESSING_INFO,
];

const DB_FILE_NAME: &str = "refdata.redb";

/// Directory structure of one physical store
#[derive(Debug, Clone)]
pub struct StoreLayout {
    pub base_dir: PathBuf,      // Store directory, one per physical store
    pub db_path: PathBuf,       // Single redb file holding all the tables
}

impl StoreLayout {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_dir)?;
        let db_path = base_dir.join(DB_FILE_NAME);

        Ok(StoreLayout { base_dir, db_path })
    }

    /// True if `dir` already holds a store file
    pub fn is_store_dir(dir: &Path) -> bool {
        dir.join(DB_FILE_NAME).is_file()
    }

    pub fn dir_name(&self) -> String {
        self.base_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.base_dir.display().to_string())
    }

    pub fn size_on_disk(&self) -> Result<u64> {
        match fs::metadata(&self.db_path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}
