use chrono::{DateTime, Utc};
use redb::{ReadableTable, ReadableTableMetadata, WriteTransaction};
use crate::codec::keys;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{ProcessingState, RefDataProcessingInfo, RefStreamDefinition};
use crate::storage::layout::PROCESSING_INFO;
use crate::storage::txn::ReadTxn;

/// One row per reference stream holding its load state and access times
#[derive(Debug, Default)]
pub struct ProcessingInfoDb;

impl ProcessingInfoDb {
    pub fn new() -> Self {
        ProcessingInfoDb
    }

    /// Insert or replace. Returns true if a row already existed.
    pub fn put(
        &self,
        txn: &WriteTransaction,
        ref_stream_definition: &RefStreamDefinition,
        info: &RefDataProcessingInfo,
    ) -> Result<bool> {
        let key = keys::encode_stream_definition(ref_stream_definition)?;
        let value = bincode::serialize(info)?;
        let existed = txn
            .open_table(PROCESSING_INFO)?
            .insert(key.as_slice(), value.as_slice())?
            .is_some();
        Ok(existed)
    }

    pub fn get<T: ReadTxn>(
        &self,
        txn: &T,
        ref_stream_definition: &RefStreamDefinition,
    ) -> Result<Option<RefDataProcessingInfo>> {
        let key = keys::encode_stream_definition(ref_stream_definition)?;
        let table = txn.open(PROCESSING_INFO)?;
        let found = table.get(key.as_slice())?;
        match found {
            Some(value) => Ok(Some(bincode::deserialize(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn update_processing_state(
        &self,
        txn: &WriteTransaction,
        ref_stream_definition: &RefStreamDefinition,
        processing_state: ProcessingState,
    ) -> Result<RefDataProcessingInfo> {
        let info = self.get_existing(txn, ref_stream_definition)?;
        let updated = info.with_state(processing_state);
        self.put(txn, ref_stream_definition, &updated)?;
        Ok(updated)
    }

    pub fn update_last_accessed_time(
        &self,
        txn: &WriteTransaction,
        ref_stream_definition: &RefStreamDefinition,
        last_accessed_time: DateTime<Utc>,
    ) -> Result<()> {
        let mut info = self.get_existing(txn, ref_stream_definition)?;
        info.last_accessed_time = last_accessed_time;
        self.put(txn, ref_stream_definition, &info)?;
        Ok(())
    }

    pub fn delete(&self, txn: &WriteTransaction, ref_stream_definition: &RefStreamDefinition) -> Result<bool> {
        let key = keys::encode_stream_definition(ref_stream_definition)?;
        let removed = txn.open_table(PROCESSING_INFO)?.remove(key.as_slice())?.is_some();
        Ok(removed)
    }

    /// Visit every row in key order until `visit` returns false
    pub fn for_each<T, F>(&self, txn: &T, mut visit: F) -> Result<()>
    where
        T: ReadTxn,
        F: FnMut(RefStreamDefinition, RefDataProcessingInfo) -> Result<bool>,
    {
        let table = txn.open(PROCESSING_INFO)?;
        for item in table.iter()? {
            let (key, value) = item?;
            let (ref_stream_definition, _) = keys::decode_stream_definition(key.value())?;
            let info: RefDataProcessingInfo = bincode::deserialize(value.value())?;
            if !visit(ref_stream_definition, info)? {
                break;
            }
        }
        Ok(())
    }

    /// Rows matching `predicate`
    pub fn find<T, P>(&self, txn: &T, mut predicate: P) -> Result<Vec<(RefStreamDefinition, RefDataProcessingInfo)>>
    where
        T: ReadTxn,
        P: FnMut(&RefStreamDefinition, &RefDataProcessingInfo) -> bool,
    {
        let mut found = Vec::new();
        self.for_each(txn, |def, info| {
            if predicate(&def, &info) {
                found.push((def, info));
            }
            Ok(true)
        })?;
        Ok(found)
    }

    /// Oldest and newest last accessed times across all rows
    pub fn get_last_accessed_time_range<T: ReadTxn>(
        &self,
        txn: &T,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let mut range: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
        self.for_each(txn, |_, info| {
            let time = info.last_accessed_time;
            range = Some(match range {
                Some((min, max)) => (min.min(time), max.max(time)),
                None => (time, time),
            });
            Ok(true)
        })?;
        Ok(range)
    }

    pub fn get_entry_count<T: ReadTxn>(&self, txn: &T) -> Result<u64> {
        Ok(txn.open(PROCESSING_INFO)?.len()?)
    }

    fn get_existing(
        &self,
        txn: &WriteTransaction,
        ref_stream_definition: &RefStreamDefinition,
    ) -> Result<RefDataProcessingInfo> {
        self.get(txn, ref_stream_definition)?.ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("No processing info for {}", ref_stream_definition),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use redb::Database;
    use crate::storage::layout::ALL_TABLES;
    use crate::storage::txn::{with_read_txn, with_write_txn};

    fn setup() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::create(dir.path().join("test.redb")).unwrap();
        with_write_txn(&db, |txn| {
            for table in ALL_TABLES {
                txn.open_table(table)?;
            }
            Ok(())
        })
        .unwrap();
        (dir, db)
    }

    #[test]
    fn test_put_update_delete() {
        let (_dir, db) = setup();
        let info_db = ProcessingInfoDb::new();
        let def = RefStreamDefinition::new("uuid", "1", 42);
        let now = Utc::now();
        let info = RefDataProcessingInfo::new(now, now, ProcessingState::LoadInProgress);

        let existed = with_write_txn(&db, |txn| info_db.put(txn, &def, &info)).unwrap();
        assert!(!existed);

        with_write_txn(&db, |txn| info_db.update_processing_state(txn, &def, ProcessingState::Complete)).unwrap();
        let earlier = now - Duration::days(2);
        with_write_txn(&db, |txn| info_db.update_last_accessed_time(txn, &def, earlier)).unwrap();

        let loaded = with_read_txn(&db, |txn| info_db.get(txn, &def)).unwrap().unwrap();
        assert_eq!(loaded.processing_state, ProcessingState::Complete);
        assert_eq!(loaded.last_accessed_time, earlier);
        assert_eq!(loaded.create_time, now);

        assert!(with_write_txn(&db, |txn| info_db.delete(txn, &def)).unwrap());
        assert_eq!(with_read_txn(&db, |txn| info_db.get_entry_count(txn)).unwrap(), 0);
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let (_dir, db) = setup();
        let info_db = ProcessingInfoDb::new();
        let def = RefStreamDefinition::new("uuid", "1", 1);
        let err = with_write_txn(&db, |txn| info_db.update_processing_state(txn, &def, ProcessingState::Failed))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_find_and_time_range() {
        let (_dir, db) = setup();
        let info_db = ProcessingInfoDb::new();
        let now = Utc::now();
        with_write_txn(&db, |txn| {
            for i in 0..5 {
                let def = RefStreamDefinition::new("uuid", "1", i);
                let mut info = RefDataProcessingInfo::new(now, now, ProcessingState::Complete);
                info.last_accessed_time = now - Duration::hours(i as i64);
                info_db.put(txn, &def, &info)?;
            }
            Ok(())
        })
        .unwrap();

        let old = with_read_txn(&db, |txn| {
            info_db.find(txn, |_, info| !info.was_accessed_after(now - Duration::minutes(150)))
        })
        .unwrap();
        let ids: Vec<u64> = old.iter().map(|(def, _)| def.stream_id).collect();
        assert_eq!(ids, vec![3, 4]);

        let (min, max) = with_read_txn(&db, |txn| info_db.get_last_accessed_time_range(txn)).unwrap().unwrap();
        assert_eq!(max, now);
        assert_eq!(min, now - Duration::hours(4));
    }
}
