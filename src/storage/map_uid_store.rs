use std::sync::Arc;
use redb::{ReadableTable, ReadableTableMetadata, WriteTransaction};
use tracing::debug;
use crate::codec::keys;
use crate::codec::uid::Uid;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{MapDefinition, RefStreamDefinition};
use crate::memory::buffer_pool::ByteBufferPool;
use crate::storage::layout::{MAP_UID_FORWARD, MAP_UID_REVERSE};
use crate::storage::scan_prefix;
use crate::storage::txn::ReadTxn;

/// Interns map definitions to UIDs. The forward (definition -> UID) and reverse
/// (UID -> definition) tables are only ever written together.
#[derive(Debug)]
pub struct MapDefinitionUidStore {
    pool: Arc<ByteBufferPool>,
}

impl MapDefinitionUidStore {
    pub fn new(pool: Arc<ByteBufferPool>) -> Self {
        MapDefinitionUidStore { pool }
    }

    /// UID for `map_definition`, allocating the next one if it has none yet
    pub fn get_or_create_uid(&self, txn: &WriteTransaction, map_definition: &MapDefinition) -> Result<Uid> {
        let mut forward_key = self.pool.get(64);
        keys::encode_map_definition_into(map_definition, &mut forward_key)?;

        if let Some(uid) = Self::get_uid_by_key(txn, &forward_key)? {
            return Ok(uid);
        }

        let uid = Self::next_uid(txn)?;
        let uid_bytes = uid.encode();
        txn.open_table(MAP_UID_FORWARD)?
            .insert(forward_key.as_slice(), uid_bytes.as_slice())?;
        txn.open_table(MAP_UID_REVERSE)?
            .insert(uid_bytes.as_slice(), forward_key.as_slice())?;

        debug!(uid = uid.value(), map = %map_definition, "Created map UID");
        Ok(uid)
    }

    pub fn get_uid<T: ReadTxn>(&self, txn: &T, map_definition: &MapDefinition) -> Result<Option<Uid>> {
        let mut forward_key = self.pool.get(64);
        keys::encode_map_definition_into(map_definition, &mut forward_key)?;
        Self::get_uid_by_key(txn, &forward_key)
    }

    pub fn get_map_definition<T: ReadTxn>(&self, txn: &T, uid: &Uid) -> Result<Option<MapDefinition>> {
        let reverse = txn.open(MAP_UID_REVERSE)?;
        let found = reverse.get(uid.encode().as_slice())?;
        match found {
            Some(forward_key) => Ok(Some(keys::decode_map_definition(forward_key.value())?)),
            None => Ok(None),
        }
    }

    /// A UID belonging to one of the maps of `ref_stream_definition`, or `None` once the
    /// stream has no maps left. Deleting each returned pair and calling again drains the stream.
    pub fn get_next_map_definition<T: ReadTxn>(
        &self,
        txn: &T,
        ref_stream_definition: &RefStreamDefinition,
    ) -> Result<Option<Uid>> {
        let mut prefix = self.pool.get(64);
        keys::encode_stream_definition_into(ref_stream_definition, &mut prefix)?;

        let forward = txn.open(MAP_UID_FORWARD)?;
        let mut next = None;
        scan_prefix(&forward, &prefix, |_, uid_bytes| {
            next = Some(Uid::decode(uid_bytes)?.0);
            Ok(false)
        })?;
        Ok(next)
    }

    /// Every map of a stream with its UID, ordered by map name
    pub fn get_maps_for_stream<T: ReadTxn>(
        &self,
        txn: &T,
        ref_stream_definition: &RefStreamDefinition,
    ) -> Result<Vec<(MapDefinition, Uid)>> {
        let mut prefix = self.pool.get(64);
        keys::encode_stream_definition_into(ref_stream_definition, &mut prefix)?;

        let forward = txn.open(MAP_UID_FORWARD)?;
        let mut maps = Vec::new();
        scan_prefix(&forward, &prefix, |forward_key, uid_bytes| {
            let map_definition = keys::decode_map_definition(forward_key)?;
            maps.push((map_definition, Uid::decode(uid_bytes)?.0));
            Ok(true)
        })?;
        Ok(maps)
    }

    pub fn get_map_names<T: ReadTxn>(
        &self,
        txn: &T,
        ref_stream_definition: &RefStreamDefinition,
    ) -> Result<Vec<String>> {
        Ok(self
            .get_maps_for_stream(txn, ref_stream_definition)?
            .into_iter()
            .map(|(map_definition, _)| map_definition.map_name)
            .collect())
    }

    /// Remove both rows for `uid`. Deleting a UID that is not present is a logic error.
    pub fn delete_pair(&self, txn: &WriteTransaction, uid: &Uid) -> Result<()> {
        let forward_key = txn
            .open_table(MAP_UID_REVERSE)?
            .remove(uid.encode().as_slice())?
            .map(|guard| guard.value().to_vec())
            .ok_or_else(|| {
                Error::new(ErrorKind::InvalidState, format!("No reverse entry for map UID {}", uid))
            })?;

        let removed = txn
            .open_table(MAP_UID_FORWARD)?
            .remove(forward_key.as_slice())?
            .is_some();
        if !removed {
            return Err(Error::invalid_state(format!("No forward entry for map UID {}", uid)));
        }
        debug!(uid = uid.value(), "Deleted map UID pair");
        Ok(())
    }

    pub fn get_entry_count<T: ReadTxn>(&self, txn: &T) -> Result<u64> {
        Ok(txn.open(MAP_UID_FORWARD)?.len()?)
    }

    fn get_uid_by_key<T: ReadTxn>(txn: &T, forward_key: &[u8]) -> Result<Option<Uid>> {
        let forward = txn.open(MAP_UID_FORWARD)?;
        let found = forward.get(forward_key)?;
        match found {
            Some(uid_bytes) => Ok(Some(Uid::decode(uid_bytes.value())?.0)),
            None => Ok(None),
        }
    }

    /// One past the highest UID in use, widening the buffer when the current width is exhausted
    fn next_uid(txn: &WriteTransaction) -> Result<Uid> {
        let reverse = txn.open_table(MAP_UID_REVERSE)?;
        let last = reverse.last()?;
        let mut uid = match last {
            None => return Uid::min_value(Uid::MIN_WIDTH),
            Some((uid_bytes, _)) => Uid::decode(uid_bytes.value())?.0,
        };
        match uid.increment() {
            Ok(()) => Ok(uid),
            Err(e) if e.kind == ErrorKind::Overflow => {
                let mut widened = uid.widened()?;
                widened.increment()?;
                Ok(widened)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redb::Database;
    use crate::storage::layout::ALL_TABLES;
    use crate::storage::txn::{with_read_txn, with_write_txn};

    fn setup() -> (tempfile::TempDir, Database, MapDefinitionUidStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::create(dir.path().join("test.redb")).unwrap();
        with_write_txn(&db, |txn| {
            for table in ALL_TABLES {
                txn.open_table(table)?;
            }
            Ok(())
        })
        .unwrap();
        let store = MapDefinitionUidStore::new(Arc::new(ByteBufferPool::new(10)));
        (dir, db, store)
    }

    fn map(stream_id: u64, name: &str) -> MapDefinition {
        MapDefinition::new(RefStreamDefinition::new("pipe-uuid", "1", stream_id), name)
    }

    #[test]
    fn test_uids_allocated_in_sequence() {
        let (_dir, db, store) = setup();
        let uids: Vec<u64> = with_write_txn(&db, |txn| {
            (0..5)
                .map(|i| store.get_or_create_uid(txn, &map(1, &format!("map{}", i))).map(|u| u.value()))
                .collect()
        })
        .unwrap();
        assert_eq!(uids, vec![0, 1, 2, 3, 4]);

        // Same definition gives back the same UID
        let again = with_write_txn(&db, |txn| store.get_or_create_uid(txn, &map(1, "map2"))).unwrap();
        assert_eq!(again.value(), 2);
        let count = with_read_txn(&db, |txn| store.get_entry_count(txn)).unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn test_uid_grows_past_one_byte() {
        let (_dir, db, store) = setup();
        let last = with_write_txn(&db, |txn| {
            let mut last = None;
            for i in 0..300 {
                last = Some(store.get_or_create_uid(txn, &map(1, &format!("m{:04}", i)))?);
            }
            Ok(last)
        })
        .unwrap()
        .unwrap();
        assert_eq!(last.value(), 299);

        let found = with_read_txn(&db, |txn| store.get_map_definition(txn, &Uid::from_value(256))).unwrap();
        assert_eq!(found.unwrap().map_name, "m0256");
    }

    #[test]
    fn test_get_uid_absent() {
        let (_dir, db, store) = setup();
        let uid = with_read_txn(&db, |txn| store.get_uid(txn, &map(1, "nope"))).unwrap();
        assert!(uid.is_none());
    }

    #[test]
    fn test_drain_maps_for_stream() {
        let (_dir, db, store) = setup();
        with_write_txn(&db, |txn| {
            store.get_or_create_uid(txn, &map(1, "a"))?;
            store.get_or_create_uid(txn, &map(2, "a"))?;
            store.get_or_create_uid(txn, &map(1, "b"))?;
            store.get_or_create_uid(txn, &map(1, "c"))?;
            Ok(())
        })
        .unwrap();

        let stream = RefStreamDefinition::new("pipe-uuid", "1", 1);
        let names = with_read_txn(&db, |txn| store.get_map_names(txn, &stream)).unwrap();
        assert_eq!(names, vec!["a", "b", "c"]);

        let drained = with_write_txn(&db, |txn| {
            let mut drained = 0;
            while let Some(uid) = store.get_next_map_definition(txn, &stream)? {
                store.delete_pair(txn, &uid)?;
                drained += 1;
            }
            Ok(drained)
        })
        .unwrap();
        assert_eq!(drained, 3);

        // Other stream untouched
        let other = RefStreamDefinition::new("pipe-uuid", "1", 2);
        let names = with_read_txn(&db, |txn| store.get_map_names(txn, &other)).unwrap();
        assert_eq!(names, vec!["a"]);
        let count = with_read_txn(&db, |txn| store.get_entry_count(txn)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_double_delete_is_error() {
        let (_dir, db, store) = setup();
        let uid = with_write_txn(&db, |txn| store.get_or_create_uid(txn, &map(1, "a"))).unwrap();
        with_write_txn(&db, |txn| store.delete_pair(txn, &uid)).unwrap();
        let err = with_write_txn(&db, |txn| store.delete_pair(txn, &uid)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidState);
    }
}
