use std::sync::Arc;
use redb::{ReadableTable, ReadableTableMetadata, WriteTransaction};
use crate::codec::keys::{self, ValueStoreKey};
use crate::codec::uid::Uid;
use crate::core::error::Result;
use crate::memory::buffer_pool::ByteBufferPool;
use crate::storage::layout::{BytesTable, KEY_VALUE_STORE};
use crate::storage::scan_prefix;
use crate::storage::txn::ReadTxn;

/// Table mapping `(map UID, key)` to the key of a stored value.
/// Implemented by the exact-key and the range-key tables.
pub trait EntryStoreDb {
    type Key: ?Sized;

    const TABLE: BytesTable;

    fn pool(&self) -> &ByteBufferPool;

    fn encode_key(map_uid: &Uid, key: &Self::Key, out: &mut Vec<u8>);

    /// Insert or replace the entry, returning the value key it previously pointed at
    fn put(
        &self,
        txn: &WriteTransaction,
        map_uid: &Uid,
        key: &Self::Key,
        value_key: &ValueStoreKey,
    ) -> Result<Option<ValueStoreKey>> {
        let mut key_bytes = self.pool().get(64);
        Self::encode_key(map_uid, key, &mut key_bytes);
        self.put_raw(txn, &key_bytes, value_key)
    }

    fn put_raw(
        &self,
        txn: &WriteTransaction,
        key_bytes: &[u8],
        value_key: &ValueStoreKey,
    ) -> Result<Option<ValueStoreKey>> {
        let mut table = txn.open_table(Self::TABLE)?;
        let previous = table.insert(key_bytes, value_key.encode().as_slice())?;
        match previous {
            Some(previous) => Ok(Some(ValueStoreKey::decode(previous.value())?)),
            None => Ok(None),
        }
    }

    fn get<T: ReadTxn>(&self, txn: &T, map_uid: &Uid, key: &Self::Key) -> Result<Option<ValueStoreKey>> {
        let mut key_bytes = self.pool().get(64);
        Self::encode_key(map_uid, key, &mut key_bytes);
        let table = txn.open(Self::TABLE)?;
        let found = table.get(key_bytes.as_slice())?;
        match found {
            Some(value_key) => Ok(Some(ValueStoreKey::decode(value_key.value())?)),
            None => Ok(None),
        }
    }

    /// Remove the entry, returning the value key it pointed at
    fn delete(&self, txn: &WriteTransaction, map_uid: &Uid, key: &Self::Key) -> Result<Option<ValueStoreKey>> {
        let mut key_bytes = self.pool().get(64);
        Self::encode_key(map_uid, key, &mut key_bytes);
        self.delete_raw(txn, &key_bytes)
    }

    fn delete_raw(&self, txn: &WriteTransaction, key_bytes: &[u8]) -> Result<Option<ValueStoreKey>> {
        let mut table = txn.open_table(Self::TABLE)?;
        let removed = table.remove(key_bytes)?;
        match removed {
            Some(value_key) => Ok(Some(ValueStoreKey::decode(value_key.value())?)),
            None => Ok(None),
        }
    }

    /// Up to `limit` entries of one map as raw key bytes and value key, in key order
    fn get_map_entries<T: ReadTxn>(
        &self,
        txn: &T,
        map_uid: &Uid,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, ValueStoreKey)>> {
        let table = txn.open(Self::TABLE)?;
        let mut entries = Vec::new();
        scan_prefix(&table, &map_uid.encode(), |key, value_key| {
            entries.push((key.to_vec(), ValueStoreKey::decode(value_key)?));
            Ok(entries.len() < limit)
        })?;
        Ok(entries)
    }

    /// Visit every entry of one map until `visit` returns false
    fn for_each_map_entry<T, F>(&self, txn: &T, map_uid: &Uid, mut visit: F) -> Result<()>
    where
        T: ReadTxn,
        F: FnMut(&[u8], ValueStoreKey) -> Result<bool>,
    {
        let table = txn.open(Self::TABLE)?;
        scan_prefix(&table, &map_uid.encode(), |key, value_key| {
            visit(key, ValueStoreKey::decode(value_key)?)
        })
    }

    fn contains_map<T: ReadTxn>(&self, txn: &T, map_uid: &Uid) -> Result<bool> {
        let mut found = false;
        self.for_each_map_entry(txn, map_uid, |_, _| {
            found = true;
            Ok(false)
        })?;
        Ok(found)
    }

    fn get_map_entry_count<T: ReadTxn>(&self, txn: &T, map_uid: &Uid) -> Result<u64> {
        let mut count = 0;
        self.for_each_map_entry(txn, map_uid, |_, _| {
            count += 1;
            Ok(true)
        })?;
        Ok(count)
    }

    fn get_entry_count<T: ReadTxn>(&self, txn: &T) -> Result<u64> {
        Ok(txn.open(Self::TABLE)?.len()?)
    }
}

/// Exact string key lookups
#[derive(Debug)]
pub struct KeyValueStoreDb {
    pool: Arc<ByteBufferPool>,
}

impl KeyValueStoreDb {
    pub fn new(pool: Arc<ByteBufferPool>) -> Self {
        KeyValueStoreDb { pool }
    }
}

impl EntryStoreDb for KeyValueStoreDb {
    type Key = str;

    const TABLE: BytesTable = KEY_VALUE_STORE;

    fn pool(&self) -> &ByteBufferPool {
        &self.pool
    }

    fn encode_key(map_uid: &Uid, key: &str, out: &mut Vec<u8>) {
        keys::encode_key_value_key_into(map_uid, key, out);
    }
}
