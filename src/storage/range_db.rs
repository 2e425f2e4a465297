use std::sync::Arc;
use redb::ReadableTable;
use tracing::trace;
use crate::codec::keys::{self, ValueStoreKey};
use crate::codec::uid::Uid;
use crate::core::error::Result;
use crate::core::types::KeyRange;
use crate::memory::buffer_pool::ByteBufferPool;
use crate::storage::key_value_db::EntryStoreDb;
use crate::storage::layout::{BytesTable, RANGE_STORE};
use crate::storage::txn::ReadTxn;

/// Numeric range lookups. Keys sort by map UID then range start, so the entry
/// covering a value is found with one backwards step from the value.
#[derive(Debug)]
pub struct RangeStoreDb {
    pool: Arc<ByteBufferPool>,
}

impl RangeStoreDb {
    pub fn new(pool: Arc<ByteBufferPool>) -> Self {
        RangeStoreDb { pool }
    }

    /// Value key of the range in `map_uid` containing `value`.
    /// Takes the nearest range starting at or below `value` and checks its end.
    pub fn get_containing<T: ReadTxn>(
        &self,
        txn: &T,
        map_uid: &Uid,
        value: u64,
    ) -> Result<Option<(KeyRange, ValueStoreKey)>> {
        let mut lower = self.pool.get(32);
        map_uid.encode_into(&mut lower);

        // Highest possible key for a range starting at `value`
        let mut upper = self.pool.get(32);
        upper.extend_from_slice(&lower);
        upper.extend_from_slice(&value.to_be_bytes());
        upper.extend_from_slice(&u64::MAX.to_be_bytes());

        let table = txn.open(RANGE_STORE)?;
        let mut range_iter = table.range(lower.as_slice()..=upper.as_slice())?;
        let nearest = match range_iter.next_back() {
            Some(item) => item?,
            None => return Ok(None),
        };

        let (_, range) = keys::decode_range_key(nearest.0.value())?;
        if range.contains(value) {
            let value_key = ValueStoreKey::decode(nearest.1.value())?;
            Ok(Some((range, value_key)))
        } else {
            trace!(%range, value, "Nearest range does not contain value");
            Ok(None)
        }
    }
}

impl EntryStoreDb for RangeStoreDb {
    type Key = KeyRange;

    const TABLE: BytesTable = RANGE_STORE;

    fn pool(&self) -> &ByteBufferPool {
        &self.pool
    }

    fn encode_key(map_uid: &Uid, key: &KeyRange, out: &mut Vec<u8>) {
        keys::encode_range_key_into(map_uid, key, out);
    }
}
