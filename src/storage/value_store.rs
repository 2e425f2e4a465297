use std::sync::Arc;
use redb::{ReadableTable, ReadableTableMetadata, WriteTransaction};
use tracing::trace;
use crate::codec::keys::ValueStoreKey;
use crate::codec::value::{content_hash, decode_typed, ValueStoreMeta};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{RefDataValue, TypedBytes};
use crate::memory::buffer_pool::ByteBufferPool;
use crate::storage::layout::{VALUE_STORE, VALUE_STORE_META};
use crate::storage::txn::ReadTxn;

/// Content addressed, reference counted value storage.
///
/// Values are keyed by the hash of their envelope plus a sequence number that separates
/// colliding hashes. Equal envelopes always share one row; the meta table counts how many
/// key/range entries point at it and the row goes when the count reaches zero.
#[derive(Debug)]
pub struct ValueStore {
    pool: Arc<ByteBufferPool>,
}

impl ValueStore {
    pub fn new(pool: Arc<ByteBufferPool>) -> Self {
        ValueStore { pool }
    }

    /// Key of the stored copy of `value`, creating it with a reference count of one if there
    /// is none. An existing copy gains a reference unless `is_value_reused` is set.
    pub fn get_or_create_key(
        &self,
        txn: &WriteTransaction,
        value: &RefDataValue,
        is_value_reused: bool,
    ) -> Result<ValueStoreKey> {
        if value.is_null() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "Null values are never stored".to_string(),
            ));
        }

        let mut envelope = self.pool.get(value.payload().len() + 1);
        envelope.push(value.value_type().id());
        envelope.extend_from_slice(value.payload());
        let content_hash = content_hash(&envelope);

        let (existing, last_key) = Self::find_in_bucket(txn, content_hash, &envelope)?;

        if let Some(key) = existing {
            if !is_value_reused {
                self.add_reference(txn, &key)?;
            }
            trace!(?key, "Reusing stored value");
            return Ok(key);
        }

        let key = match last_key {
            Some(last) => last.next_unique_id()?,
            None => ValueStoreKey::new(content_hash, 0),
        };
        let key_bytes = key.encode();
        txn.open_table(VALUE_STORE)?
            .insert(key_bytes.as_slice(), envelope.as_slice())?;
        txn.open_table(VALUE_STORE_META)?
            .insert(key_bytes.as_slice(), ValueStoreMeta::new(value.value_type()).encode().as_slice())?;

        trace!(?key, "Stored new value");
        Ok(key)
    }

    pub fn get<T: ReadTxn>(&self, txn: &T, key: &ValueStoreKey) -> Result<Option<RefDataValue>> {
        self.consume_typed_bytes(txn, key, |typed| typed.to_value())?
            .transpose()
    }

    /// Hand the stored bytes to `consumer` without copying them out of the txn
    pub fn consume_typed_bytes<T, R, F>(&self, txn: &T, key: &ValueStoreKey, consumer: F) -> Result<Option<R>>
    where
        T: ReadTxn,
        F: FnOnce(TypedBytes<'_>) -> R,
    {
        let table = txn.open(VALUE_STORE)?;
        let found = table.get(key.encode().as_slice())?;
        match found {
            Some(envelope) => {
                let typed = decode_typed(envelope.value())?;
                Ok(Some(consumer(typed)))
            }
            None => Ok(None),
        }
    }

    /// Drop one reference, deleting the value and its meta once nothing references it.
    /// Returns true if the value was deleted.
    pub fn de_reference_or_delete_value(&self, txn: &WriteTransaction, key: &ValueStoreKey) -> Result<bool> {
        let key_bytes = key.encode();
        let meta = self.get_meta(txn, key)?.ok_or_else(|| {
            Error::invalid_state(format!("No meta entry for value key {:?}", key))
        })?;

        if meta.reference_count <= 1 {
            txn.open_table(VALUE_STORE)?.remove(key_bytes.as_slice())?;
            txn.open_table(VALUE_STORE_META)?.remove(key_bytes.as_slice())?;
            trace!(?key, "Deleted value");
            Ok(true)
        } else {
            let updated = meta.decremented()?;
            txn.open_table(VALUE_STORE_META)?
                .insert(key_bytes.as_slice(), updated.encode().as_slice())?;
            trace!(?key, reference_count = updated.reference_count, "Dereferenced value");
            Ok(false)
        }
    }

    pub fn add_reference(&self, txn: &WriteTransaction, key: &ValueStoreKey) -> Result<()> {
        let meta = self.get_meta(txn, key)?.ok_or_else(|| {
            Error::invalid_state(format!("No meta entry for value key {:?}", key))
        })?;
        let updated = meta.incremented()?;
        txn.open_table(VALUE_STORE_META)?
            .insert(key.encode().as_slice(), updated.encode().as_slice())?;
        Ok(())
    }

    pub fn get_reference_count<T: ReadTxn>(&self, txn: &T, key: &ValueStoreKey) -> Result<Option<u32>> {
        Ok(self.get_meta(txn, key)?.map(|meta| meta.reference_count))
    }

    /// True if the value stored under `key` is byte-identical to `value`
    pub fn are_values_equal<T: ReadTxn>(&self, txn: &T, key: &ValueStoreKey, value: &RefDataValue) -> Result<bool> {
        let equal = self.consume_typed_bytes(txn, key, |typed| {
            typed.value_type == value.value_type() && typed.bytes == value.payload()
        })?;
        Ok(equal.unwrap_or(false))
    }

    pub fn get_entry_count<T: ReadTxn>(&self, txn: &T) -> Result<u64> {
        Ok(txn.open(VALUE_STORE)?.len()?)
    }

    pub fn get_meta_entry_count<T: ReadTxn>(&self, txn: &T) -> Result<u64> {
        Ok(txn.open(VALUE_STORE_META)?.len()?)
    }

    fn get_meta<T: ReadTxn>(&self, txn: &T, key: &ValueStoreKey) -> Result<Option<ValueStoreMeta>> {
        let table = txn.open(VALUE_STORE_META)?;
        let found = table.get(key.encode().as_slice())?;
        match found {
            Some(meta) => Ok(Some(ValueStoreMeta::decode(meta.value())?)),
            None => Ok(None),
        }
    }

    /// Walk the bucket for `content_hash` looking for `envelope`.
    /// Returns the matching key, if any, and the last key seen in the bucket.
    fn find_in_bucket(
        txn: &WriteTransaction,
        content_hash: u32,
        envelope: &[u8],
    ) -> Result<(Option<ValueStoreKey>, Option<ValueStoreKey>)> {
        let (first, last) = ValueStoreKey::hash_bounds(content_hash);
        let table = txn.open_table(VALUE_STORE)?;
        let mut last_key = None;
        for item in table.range(first.as_slice()..=last.as_slice())? {
            let (key, stored) = item?;
            let key = ValueStoreKey::decode(key.value())?;
            if stored.value() == envelope {
                return Ok((Some(key), Some(key)));
            }
            last_key = Some(key);
        }
        Ok((None, last_key))
    }
}
