use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use redb::Database;
use tracing::{debug, info, trace, warn};
use crate::codec::keys::{self, ValueStoreKey};
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::{ProcessingInfoResponse, RefStoreEntry, StoreCounts};
use crate::core::types::{
    MapDefinition, ProcessingState, RefDataProcessingInfo, RefDataValue, RefStreamDefinition, TypedBytes,
};
use crate::memory::buffer_pool::ByteBufferPool;
use crate::storage::key_value_db::{EntryStoreDb, KeyValueStoreDb};
use crate::storage::layout::{StoreLayout, ALL_TABLES};
use crate::storage::map_uid_store::MapDefinitionUidStore;
use crate::storage::processing_info_db::ProcessingInfoDb;
use crate::storage::range_db::RangeStoreDb;
use crate::storage::txn::{with_read_txn, with_write_txn, ReadTxn, TaskTerminator};
use crate::storage::value_store::ValueStore;
use crate::store::loader::RefDataLoader;
use crate::store::proxy::RefDataValueProxy;

const LOCK_WAIT_LOG_THRESHOLD: Duration = Duration::from_secs(1);

/// One physical reference data store: a directory holding a single redb file with
/// the map UID, key/range, value and processing info tables.
#[derive(Debug)]
pub struct RefDataOffHeapStore {
    pub(crate) config: Config,
    pub(crate) layout: StoreLayout,
    pub(crate) db: Database,
    pub(crate) buffer_pool: Arc<ByteBufferPool>,
    pub(crate) map_uid_store: MapDefinitionUidStore,
    pub(crate) value_store: ValueStore,
    pub(crate) key_value_db: KeyValueStoreDb,
    pub(crate) range_db: RangeStoreDb,
    pub(crate) processing_info_db: ProcessingInfoDb,
    stream_locks: Mutex<HashMap<RefStreamDefinition, Arc<ReentrantMutex<()>>>>,
    pub(crate) terminator: TaskTerminator,
}

impl RefDataOffHeapStore {
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let layout = StoreLayout::new(config.storage_path.clone())?;
        let db = Database::create(&layout.db_path)?;

        // Create every table up front so read txns never find one missing
        with_write_txn(&db, |txn| {
            for table in ALL_TABLES {
                txn.open_table(table)?;
            }
            Ok(())
        })?;

        let buffer_pool = Arc::new(ByteBufferPool::new(config.buffer_pool_max_per_size));

        info!(path = %layout.db_path.display(), "Opened reference data store");

        Ok(RefDataOffHeapStore {
            map_uid_store: MapDefinitionUidStore::new(buffer_pool.clone()),
            value_store: ValueStore::new(buffer_pool.clone()),
            key_value_db: KeyValueStoreDb::new(buffer_pool.clone()),
            range_db: RangeStoreDb::new(buffer_pool.clone()),
            processing_info_db: ProcessingInfoDb::new(),
            stream_locks: Mutex::new(HashMap::new()),
            terminator: TaskTerminator::new(),
            buffer_pool,
            config,
            layout,
            db,
        })
    }

    pub fn name(&self) -> String {
        self.layout.dir_name()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn terminator(&self) -> &TaskTerminator {
        &self.terminator
    }

    pub fn buffer_pool(&self) -> &ByteBufferPool {
        &self.buffer_pool
    }

    pub fn size_on_disk(&self) -> Result<u64> {
        self.layout.size_on_disk()
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Run `work` with a loader for `ref_stream_definition` unless the stream is already
    /// loaded. Returns false, without calling `work`, if it was already COMPLETE.
    ///
    /// Loads of the same stream are serialised; a thread that waited for another's load
    /// finds the stream COMPLETE and skips. The loader keeps a write txn open between
    /// commits, so `work` must not itself start write operations on this store.
    pub fn do_with_loader_unless_complete<F>(
        &self,
        ref_stream_definition: &RefStreamDefinition,
        effective_time: DateTime<Utc>,
        work: F,
    ) -> Result<bool>
    where
        F: FnOnce(&mut RefDataLoader<'_>) -> Result<()>,
    {
        let lock = self.stream_lock(ref_stream_definition);
        let _guard = Self::acquire_stream_lock(&lock, ref_stream_definition);

        if let Some(info) = self.get_processing_info(ref_stream_definition)? {
            if info.processing_state == ProcessingState::Complete {
                debug!(stream = %ref_stream_definition, "Stream already loaded, skipping");
                self.touch(ref_stream_definition, &info)?;
                return Ok(false);
            }
        }

        let mut loader = RefDataLoader::new(self, ref_stream_definition.clone(), effective_time);
        let result = work(&mut loader);
        loader.close(result)?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// Value for `key` in the given map, or `None` if the map, key or value is absent.
    /// Key entries are tried first, then ranges with `key` parsed as a number.
    /// A hit counts as an access of the stream for purge purposes.
    pub fn get_value(&self, map_definition: &MapDefinition, key: &str) -> Result<Option<RefDataValue>> {
        let (value, info) = with_read_txn(&self.db, |txn| {
            match self.locate_value(txn, map_definition, key)? {
                Some(value_key) => match self.value_store.get(txn, &value_key)? {
                    Some(value) => Ok((Some(value), self.lookup_info(txn, map_definition)?)),
                    None => Ok((None, None)),
                },
                None => Ok((None, None)),
            }
        })?;
        self.touch_after_lookup(map_definition, info)?;
        Ok(value)
    }

    /// Resolve the value location now and defer reading its bytes.
    /// The bytes are read later under a fresh txn and may be gone if a purge ran in between.
    pub fn get_value_proxy(self: &Arc<Self>, map_definition: &MapDefinition, key: &str) -> Result<RefDataValueProxy> {
        let (location, info) = with_read_txn(&self.db, |txn| {
            match self.locate_value(txn, map_definition, key)? {
                Some(value_key) => Ok((Some(value_key), self.lookup_info(txn, map_definition)?)),
                None => Ok((None, None)),
            }
        })?;
        self.touch_after_lookup(map_definition, info)?;
        Ok(RefDataValueProxy::new(Some(self.clone()), map_definition.clone(), key, location))
    }

    /// Pass the stored bytes for `key` to `consumer` inside the read txn, without copying them
    pub fn consume_value_bytes<R, F>(&self, map_definition: &MapDefinition, key: &str, consumer: F) -> Result<Option<R>>
    where
        F: FnOnce(TypedBytes<'_>) -> R,
    {
        let (consumed, info) = with_read_txn(&self.db, |txn| {
            match self.locate_value(txn, map_definition, key)? {
                Some(value_key) => match self.value_store.consume_typed_bytes(txn, &value_key, consumer)? {
                    Some(consumed) => Ok((Some(consumed), self.lookup_info(txn, map_definition)?)),
                    None => Ok((None, None)),
                },
                None => Ok((None, None)),
            }
        })?;
        self.touch_after_lookup(map_definition, info)?;
        Ok(consumed)
    }

    pub(crate) fn get_value_by_key(&self, value_key: &ValueStoreKey) -> Result<Option<RefDataValue>> {
        with_read_txn(&self.db, |txn| self.value_store.get(txn, value_key))
    }

    pub(crate) fn consume_bytes_by_key<R, F>(&self, value_key: &ValueStoreKey, consumer: F) -> Result<Option<R>>
    where
        F: FnOnce(TypedBytes<'_>) -> R,
    {
        with_read_txn(&self.db, |txn| self.value_store.consume_typed_bytes(txn, value_key, consumer))
    }

    fn locate_value<T: ReadTxn>(
        &self,
        txn: &T,
        map_definition: &MapDefinition,
        key: &str,
    ) -> Result<Option<ValueStoreKey>> {
        let map_uid = match self.map_uid_store.get_uid(txn, map_definition)? {
            Some(uid) => uid,
            None => {
                trace!(map = %map_definition, "Unknown map");
                return Ok(None);
            }
        };

        if let Some(value_key) = self.key_value_db.get(txn, &map_uid, key)? {
            return Ok(Some(value_key));
        }

        match key.trim().parse::<u64>() {
            Ok(value) => Ok(self
                .range_db
                .get_containing(txn, &map_uid, value)?
                .map(|(_, value_key)| value_key)),
            // Only worth reporting if the map actually holds ranges
            Err(_) if self.range_db.contains_map(txn, &map_uid)? => Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("Key '{}' must be numeric to look up range map {}", key, map_definition),
            )),
            Err(_) => {
                trace!(map = %map_definition, key, "Key not found");
                Ok(None)
            }
        }
    }

    fn lookup_info<T: ReadTxn>(&self, txn: &T, map_definition: &MapDefinition) -> Result<Option<RefDataProcessingInfo>> {
        self.processing_info_db.get(txn, &map_definition.ref_stream_definition)
    }

    fn touch_after_lookup(&self, map_definition: &MapDefinition, info: Option<RefDataProcessingInfo>) -> Result<()> {
        match info {
            Some(info) => self.touch(&map_definition.ref_stream_definition, &info),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Processing info
    // ------------------------------------------------------------------

    /// Load state of a stream. Counts as an access for purge purposes.
    pub fn get_load_state(&self, ref_stream_definition: &RefStreamDefinition) -> Result<Option<ProcessingState>> {
        match self.get_processing_info(ref_stream_definition)? {
            Some(info) => {
                self.touch(ref_stream_definition, &info)?;
                Ok(Some(info.processing_state))
            }
            None => Ok(None),
        }
    }

    pub fn get_processing_info(
        &self,
        ref_stream_definition: &RefStreamDefinition,
    ) -> Result<Option<RefDataProcessingInfo>> {
        with_read_txn(&self.db, |txn| self.processing_info_db.get(txn, ref_stream_definition))
    }

    pub fn set_last_accessed_time(
        &self,
        ref_stream_definition: &RefStreamDefinition,
        last_accessed_time: DateTime<Utc>,
    ) -> Result<()> {
        with_write_txn(&self.db, |txn| {
            self.processing_info_db
                .update_last_accessed_time(txn, ref_stream_definition, last_accessed_time)
        })
    }

    pub fn set_processing_state(
        &self,
        ref_stream_definition: &RefStreamDefinition,
        processing_state: ProcessingState,
    ) -> Result<()> {
        with_write_txn(&self.db, |txn| {
            self.processing_info_db
                .update_processing_state(txn, ref_stream_definition, processing_state)
                .map(|_| ())
        })
    }

    /// Move the last accessed time forward, skipped when the truncated time has not changed.
    /// `info` is only used to decide whether a write is needed; the row is re-read in the
    /// write txn so a stream purged in the meantime is left deleted.
    fn touch(&self, ref_stream_definition: &RefStreamDefinition, info: &RefDataProcessingInfo) -> Result<()> {
        let now = Utc::now();
        let granularity = self.config.access_time_granularity;
        if info.touched(now, granularity).is_none() {
            return Ok(());
        }
        with_write_txn(&self.db, |txn| {
            let current = self.processing_info_db.get(txn, ref_stream_definition)?;
            if let Some(touched) = current.and_then(|info| info.touched(now, granularity)) {
                trace!(stream = %ref_stream_definition, time = %touched.last_accessed_time, "Updating last accessed time");
                self.processing_info_db.put(txn, ref_stream_definition, &touched)?;
            }
            Ok(())
        })
    }

    pub fn exists(&self, map_definition: &MapDefinition) -> Result<bool> {
        with_read_txn(&self.db, |txn| Ok(self.map_uid_store.get_uid(txn, map_definition)?.is_some()))
    }

    pub fn exists_stream(&self, ref_stream_definition: &RefStreamDefinition) -> Result<bool> {
        Ok(self.get_processing_info(ref_stream_definition)?.is_some())
    }

    pub fn get_map_names(&self, ref_stream_definition: &RefStreamDefinition) -> Result<Vec<String>> {
        with_read_txn(&self.db, |txn| self.map_uid_store.get_map_names(txn, ref_stream_definition))
    }

    /// Stream definitions matching `predicate`, with their processing info
    pub fn find_stream_definitions<P>(&self, predicate: P) -> Result<Vec<(RefStreamDefinition, RefDataProcessingInfo)>>
    where
        P: FnMut(&RefStreamDefinition, &RefDataProcessingInfo) -> bool,
    {
        with_read_txn(&self.db, |txn| self.processing_info_db.find(txn, predicate))
    }

    /// Processing info for up to `limit` streams with per map entry counts
    pub fn list_processing_info(&self, limit: usize) -> Result<Vec<ProcessingInfoResponse>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        with_read_txn(&self.db, |txn| {
            let mut responses = Vec::new();
            self.processing_info_db.for_each(txn, |ref_stream_definition, processing_info| {
                let mut map_entry_counts = BTreeMap::new();
                for (map_definition, uid) in self.map_uid_store.get_maps_for_stream(txn, &ref_stream_definition)? {
                    let count = self.key_value_db.get_map_entry_count(txn, &uid)?
                        + self.range_db.get_map_entry_count(txn, &uid)?;
                    map_entry_counts.insert(map_definition.map_name, count);
                }
                responses.push(ProcessingInfoResponse {
                    ref_stream_definition,
                    processing_info,
                    map_entry_counts,
                });
                Ok(responses.len() < limit)
            })?;
            Ok(responses)
        })
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Stream every key and range entry passing the filters to `consumer`, at most `limit`
    /// of them. Returns the number consumed.
    pub fn consume_entries<M, K, C>(
        &self,
        map_filter: M,
        key_filter: K,
        limit: Option<usize>,
        mut consumer: C,
    ) -> Result<usize>
    where
        M: Fn(&MapDefinition) -> bool,
        K: Fn(&str) -> bool,
        C: FnMut(RefStoreEntry) -> Result<()>,
    {
        let limit = limit.unwrap_or(usize::MAX);
        if limit == 0 {
            return Ok(0);
        }

        with_read_txn(&self.db, |txn| {
            let mut consumed = 0usize;
            let streams = self.processing_info_db.find(txn, |_, _| true)?;

            'streams: for (ref_stream_definition, processing_info) in streams {
                for (map_definition, uid) in self.map_uid_store.get_maps_for_stream(txn, &ref_stream_definition)? {
                    if !map_filter(&map_definition) {
                        continue;
                    }

                    let mut entries: Vec<(String, ValueStoreKey)> = Vec::new();
                    self.key_value_db.for_each_map_entry(txn, &uid, |key_bytes, value_key| {
                        let (_, key) = keys::decode_key_value_key(key_bytes)?;
                        if key_filter(&key) {
                            entries.push((key, value_key));
                        }
                        Ok(consumed + entries.len() < limit)
                    })?;
                    if consumed + entries.len() < limit {
                        self.range_db.for_each_map_entry(txn, &uid, |key_bytes, value_key| {
                            let (_, range) = keys::decode_range_key(key_bytes)?;
                            let key = range.to_string();
                            if key_filter(&key) {
                                entries.push((key, value_key));
                            }
                            Ok(consumed + entries.len() < limit)
                        })?;
                    }

                    for (key, value_key) in entries {
                        let value = self.value_store.get(txn, &value_key)?.unwrap_or(RefDataValue::Null);
                        let value_reference_count = self.value_store.get_reference_count(txn, &value_key)?.unwrap_or(0);
                        consumer(RefStoreEntry {
                            feed_name: None,
                            map_definition: map_definition.clone(),
                            key,
                            value,
                            value_reference_count,
                            processing_info: Some(processing_info.clone()),
                        })?;
                        consumed += 1;
                        if consumed >= limit {
                            break 'streams;
                        }
                    }
                }
            }
            Ok(consumed)
        })
    }

    // ------------------------------------------------------------------
    // Counts
    // ------------------------------------------------------------------

    pub fn get_key_value_entry_count(&self) -> Result<u64> {
        with_read_txn(&self.db, |txn| self.key_value_db.get_entry_count(txn))
    }

    pub fn get_range_value_entry_count(&self) -> Result<u64> {
        with_read_txn(&self.db, |txn| self.range_db.get_entry_count(txn))
    }

    pub fn get_processing_info_entry_count(&self) -> Result<u64> {
        with_read_txn(&self.db, |txn| self.processing_info_db.get_entry_count(txn))
    }

    pub fn get_value_entry_count(&self) -> Result<u64> {
        with_read_txn(&self.db, |txn| self.value_store.get_entry_count(txn))
    }

    pub fn get_counts(&self) -> Result<StoreCounts> {
        with_read_txn(&self.db, |txn| {
            Ok(StoreCounts {
                key_value_entries: self.key_value_db.get_entry_count(txn)?,
                range_value_entries: self.range_db.get_entry_count(txn)?,
                value_entries: self.value_store.get_entry_count(txn)?,
                value_meta_entries: self.value_store.get_meta_entry_count(txn)?,
                map_uid_entries: self.map_uid_store.get_entry_count(txn)?,
                processing_info_entries: self.processing_info_db.get_entry_count(txn)?,
            })
        })
    }

    /// Reference count of the value stored for `key`, if any
    pub fn get_value_reference_count(&self, map_definition: &MapDefinition, key: &str) -> Result<Option<u32>> {
        with_read_txn(&self.db, |txn| match self.locate_value(txn, map_definition, key)? {
            Some(value_key) => self.value_store.get_reference_count(txn, &value_key),
            None => Ok(None),
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.get_processing_info_entry_count()? == 0)
    }

    // ------------------------------------------------------------------
    // Per stream locking
    // ------------------------------------------------------------------

    /// Lock shared by loads and purges of one stream. Created on first use, never removed.
    pub(crate) fn stream_lock(&self, ref_stream_definition: &RefStreamDefinition) -> Arc<ReentrantMutex<()>> {
        self.stream_locks
            .lock()
            .entry(ref_stream_definition.clone())
            .or_insert_with(|| Arc::new(ReentrantMutex::new(())))
            .clone()
    }

    pub(crate) fn acquire_stream_lock<'l>(
        lock: &'l ReentrantMutex<()>,
        ref_stream_definition: &RefStreamDefinition,
    ) -> ReentrantMutexGuard<'l, ()> {
        if let Some(guard) = lock.try_lock_for(LOCK_WAIT_LOG_THRESHOLD) {
            return guard;
        }
        info!(stream = %ref_stream_definition, "Waiting for lock on stream held by another thread");
        let start = Instant::now();
        let guard = lock.lock();
        let waited = start.elapsed();
        if waited > LOCK_WAIT_LOG_THRESHOLD {
            info!(stream = %ref_stream_definition, waited_ms = waited.as_millis() as u64, "Acquired lock on stream");
        } else {
            debug!(stream = %ref_stream_definition, "Acquired lock on stream");
        }
        guard
    }

    pub fn stream_lock_count(&self) -> usize {
        self.stream_locks.lock().len()
    }

    pub(crate) fn warn_if_terminated(&self, task: &str) -> Result<()> {
        self.terminator.check(task).inspect_err(|e| warn!("{}", e))
    }
}
