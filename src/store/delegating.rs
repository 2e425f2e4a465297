use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use tracing::{debug, error, info};
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::{ProcessingInfoResponse, PurgeCounts, RefStoreEntry, StoreCounts};
use crate::core::types::{MapDefinition, ProcessingState, RefDataValue, RefStreamDefinition, TypedBytes};
use crate::storage::layout::StoreLayout;
use crate::store::loader::RefDataLoader;
use crate::store::migration::{self, MigrationOutcome};
use crate::store::offheap_store::RefDataOffHeapStore;
use crate::store::proxy::RefDataValueProxy;

const LEGACY_STORE_DIR: &str = "legacy";

/// Resolves the feed a reference stream belongs to
pub trait FeedLookup: Send + Sync {
    fn feed_name(&self, stream_id: u64) -> Option<String>;
}

impl<F> FeedLookup for F
where
    F: Fn(u64) -> Option<String> + Send + Sync,
{
    fn feed_name(&self, stream_id: u64) -> Option<String> {
        self(stream_id)
    }
}

/// One logical reference data store split into a physical store per feed, plus the legacy
/// store data is migrated out of on first use of each stream.
pub struct DelegatingRefDataStore {
    config: Config,
    base_dir: PathBuf,
    feed_lookup: Arc<dyn FeedLookup>,
    legacy: Option<Arc<RefDataOffHeapStore>>,
    feed_stores: RwLock<HashMap<String, Arc<RefDataOffHeapStore>>>,
    invalid_chars: Regex,
    migrations: Mutex<HashMap<u64, Arc<OnceLock<MigrationOutcome>>>>,
}

impl DelegatingRefDataStore {
    /// Open the stores under `config.storage_path`. The legacy store is only opened if it
    /// already exists, existing feed stores are picked up from their directories.
    pub fn open(config: Config, feed_lookup: Arc<dyn FeedLookup>) -> Result<Self> {
        config.validate()?;
        let base_dir = config.storage_path.clone();
        fs::create_dir_all(&base_dir)?;

        let invalid_chars = Regex::new("[^A-Z0-9_-]")
            .map_err(|e| Error::new(ErrorKind::InvalidArgument, format!("Bad store name pattern: {}", e)))?;

        let legacy_dir = base_dir.join(LEGACY_STORE_DIR);
        let legacy = if StoreLayout::is_store_dir(&legacy_dir) {
            info!(path = %legacy_dir.display(), "Found legacy reference data store");
            Some(Arc::new(RefDataOffHeapStore::open(Self::store_config(&config, legacy_dir))?))
        } else {
            None
        };

        let mut feed_stores = HashMap::new();
        for entry in fs::read_dir(&base_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if name == LEGACY_STORE_DIR || !path.is_dir() || !StoreLayout::is_store_dir(&path) {
                continue;
            }
            debug!(feed_store = %name, "Opening existing feed store");
            let store = RefDataOffHeapStore::open(Self::store_config(&config, path))?;
            feed_stores.insert(name, Arc::new(store));
        }
        info!(
            path = %base_dir.display(),
            feed_stores = feed_stores.len(),
            has_legacy = legacy.is_some(),
            "Opened delegating reference data store"
        );

        Ok(DelegatingRefDataStore {
            config,
            base_dir,
            feed_lookup,
            legacy,
            feed_stores: RwLock::new(feed_stores),
            invalid_chars,
            migrations: Mutex::new(HashMap::new()),
        })
    }

    fn store_config(config: &Config, path: PathBuf) -> Config {
        Config {
            storage_path: path,
            ..config.clone()
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory name of a feed's store
    pub fn feed_store_name(&self, feed_name: &str) -> String {
        self.invalid_chars
            .replace_all(&feed_name.to_uppercase(), "_")
            .into_owned()
    }

    pub fn legacy_store(&self) -> Option<&Arc<RefDataOffHeapStore>> {
        self.legacy.as_ref()
    }

    pub fn feed_store(&self, feed_name: &str) -> Option<Arc<RefDataOffHeapStore>> {
        self.feed_stores.read().get(&self.feed_store_name(feed_name)).cloned()
    }

    pub fn feed_store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.feed_stores.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn get_or_create_feed_store(&self, feed_name: &str) -> Result<Arc<RefDataOffHeapStore>> {
        let store_name = self.feed_store_name(feed_name);
        if let Some(store) = self.feed_stores.read().get(&store_name) {
            return Ok(store.clone());
        }

        let mut feed_stores = self.feed_stores.write();
        if let Some(store) = feed_stores.get(&store_name) {
            return Ok(store.clone());
        }
        info!(feed = feed_name, store = %store_name, "Creating feed store");
        let config = Self::store_config(&self.config, self.base_dir.join(&store_name));
        let store = Arc::new(RefDataOffHeapStore::open(config)?);
        feed_stores.insert(store_name, store.clone());
        Ok(store)
    }

    fn feed_name_for(&self, ref_stream_definition: &RefStreamDefinition) -> Result<String> {
        self.feed_lookup.feed_name(ref_stream_definition.stream_id).ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("No feed found for stream {}", ref_stream_definition.stream_id),
            )
        })
    }

    /// Store owning `ref_stream_definition`, migrating the stream out of the legacy store
    /// first if that has not yet happened
    pub fn get_effective_store(&self, ref_stream_definition: &RefStreamDefinition) -> Result<Arc<RefDataOffHeapStore>> {
        let feed_name = self.feed_name_for(ref_stream_definition)?;
        let store = self.get_or_create_feed_store(&feed_name)?;
        self.migrate_once(ref_stream_definition.stream_id, &store);
        Ok(store)
    }

    /// Make sure any legacy data for `stream_id` has been moved to its feed store.
    /// Each stream id is migrated at most once per process, a failure is not retried.
    pub fn ensure_migrated(&self, stream_id: u64) -> Result<MigrationOutcome> {
        let feed_name = self.feed_lookup.feed_name(stream_id).ok_or_else(|| {
            Error::new(ErrorKind::NotFound, format!("No feed found for stream {}", stream_id))
        })?;
        let store = self.get_or_create_feed_store(&feed_name)?;
        Ok(self.migrate_once(stream_id, &store))
    }

    fn migrate_once(&self, stream_id: u64, dest: &RefDataOffHeapStore) -> MigrationOutcome {
        let Some(legacy) = &self.legacy else {
            return MigrationOutcome::NoLegacyStore;
        };

        // Only migrations of the same stream id wait on each other
        let cell = self.migrations.lock().entry(stream_id).or_default().clone();
        cell.get_or_init(|| match migration::migrate_stream(legacy, dest, stream_id) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(stream_id, error = %e, "Migration from legacy store failed, lookups will use the legacy store");
                MigrationOutcome::Failed(e.to_string())
            }
        })
        .clone()
    }

    /// Store to read `ref_stream_definition` from. Streams with no known feed, or whose
    /// migration failed, are read from the legacy store.
    fn get_read_store(&self, ref_stream_definition: &RefStreamDefinition) -> Result<Option<Arc<RefDataOffHeapStore>>> {
        match self.feed_lookup.feed_name(ref_stream_definition.stream_id) {
            Some(feed_name) => {
                let store = self.get_or_create_feed_store(&feed_name)?;
                if self.migrate_once(ref_stream_definition.stream_id, &store).is_failed() {
                    Ok(self.legacy.clone())
                } else {
                    Ok(Some(store))
                }
            }
            None => Ok(self.legacy.clone()),
        }
    }

    // ------------------------------------------------------------------
    // Loading and lookups
    // ------------------------------------------------------------------

    pub fn do_with_loader_unless_complete<F>(
        &self,
        ref_stream_definition: &RefStreamDefinition,
        effective_time: DateTime<Utc>,
        work: F,
    ) -> Result<bool>
    where
        F: FnOnce(&mut RefDataLoader<'_>) -> Result<()>,
    {
        let store = self.get_effective_store(ref_stream_definition)?;
        store.do_with_loader_unless_complete(ref_stream_definition, effective_time, work)
    }

    pub fn get_value(&self, map_definition: &MapDefinition, key: &str) -> Result<Option<RefDataValue>> {
        match self.get_read_store(&map_definition.ref_stream_definition)? {
            Some(store) => store.get_value(map_definition, key),
            None => Ok(None),
        }
    }

    pub fn get_value_proxy(&self, map_definition: &MapDefinition, key: &str) -> Result<RefDataValueProxy> {
        match self.get_read_store(&map_definition.ref_stream_definition)? {
            Some(store) => store.get_value_proxy(map_definition, key),
            None => Ok(RefDataValueProxy::empty(map_definition.clone(), key)),
        }
    }

    pub fn consume_value_bytes<R, F>(&self, map_definition: &MapDefinition, key: &str, consumer: F) -> Result<Option<R>>
    where
        F: FnOnce(TypedBytes<'_>) -> R,
    {
        match self.get_read_store(&map_definition.ref_stream_definition)? {
            Some(store) => store.consume_value_bytes(map_definition, key, consumer),
            None => Ok(None),
        }
    }

    pub fn get_load_state(&self, ref_stream_definition: &RefStreamDefinition) -> Result<Option<ProcessingState>> {
        match self.get_read_store(ref_stream_definition)? {
            Some(store) => store.get_load_state(ref_stream_definition),
            None => Ok(None),
        }
    }

    pub fn exists(&self, map_definition: &MapDefinition) -> Result<bool> {
        match self.get_read_store(&map_definition.ref_stream_definition)? {
            Some(store) => store.exists(map_definition),
            None => Ok(false),
        }
    }

    // ------------------------------------------------------------------
    // Purging, runs over every store in turn
    // ------------------------------------------------------------------

    pub fn purge_old_data(&self) -> Result<PurgeCounts> {
        self.purge_old_data_with(Utc::now(), self.config.purge_age)
    }

    pub fn purge_old_data_with(&self, now: DateTime<Utc>, purge_age: Duration) -> Result<PurgeCounts> {
        self.for_each_store_purge(|store| store.purge_old_data_with(now, purge_age))
    }

    pub fn purge(&self, stream_id: u64, part_index: Option<u64>) -> Result<PurgeCounts> {
        self.for_each_store_purge(|store| store.purge(stream_id, part_index))
    }

    fn for_each_store_purge<F>(&self, purge: F) -> Result<PurgeCounts>
    where
        F: Fn(&RefDataOffHeapStore) -> Result<PurgeCounts>,
    {
        let mut totals = PurgeCounts::default();
        for store in self.all_stores() {
            totals += purge(&store)?;
        }
        Ok(totals)
    }

    /// Ask every store's running loads and purges to stop
    pub fn terminate(&self) {
        for store in self.all_stores() {
            store.terminator().terminate();
        }
    }

    /// Legacy store first, then feed stores by name
    fn all_stores(&self) -> Vec<Arc<RefDataOffHeapStore>> {
        let feed_stores = self.feed_stores.read();
        let mut names: Vec<&String> = feed_stores.keys().collect();
        names.sort();
        self.legacy
            .iter()
            .cloned()
            .chain(names.into_iter().filter_map(|name| feed_stores.get(name).cloned()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Counts and introspection, summed over every store
    // ------------------------------------------------------------------

    pub fn get_key_value_entry_count(&self) -> Result<u64> {
        self.sum_over_stores(|store| store.get_key_value_entry_count())
    }

    pub fn get_range_value_entry_count(&self) -> Result<u64> {
        self.sum_over_stores(|store| store.get_range_value_entry_count())
    }

    pub fn get_processing_info_entry_count(&self) -> Result<u64> {
        self.sum_over_stores(|store| store.get_processing_info_entry_count())
    }

    pub fn get_value_entry_count(&self) -> Result<u64> {
        self.sum_over_stores(|store| store.get_value_entry_count())
    }

    pub fn get_counts(&self) -> Result<StoreCounts> {
        let mut totals = StoreCounts::default();
        for store in self.all_stores() {
            totals += store.get_counts()?;
        }
        Ok(totals)
    }

    fn sum_over_stores<F>(&self, count: F) -> Result<u64>
    where
        F: Fn(&RefDataOffHeapStore) -> Result<u64>,
    {
        let mut total = 0;
        for store in self.all_stores() {
            total += count(&store)?;
        }
        Ok(total)
    }

    /// Entries from every store, each tagged with the feed it belongs to
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
        let mut consumed = 0;

        if let Some(legacy) = &self.legacy {
            consumed += legacy.consume_entries(&map_filter, &key_filter, Some(limit), |mut entry| {
                entry.feed_name = self
                    .feed_lookup
                    .feed_name(entry.map_definition.ref_stream_definition.stream_id)
                    .map(|feed| format!("{} (Legacy)", feed));
                consumer(entry)
            })?;
        }

        let feed_stores: Vec<(String, Arc<RefDataOffHeapStore>)> = {
            let guard = self.feed_stores.read();
            let mut stores: Vec<_> = guard.iter().map(|(n, s)| (n.clone(), s.clone())).collect();
            stores.sort_by(|a, b| a.0.cmp(&b.0));
            stores
        };
        for (store_name, store) in feed_stores {
            if consumed >= limit {
                break;
            }
            consumed += store.consume_entries(&map_filter, &key_filter, Some(limit - consumed), |mut entry| {
                entry.feed_name = Some(store_name.clone());
                consumer(entry)
            })?;
        }
        Ok(consumed)
    }

    /// Processing info from every store, at most `limit` in total
    pub fn list_processing_info(&self, limit: usize) -> Result<Vec<ProcessingInfoResponse>> {
        let mut responses = Vec::new();
        for store in self.all_stores() {
            if responses.len() >= limit {
                break;
            }
            responses.extend(store.list_processing_info(limit - responses.len())?);
        }
        Ok(responses)
    }
}
