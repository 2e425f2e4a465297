use std::fmt;
use std::sync::Arc;
use crate::codec::keys::ValueStoreKey;
use crate::core::error::Result;
use crate::core::types::{MapDefinition, RefDataValue, TypedBytes};
use crate::store::offheap_store::RefDataOffHeapStore;

/// A lookup resolved to a value location whose bytes are read later, under a new read txn.
///
/// If a purge ran between the two steps the value may have gone, which reads as `None`
/// rather than an error.
pub struct RefDataValueProxy {
    store: Option<Arc<RefDataOffHeapStore>>,
    map_definition: MapDefinition,
    key: String,
    location: Option<ValueStoreKey>,
}

impl RefDataValueProxy {
    pub(crate) fn new(
        store: Option<Arc<RefDataOffHeapStore>>,
        map_definition: MapDefinition,
        key: &str,
        location: Option<ValueStoreKey>,
    ) -> Self {
        RefDataValueProxy {
            store,
            map_definition,
            key: key.to_string(),
            location,
        }
    }

    /// Proxy for a lookup with no owning store, always empty
    pub fn empty(map_definition: MapDefinition, key: &str) -> Self {
        Self::new(None, map_definition, key, None)
    }

    pub fn map_definition(&self) -> &MapDefinition {
        &self.map_definition
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// True if the key resolved to a value when the proxy was created
    pub fn is_located(&self) -> bool {
        self.store.is_some() && self.location.is_some()
    }

    pub fn supply_value(&self) -> Result<Option<RefDataValue>> {
        match (&self.store, &self.location) {
            (Some(store), Some(location)) => store.get_value_by_key(location),
            _ => Ok(None),
        }
    }

    /// Pass the value bytes to `consumer`. Returns false if there was nothing to consume.
    pub fn consume_bytes<F>(&self, consumer: F) -> Result<bool>
    where
        F: FnOnce(TypedBytes<'_>),
    {
        match (&self.store, &self.location) {
            (Some(store), Some(location)) => Ok(store.consume_bytes_by_key(location, consumer)?.is_some()),
            _ => Ok(false),
        }
    }
}

impl fmt::Debug for RefDataValueProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefDataValueProxy")
            .field("map_definition", &self.map_definition)
            .field("key", &self.key)
            .field("location", &self.location)
            .finish()
    }
}
