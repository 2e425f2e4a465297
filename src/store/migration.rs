use std::fmt;
use std::time::Instant;
use redb::ReadTransaction;
use tracing::{debug, info, warn};
use crate::codec::keys;
use crate::codec::uid::Uid;
use crate::core::error::Result;
use crate::core::stats::PurgeCounts;
use crate::core::types::{ProcessingState, RefDataProcessingInfo, RefStreamDefinition};
use crate::storage::key_value_db::EntryStoreDb;
use crate::storage::txn::{with_read_txn, BatchingWriteTxn};
use crate::store::offheap_store::RefDataOffHeapStore;

/// Result of moving a stream's data out of the legacy store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    NoLegacyStore,
    AlreadyMigrated,
    Migrated { stream_definitions: usize, entries: u64 },
    Failed(String),
}

impl MigrationOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, MigrationOutcome::Failed(_))
    }
}

impl fmt::Display for MigrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationOutcome::NoLegacyStore => write!(f, "no legacy store"),
            MigrationOutcome::AlreadyMigrated => write!(f, "already migrated"),
            MigrationOutcome::Migrated { stream_definitions, entries } => {
                write!(f, "migrated {} stream definitions, {} entries", stream_definitions, entries)
            }
            MigrationOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Copy every COMPLETE stream definition of `stream_id` from `legacy` into `dest`, then purge
/// the stream from `legacy`. Maps get fresh UIDs in `dest`, values are de-duplicated against
/// what `dest` already holds.
pub(crate) fn migrate_stream(
    legacy: &RefDataOffHeapStore,
    dest: &RefDataOffHeapStore,
    stream_id: u64,
) -> Result<MigrationOutcome> {
    let legacy_streams = legacy.find_stream_definitions(|def, _| def.stream_id == stream_id)?;
    if legacy_streams.is_empty() {
        return Ok(MigrationOutcome::AlreadyMigrated);
    }

    let start = Instant::now();
    info!(
        stream_id,
        from = %legacy.name(),
        to = %dest.name(),
        stream_definitions = legacy_streams.len(),
        "Migrating reference data from legacy store"
    );

    let mut copied_streams = 0;
    let mut copied_entries = 0;
    for (ref_stream_definition, legacy_info) in legacy_streams {
        if legacy_info.processing_state != ProcessingState::Complete {
            debug!(
                stream = %ref_stream_definition,
                state = ?legacy_info.processing_state,
                "Not migrating incomplete stream, left for purge"
            );
            continue;
        }

        let dest_lock = dest.stream_lock(&ref_stream_definition);
        let _dest_guard = RefDataOffHeapStore::acquire_stream_lock(&dest_lock, &ref_stream_definition);
        let legacy_lock = legacy.stream_lock(&ref_stream_definition);
        let _legacy_guard = RefDataOffHeapStore::acquire_stream_lock(&legacy_lock, &ref_stream_definition);

        let dest_state = dest.get_processing_info(&ref_stream_definition)?.map(|info| info.processing_state);
        if dest_state != Some(ProcessingState::Complete) {
            copied_entries += copy_stream(legacy, dest, &ref_stream_definition, &legacy_info)?;
            copied_streams += 1;
        } else {
            debug!(stream = %ref_stream_definition, "Already present in destination");
        }

        // The destination copy is COMPLETE from here on. A legacy copy that cannot be purged
        // now stays ReadyForPurge for the next sweep.
        let purged = legacy
            .set_processing_state(&ref_stream_definition, ProcessingState::ReadyForPurge)
            .and_then(|_| legacy.purge(ref_stream_definition.stream_id, Some(ref_stream_definition.part_index)));
        if let Err(e) = purged {
            warn!(stream = %ref_stream_definition, error = %e, "Failed to purge migrated stream from legacy store");
        }
    }

    info!(
        stream_id,
        stream_definitions = copied_streams,
        entries = copied_entries,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Migration complete"
    );

    if copied_streams == 0 {
        Ok(MigrationOutcome::AlreadyMigrated)
    } else {
        Ok(MigrationOutcome::Migrated { stream_definitions: copied_streams, entries: copied_entries })
    }
}

/// Copy one stream definition. On failure the destination copy is left marked FAILED so the
/// next load or migration clears it.
fn copy_stream(
    legacy: &RefDataOffHeapStore,
    dest: &RefDataOffHeapStore,
    ref_stream_definition: &RefStreamDefinition,
    legacy_info: &RefDataProcessingInfo,
) -> Result<u64> {
    let mut batch = BatchingWriteTxn::new(&dest.db, dest.config.max_puts_before_commit);

    let result = (|| -> Result<u64> {
        if dest.get_processing_info(ref_stream_definition)?.is_some() {
            let mut counts = PurgeCounts::default();
            dest.purge_stream_data(&mut batch, ref_stream_definition, &mut counts)?;
        }
        {
            let txn = batch.txn()?;
            let in_progress = legacy_info.with_state(ProcessingState::LoadInProgress);
            dest.processing_info_db.put(txn, ref_stream_definition, &in_progress)?;
        }
        batch.commit()?;

        let entries = with_read_txn(&legacy.db, |legacy_txn| {
            let mut entries = 0;
            for (map_definition, legacy_uid) in legacy.map_uid_store.get_maps_for_stream(legacy_txn, ref_stream_definition)? {
                let dest_uid = {
                    let txn = batch.txn()?;
                    dest.map_uid_store.get_or_create_uid(txn, &map_definition)?
                };
                entries += copy_map_entries(legacy, dest, &legacy.key_value_db, &dest.key_value_db, legacy_txn, &mut batch, &legacy_uid, &dest_uid)?;
                entries += copy_map_entries(legacy, dest, &legacy.range_db, &dest.range_db, legacy_txn, &mut batch, &legacy_uid, &dest_uid)?;
            }
            Ok(entries)
        })?;

        let txn = batch.txn()?;
        dest.processing_info_db.put(txn, ref_stream_definition, legacy_info)?;
        batch.commit()?;
        Ok(entries)
    })();

    if let Err(e) = &result {
        warn!(stream = %ref_stream_definition, error = %e, "Failed to copy stream from legacy store");
        batch.abort()?;
        if dest.get_processing_info(ref_stream_definition)?.is_some() {
            dest.set_processing_state(ref_stream_definition, ProcessingState::Failed)?;
        }
    }
    result
}

#[allow(clippy::too_many_arguments)]
fn copy_map_entries<D: EntryStoreDb>(
    legacy: &RefDataOffHeapStore,
    dest: &RefDataOffHeapStore,
    legacy_db: &D,
    dest_db: &D,
    legacy_txn: &ReadTransaction,
    batch: &mut BatchingWriteTxn<'_>,
    legacy_uid: &Uid,
    dest_uid: &Uid,
) -> Result<u64> {
    let mut copied = 0;
    let mut dest_key = dest.buffer_pool.get(64);
    legacy_db.for_each_map_entry(legacy_txn, legacy_uid, |key_bytes, legacy_value_key| {
        let Some(value) = legacy.value_store.get(legacy_txn, &legacy_value_key)? else {
            warn!(?legacy_value_key, "Entry points at a missing value, skipping");
            return Ok(true);
        };

        dest_key.clear();
        keys::copy_with_new_uid(key_bytes, dest_uid, &mut dest_key)?;

        let txn = batch.txn()?;
        let value_key = dest.value_store.get_or_create_key(txn, &value, false)?;
        dest_db.put_raw(txn, &dest_key, &value_key)?;
        copied += 1;

        dest.warn_if_terminated("Reference data migration")?;
        batch.commit_if_required()?;
        Ok(true)
    })?;
    Ok(copied)
}
