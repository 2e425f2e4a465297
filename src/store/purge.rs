use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};
use crate::codec::uid::Uid;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::PurgeCounts;
use crate::core::types::{ProcessingState, RefDataProcessingInfo, RefStreamDefinition};
use crate::storage::key_value_db::EntryStoreDb;
use crate::storage::txn::{with_read_txn, BatchingWriteTxn};
use crate::store::offheap_store::RefDataOffHeapStore;

// Entries read per scan of a map while deleting it
const PURGE_SCAN_CHUNK: usize = 10_000;

/// Why a stream is being purged, decides whether it is re-checked under the lock
#[derive(Debug, Clone, Copy)]
enum PurgeTrigger {
    Age { cutoff: DateTime<Utc> },
    Explicit,
}

impl PurgeTrigger {
    fn is_eligible(&self, info: &RefDataProcessingInfo) -> bool {
        match self {
            PurgeTrigger::Age { cutoff } => info.processing_state.is_abandoned() || !info.was_accessed_after(*cutoff),
            PurgeTrigger::Explicit => true,
        }
    }
}

impl RefDataOffHeapStore {
    /// Purge every stream not accessed within the configured purge age, plus any left
    /// abandoned by an unfinished load or purge
    pub fn purge_old_data(&self) -> Result<PurgeCounts> {
        self.purge_old_data_with(Utc::now(), self.config.purge_age)
    }

    /// As `purge_old_data` with an explicit clock and age. A zero age makes every stream eligible.
    pub fn purge_old_data_with(&self, now: DateTime<Utc>, purge_age: Duration) -> Result<PurgeCounts> {
        let age = chrono::Duration::from_std(purge_age).map_err(|e| {
            Error::new(ErrorKind::InvalidArgument, format!("Invalid purge age {:?}: {}", purge_age, e))
        })?;
        let cutoff = now - age;
        let trigger = PurgeTrigger::Age { cutoff };

        info!(store = %self.name(), %cutoff, "Purging reference data not accessed since cutoff");
        let candidates = self.find_stream_definitions(|_, info| trigger.is_eligible(info))?;
        self.purge_streams(candidates.into_iter().map(|(def, _)| def).collect(), trigger)
    }

    /// Purge all parts of `stream_id`, or only `part_index` if given, whatever their age
    pub fn purge(&self, stream_id: u64, part_index: Option<u64>) -> Result<PurgeCounts> {
        let candidates = self.find_stream_definitions(|def, _| {
            def.stream_id == stream_id && part_index.is_none_or(|part| def.part_index == part)
        })?;
        info!(store = %self.name(), stream_id, ?part_index, streams = candidates.len(), "Purging stream");
        self.purge_streams(candidates.into_iter().map(|(def, _)| def).collect(), PurgeTrigger::Explicit)
    }

    fn purge_streams(&self, ref_stream_definitions: Vec<RefStreamDefinition>, trigger: PurgeTrigger) -> Result<PurgeCounts> {
        self.warn_if_terminated("Reference data purge")?;
        let start = Instant::now();
        let mut totals = PurgeCounts::default();

        for ref_stream_definition in ref_stream_definitions {
            self.warn_if_terminated("Reference data purge")?;
            match self.purge_stream(&ref_stream_definition, trigger) {
                Ok(Some(counts)) => totals += counts,
                Ok(None) => {}
                Err(e) if e.is_terminated() => return Err(e),
                Err(e) => {
                    error!(stream = %ref_stream_definition, error = %e, "Failed to purge stream");
                    totals.streams_failed += 1;
                    if let Err(mark_err) = self.set_processing_state(&ref_stream_definition, ProcessingState::PurgeFailed) {
                        error!(stream = %ref_stream_definition, error = %mark_err, "Unable to mark stream as purge failed");
                    }
                }
            }
        }

        if totals.streams_purged > 0 || totals.streams_failed > 0 {
            info!(
                store = %self.name(),
                streams_purged = totals.streams_purged,
                streams_failed = totals.streams_failed,
                maps_deleted = totals.maps_deleted,
                entries_deleted = totals.entries_deleted(),
                values_deleted = totals.values_deleted,
                values_dereferenced = totals.values_dereferenced,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Purge complete"
            );
        } else {
            debug!(store = %self.name(), "Nothing to purge");
        }
        Ok(totals)
    }

    /// Purge one stream under its lock. `None` if it stopped being eligible while waiting.
    fn purge_stream(&self, ref_stream_definition: &RefStreamDefinition, trigger: PurgeTrigger) -> Result<Option<PurgeCounts>> {
        let lock = self.stream_lock(ref_stream_definition);
        let _guard = Self::acquire_stream_lock(&lock, ref_stream_definition);
        let start = Instant::now();

        let still_eligible = self
            .get_processing_info(ref_stream_definition)?
            .is_some_and(|info| trigger.is_eligible(&info));
        if !still_eligible {
            debug!(stream = %ref_stream_definition, "Stream no longer eligible for purge");
            return Ok(None);
        }

        self.set_processing_state(ref_stream_definition, ProcessingState::PurgeInProgress)?;

        let mut counts = PurgeCounts::default();
        let mut batch = BatchingWriteTxn::new(&self.db, self.config.max_purge_deletes_before_commit);
        let result = self.purge_stream_data(&mut batch, ref_stream_definition, &mut counts).and_then(|_| {
            let txn = batch.txn()?;
            self.processing_info_db.delete(txn, ref_stream_definition)?;
            batch.commit()
        });
        if let Err(e) = result {
            batch.abort()?;
            return Err(e);
        }

        counts.streams_purged = 1;
        info!(
            stream = %ref_stream_definition,
            maps_deleted = counts.maps_deleted,
            entries_deleted = counts.entries_deleted(),
            values_deleted = counts.values_deleted,
            values_dereferenced = counts.values_dereferenced,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Purged stream"
        );
        Ok(Some(counts))
    }

    /// Delete every map of a stream along with its entries, releasing the values they point at.
    /// Leaves the processing info row alone. The caller must hold the stream's lock.
    pub(crate) fn purge_stream_data(
        &self,
        batch: &mut BatchingWriteTxn<'_>,
        ref_stream_definition: &RefStreamDefinition,
        counts: &mut PurgeCounts,
    ) -> Result<()> {
        loop {
            let next = {
                let txn = batch.txn()?;
                self.map_uid_store.get_next_map_definition(txn, ref_stream_definition)?
            };
            let Some(map_uid) = next else {
                break;
            };

            let key_values = self.purge_map_entries(batch, &self.key_value_db, &map_uid, counts)?;
            let ranges = self.purge_map_entries(batch, &self.range_db, &map_uid, counts)?;
            counts.key_value_entries_deleted += key_values;
            counts.range_value_entries_deleted += ranges;

            let txn = batch.txn()?;
            self.map_uid_store.delete_pair(txn, &map_uid)?;
            counts.maps_deleted += 1;
            debug!(stream = %ref_stream_definition, uid = map_uid.value(), "Deleted map");
        }
        Ok(())
    }

    fn purge_map_entries<D: EntryStoreDb>(
        &self,
        batch: &mut BatchingWriteTxn<'_>,
        db: &D,
        map_uid: &Uid,
        counts: &mut PurgeCounts,
    ) -> Result<u64> {
        let mut deleted = 0;
        loop {
            let entries = {
                let txn = batch.txn()?;
                db.get_map_entries(txn, map_uid, PURGE_SCAN_CHUNK)?
            };
            if entries.is_empty() {
                return Ok(deleted);
            }

            for (key_bytes, value_key) in entries {
                let txn = batch.txn()?;
                if self.value_store.de_reference_or_delete_value(txn, &value_key)? {
                    counts.values_deleted += 1;
                } else {
                    counts.values_dereferenced += 1;
                }
                db.delete_raw(txn, &key_bytes)?;
                deleted += 1;

                if let Err(e) = self.warn_if_terminated("Reference data purge") {
                    batch.commit()?;
                    return Err(e);
                }
                batch.commit_if_required()?;
            }
        }
    }

    /// Last accessed times of the oldest and newest streams, for reporting
    pub fn get_last_accessed_time_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        with_read_txn(&self.db, |txn| self.processing_info_db.get_last_accessed_time_range(txn))
    }
}
