use std::collections::HashMap;
use std::time::Instant;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, trace, warn};
use crate::codec::uid::Uid;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::{LoaderStats, PurgeCounts};
use crate::core::types::{
    KeyRange, MapDefinition, ProcessingState, PutOutcome, RefDataProcessingInfo, RefDataValue,
    RefStreamDefinition,
};
use crate::storage::key_value_db::EntryStoreDb;
use crate::storage::txn::BatchingWriteTxn;
use crate::store::offheap_store::RefDataOffHeapStore;

pub type KeyPutOutcomeHandler = Box<dyn FnMut(&MapDefinition, &str, PutOutcome)>;
pub type RangePutOutcomeHandler = Box<dyn FnMut(&MapDefinition, &KeyRange, PutOutcome)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoaderState {
    New,
    Initialised,
    Staged,
    Completed,
}

/// Loads the entries of one reference stream.
///
/// Lifecycle: `initialise` -> any number of puts -> `mark_puts_complete` (optional) ->
/// `complete_processing`. Puts are written through a batching write txn committed every
/// `commit_interval` puts. Only created by `do_with_loader_unless_complete`, which holds
/// the stream's lock for the loader's whole life.
pub struct RefDataLoader<'s> {
    store: &'s RefDataOffHeapStore,
    ref_stream_definition: RefStreamDefinition,
    effective_time: DateTime<Utc>,
    batch: BatchingWriteTxn<'s>,
    state: LoaderState,
    overwrite_existing: bool,
    map_uids: HashMap<MapDefinition, Uid>,
    key_put_outcome_handler: Option<KeyPutOutcomeHandler>,
    range_put_outcome_handler: Option<RangePutOutcomeHandler>,
    stats: LoaderStats,
    started: Instant,
}

impl<'s> RefDataLoader<'s> {
    pub(crate) fn new(
        store: &'s RefDataOffHeapStore,
        ref_stream_definition: RefStreamDefinition,
        effective_time: DateTime<Utc>,
    ) -> Self {
        RefDataLoader {
            batch: BatchingWriteTxn::new(&store.db, store.config.max_puts_before_commit),
            store,
            ref_stream_definition,
            effective_time,
            state: LoaderState::New,
            overwrite_existing: false,
            map_uids: HashMap::new(),
            key_put_outcome_handler: None,
            range_put_outcome_handler: None,
            stats: LoaderStats::default(),
            started: Instant::now(),
        }
    }

    pub fn ref_stream_definition(&self) -> &RefStreamDefinition {
        &self.ref_stream_definition
    }

    pub fn stats(&self) -> &LoaderStats {
        &self.stats
    }

    /// Mark the stream LOAD_IN_PROGRESS. Any data left by an earlier unfinished attempt
    /// is removed first. Returns a replaced outcome if such an attempt existed.
    pub fn initialise(&mut self, overwrite_existing: bool) -> Result<PutOutcome> {
        self.check_state(&[LoaderState::New])?;
        self.overwrite_existing = overwrite_existing;

        let previous = {
            let txn = self.batch.txn()?;
            self.store.processing_info_db.get(txn, &self.ref_stream_definition)?
        };

        if let Some(previous) = &previous {
            info!(
                stream = %self.ref_stream_definition,
                previous_state = ?previous.processing_state,
                "Clearing data from previous incomplete load"
            );
            let mut counts = PurgeCounts::default();
            self.store
                .purge_stream_data(&mut self.batch, &self.ref_stream_definition, &mut counts)?;
            debug!(?counts, "Cleared previous load");
        }

        let info = RefDataProcessingInfo::new(Utc::now(), self.effective_time, ProcessingState::LoadInProgress);
        let txn = self.batch.txn()?;
        self.store.processing_info_db.put(txn, &self.ref_stream_definition, &info)?;
        // Committed straight away so maps created by the load can always be found by a purge
        self.batch.commit()?;

        self.state = LoaderState::Initialised;
        debug!(stream = %self.ref_stream_definition, overwrite_existing, "Loader initialised");

        Ok(match previous {
            Some(_) => PutOutcome::replaced_entry(),
            None => PutOutcome::new_entry(),
        })
    }

    /// Commit after every `max_puts_before_commit` puts, zero means only at the end
    pub fn set_commit_interval(&mut self, max_puts_before_commit: usize) {
        self.batch.set_max_batch_size(max_puts_before_commit);
    }

    pub fn set_key_put_outcome_handler<H>(&mut self, handler: H)
    where
        H: FnMut(&MapDefinition, &str, PutOutcome) + 'static,
    {
        self.key_put_outcome_handler = Some(Box::new(handler));
    }

    pub fn set_range_put_outcome_handler<H>(&mut self, handler: H)
    where
        H: FnMut(&MapDefinition, &KeyRange, PutOutcome) + 'static,
    {
        self.range_put_outcome_handler = Some(Box::new(handler));
    }

    pub fn put_key_value(
        &mut self,
        map_definition: &MapDefinition,
        key: &str,
        value: RefDataValue,
    ) -> Result<PutOutcome> {
        trace!(map = %map_definition, key, "put");
        let store = self.store;
        let outcome = self.put_entry(&store.key_value_db, map_definition, key, &value)?;
        if let Some(handler) = self.key_put_outcome_handler.as_mut() {
            handler(map_definition, key, outcome);
        }
        Ok(outcome)
    }

    pub fn put_range_value(
        &mut self,
        map_definition: &MapDefinition,
        range: KeyRange,
        value: RefDataValue,
    ) -> Result<PutOutcome> {
        trace!(map = %map_definition, %range, "put");
        let store = self.store;
        let outcome = self.put_entry(&store.range_db, map_definition, &range, &value)?;
        if let Some(handler) = self.range_put_outcome_handler.as_mut() {
            handler(map_definition, &range, outcome);
        }
        Ok(outcome)
    }

    /// All puts are done: commit what is outstanding and mark the stream STAGED
    pub fn mark_puts_complete(&mut self) -> Result<()> {
        self.check_state(&[LoaderState::Initialised])?;
        let txn = self.batch.txn()?;
        self.store
            .processing_info_db
            .update_processing_state(txn, &self.ref_stream_definition, ProcessingState::Staged)?;
        self.batch.commit()?;
        self.state = LoaderState::Staged;
        debug!(stream = %self.ref_stream_definition, puts = self.stats.puts, "Puts complete");
        Ok(())
    }

    /// Finish the load with one of COMPLETE, FAILED or TERMINATED. Calling again once
    /// completed does nothing.
    pub fn complete_processing(&mut self, processing_state: ProcessingState) -> Result<()> {
        if !ProcessingState::COMPLETION_STATES.contains(&processing_state) {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!(
                    "Invalid processing state {:?}, should be one of {:?}",
                    processing_state,
                    ProcessingState::COMPLETION_STATES
                ),
            ));
        }

        if self.state == LoaderState::Completed {
            debug!("Loader already completed, doing nothing");
            return Ok(());
        }

        if self.state == LoaderState::Initialised && processing_state == ProcessingState::Complete {
            self.mark_puts_complete()?;
        }
        self.check_state(&[LoaderState::Initialised, LoaderState::Staged])?;

        let txn = self.batch.txn()?;
        self.store
            .processing_info_db
            .update_processing_state(txn, &self.ref_stream_definition, processing_state)?;
        self.batch.commit()?;
        self.state = LoaderState::Completed;

        self.log_load_info(processing_state);
        Ok(())
    }

    /// Tidy up after the caller's work returned. An error marks the load FAILED or
    /// TERMINATED and is passed on; a load left incomplete is marked FAILED.
    pub(crate) fn close(mut self, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                if matches!(self.state, LoaderState::Initialised | LoaderState::Staged) {
                    warn!(
                        stream = %self.ref_stream_definition,
                        state = ?self.state,
                        "Loader closed without completing, marking as failed"
                    );
                    self.complete_processing(ProcessingState::Failed)?;
                }
                Ok(())
            }
            Err(e) => {
                if matches!(self.state, LoaderState::Initialised | LoaderState::Staged) {
                    let processing_state = if e.is_terminated() {
                        ProcessingState::Terminated
                    } else {
                        ProcessingState::Failed
                    };
                    warn!(stream = %self.ref_stream_definition, error = %e, "Load failed");
                    if let Err(mark_err) = self.fail(processing_state) {
                        error!(
                            stream = %self.ref_stream_definition,
                            error = %mark_err,
                            "Unable to record failed load"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// Record a failed load. Puts since the last commit are dropped, earlier ones stay
    /// until the next load of the stream clears them.
    fn fail(&mut self, processing_state: ProcessingState) -> Result<()> {
        self.batch.abort()?;
        self.complete_processing(processing_state)
    }

    fn put_entry<D: EntryStoreDb>(
        &mut self,
        db: &D,
        map_definition: &MapDefinition,
        key: &D::Key,
        value: &RefDataValue,
    ) -> Result<PutOutcome> {
        self.check_state(&[LoaderState::Initialised])?;
        self.stats.puts += 1;

        let outcome = {
            let store = self.store;
            let txn = self.batch.txn()?;

            let map_uid = match self.map_uids.get(map_definition) {
                Some(uid) => uid.clone(),
                None => {
                    let uid = store.map_uid_store.get_or_create_uid(txn, map_definition)?;
                    self.map_uids.insert(map_definition.clone(), uid.clone());
                    uid
                }
            };

            match db.get(txn, &map_uid, key)? {
                Some(existing) => {
                    if !self.overwrite_existing {
                        self.stats.dup_key_ignored += 1;
                        PutOutcome::failed()
                    } else if value.is_null() {
                        store.value_store.de_reference_or_delete_value(txn, &existing)?;
                        db.delete(txn, &map_uid, key)?;
                        self.stats.dup_key_entry_removed += 1;
                        PutOutcome::replaced_entry()
                    } else if store.value_store.are_values_equal(txn, &existing, value)? {
                        self.stats.dup_key_value_identical += 1;
                        PutOutcome::replaced_entry()
                    } else {
                        store.value_store.de_reference_or_delete_value(txn, &existing)?;
                        let value_key = store.value_store.get_or_create_key(txn, value, false)?;
                        db.put(txn, &map_uid, key, &value_key)?;
                        self.stats.dup_key_value_updated += 1;
                        PutOutcome::replaced_entry()
                    }
                }
                None => {
                    if value.is_null() {
                        self.stats.null_values_ignored += 1;
                        PutOutcome::success()
                    } else {
                        let value_key = store.value_store.get_or_create_key(txn, value, false)?;
                        db.put(txn, &map_uid, key, &value_key)?;
                        self.stats.new_entries += 1;
                        PutOutcome::new_entry()
                    }
                }
            }
        };

        if let Err(e) = self.store.warn_if_terminated("Reference data load") {
            self.batch.commit()?;
            return Err(e);
        }
        self.batch.commit_if_required()?;
        Ok(outcome)
    }

    fn check_state(&self, valid_states: &[LoaderState]) -> Result<()> {
        if valid_states.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::invalid_state(format!(
                "Current loader state: {:?}, valid states: {:?}",
                self.state, valid_states
            )))
        }
    }

    fn log_load_info(&self, processing_state: ProcessingState) {
        let mut map_names: Vec<&str> = self.map_uids.keys().map(|m| m.map_name.as_str()).collect();
        map_names.sort_unstable();
        info!(
            store = %self.store.name(),
            stream = %self.ref_stream_definition,
            outcome = ?processing_state,
            puts = self.stats.puts,
            new_entries = self.stats.new_entries,
            null_values_ignored = self.stats.null_values_ignored,
            dup_key_value_updated = self.stats.dup_key_value_updated,
            dup_key_value_identical = self.stats.dup_key_value_identical,
            dup_key_entry_removed = self.stats.dup_key_entry_removed,
            dup_key_ignored = self.stats.dup_key_ignored,
            maps = %map_names.join(", "),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Processed reference entries"
        );
    }
}
