use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use redb::{Database, ReadOnlyTable, ReadTransaction, ReadableTable, Table, WriteTransaction};
use tracing::{debug, warn};
use crate::core::error::{Error, Result};
use crate::storage::layout::BytesTable;

/// Anything tables can be read through: a read snapshot or the open write txn
pub trait ReadTxn {
    type Table<'a>: ReadableTable<&'static [u8], &'static [u8]>
    where
        Self: 'a;

    fn open(&self, table: BytesTable) -> Result<Self::Table<'_>>;
}

impl ReadTxn for ReadTransaction {
    type Table<'a> = ReadOnlyTable<&'static [u8], &'static [u8]>;

    fn open(&self, table: BytesTable) -> Result<Self::Table<'_>> {
        Ok(self.open_table(table)?)
    }
}

impl ReadTxn for WriteTransaction {
    type Table<'a> = Table<'a, &'static [u8], &'static [u8]>;

    fn open(&self, table: BytesTable) -> Result<Self::Table<'_>> {
        Ok(self.open_table(table)?)
    }
}

pub fn with_read_txn<R>(db: &Database, work: impl FnOnce(&ReadTransaction) -> Result<R>) -> Result<R> {
    let txn = db.begin_read()?;
    work(&txn)
}

/// Run `work` in a write txn, committing only if it succeeds
pub fn with_write_txn<R>(db: &Database, work: impl FnOnce(&WriteTransaction) -> Result<R>) -> Result<R> {
    let txn = db.begin_write()?;
    match work(&txn) {
        Ok(result) => {
            txn.commit()?;
            Ok(result)
        }
        Err(e) => {
            txn.abort()?;
            Err(e)
        }
    }
}

/// Write txn that is committed and re-opened every `max_batch_size` operations so
/// long loads and purges never hold the single writer slot for their whole run.
/// A `max_batch_size` of zero means only commit when told to.
pub struct BatchingWriteTxn<'db> {
    db: &'db Database,
    txn: Option<WriteTransaction>,
    max_batch_size: usize,
    batch_counter: usize,
    commit_count: usize,
}

impl<'db> BatchingWriteTxn<'db> {
    pub fn new(db: &'db Database, max_batch_size: usize) -> Self {
        BatchingWriteTxn {
            db,
            txn: None,
            max_batch_size,
            batch_counter: 0,
            commit_count: 0,
        }
    }

    pub fn set_max_batch_size(&mut self, max_batch_size: usize) {
        self.max_batch_size = max_batch_size;
    }

    /// Current write txn, opening one if needed. Blocks while another writer is active.
    pub fn txn(&mut self) -> Result<&WriteTransaction> {
        if self.txn.is_none() {
            self.txn = Some(self.db.begin_write()?);
        }
        self.txn
            .as_ref()
            .ok_or_else(|| Error::invalid_state("Write txn not open".to_string()))
    }

    /// Count one operation, committing if the batch is full. Returns true if it committed.
    pub fn commit_if_required(&mut self) -> Result<bool> {
        self.batch_counter += 1;
        if self.max_batch_size > 0 && self.batch_counter >= self.max_batch_size {
            self.commit()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn commit(&mut self) -> Result<()> {
        if let Some(txn) = self.txn.take() {
            txn.commit()?;
            self.commit_count += 1;
            debug!(ops = self.batch_counter, "Committed write batch");
        }
        self.batch_counter = 0;
        Ok(())
    }

    pub fn abort(&mut self) -> Result<()> {
        if let Some(txn) = self.txn.take() {
            txn.abort()?;
        }
        self.batch_counter = 0;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.txn.is_some()
    }

    pub fn commit_count(&self) -> usize {
        self.commit_count
    }
}

impl Drop for BatchingWriteTxn<'_> {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            if let Err(e) = txn.abort() {
                warn!("Failed to abort uncommitted write batch: {}", e);
            }
        }
    }
}

/// Cooperative cancellation flag shared by a store and its workers
#[derive(Debug, Clone, Default)]
pub struct TaskTerminator {
    terminated: Arc<AtomicBool>,
}

impl TaskTerminator {
    pub fn new() -> Self {
        TaskTerminator::default()
    }

    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.terminated.store(false, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Error out if termination has been requested
    pub fn check(&self, task: &str) -> Result<()> {
        if self.is_terminated() {
            Err(Error::terminated(format!("{} terminated", task)))
        } else {
            Ok(())
        }
    }
}
