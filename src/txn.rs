//! Transaction lifecycle (spec §4.6): `begin`/`set_step`/`commit`/
//! `rollback`/`end`, reentrant nesting, and the per-transaction write
//! buffer that accumulates redo records before they are flushed to the
//! journal as a `TX` chain.
//!
//! Mirrors the teacher's [`crate::mvcc::txn_index`] bucket discipline on
//! the engine side and its `db::transaction::Transaction` state machine
//! (`Active`/`Committed`/`RolledBack`, panic-on-drop-while-active) on the
//! API side.

use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::mvcc::{TransactionIndex, TransactionStatus};
use crate::ts::{encode_handle, Timestamp, TimestampAllocator, ValueHandle};

/// Controls how aggressively `commit()` forces durability (spec §4.6).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CommitPolicy {
    /// Write the commit record to the journal's in-memory buffer only.
    Soft,
    /// fsync the journal before `commit()` returns.
    Hard,
    /// Batch with other concurrently-committing transactions into one
    /// fsync (the journal manager coalesces `Group` commits).
    Group,
}

/// Sink a transaction flushes its write buffer and commit record
/// through. Implemented by [`crate::journal::JournalManager`]; kept as
/// a trait here so this module has no dependency on the journal's wire
/// format.
pub trait JournalSink {
    /// Appends a chunk of a transaction's write buffer as a `TX` chain
    /// segment.
    fn append_tx_chunk(&self, start_ts: Timestamp, bytes: &[u8]) -> Result<()>;
    /// Appends the closing commit record and, if `policy` demands it,
    /// fsyncs before returning.
    fn append_commit(&self, start_ts: Timestamp, commit_ts: Timestamp, policy: CommitPolicy) -> Result<()>;
    /// Appends a rollback marker so recovery knows not to replay this
    /// transaction's chain.
    fn append_rollback(&self, start_ts: Timestamp) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TxState {
    Active,
    Committed,
    RolledBack,
}

/// Size, in bytes, at which a transaction's write buffer is flushed to
/// the journal as an intermediate `TX` chain segment rather than held
/// entirely in memory.
const WRITE_BUFFER_FLUSH_THRESHOLD: usize = 64 * 1024;

/// One transaction against a [`crate::Strata`] context.
pub struct Transaction<'a> {
    index: &'a TransactionIndex,
    allocator: &'a TimestampAllocator,
    journal: &'a dyn JournalSink,
    status: Arc<TransactionStatus>,
    step: u8,
    nesting: u32,
    state: TxState,
    write_buffer: Vec<u8>,
}

impl<'a> Transaction<'a> {
    /// Begins a new transaction, allocating a fresh `start_ts` and
    /// registering it in the transaction index.
    pub fn begin(
        index: &'a TransactionIndex,
        allocator: &'a TimestampAllocator,
        journal: &'a dyn JournalSink,
    ) -> Self {
        let start_ts = allocator.allocate();
        let status = index.begin(start_ts);
        Self {
            index,
            allocator,
            journal,
            status,
            step: 0,
            nesting: 1,
            state: TxState::Active,
            write_buffer: Vec::new(),
        }
    }

    /// Nests a reentrant `begin()`: every nested call must be paired
    /// with a `commit()`/`rollback()`; only the outermost pair changes
    /// the transaction's actual state.
    pub fn begin_nested(&mut self) {
        self.nesting += 1;
    }

    /// The transaction's `start_ts`.
    pub fn start_ts(&self) -> Timestamp {
        self.status.start_ts()
    }

    /// The current substep number.
    pub fn step(&self) -> u8 {
        self.step
    }

    /// Sets the substep number for subsequent writes, enabling
    /// within-transaction read-after-write visibility (spec §4.6).
    pub fn set_step(&mut self, step: u8) {
        self.step = step;
    }

    /// The transaction's current value handle `(start_ts << 8) | step`.
    pub fn value_handle(&self) -> ValueHandle {
        encode_handle(self.status.start_ts(), self.step)
    }

    /// Access to the transaction index, for MVCC store/fetch calls that
    /// need to consult transaction status.
    pub fn index(&self) -> &TransactionIndex {
        self.index
    }

    /// Appends redo bytes to the write buffer, flushing an intermediate
    /// `TX` chain segment to the journal if the buffer has grown past
    /// [`WRITE_BUFFER_FLUSH_THRESHOLD`].
    pub fn append_write(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_active()?;
        self.write_buffer.extend_from_slice(bytes);
        if self.write_buffer.len() >= WRITE_BUFFER_FLUSH_THRESHOLD {
            self.flush_write_buffer()?;
        }
        Ok(())
    }

    fn flush_write_buffer(&mut self) -> Result<()> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }
        self.journal
            .append_tx_chunk(self.status.start_ts(), &self.write_buffer)?;
        self.write_buffer.clear();
        Ok(())
    }

    /// Commits the transaction with the given durability policy,
    /// allocating a `commit_ts` and writing the closing journal record.
    /// A nested `commit()` only decrements the nesting counter.
    pub fn commit(&mut self, policy: CommitPolicy) -> Result<Timestamp> {
        self.ensure_active()?;
        if self.nesting > 1 {
            self.nesting -= 1;
            return Ok(self.status.start_ts());
        }
        self.flush_write_buffer()?;
        let commit_ts = self.allocator.allocate();
        self.journal
            .append_commit(self.status.start_ts(), commit_ts, policy)?;
        self.index.commit(&self.status, commit_ts);
        self.state = TxState::Committed;
        self.nesting = 0;
        Ok(commit_ts)
    }

    /// Rolls back the transaction: status becomes `Aborted`, and MVV
    /// slots written under this transaction's handle become invisible
    /// (actual reclamation happens later via the cleanup manager).
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.journal.append_rollback(self.status.start_ts())?;
        self.index.abort(&self.status);
        self.state = TxState::RolledBack;
        self.nesting = 0;
        Ok(())
    }

    /// Releases the transaction's status from the index's "current"
    /// list (called automatically by `commit`/`rollback`, exposed for
    /// callers that need to explicitly end a long-lived handle).
    pub fn end(self) {
        // Dropping self is sufficient: `commit`/`rollback` already moved
        // the status out of `current` via `TransactionIndex::end`.
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != TxState::Active {
            return Err(StrataError::Rollback(
                "transaction is no longer active".into(),
            ));
        }
        Ok(())
    }
}

impl<'a> Drop for Transaction<'a> {
    fn drop(&mut self) {
        if self.state == TxState::Active && self.nesting > 0 {
            let _ = self.journal.append_rollback(self.status.start_ts());
            self.index.abort(&self.status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        chunks: Mutex<Vec<(Timestamp, usize)>>,
        commits: Mutex<Vec<(Timestamp, Timestamp, CommitPolicy)>>,
        rollbacks: Mutex<Vec<Timestamp>>,
    }

    impl JournalSink for RecordingSink {
        fn append_tx_chunk(&self, start_ts: Timestamp, bytes: &[u8]) -> Result<()> {
            self.chunks.lock().unwrap().push((start_ts, bytes.len()));
            Ok(())
        }
        fn append_commit(&self, start_ts: Timestamp, commit_ts: Timestamp, policy: CommitPolicy) -> Result<()> {
            self.commits.lock().unwrap().push((start_ts, commit_ts, policy));
            Ok(())
        }
        fn append_rollback(&self, start_ts: Timestamp) -> Result<()> {
            self.rollbacks.lock().unwrap().push(start_ts);
            Ok(())
        }
    }

    #[test]
    fn commit_allocates_commit_ts_after_start_ts() {
        let index = TransactionIndex::new();
        let allocator = TimestampAllocator::default();
        let sink = RecordingSink::default();
        let mut txn = Transaction::begin(&index, &allocator, &sink);
        let start = txn.start_ts();
        let commit_ts = txn.commit(CommitPolicy::Hard).unwrap();
        assert!(commit_ts > start);
        assert_eq!(sink.commits.lock().unwrap().len(), 1);
    }

    #[test]
    fn rollback_marks_status_aborted() {
        let index = TransactionIndex::new();
        let allocator = TimestampAllocator::default();
        let sink = RecordingSink::default();
        let mut txn = Transaction::begin(&index, &allocator, &sink);
        let start = txn.start_ts();
        txn.rollback().unwrap();
        assert_eq!(
            index.get(start).unwrap().state(),
            crate::mvcc::TransactionState::Aborted
        );
    }

    #[test]
    fn nested_begin_requires_matching_commits() {
        let index = TransactionIndex::new();
        let allocator = TimestampAllocator::default();
        let sink = RecordingSink::default();
        let mut txn = Transaction::begin(&index, &allocator, &sink);
        txn.begin_nested();
        txn.commit(CommitPolicy::Soft).unwrap();
        assert!(sink.commits.lock().unwrap().is_empty());
        txn.commit(CommitPolicy::Soft).unwrap();
        assert_eq!(sink.commits.lock().unwrap().len(), 1);
    }

    #[test]
    fn drop_without_commit_rolls_back() {
        let index = TransactionIndex::new();
        let allocator = TimestampAllocator::default();
        let sink = RecordingSink::default();
        let start;
        {
            let txn = Transaction::begin(&index, &allocator, &sink);
            start = txn.start_ts();
        }
        assert_eq!(sink.rollbacks.lock().unwrap().len(), 1);
        assert_eq!(
            index.get(start).unwrap().state(),
            crate::mvcc::TransactionState::Aborted
        );
    }

    #[test]
    fn large_write_buffer_flushes_intermediate_chunk() {
        let index = TransactionIndex::new();
        let allocator = TimestampAllocator::default();
        let sink = RecordingSink::default();
        let mut txn = Transaction::begin(&index, &allocator, &sink);
        txn.append_write(&vec![0u8; WRITE_BUFFER_FLUSH_THRESHOLD + 1]).unwrap();
        assert_eq!(sink.chunks.lock().unwrap().len(), 1);
        txn.commit(CommitPolicy::Soft).unwrap();
    }
}
