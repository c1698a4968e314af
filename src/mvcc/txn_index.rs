//! Sharded transaction index (spec §4.7): tracks every in-flight or
//! recently-resolved transaction so readers can decide version
//! visibility and writers can detect write-write conflicts without
//! touching the journal.
//!
//! Mirrors the teacher's [`crate::mvcc::version::CommitTable`] bucket
//! discipline (reserve/commit/release) but spread across `N_BUCKETS`
//! shards keyed by `start_ts mod N_BUCKETS`, each holding *current*,
//! *long-running*, and *free* lists per spec §4.7.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::ts::Timestamp;

/// Number of independent lock shards the transaction index is split
/// across.
pub const N_BUCKETS: usize = 16;

/// Lifecycle state of one transaction as seen by the index.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransactionState {
    /// Still running; not yet committed or rolled back.
    Active,
    /// Committed at the given timestamp.
    Committed(Timestamp),
    /// Rolled back.
    Aborted,
}

/// Outcome of a write-write dependency check (spec §4.7 `wwDependency`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WwOutcome {
    /// No conflicting write in progress.
    NoConflict,
    /// The other transaction committed while we waited; caller must
    /// still treat the write as a conflict since a version now exists.
    Blocked,
    /// The other transaction aborted while we waited; its version is
    /// dead and the write may proceed.
    Aborted,
}

/// Tracked state for one transaction, shared between the owning
/// [`crate::txn::Transaction`] and every bucket that references it.
#[derive(Debug)]
pub struct TransactionStatus {
    start_ts: Timestamp,
    state: Mutex<TransactionState>,
    resolved: Condvar,
    /// Number of MVV slots in the store still tagged with this
    /// transaction's version handle. Reaching zero makes the status
    /// reclaimable once it is also below the floor.
    mvv_count: Mutex<i64>,
}

impl TransactionStatus {
    fn new(start_ts: Timestamp) -> Arc<Self> {
        Arc::new(Self {
            start_ts,
            state: Mutex::new(TransactionState::Active),
            resolved: Condvar::new(),
            mvv_count: Mutex::new(0),
        })
    }

    /// The transaction's `start_ts`.
    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    /// Increments the count of live MVV slots written by this
    /// transaction. Called every time a store appends a version tagged
    /// with this status.
    pub fn note_mvv_written(&self) {
        *self.mvv_count.lock() += 1;
    }

    /// Decrements the live MVV slot count, called by the cleanup
    /// manager after pruning a version away.
    pub fn note_mvv_pruned(&self) {
        let mut count = self.mvv_count.lock();
        *count -= 1;
    }

    /// `true` once no live MVV slot references this transaction.
    pub fn mvv_count_is_zero(&self) -> bool {
        *self.mvv_count.lock() <= 0
    }

    fn commit(&self, commit_ts: Timestamp) {
        let mut state = self.state.lock();
        *state = TransactionState::Committed(commit_ts);
        self.resolved.notify_all();
    }

    fn abort(&self) {
        let mut state = self.state.lock();
        *state = TransactionState::Aborted;
        self.resolved.notify_all();
    }

    /// Blocks the calling thread until this status leaves `Active`.
    fn wait_for_resolution(&self) -> TransactionState {
        let mut state = self.state.lock();
        while matches!(*state, TransactionState::Active) {
            self.resolved.wait(&mut state);
        }
        *state
    }
}

#[derive(Default)]
struct Bucket {
    current: Vec<Arc<TransactionStatus>>,
    long_running: Vec<Arc<TransactionStatus>>,
    free: Vec<Arc<TransactionStatus>>,
}

/// The transaction index proper: `N_BUCKETS` independently-locked
/// shards, each tracking a disjoint slice of the `start_ts` space.
pub struct TransactionIndex {
    buckets: Vec<Mutex<Bucket>>,
}

impl TransactionIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            buckets: (0..N_BUCKETS).map(|_| Mutex::new(Bucket::default())).collect(),
        }
    }

    fn bucket_for(&self, ts: Timestamp) -> &Mutex<Bucket> {
        &self.buckets[(ts as usize) % N_BUCKETS]
    }

    /// Registers a freshly allocated `start_ts`, returning its status
    /// handle.
    pub fn begin(&self, start_ts: Timestamp) -> Arc<TransactionStatus> {
        let status = TransactionStatus::new(start_ts);
        let mut bucket = self.bucket_for(start_ts).lock();
        bucket.current.push(status.clone());
        status
    }

    /// Looks up a transaction's status by its `start_ts`. Returns
    /// `None` if it is older than the floor and has already been
    /// reclaimed - callers must then treat it as committed-and-visible
    /// (spec §4.7: "absent means older than the floor").
    pub fn get(&self, start_ts: Timestamp) -> Option<Arc<TransactionStatus>> {
        let bucket = self.bucket_for(start_ts).lock();
        bucket
            .current
            .iter()
            .chain(bucket.long_running.iter())
            .find(|s| s.start_ts == start_ts)
            .cloned()
    }

    /// Moves a transaction from `current` to `long_running` (if it is
    /// still referenced by live MVVs) or releases it straight to the
    /// `free` list, and records its commit timestamp.
    pub fn commit(&self, status: &Arc<TransactionStatus>, commit_ts: Timestamp) {
        status.commit(commit_ts);
        self.end(status);
    }

    /// Marks a transaction aborted and moves it out of `current`.
    pub fn abort(&self, status: &Arc<TransactionStatus>) {
        status.abort();
        self.end(status);
    }

    /// Moves `status` from the current list into long-running (if it
    /// still has live MVVs) or directly to free.
    fn end(&self, status: &Arc<TransactionStatus>) {
        let mut bucket = self.bucket_for(status.start_ts).lock();
        bucket.current.retain(|s| !Arc::ptr_eq(s, status));
        if status.mvv_count_is_zero() {
            bucket.free.push(status.clone());
        } else {
            bucket.long_running.push(status.clone());
        }
    }

    /// Write-write conflict check: `self_ts` is attempting to overwrite
    /// a slot version written by `other`. Blocks until `other` resolves.
    pub fn ww_dependency(&self, self_ts: Timestamp, other: &Arc<TransactionStatus>) -> WwOutcome {
        if other.start_ts == self_ts {
            return WwOutcome::NoConflict;
        }
        match other.wait_for_resolution() {
            TransactionState::Committed(_) => WwOutcome::Blocked,
            TransactionState::Aborted => WwOutcome::Aborted,
            TransactionState::Active => unreachable!("wait_for_resolution never returns Active"),
        }
    }

    /// Snapshot of every `start_ts` still in an active state, across
    /// all buckets (spec §4.7 `updateActiveTransactionCache`).
    pub fn active_transaction_cache(&self) -> Vec<Timestamp> {
        let mut out = Vec::new();
        for bucket in &self.buckets {
            let bucket = bucket.lock();
            out.extend(
                bucket
                    .current
                    .iter()
                    .filter(|s| matches!(s.state(), TransactionState::Active))
                    .map(|s| s.start_ts),
            );
        }
        out
    }

    /// The lowest `start_ts` among every currently-active transaction,
    /// or `Timestamp::MAX` if none are active. Recomputed on every call
    /// rather than maintained incrementally, which sidesteps the
    /// live-lock the spec's floor-advance walk exists to avoid (see
    /// `DESIGN.md`).
    pub fn floor(&self) -> Timestamp {
        self.buckets
            .iter()
            .flat_map(|bucket| {
                let bucket = bucket.lock();
                bucket.current.iter().map(|s| s.start_ts).collect::<Vec<_>>()
            })
            .min()
            .unwrap_or(Timestamp::MAX)
    }

    /// Scans every bucket's long-running list, reclaiming any status
    /// whose `mvv_count` has reached zero and whose `start_ts` is below
    /// the current floor.
    pub fn cleanup(&self) -> usize {
        let floor = self.floor();
        let mut reclaimed = 0;
        for bucket in &self.buckets {
            let mut bucket = bucket.lock();
            let (dead, alive): (Vec<_>, Vec<_>) = bucket
                .long_running
                .drain(..)
                .partition(|s| s.mvv_count_is_zero() && s.start_ts < floor);
            reclaimed += dead.len();
            bucket.free.extend(dead);
            bucket.long_running = alive;
        }
        reclaimed
    }
}

impl Default for TransactionIndex {
    fn default() -> Self {
        Self::new()
    }
}
