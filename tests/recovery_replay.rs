//! End-to-end recovery: a committed transaction's outcome and a
//! rolled-back transaction's outcome must both be reconstructed
//! correctly from a freshly reopened journal, and the timestamp
//! allocator must never be able to hand out a value that collides
//! with anything the journal has already seen.

use strata::journal::JournalManager;
use strata::mvcc::TransactionIndex;
use strata::recovery::{self, RecoveredOutcome};
use strata::ts::TimestampAllocator;
use strata::txn::{CommitPolicy, Transaction};

#[test]
fn replay_after_reopen_reconstructs_commit_and_rollback_outcomes() {
    let dir = tempfile::tempdir().unwrap();

    let (committed_start, rolled_back_start) = {
        let journal = JournalManager::open(dir.path()).unwrap();
        let index = TransactionIndex::new();
        let allocator = TimestampAllocator::default();

        let mut committed = Transaction::begin(&index, &allocator, &journal);
        let committed_start = committed.start_ts();
        committed.commit(CommitPolicy::Hard).unwrap();

        let mut rolled_back = Transaction::begin(&index, &allocator, &journal);
        let rolled_back_start = rolled_back.start_ts();
        rolled_back.rollback().unwrap();

        (committed_start, rolled_back_start)
    };

    let journal = JournalManager::open(dir.path()).unwrap();
    let allocator = TimestampAllocator::default();
    let state = recovery::replay(&journal, &allocator).unwrap();

    assert!(matches!(state.outcome(committed_start), RecoveredOutcome::Committed(_)));
    assert_eq!(state.outcome(rolled_back_start), RecoveredOutcome::RolledBack);
    assert_eq!(state.outcome(999_999), RecoveredOutcome::Incomplete);

    // A freshly started transaction after recovery must get a start_ts
    // strictly greater than anything seen in the journal.
    let post_recovery_index = TransactionIndex::new();
    let mut post_recovery = Transaction::begin(&post_recovery_index, &allocator, &journal);
    assert!(post_recovery.start_ts() > state.max_ts_seen);
    post_recovery.rollback().unwrap();
}

#[test]
fn replay_tolerates_a_journal_with_no_transactions_at_all() {
    let dir = tempfile::tempdir().unwrap();
    let journal = JournalManager::open(dir.path()).unwrap();
    let allocator = TimestampAllocator::default();
    let state = recovery::replay(&journal, &allocator).unwrap();
    assert!(state.transactions.is_empty());
    assert!(state.volume_handles.is_empty());
}
