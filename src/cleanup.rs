//! Background cleanup manager (spec §4.11): reclaims obsolete MVV
//! versions, repairs index separators left stale by a cross-parent
//! merge, and drops tree/transaction bookkeeping once nothing can
//! observe it any longer.
//!
//! Mirrors the teacher's bounded mpsc work-queue pattern used for
//! deferred page-level maintenance: actions are enqueued by the hot
//! path (store/remove/checkpoint) and drained by a dedicated worker so
//! that no foreground operation blocks on cleanup.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};

use tracing::{debug, warn};

use crate::btree::Exchange;
use crate::error::Result;
use crate::mvcc::TransactionIndex;
use crate::ts::Timestamp;
use crate::volume::Volume;

/// Bound on the number of pending cleanup actions before `enqueue`
/// starts dropping the lowest-priority ones (spec §4.11: cleanup is
/// best-effort and must never apply backpressure to foreground
/// transactions).
const QUEUE_CAPACITY: usize = 4096;

/// One deferred maintenance action (spec §4.11).
#[derive(Clone, Debug)]
pub enum CleanupAction {
    /// Re-run MVV pruning against a tree's stored versions at or below
    /// `min_active_ts`.
    PruneMvvSlots {
        tree: String,
        min_active_ts: Timestamp,
    },
    /// Re-derive a tree's index separators from their children's actual
    /// first keys (spec §4.2 Bug1058254 follow-up).
    FixIndexHole { tree: String },
    /// Release a dropped tree's accumulators and transaction-status
    /// bookkeeping.
    DropAbortedStatus { start_ts: Timestamp },
}

/// Bounded-queue cleanup worker. `enqueue` is cheap and non-blocking;
/// call `run_pending` from a dedicated background thread or a
/// checkpoint-adjacent maintenance pass to actually drain it.
pub struct CleanupManager {
    sender: SyncSender<CleanupAction>,
    receiver: Receiver<CleanupAction>,
}

impl CleanupManager {
    /// Creates an empty cleanup queue.
    pub fn new() -> Self {
        let (sender, receiver) = sync_channel(QUEUE_CAPACITY);
        Self { sender, receiver }
    }

    /// Enqueues `action`, silently dropping it if the queue is full
    /// rather than blocking the caller - a dropped action is simply
    /// retried on the next trigger that would have produced it (spec
    /// §4.11: cleanup is idempotent).
    pub fn enqueue(&self, action: CleanupAction) {
        if let Err(TrySendError::Full(_)) = self.sender.try_send(action) {
            warn!("cleanup.queue_full");
        }
    }

    /// Drains every currently queued action, applying each against
    /// `volume`/`index`. Returns the number of actions processed.
    pub fn run_pending(&self, volume: &Volume, index: &TransactionIndex) -> Result<usize> {
        let mut processed = 0;
        while let Ok(action) = self.receiver.try_recv() {
            self.apply(action, volume, index)?;
            processed += 1;
        }
        Ok(processed)
    }

    fn apply(&self, action: CleanupAction, volume: &Volume, index: &TransactionIndex) -> Result<()> {
        match action {
            CleanupAction::PruneMvvSlots { tree, min_active_ts } => {
                prune_tree(volume, &tree, min_active_ts, index)?;
            }
            CleanupAction::FixIndexHole { tree } => {
                let exchange = Exchange::open(volume, &tree)?;
                let fixed = exchange.fix_index_holes()?;
                if fixed > 0 {
                    debug!(tree, fixed, "cleanup.fix_index_holes");
                }
            }
            CleanupAction::DropAbortedStatus { start_ts } => {
                let reclaimed = index.cleanup();
                if reclaimed > 0 {
                    debug!(start_ts, reclaimed, "cleanup.drop_aborted_status");
                }
            }
        }
        Ok(())
    }
}

impl Default for CleanupManager {
    fn default() -> Self {
        Self::new()
    }
}

fn prune_tree(volume: &Volume, tree: &str, min_active_ts: Timestamp, index: &TransactionIndex) -> Result<()> {
    let exchange = Exchange::open(volume, tree)?;
    let entries = exchange.traverse(&crate::key::Key::before())?;
    for entry in entries {
        let Ok(crate::value::RawValue::Mvv(versions)) = crate::value::RawValue::decode(&entry.value) else {
            continue;
        };
        let pruned = crate::mvcc::prune(versions, min_active_ts, index);
        exchange.store(&entry.key, crate::value::RawValue::Mvv(pruned).encode())?;
    }
    Ok(())
}
