//! Strata: an embedded, transactional, ordered key-value storage engine
//! (spec §1). A `Strata` context owns one write-ahead journal, a set of
//! named volumes (each a single backing file holding a B+tree forest),
//! a shared transaction index, and the background services - cleanup
//! and checkpointing - that keep MVV chains and journal growth bounded
//! over the engine's lifetime.
//!
//! Mirrors the teacher's top-level `Engine`/`Db` handle: one struct
//! wiring config, clock, buffer pools, and the write path together,
//! with every subsystem reachable through it rather than constructed
//! ad hoc by callers.

#![warn(missing_docs)]

pub mod accumulator;
pub mod btree;
pub mod buffer;
pub mod checkpoint;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod journal;
pub mod key;
pub mod logging;
pub mod mvcc;
pub mod page;
pub mod recovery;
pub mod ts;
pub mod txn;
pub mod value;
pub mod volume;

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::accumulator::AccumulatorRegistry;
use crate::checkpoint::CheckpointManager;
use crate::cleanup::CleanupManager;
use crate::config::Config;
use crate::error::{FatalLatch, Result, StrataError};
use crate::journal::JournalManager;
use crate::mvcc::TransactionIndex;
use crate::ts::{Timestamp, TimestampAllocator};
use crate::txn::{CommitPolicy, Transaction};
use crate::volume::Volume;

/// A running instance of the storage engine (spec §1, §9).
///
/// Construction order follows spec §9: open the journal first (so
/// recovery can run before any volume is touched), replay it to
/// advance the timestamp allocator and learn prior transaction
/// outcomes, then open every configured volume.
pub struct Strata {
    config: Config,
    allocator: TimestampAllocator,
    journal: JournalManager,
    volumes: Mutex<HashMap<String, Volume>>,
    txn_index: TransactionIndex,
    cleanup: CleanupManager,
    checkpoint: CheckpointManager,
    accumulators: AccumulatorRegistry,
    fatal: FatalLatch,
}

impl Strata {
    /// Opens a context from `config`: opens (creating if needed) the
    /// journal, replays it, then opens every configured volume (spec
    /// §9 startup sequence).
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let journal = JournalManager::open(config.journal_dir())?;
        let allocator = TimestampAllocator::default();
        let recovered = crate::recovery::replay(&journal, &allocator)?;

        let mut volumes = HashMap::new();
        for spec in &config.volumes {
            let volume = if spec.temporary {
                Volume::create_temporary(spec.page_size, 64)
            } else if spec.create && !spec.path.exists() {
                Volume::create(&spec.path, spec.page_size, 64)?
            } else {
                Volume::open(&spec.path, 64)?
            };
            volumes.insert(spec.name.clone(), volume);
        }

        // Spec §4.9 step 2: redo every journaled page image not yet
        // reflected on disk, before any volume is considered open for
        // transactions. `recovered.volume_handles` maps each `IV`
        // binding's handle back to the path it was bound under, which
        // is how a `(volume_handle, page_addr)` pair in the page map
        // resolves to one of the volumes just opened above.
        for (&(volume_handle, page_addr), image) in &recovered.page_images {
            let Some(bound_path) = recovered.volume_handles.get(&volume_handle) else {
                continue;
            };
            let Some(spec) = config
                .volumes
                .iter()
                .find(|spec| spec.path.to_string_lossy() == *bound_path)
            else {
                continue;
            };
            if let Some(volume) = volumes.get(&spec.name) {
                volume.apply_recovered_page(crate::page::PageAddress(page_addr), image)?;
            }
        }

        let ctx = Self {
            config,
            allocator,
            journal,
            volumes: Mutex::new(volumes),
            txn_index: TransactionIndex::new(),
            cleanup: CleanupManager::new(),
            checkpoint: CheckpointManager::new(),
            accumulators: AccumulatorRegistry::new(),
            fatal: FatalLatch::new(),
        };
        tracing::info!(
            transactions_recovered = recovered.transactions.len(),
            volumes = ctx.volumes.lock().len(),
            "strata.open"
        );
        Ok(ctx)
    }

    /// This context's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The shared timestamp allocator.
    pub fn allocator(&self) -> &TimestampAllocator {
        &self.allocator
    }

    /// The shared transaction index.
    pub fn transaction_index(&self) -> &TransactionIndex {
        &self.txn_index
    }

    /// The accumulator registry shared by every volume.
    pub fn accumulators(&self) -> &AccumulatorRegistry {
        &self.accumulators
    }

    /// The cleanup manager's pending-action queue.
    pub fn cleanup(&self) -> &CleanupManager {
        &self.cleanup
    }

    /// Runs `f` with a read lock on the named volume, failing with
    /// [`StrataError::UnderSpecifiedVolume`] if it is not configured.
    pub fn with_volume<T>(&self, name: &str, f: impl FnOnce(&Volume) -> Result<T>) -> Result<T> {
        self.fatal.guard(|| {
            let volumes = self.volumes.lock();
            let volume = volumes
                .get(name)
                .ok_or_else(|| StrataError::UnderSpecifiedVolume(format!("no such volume {name}")))?;
            f(volume)
        })
    }

    /// Begins a new transaction against this context's shared
    /// transaction index, clock, and journal.
    pub fn begin(&self) -> Transaction<'_> {
        Transaction::begin(&self.txn_index, &self.allocator, &self.journal)
    }

    /// Commits `txn` under `policy`, holding the checkpoint manager's
    /// commit-quiescing gate for the duration so a concurrent
    /// checkpoint cannot observe a half-applied commit (spec §4.10
    /// step 1).
    pub fn commit(&self, txn: &mut Transaction<'_>, policy: CommitPolicy) -> Result<Timestamp> {
        let _guard = self.checkpoint.commit_guard();
        self.fatal.guard(|| txn.commit(policy))
    }

    /// Runs one checkpoint across every open volume (spec §4.10).
    pub fn checkpoint(&self) -> Result<Timestamp> {
        self.fatal.guard(|| {
            let volumes = self.volumes.lock();
            let refs: Vec<&Volume> = volumes.values().collect();
            self.checkpoint
                .run(&self.allocator, &self.journal, &refs, &self.accumulators, &self.txn_index)
        })
    }

    /// Drains the cleanup manager's queue against every open volume
    /// (spec §4.11); intended to be called periodically alongside
    /// checkpointing, not inline with foreground transactions.
    pub fn run_cleanup(&self) -> Result<usize> {
        self.fatal.guard(|| {
            let volumes = self.volumes.lock();
            let mut total = 0;
            for volume in volumes.values() {
                total += self.cleanup.run_pending(volume, &self.txn_index)?;
            }
            Ok(total)
        })
    }
}
