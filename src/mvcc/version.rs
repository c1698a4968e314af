//! MVV store/visibility/prune algorithms operating on [`RawValue::Mvv`]
//! version chains (spec §4.5, §4.11).

use crate::mvcc::txn_index::{TransactionIndex, TransactionState, WwOutcome};
use crate::ts::{decode_handle, Timestamp, ValueHandle};
use crate::value::{MvvVersion, RawValue, VersionPayload};

/// Result of attempting to append a new version to an MVV chain.
#[derive(Debug)]
pub enum StoreOutcome {
    /// The version was appended; here is the updated MVV.
    Applied(Vec<MvvVersion>),
    /// A concurrent, still-active transaction holds a conflicting write.
    WriteWriteConflict { holder_start_ts: Timestamp },
}

/// Appends `payload` as a new version written by `writer_handle`
/// (`(start_ts << 8) | step`) onto the existing slot value, per the
/// four-step algorithm in spec §4.5.
///
/// `writer_ts` is the writing transaction's `start_ts`, used to exempt
/// its own earlier versions from the conflict check (so re-writing the
/// same key twice within one transaction never self-conflicts).
pub fn store_into_mvv(
    existing: Option<RawValue>,
    writer_handle: ValueHandle,
    writer_ts: Timestamp,
    payload: VersionPayload,
    index: &TransactionIndex,
) -> StoreOutcome {
    let mut versions = match existing {
        Some(value) => value.into_mvv(writer_handle),
        None => Vec::new(),
    };

    for existing_version in &versions {
        let (existing_ts, _step) = decode_handle(existing_version.handle);
        if existing_ts == writer_ts {
            continue;
        }
        let Some(status) = index.get(existing_ts) else {
            // Older than the floor: necessarily committed and resolved.
            continue;
        };
        if !matches!(status.state(), TransactionState::Active) {
            continue;
        }
        match index.ww_dependency(writer_ts, &status) {
            WwOutcome::Aborted => continue,
            WwOutcome::NoConflict => continue,
            WwOutcome::Blocked => {
                return StoreOutcome::WriteWriteConflict {
                    holder_start_ts: existing_ts,
                }
            }
        }
    }

    versions.push(MvvVersion {
        handle: writer_handle,
        payload,
    });
    StoreOutcome::Applied(versions)
}

/// Walks `versions` newest-first (i.e. in reverse insertion order,
/// since the chain is never re-sorted) looking for the one visible to a
/// reader at `(read_ts, read_step)` per spec §4.5.
pub fn visible_version(
    versions: &[MvvVersion],
    read_ts: Timestamp,
    read_step: u8,
    index: &TransactionIndex,
) -> Option<&VersionPayload> {
    let mut best: Option<(u8, &VersionPayload)> = None;
    for version in versions.iter().rev() {
        let (ts, step) = decode_handle(version.handle);
        if ts == read_ts {
            if step <= read_step {
                if best.map_or(true, |(best_step, _)| step > best_step) {
                    best = Some((step, &version.payload));
                }
            }
            continue;
        }
        if best.is_some() {
            continue;
        }
        let committed_before = match index.get(ts) {
            Some(status) => matches!(status.state(), TransactionState::Committed(commit_ts) if commit_ts <= read_ts),
            None => true, // older than the floor: necessarily committed long ago
        };
        if committed_before {
            best = Some((step, &version.payload));
        }
    }
    best.map(|(_, payload)| payload)
}

/// Returns `true` if `versions`, read from `(read_ts, read_step)`,
/// resolve to a present (non-tombstone) value.
pub fn is_visible_present(
    versions: &[MvvVersion],
    read_ts: Timestamp,
    read_step: u8,
    index: &TransactionIndex,
) -> bool {
    matches!(
        visible_version(versions, read_ts, read_step, index),
        Some(payload) if !payload.is_antivalue()
    )
}

/// Collapses obsolete versions out of an MVV chain (spec §4.11 "prune
/// MVV slots"): a version is obsolete once every currently active
/// reader's possible read_ts is above some other, more recent committed
/// version, or once it belongs to an aborted transaction.
///
/// `min_active_ts` is the oldest `start_ts` any live reader could still
/// query at (the transaction index floor); versions superseded before
/// that point can never be observed again.
pub fn prune(
    versions: Vec<MvvVersion>,
    min_active_ts: Timestamp,
    index: &TransactionIndex,
) -> Vec<MvvVersion> {
    let mut resolved: Vec<(Timestamp, MvvVersion)> = Vec::with_capacity(versions.len());
    for version in versions {
        let (ts, _) = decode_handle(version.handle);
        match index.get(ts) {
            Some(status) => match status.state() {
                TransactionState::Aborted => {
                    status.note_mvv_pruned();
                    continue;
                }
                TransactionState::Committed(commit_ts) => resolved.push((commit_ts, version)),
                TransactionState::Active => resolved.push((ts, version)),
            },
            None => resolved.push((ts, version)),
        }
    }

    if resolved.len() <= 1 {
        return resolved.into_iter().map(|(_, v)| v).collect();
    }

    // Two entries can only share an effective timestamp if they are
    // both versions written by the same transaction (start_ts and
    // commit_ts are each allocated uniquely), so every such group is
    // one writer's own step history. Collapse each group down to its
    // single highest-step entry rather than the first or last one
    // encountered in storage order: a transaction may append a
    // lower-step version after a higher-step one (e.g. `set_step(2);
    // store(...); set_step(1); remove(...)`), and the higher step must
    // still win (Bug1056489).
    let mut by_ts: Vec<(Timestamp, u8, MvvVersion)> = Vec::with_capacity(resolved.len());
    for (effective_ts, version) in resolved {
        let (_, step) = decode_handle(version.handle);
        match by_ts.iter().position(|(ts, _, _)| *ts == effective_ts) {
            Some(idx) => {
                if step > by_ts[idx].1 {
                    by_ts[idx] = (effective_ts, step, version);
                }
            }
            None => by_ts.push((effective_ts, step, version)),
        }
    }

    // Keep every (now-collapsed) version whose effective commit_ts is
    // >= min_active_ts (still possibly the newest-visible for some live
    // reader), plus the single newest version at or below that floor
    // (the one every reader below the floor would still see).
    let mut kept = Vec::new();
    let mut newest_below_floor: Option<(Timestamp, MvvVersion)> = None;
    for (effective_ts, _step, version) in by_ts {
        if effective_ts >= min_active_ts {
            kept.push(version);
        } else {
            match &newest_below_floor {
                Some((best_ts, _)) if *best_ts >= effective_ts => {}
                _ => newest_below_floor = Some((effective_ts, version)),
            }
        }
    }
    if let Some((_, version)) = newest_below_floor {
        kept.insert(0, version);
    }
    kept
}
