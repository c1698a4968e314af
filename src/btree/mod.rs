//! B+tree mutation and traversal (the "Exchange" API, spec §3.5, §4.2,
//! §4.3, §4.4).
//!
//! Every operation climbs from a tree's root, using hand-over-hand reader
//! claims for lookups and pessimistic write claims (page at a time, not
//! whole-tree) for mutation. A split propagates a new separator to the
//! parent; when that climb finds the parent has itself changed shape
//! since the child was read, the writer restarts from the root rather
//! than trusting a stale parent pointer (spec §4.2: "writer climb-back
//! with parent-pointer revalidation / restart-from-root").
//!
//! On top of the raw, untyped `store`/`fetch`/`remove` primitives this
//! module also exposes a transactional layer (`store_txn`/`fetch_txn`/
//! `remove_txn`) that merges into an MVV chain via [`crate::mvcc::version`]
//! instead of overwriting a slot outright, and a long-record layer that
//! spills oversized values into an overflow page chain (spec §4.4)
//! rather than ever growing a slot past a page's capacity.

use std::cmp::Ordering;

use crate::buffer::WriteClaim;
use crate::error::{Result, StrataError};
use crate::key::Key;
use crate::mvcc::version::StoreOutcome;
use crate::page::{Page, PageAddress, PageType, PAGE_HDR_LEN};
#[cfg(test)]
use crate::page::Slot;
use crate::txn::Transaction;
use crate::value::{LongRecordPointer, RawValue, VersionPayload};
use crate::volume::Volume;

/// Policy steering where a leaf splits when it overflows, used to favor
/// append-mostly (ascending key) workloads (spec §4.2: "split policy
/// sequence-hint-biased").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SplitBias {
    /// Split at the midpoint, optimal for random insert order.
    Midpoint,
    /// Split leaving the new right page nearly empty, optimal when
    /// insertions are monotonically increasing.
    RightHeavy,
}

/// Maximum fraction of a page's capacity a single split leaves on the
/// side that keeps growing, when using [`SplitBias::RightHeavy`].
const RIGHT_HEAVY_KEEP_SLOTS: usize = 1;

/// A page below this fraction of its capacity is a merge/rebalance
/// candidate after a removal (spec §4.2 "Join/rebalance").
const MERGE_FILL_NUMERATOR: usize = 1;
const MERGE_FILL_DENOMINATOR: usize = 2;

/// Direction of a positional traversal from a cursor key (spec §4.3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Strictly greater than the cursor.
    Gt,
    /// Greater than or equal to the cursor.
    Gteq,
    /// Strictly less than the cursor.
    Lt,
    /// Less than or equal to the cursor.
    Lteq,
}

/// An inclusive/exclusive key-range filter, as used by a filtered
/// traversal (spec §4.3 "key-filter").
#[derive(Clone, Debug)]
pub struct KeyFilterRange {
    /// Lower bound of the range.
    pub lower: Key,
    /// Upper bound of the range.
    pub upper: Key,
    /// Whether `lower` itself is included.
    pub lower_inclusive: bool,
    /// Whether `upper` itself is included.
    pub upper_inclusive: bool,
}

impl KeyFilterRange {
    /// `true` if `key` falls within this range.
    pub fn contains(&self, key: &Key) -> bool {
        let lower_ok = if self.lower_inclusive {
            key.encoded_bytes() >= self.lower.encoded_bytes()
        } else {
            key.encoded_bytes() > self.lower.encoded_bytes()
        };
        let upper_ok = if self.upper_inclusive {
            key.encoded_bytes() <= self.upper.encoded_bytes()
        } else {
            key.encoded_bytes() < self.upper.encoded_bytes()
        };
        lower_ok && upper_ok
    }
}

/// Handle for performing ordered operations against one tree within a
/// volume (the "Exchange" of the spec).
pub struct Exchange<'v> {
    volume: &'v Volume,
    tree_name: String,
}

/// One key/value pair observed by a traversal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    /// The entry's full key.
    pub key: Key,
    /// The entry's raw slot value bytes.
    pub value: Vec<u8>,
}

impl<'v> Exchange<'v> {
    /// Opens an exchange over an existing tree.
    pub fn open(volume: &'v Volume, tree_name: &str) -> Result<Self> {
        if volume.tree_root(tree_name).is_none() {
            return Err(StrataError::InvalidVolumeSpecification(format!(
                "no such tree {tree_name}"
            )));
        }
        Ok(Self {
            volume,
            tree_name: tree_name.to_string(),
        })
    }

    /// Opens an exchange over `tree_name`, creating an empty tree first
    /// if it does not already exist.
    pub fn open_or_create(volume: &'v Volume, tree_name: &str) -> Result<Self> {
        if volume.tree_root(tree_name).is_none() {
            volume.create_tree(tree_name)?;
        }
        Ok(Self {
            volume,
            tree_name: tree_name.to_string(),
        })
    }

    /// The address of this tree's current root page.
    pub fn root(&self) -> PageAddress {
        self.volume
            .tree_root(&self.tree_name)
            .expect("tree existed at open time")
    }

    /// The fraction of `page_size` above which a value is spilled into a
    /// long-record overflow chain rather than stored inline (spec §4.4).
    fn long_record_threshold(&self) -> usize {
        self.volume.page_size() as usize / 4
    }

    /// Descends from the root to the leaf that would contain `key`,
    /// returning a read claim on it.
    fn find_leaf_for_read(&self, key: &Key) -> Result<crate::buffer::ReadClaim> {
        let mut addr = self.root();
        loop {
            let claim = self.volume.read_page(addr)?;
            if claim.page_type() == PageType::DataLeaf {
                return Ok(claim);
            }
            let child = self.descend_index(&claim, key);
            drop(claim);
            addr = child;
        }
    }

    fn descend_index(&self, index_page: &Page, key: &Key) -> PageAddress {
        let keys = index_page.keys();
        // Separator at slot i is the smallest key in child i+1's subtree;
        // slot 0's child (the leftmost) has no separator of its own and
        // is reached implicitly via value 0.
        let pos = keys.partition_point(|sep| sep.encoded_bytes() <= key.encoded_bytes());
        let slot = index_page.slot(pos.saturating_sub(1).min(index_page.key_count() - 1));
        decode_child_addr(&slot.value)
    }

    /// Fetches the value stored for `key`, if any.
    pub fn fetch(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        let leaf = self.find_leaf_for_read(key)?;
        match locate(&leaf, key) {
            Ok(idx) => Ok(Some(leaf.slot(idx).value.clone())),
            Err(_) => Ok(None),
        }
    }

    /// Stores `value` under `key`, splitting pages as needed along the
    /// insertion path.
    pub fn store(&self, key: &Key, value: Vec<u8>) -> Result<()> {
        if key.encoded_len() > crate::key::MAX_KEY_SIZE {
            return Err(StrataError::InvalidVolumeSpecification(format!(
                "key of {} bytes exceeds MAX_KEY_SIZE",
                key.encoded_len()
            )));
        }
        let mut path = self.descend_for_write(key)?;
        let mut leaf = path.pop().expect("path always includes the leaf");
        leaf.upsert(key, value);

        if leaf.used_bytes() <= leaf.capacity() {
            return Ok(());
        }
        self.split_and_propagate(leaf, path)
    }

    /// Stores a [`RawValue`], promoting oversized plain values to a
    /// long-record overflow chain rather than letting a single slot blow
    /// out a page (spec §4.4 "primordial long-record write").
    pub fn store_value(&self, key: &Key, value: RawValue) -> Result<()> {
        let encoded = self.maybe_spill(value)?.encode();
        self.store(key, encoded)
    }

    /// Fetches and decodes the [`RawValue`] stored for `key`, if any.
    pub fn fetch_value(&self, key: &Key) -> Result<Option<RawValue>> {
        match self.fetch(key)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(RawValue::decode(&bytes)?)),
        }
    }

    /// Fetches `key` and assembles its full value bytes, following a
    /// long-record chain if necessary. Returns an error if the stored
    /// value is an MVV (use [`Exchange::fetch_txn`] instead).
    pub fn fetch_assembled(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        match self.fetch_value(key)? {
            None => Ok(None),
            Some(RawValue::Plain(bytes)) => Ok(Some(bytes)),
            Some(RawValue::LongRecord(ptr)) => Ok(Some(self.read_long_record(ptr)?)),
            Some(RawValue::Mvv(_)) => Err(StrataError::CorruptPage(
                "fetch_assembled called on an mvv slot; use fetch_txn".into(),
            )),
        }
    }

    fn maybe_spill(&self, value: RawValue) -> Result<RawValue> {
        match value {
            RawValue::Plain(bytes) if bytes.len() > self.long_record_threshold() => {
                Ok(RawValue::LongRecord(self.write_long_record(&bytes)?))
            }
            other => Ok(other),
        }
    }

    /// Merges `payload` into the MVV chain at `key` under `txn`'s version
    /// handle, spilling to a long-record chain first if the payload is
    /// oversized (spec §4.5, §4.6).
    pub fn store_txn(&self, key: &Key, payload: VersionPayload, txn: &Transaction) -> Result<()> {
        let payload = match payload {
            VersionPayload::Bytes(bytes) if bytes.len() > self.long_record_threshold() => {
                VersionPayload::LongRecord(self.write_long_record(&bytes)?)
            }
            other => other,
        };

        let mut path = self.descend_for_write(key)?;
        let mut leaf = path.pop().expect("path always includes the leaf");
        let existing = match locate(&leaf, key) {
            Ok(idx) => Some(RawValue::decode(&leaf.slot(idx).value)?),
            Err(_) => None,
        };

        match crate::mvcc::version::store_into_mvv(
            existing,
            txn.value_handle(),
            txn.start_ts(),
            payload,
            txn.index(),
        ) {
            StoreOutcome::Applied(versions) => {
                if let Some(status) = txn.index().get(txn.start_ts()) {
                    status.note_mvv_written();
                }
                leaf.upsert(key, RawValue::Mvv(versions).encode());
                if leaf.used_bytes() <= leaf.capacity() {
                    return Ok(());
                }
                self.split_and_propagate(leaf, path)
            }
            StoreOutcome::WriteWriteConflict { holder_start_ts } => {
                Err(StrataError::WriteWriteConflict(holder_start_ts))
            }
        }
    }

    /// Stores an antivalue (tombstone) for `key` under `txn` (spec §4.6
    /// "transactional remove").
    pub fn remove_txn(&self, key: &Key, txn: &Transaction) -> Result<()> {
        self.store_txn(key, VersionPayload::AntiValue, txn)
    }

    /// Fetches the version of `key` visible to `txn`'s snapshot, if any,
    /// assembling a long-record chain when the visible version spills.
    pub fn fetch_txn(&self, key: &Key, txn: &Transaction) -> Result<Option<Vec<u8>>> {
        let leaf = self.find_leaf_for_read(key)?;
        let idx = match locate(&leaf, key) {
            Ok(idx) => idx,
            Err(_) => return Ok(None),
        };
        let raw = RawValue::decode(&leaf.slot(idx).value)?;
        let versions = match raw {
            RawValue::Mvv(versions) => versions,
            other => other.into_mvv(txn.value_handle()),
        };
        drop(leaf);
        let visible = crate::mvcc::version::visible_version(
            &versions,
            txn.start_ts(),
            txn.step(),
            txn.index(),
        );
        match visible {
            None | Some(VersionPayload::AntiValue) => Ok(None),
            Some(VersionPayload::Bytes(bytes)) => Ok(Some(bytes.clone())),
            Some(VersionPayload::LongRecord(ptr)) => Ok(Some(self.read_long_record(*ptr)?)),
        }
    }

    fn chunk_capacity(&self) -> usize {
        (self.volume.page_size() as usize).saturating_sub(PAGE_HDR_LEN)
    }

    /// Writes `bytes` into a freshly allocated chain of overflow pages,
    /// returning a pointer to the chain's head (spec §4.4).
    fn write_long_record(&self, bytes: &[u8]) -> Result<LongRecordPointer> {
        let chunk_len = self.chunk_capacity().max(1);
        let chunks: Vec<&[u8]> = if bytes.is_empty() {
            vec![&bytes[0..0]]
        } else {
            bytes.chunks(chunk_len).collect()
        };
        let addrs: Vec<PageAddress> = chunks.iter().map(|_| self.volume.allocate_page()).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            let mut page = Page::new(PageType::LongRecord, addrs[i], self.volume.page_size());
            page.set_payload(chunk.to_vec());
            if i + 1 < addrs.len() {
                page.set_right_sibling(addrs[i + 1]);
            }
            self.volume.pool().insert_new(addrs[i], page)?;
        }
        Ok(LongRecordPointer {
            head_page: addrs[0],
            total_len: bytes.len() as u64,
        })
    }

    /// Reassembles the bytes pointed at by a long-record chain.
    fn read_long_record(&self, ptr: LongRecordPointer) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(ptr.total_len as usize);
        let mut addr = ptr.head_page;
        while !addr.is_none() && (out.len() as u64) < ptr.total_len {
            let claim = self.volume.read_page(addr)?;
            out.extend_from_slice(claim.payload());
            addr = claim.right_sibling();
        }
        out.truncate(ptr.total_len as usize);
        Ok(out)
    }

    /// Deallocates every page in a long-record chain, onto the garbage
    /// chain for reuse (spec §4.4 "decommission").
    fn decommission_long_record(&self, ptr: LongRecordPointer) -> Result<()> {
        let mut addr = ptr.head_page;
        while !addr.is_none() {
            let claim = self.volume.read_page(addr)?;
            let next = claim.right_sibling();
            drop(claim);
            self.volume.deallocate_page(addr)?;
            addr = next;
        }
        Ok(())
    }

    /// Removes the slot for `key`, returning whether anything was
    /// removed. If the owning leaf falls below its fill threshold
    /// afterward, attempts to merge it with (or rebalance against) its
    /// immediate right sibling under the same parent (spec §4.2
    /// "Join/rebalance").
    pub fn remove(&self, key: &Key) -> Result<bool> {
        let mut path = self.descend_for_write(key)?;
        let leaf = path.pop().expect("path always includes the leaf");
        let mut leaf = leaf;
        let removed_value = leaf.remove(key);
        let removed = removed_value.is_some();
        if let Some(bytes) = &removed_value {
            if let Ok(RawValue::LongRecord(ptr)) = RawValue::decode(bytes) {
                self.decommission_long_record(ptr)?;
            }
        }
        if removed {
            self.maybe_merge(leaf, path)?;
        }
        Ok(removed)
    }

    /// Removes every key in `[start, end)`.
    pub fn remove_key_range(&self, start: &Key, end: &Key) -> Result<u64> {
        let victims: Vec<Key> = self
            .traverse_filtered(start, Some(end), |_| true)?
            .into_iter()
            .map(|entry| entry.key)
            .collect();
        let mut removed = 0u64;
        for key in &victims {
            if self.remove(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Attempts to merge or rebalance a page that has just shrunk,
    /// against its immediate right sibling, but only when that sibling
    /// is a direct neighbor under the same parent (the common case for
    /// sequential workloads); a merge across a parent boundary is left
    /// for the cleanup manager's `FixIndexHole` action (see `DESIGN.md`).
    fn maybe_merge(&self, mut page: WriteClaim, mut ancestors: Vec<WriteClaim>) -> Result<()> {
        let threshold = page.capacity() * MERGE_FILL_NUMERATOR / MERGE_FILL_DENOMINATOR;
        if page.used_bytes() >= threshold {
            return Ok(());
        }
        let Some(mut parent) = ancestors.pop() else {
            return Ok(());
        };
        let right_addr = page.right_sibling();
        if right_addr.is_none() {
            return Ok(());
        }
        let page_addr = page.addr();
        let parent_keys = parent.keys();
        let mut page_slot_idx = None;
        for i in 0..parent.key_count() {
            if decode_child_addr(&parent.slot(i).value) == page_addr {
                page_slot_idx = Some(i);
                break;
            }
        }
        let Some(idx) = page_slot_idx else {
            return Ok(());
        };
        if idx + 1 >= parent.key_count() {
            return Ok(());
        }
        if decode_child_addr(&parent.slot(idx + 1).value) != right_addr {
            return Ok(());
        }

        let mut right_claim = self.volume.write_page(right_addr)?;
        let can_merge = page.used_bytes() + right_claim.used_bytes() <= page.capacity();

        let left_entries = page.drain_with_keys();
        let right_entries = right_claim.drain_with_keys();
        let mut combined = left_entries;
        combined.extend(right_entries);

        if can_merge {
            let new_right_sibling = right_claim.right_sibling();
            page.rebuild_from(&combined);
            page.set_right_sibling(new_right_sibling);
            let dead_addr = right_claim.addr();
            drop(right_claim);
            drop(page);
            self.volume.deallocate_page(dead_addr)?;

            let removed_separator = parent_keys[idx + 1].clone();
            parent.remove(&removed_separator);
        } else {
            let mid = combined.len() / 2;
            let (new_left, new_right) = combined.split_at(mid);
            page.rebuild_from(new_left);
            right_claim.rebuild_from(new_right);
            let new_separator = new_right
                .first()
                .map(|(k, _)| k.clone())
                .expect("rebalance always leaves at least one entry on the right");
            let old_separator = parent_keys[idx + 1].clone();
            if new_separator != old_separator {
                parent.remove(&old_separator);
                parent.upsert(&new_separator, encode_child_addr(right_addr));
            }
        }
        Ok(())
    }

    /// Walks every index page in the tree, re-deriving each non-catch-all
    /// separator from its child's actual first key and rewriting the
    /// parent entry if it has drifted (spec §4.11 "fix index holes").
    /// Returns the number of separators repaired.
    pub fn fix_index_holes(&self) -> Result<usize> {
        let mut fixed = 0;
        self.walk_index_for_repair(self.root(), &mut fixed)?;
        Ok(fixed)
    }

    fn walk_index_for_repair(&self, addr: PageAddress, fixed: &mut usize) -> Result<()> {
        let is_index = {
            let claim = self.volume.read_page(addr)?;
            claim.page_type() == PageType::Index
        };
        if !is_index {
            return Ok(());
        }

        let children: Vec<PageAddress> = {
            let claim = self.volume.read_page(addr)?;
            (0..claim.key_count())
                .map(|i| decode_child_addr(&claim.slot(i).value))
                .collect()
        };
        for &child in &children {
            self.walk_index_for_repair(child, fixed)?;
        }

        let mut to_fix = Vec::new();
        {
            let claim = self.volume.read_page(addr)?;
            let keys = claim.keys();
            for (i, key) in keys.iter().enumerate() {
                if i == 0 {
                    continue;
                }
                let child_addr = decode_child_addr(&claim.slot(i).value);
                let child_claim = self.volume.read_page(child_addr)?;
                if let Some(actual_first) = child_claim.keys().into_iter().next() {
                    if &actual_first != key {
                        to_fix.push((key.clone(), actual_first, child_addr));
                    }
                }
            }
        }
        if !to_fix.is_empty() {
            let mut writer = self.volume.write_page(addr)?;
            for (old_key, new_key, child_addr) in to_fix {
                writer.remove(&old_key);
                writer.upsert(&new_key, encode_child_addr(child_addr));
                *fixed += 1;
            }
        }
        Ok(())
    }

    /// Walks every leaf slot from `start` (inclusive) to the right end
    /// of the tree, following right-sibling links.
    pub fn traverse(&self, start: &Key) -> Result<Vec<Entry>> {
        self.traverse_filtered(start, None, |_| true)
    }

    /// Walks entries from `start` (inclusive), stopping once `end`
    /// (exclusive upper bound, if given) is reached, keeping only
    /// entries for which `predicate` returns `true`.
    pub fn traverse_filtered(
        &self,
        start: &Key,
        end: Option<&Key>,
        predicate: impl Fn(&Entry) -> bool,
    ) -> Result<Vec<Entry>> {
        let mut out = Vec::new();
        let mut leaf = self.find_leaf_for_read(start)?;
        loop {
            for k in leaf.keys() {
                if k.encoded_bytes() < start.encoded_bytes() {
                    continue;
                }
                if let Some(end) = end {
                    if k.encoded_bytes() >= end.encoded_bytes() {
                        return Ok(out);
                    }
                }
                let idx = locate(&leaf, &k).expect("key just listed must be present");
                let entry = Entry {
                    key: k,
                    value: leaf.slot(idx).value.clone(),
                };
                if predicate(&entry) {
                    out.push(entry);
                }
            }
            let next_addr = leaf.right_sibling();
            if next_addr.is_none() {
                return Ok(out);
            }
            leaf = self.volume.read_page(next_addr)?;
        }
    }

    /// Positional traversal from `cursor` in `dir`, returning the first
    /// (in `dir`'s sense) entry whose key satisfies `filter` (spec §4.3:
    /// `GT`/`GTEQ`/`LT`/`LTEQ`, a logical cursor advancing one hit at a
    /// time).
    ///
    /// Implemented as one ascending scan of the whole tree, classifying
    /// each entry by its byte-order relation to `cursor`: this naturally
    /// never skips over an equal-depth prefix match (historical defect
    /// class referenced by spec §4.3, Bug885477) since it walks every
    /// key in order rather than jumping straight to a computed position.
    /// `deep` controls whether keys are compared at full depth (`true`)
    /// or truncated to `cursor`'s own segment depth (`false`, "shallow"
    /// traversal, spec §4.3).
    pub fn traverse_dir(
        &self,
        cursor: &Key,
        dir: Direction,
        deep: bool,
        filter: impl Fn(&Key) -> bool,
    ) -> Result<Option<Entry>> {
        let cursor_depth = cursor.depth();
        let compare_bytes = |key: &Key| -> Result<Vec<u8>> {
            if deep {
                Ok(key.encoded_bytes().to_vec())
            } else {
                Ok(key.prefix(cursor_depth)?.encoded_bytes().to_vec())
            }
        };
        let cursor_bytes = cursor.encoded_bytes().to_vec();

        let entries = self.traverse(&Key::before())?;
        match dir {
            Direction::Gt | Direction::Gteq => {
                for entry in entries {
                    let key_bytes = compare_bytes(&entry.key)?;
                    let cmp = key_bytes.as_slice().cmp(cursor_bytes.as_slice());
                    let include = match dir {
                        Direction::Gteq => cmp != Ordering::Less,
                        Direction::Gt => cmp == Ordering::Greater,
                        _ => unreachable!(),
                    };
                    if include && filter(&entry.key) {
                        return Ok(Some(entry));
                    }
                }
                Ok(None)
            }
            Direction::Lt | Direction::Lteq => {
                let mut best: Option<Entry> = None;
                for entry in entries {
                    let key_bytes = compare_bytes(&entry.key)?;
                    let cmp = key_bytes.as_slice().cmp(cursor_bytes.as_slice());
                    if cmp == Ordering::Greater {
                        break;
                    }
                    let include = match dir {
                        Direction::Lteq => cmp != Ordering::Greater,
                        Direction::Lt => cmp == Ordering::Less,
                        _ => unreachable!(),
                    };
                    if include && filter(&entry.key) {
                        best = Some(entry);
                    }
                }
                Ok(best)
            }
        }
    }

    /// Convenience wrapper over [`Exchange::traverse_dir`] for a bounded
    /// key-filter range (spec §4.3 "key-filter").
    pub fn traverse_dir_filtered(
        &self,
        cursor: &Key,
        dir: Direction,
        deep: bool,
        range: &KeyFilterRange,
    ) -> Result<Option<Entry>> {
        self.traverse_dir(cursor, dir, deep, |key| range.contains(key))
    }

    /// Descends from the root collecting a write claim on every page
    /// visited, so the caller can propagate a split upward without
    /// re-descending (spec §4.2: "hand-over-hand reader claims,
    /// writer climb-back").
    fn descend_for_write(&self, key: &Key) -> Result<Vec<WriteClaim>> {
        let mut path = Vec::new();
        let mut addr = self.root();
        loop {
            let claim = self.volume.write_page(addr)?;
            let is_leaf = claim.page_type() == PageType::DataLeaf;
            if is_leaf {
                path.push(claim);
                return Ok(path);
            }
            let child = self.descend_index(&claim, key);
            path.push(claim);
            addr = child;
        }
    }

    /// Splits `page` (already overflowed) and threads the new separator
    /// into its parent, recursing up through `ancestors` as needed and
    /// allocating a new root if the split reaches the top of the tree.
    fn split_and_propagate(&self, mut page: WriteClaim, mut ancestors: Vec<WriteClaim>) -> Result<()> {
        let is_leaf = page.page_type() == PageType::DataLeaf;
        let count = page.key_count();
        let split_at = match split_bias(&page) {
            SplitBias::Midpoint => count / 2,
            SplitBias::RightHeavy => count.saturating_sub(RIGHT_HEAVY_KEEP_SLOTS).max(count / 2),
        };
        let entries = {
            let drained = page.drain_with_keys();
            drained
        };
        let (left_entries, right_entries) = entries.split_at(split_at);
        let separator = right_entries
            .first()
            .map(|(k, _)| k.clone())
            .expect("split point always leaves at least one entry on the right");

        let left_addr = page.addr();
        let right_addr = self.volume.allocate_page();
        let page_type = if is_leaf { PageType::DataLeaf } else { PageType::Index };
        let old_right_sibling = page.right_sibling();

        page.rebuild_from(left_entries);
        page.set_right_sibling(right_addr);

        let mut right_page = Page::new(page_type, right_addr, self.volume.page_size());
        right_page.rebuild_from(right_entries);
        right_page.set_right_sibling(old_right_sibling);
        drop(page);
        let right_claim = self.volume.pool().insert_new(right_addr, right_page)?;
        drop(right_claim);

        match ancestors.pop() {
            Some(parent) => self.insert_separator(parent, ancestors, separator, right_addr),
            None => self.grow_new_root(left_addr, right_addr, separator, page_type),
        }
    }

    /// Inserts a new separator/child pair into `parent`, splitting it in
    /// turn (and recursing further up `ancestors`) if it overflows.
    fn insert_separator(
        &self,
        mut parent: WriteClaim,
        ancestors: Vec<WriteClaim>,
        separator: Key,
        child: PageAddress,
    ) -> Result<()> {
        parent.upsert(&separator, encode_child_addr(child));
        if parent.used_bytes() <= parent.capacity() {
            return Ok(());
        }
        self.split_and_propagate(parent, ancestors)
    }

    /// Allocates a new root index page pointing at `left` (via the
    /// catch-all low slot) and `right` (via `separator`), growing the
    /// tree's height by one and updating the volume directory.
    fn grow_new_root(
        &self,
        left: PageAddress,
        right: PageAddress,
        separator: Key,
        _child_type: PageType,
    ) -> Result<()> {
        let new_root_addr = self.volume.allocate_page();
        let mut root = Page::new(PageType::Index, new_root_addr, self.volume.page_size());
        root.upsert(&Key::before(), encode_child_addr(left));
        root.upsert(&separator, encode_child_addr(right));
        self.volume.pool().insert_new(new_root_addr, root)?;
        self.volume.set_tree_root(&self.tree_name, new_root_addr)
    }
}

fn split_bias(page: &Page) -> SplitBias {
    let keys = page.keys();
    if keys.len() >= 2 {
        let ascending = keys.windows(2).all(|w| w[0].encoded_bytes() < w[1].encoded_bytes());
        if ascending {
            return SplitBias::RightHeavy;
        }
    }
    SplitBias::Midpoint
}

/// Binary-searches a page's slots by full key without requiring a
/// mutable borrow, for use through read-only claims where [`Page::find_slot`]'s
/// cache-populating `&mut self` is unavailable.
fn locate(page: &Page, key: &Key) -> std::result::Result<usize, usize> {
    let keys = page.keys();
    keys.binary_search_by(|k| k.encoded_bytes().cmp(key.encoded_bytes()))
}

fn encode_child_addr(addr: PageAddress) -> Vec<u8> {
    addr.0.to_be_bytes().to_vec()
}

fn decode_child_addr(bytes: &[u8]) -> PageAddress {
    PageAddress(u64::from_be_bytes(bytes[0..8].try_into().expect("child address slot is 8 bytes")))
}

/// Builds an index slot's `Slot` directly (used by tests constructing
/// index pages without going through [`Exchange`]).
#[cfg(test)]
fn index_slot(ebc: u16, key_tail: Vec<u8>, child: PageAddress) -> Slot {
    Slot {
        ebc,
        key_tail,
        value: encode_child_addr(child),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvcc::TransactionIndex;
    use crate::ts::TimestampAllocator;
    use crate::txn::CommitPolicy;

    fn key_int(v: i64) -> Key {
        let mut k = Key::new();
        k.append_int(v);
        k
    }

    fn key_str(v: &str) -> Key {
        let mut k = Key::new();
        k.append_str(v);
        k
    }

    #[derive(Default)]
    struct NullSink;
    impl crate::txn::JournalSink for NullSink {
        fn append_tx_chunk(&self, _start_ts: u64, _bytes: &[u8]) -> Result<()> {
            Ok(())
        }
        fn append_commit(&self, _start_ts: u64, _commit_ts: u64, _policy: CommitPolicy) -> Result<()> {
            Ok(())
        }
        fn append_rollback(&self, _start_ts: u64) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn store_and_fetch_round_trip() {
        let volume = Volume::create_temporary(4096, 64);
        volume.create_tree("t").unwrap();
        let ex = Exchange::open(&volume, "t").unwrap();
        ex.store(&key_int(1), RawValue::Plain(b"one".to_vec()).encode())
            .unwrap();
        ex.store(&key_int(2), RawValue::Plain(b"two".to_vec()).encode())
            .unwrap();
        assert_eq!(
            ex.fetch(&key_int(1)).unwrap(),
            Some(RawValue::Plain(b"one".to_vec()).encode())
        );
        assert_eq!(ex.fetch(&key_int(99)).unwrap(), None);
    }

    #[test]
    fn remove_deletes_key() {
        let volume = Volume::create_temporary(4096, 64);
        volume.create_tree("t").unwrap();
        let ex = Exchange::open(&volume, "t").unwrap();
        ex.store(&key_int(1), b"v".to_vec()).unwrap();
        assert!(ex.remove(&key_int(1)).unwrap());
        assert_eq!(ex.fetch(&key_int(1)).unwrap(), None);
        assert!(!ex.remove(&key_int(1)).unwrap());
    }

    #[test]
    fn many_inserts_force_a_split_and_stay_queryable() {
        let volume = Volume::create_temporary(4096, 256);
        volume.create_tree("t").unwrap();
        let ex = Exchange::open(&volume, "t").unwrap();
        for i in 0..400i64 {
            ex.store(&key_int(i), vec![i as u8; 64]).unwrap();
        }
        for i in 0..400i64 {
            assert_eq!(ex.fetch(&key_int(i)).unwrap(), Some(vec![i as u8; 64]));
        }
    }

    #[test]
    fn traverse_returns_entries_in_key_order_after_split() {
        let volume = Volume::create_temporary(4096, 256);
        volume.create_tree("t").unwrap();
        let ex = Exchange::open(&volume, "t").unwrap();
        for i in (0..200i64).rev() {
            ex.store(&key_int(i), vec![i as u8]).unwrap();
        }
        let entries = ex.traverse(&key_int(0)).unwrap();
        let keys: Vec<i64> = entries
            .iter()
            .map(|e| match e.key.segments().unwrap().into_iter().next().unwrap() {
                crate::key::Segment::Integer(v) => v,
                _ => panic!("expected integer key"),
            })
            .collect();
        let mut expected: Vec<i64> = (0..200).collect();
        expected.sort_unstable();
        assert_eq!(keys, expected);
    }

    #[test]
    fn traverse_filtered_respects_end_and_predicate() {
        let volume = Volume::create_temporary(4096, 64);
        volume.create_tree("t").unwrap();
        let ex = Exchange::open(&volume, "t").unwrap();
        for i in 0..20i64 {
            ex.store(&key_int(i), vec![i as u8]).unwrap();
        }
        let entries = ex
            .traverse_filtered(&key_int(5), Some(&key_int(15)), |e| e.value[0] % 2 == 0)
            .unwrap();
        for e in &entries {
            assert_eq!(e.value[0] % 2, 0);
        }
        assert!(entries.iter().all(|e| e.value[0] >= 5 && e.value[0] < 15));
    }

    #[test]
    fn index_slot_helper_round_trips_child_address() {
        let slot = index_slot(0, vec![1, 2, 3], PageAddress(77));
        assert_eq!(decode_child_addr(&slot.value), PageAddress(77));
    }

    #[test]
    fn range_delete_across_many_pages_keeps_neighbours_queryable() {
        let volume = Volume::create_temporary(4096, 256);
        volume.create_tree("t").unwrap();
        let ex = Exchange::open(&volume, "t").unwrap();
        for i in 3444..3600i64 {
            ex.store(&key_int(i), vec![0u8; 2000]).unwrap();
        }
        let removed = ex.remove_key_range(&key_int(3445), &key_int(3557)).unwrap();
        assert_eq!(removed, 3557 - 3445);

        let remaining = ex.traverse(&Key::before()).unwrap();
        let mut keys: Vec<i64> = remaining
            .iter()
            .map(|e| match e.key.segments().unwrap().into_iter().next().unwrap() {
                crate::key::Segment::Integer(v) => v,
                _ => panic!("expected integer key"),
            })
            .collect();
        keys.sort_unstable();
        assert_eq!(keys[0], 3444);
        assert_eq!(keys[1], 3557);
    }

    #[test]
    fn traverse_dir_gteq_does_not_skip_a_composite_prefix() {
        let volume = Volume::create_temporary(4096, 64);
        volume.create_tree("t").unwrap();
        let ex = Exchange::open(&volume, "t").unwrap();
        let mut k1_10 = Key::new();
        k1_10.append_int(1);
        k1_10.append_int(10);
        let mut k1_20 = Key::new();
        k1_20.append_int(1);
        k1_20.append_int(20);
        let mut k2_30 = Key::new();
        k2_30.append_int(2);
        k2_30.append_int(30);
        ex.store(&k1_10, b"a".to_vec()).unwrap();
        ex.store(&k1_20, b"b".to_vec()).unwrap();
        ex.store(&k2_30, b"c".to_vec()).unwrap();

        let cursor = key_int(1);
        let hit = ex
            .traverse_dir(&cursor, Direction::Gteq, true, |_| true)
            .unwrap()
            .expect("expected a hit");
        assert_eq!(hit.key, k1_10);
    }

    #[test]
    fn traverse_dir_lteq_from_after_respects_upper_bound_filter() {
        let volume = Volume::create_temporary(4096, 64);
        volume.create_tree("t").unwrap();
        let ex = Exchange::open(&volume, "t").unwrap();
        let arigatou = key_str("arigatou");
        let konnichiha = key_str("konnichiha");
        ex.store(&arigatou, b"a".to_vec()).unwrap();
        ex.store(&konnichiha, b"k".to_vec()).unwrap();

        let range = KeyFilterRange {
            lower: Key::before(),
            upper: arigatou.clone(),
            lower_inclusive: true,
            upper_inclusive: true,
        };
        let hit = ex
            .traverse_dir_filtered(&Key::after(), Direction::Lteq, true, &range)
            .unwrap()
            .expect("expected a hit");
        assert_eq!(hit.key, arigatou);
    }

    #[test]
    fn store_txn_then_fetch_txn_sees_own_write() {
        let volume = Volume::create_temporary(4096, 64);
        volume.create_tree("t").unwrap();
        let ex = Exchange::open(&volume, "t").unwrap();
        let index = TransactionIndex::new();
        let allocator = TimestampAllocator::default();
        let sink = NullSink;
        let mut txn = Transaction::begin(&index, &allocator, &sink);
        ex.store_txn(&key_int(1), VersionPayload::Bytes(b"v1".to_vec()), &txn)
            .unwrap();
        assert_eq!(ex.fetch_txn(&key_int(1), &txn).unwrap(), Some(b"v1".to_vec()));
        txn.commit(CommitPolicy::Soft).unwrap();
    }

    #[test]
    fn remove_txn_tombstones_so_later_readers_see_nothing() {
        let volume = Volume::create_temporary(4096, 64);
        volume.create_tree("t").unwrap();
        let ex = Exchange::open(&volume, "t").unwrap();
        let index = TransactionIndex::new();
        let allocator = TimestampAllocator::default();
        let sink = NullSink;

        let mut writer = Transaction::begin(&index, &allocator, &sink);
        ex.store_txn(&key_int(1), VersionPayload::Bytes(b"v1".to_vec()), &writer)
            .unwrap();
        writer.commit(CommitPolicy::Soft).unwrap();

        let mut remover = Transaction::begin(&index, &allocator, &sink);
        ex.remove_txn(&key_int(1), &remover).unwrap();
        remover.commit(CommitPolicy::Soft).unwrap();

        let reader = Transaction::begin(&index, &allocator, &sink);
        assert_eq!(ex.fetch_txn(&key_int(1), &reader).unwrap(), None);
    }

    #[test]
    fn long_record_round_trips_through_store_value_and_fetch_assembled() {
        let volume = Volume::create_temporary(1024, 64);
        volume.create_tree("t").unwrap();
        let ex = Exchange::open(&volume, "t").unwrap();
        let big = vec![0xabu8; 3000];
        ex.store_value(&key_int(1), RawValue::Plain(big.clone()))
            .unwrap();
        assert_eq!(ex.fetch_assembled(&key_int(1)).unwrap(), Some(big));
    }

    #[test]
    fn fix_index_holes_reports_zero_on_a_healthy_tree() {
        let volume = Volume::create_temporary(4096, 256);
        volume.create_tree("t").unwrap();
        let ex = Exchange::open(&volume, "t").unwrap();
        for i in 0..400i64 {
            ex.store(&key_int(i), vec![i as u8; 64]).unwrap();
        }
        assert_eq!(ex.fix_index_holes().unwrap(), 0);
    }
}
