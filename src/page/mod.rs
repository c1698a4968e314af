//! Fixed-size slotted page layout (spec §3.3, §4.2).
//!
//! Every page on disk is one of six kinds, tagged at a fixed header
//! offset. Data and index pages hold a slot directory that elides the
//! common prefix ("elision byte count", EBC) between a slot's key and
//! its left neighbour's key, so monotonically increasing keys compress
//! well. A side "fast index" of reconstructed full keys accelerates
//! binary search and is marked invalid - and lazily rebuilt - after any
//! mutation, since it is fully reconstructible from the page bytes.

use crate::error::{Result, StrataError};
use crate::key::Key;
use crate::ts::Timestamp;
use ahash::AHasher;
use std::hash::{Hash, Hasher};

/// Page header length in bytes.
pub const PAGE_HDR_LEN: usize = 40;
/// Size, in bytes, of one slot-directory entry.
pub const SLOT_ENTRY_LEN: usize = 12;

const TYPE_OFF: usize = 0;
const KEY_COUNT_OFF: usize = 2;
const FREE_START_OFF: usize = 4;
const FREE_END_OFF: usize = 6;
const ADDR_OFF: usize = 8;
const RIGHT_SIBLING_OFF: usize = 16;
const TIMESTAMP_OFF: usize = 24;
const CHECKSUM_OFF: usize = 32;

/// Valid on-disk page sizes (spec §6).
pub const VALID_PAGE_SIZES: [u32; 5] = [1024, 2048, 4096, 8192, 16384];

/// Logical address of a page within a volume. `0` means "no page" /
/// null, matching the convention used by right-sibling and garbage-chain
/// links.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageAddress(pub u64);

impl PageAddress {
    /// The null address (no page).
    pub const NONE: PageAddress = PageAddress(0);

    /// `true` if this is the null address.
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for PageAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tagged page kind (spec §9: "Page is a tagged variant").
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PageType {
    /// Leaf page holding `(key, value)` slots.
    DataLeaf,
    /// Internal page holding `(separator key, child address)` slots.
    Index,
    /// Page parked on a volume's garbage chain, awaiting reuse.
    Garbage,
    /// Overflow page holding a fragment of a long record.
    LongRecord,
    /// Volume header page (page 0 of a volume file).
    Head,
    /// Root descriptor page of a tree's directory entry.
    IndexHead,
}

impl PageType {
    fn to_u8(self) -> u8 {
        match self {
            PageType::DataLeaf => 0,
            PageType::Index => 1,
            PageType::Garbage => 2,
            PageType::LongRecord => 3,
            PageType::Head => 4,
            PageType::IndexHead => 5,
        }
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PageType::DataLeaf),
            1 => Ok(PageType::Index),
            2 => Ok(PageType::Garbage),
            3 => Ok(PageType::LongRecord),
            4 => Ok(PageType::Head),
            5 => Ok(PageType::IndexHead),
            other => Err(StrataError::CorruptPage(format!(
                "unknown page type tag {other:#x}"
            ))),
        }
    }

    /// `true` for page types that carry a slot directory.
    pub fn is_slotted(self) -> bool {
        matches!(self, PageType::DataLeaf | PageType::Index)
    }
}

/// One `(key, value)` entry in a data or index page.
///
/// `key_tail` holds only the bytes of the key not shared with the
/// previous slot's key (`ebc` bytes are elided); `value` is either the
/// encoded [`crate::value::RawValue`] bytes (data pages) or an 8-byte
/// big-endian child [`PageAddress`] (index pages).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    /// Bytes shared with the previous slot's key, not stored again.
    pub ebc: u16,
    /// The non-shared suffix of this slot's key.
    pub key_tail: Vec<u8>,
    /// Value bytes (data page) or encoded child address (index page).
    pub value: Vec<u8>,
}

impl Slot {
    fn encoded_len(&self) -> usize {
        SLOT_ENTRY_LEN + self.key_tail.len() + self.value.len()
    }
}

/// Cache of this page's reconstructed full keys, keyed by an ahash digest
/// of the slot directory so a stale cache is never mistaken for a fresh
/// one. Fully reconstructible from slot bytes; invalidated by any
/// mutation rather than kept consistent incrementally (spec §3.3).
#[derive(Default)]
struct FastIndex {
    directory_digest: u64,
    keys: Vec<Key>,
}

impl FastIndex {
    fn invalidate(&mut self) {
        self.directory_digest = 0;
        self.keys.clear();
    }

    fn matches(&self, digest: u64) -> bool {
        self.directory_digest == digest && !self.keys.is_empty()
    }

    fn store(&mut self, digest: u64, keys: Vec<Key>) {
        self.directory_digest = digest;
        self.keys = keys;
    }
}

fn directory_digest(slots: &[Slot]) -> u64 {
    let mut hasher = AHasher::default();
    slots.len().hash(&mut hasher);
    for slot in slots {
        slot.ebc.hash(&mut hasher);
        slot.key_tail.hash(&mut hasher);
    }
    hasher.finish()
}

/// An in-memory, decoded page. Slotted pages (`DataLeaf`/`Index`) expose
/// [`Page::slots`]; non-slotted pages use [`Page::payload`] for their raw
/// bytes (overflow fragment, garbage placeholder, or head metadata).
pub struct Page {
    page_type: PageType,
    addr: PageAddress,
    right_sibling: PageAddress,
    timestamp: Timestamp,
    slots: Vec<Slot>,
    payload: Vec<u8>,
    page_size: usize,
    fast_index: FastIndex,
}

impl Page {
    /// Allocates a fresh, empty page of the given type and size.
    pub fn new(page_type: PageType, addr: PageAddress, page_size: u32) -> Self {
        Self {
            page_type,
            addr,
            right_sibling: PageAddress::NONE,
            timestamp: 0,
            slots: Vec::new(),
            payload: Vec::new(),
            page_size: page_size as usize,
            fast_index: FastIndex::default(),
        }
    }

    /// The page's type tag.
    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    /// This page's own address.
    pub fn addr(&self) -> PageAddress {
        self.addr
    }

    /// The address of the page immediately to the right in key order, or
    /// [`PageAddress::NONE`] if this is the rightmost page (spec §3.3).
    pub fn right_sibling(&self) -> PageAddress {
        self.right_sibling
    }

    /// Sets the right-sibling link.
    pub fn set_right_sibling(&mut self, addr: PageAddress) {
        self.right_sibling = addr;
    }

    /// Timestamp of the last mutation to this page.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Stamps the page with a new modification timestamp (done whenever
    /// a writer claim mutates the page, spec §4.1 "Dirty propagation").
    pub fn set_timestamp(&mut self, ts: Timestamp) {
        self.timestamp = ts;
    }

    /// Number of slots on a slotted page.
    pub fn key_count(&self) -> usize {
        self.slots.len()
    }

    /// Raw payload bytes for non-slotted page types.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Sets raw payload bytes for non-slotted page types.
    pub fn set_payload(&mut self, bytes: Vec<u8>) {
        self.payload = bytes;
    }

    /// Maximum usable bytes for the slot directory plus slot bodies.
    pub fn capacity(&self) -> usize {
        self.page_size.saturating_sub(PAGE_HDR_LEN)
    }

    /// Current bytes consumed by the slot directory and slot bodies.
    pub fn used_bytes(&self) -> usize {
        self.slots.iter().map(Slot::encoded_len).sum()
    }

    /// Reconstructs the full key stored at slot `index` by walking
    /// forward from slot 0, splicing each slot's tail onto the
    /// accumulated prefix from the previous slot (spec §4.2).
    pub fn full_key(&self, index: usize) -> Key {
        self.keys_upto(index + 1)
            .into_iter()
            .last()
            .unwrap_or_default()
    }

    /// Reconstructs every full key on the page, in slot order.
    pub fn keys(&self) -> Vec<Key> {
        self.keys_upto(self.slots.len())
    }

    fn keys_upto(&self, count: usize) -> Vec<Key> {
        let mut out = Vec::with_capacity(count);
        let mut prev_bytes: Vec<u8> = Vec::new();
        for slot in self.slots.iter().take(count) {
            let mut bytes = prev_bytes[..slot.ebc as usize].to_vec();
            bytes.extend_from_slice(&slot.key_tail);
            let key = Key::from_encoded(&bytes);
            prev_bytes = bytes;
            out.push(key);
        }
        out
    }

    /// Ensures the fast index reflects the current slot contents,
    /// rebuilding it by walking the EBC chain once if a prior mutation
    /// invalidated it.
    fn ensure_fast_index(&mut self) -> &[Key] {
        let digest = directory_digest(&self.slots);
        if !self.fast_index.matches(digest) {
            let keys = self.keys();
            self.fast_index.store(digest, keys);
        }
        &self.fast_index.keys
    }

    /// Locates `key` among the page's slots via binary search over the
    /// fast index, rebuilding it first if stale (spec §3.3, §4.2).
    ///
    /// Returns `Ok(index)` for an exact match, `Err(index)` for the
    /// insertion point that keeps slots sorted.
    pub fn find_slot(&mut self, key: &Key) -> std::result::Result<usize, usize> {
        let keys = self.ensure_fast_index();
        keys.binary_search_by(|candidate| candidate.encoded_bytes().cmp(key.encoded_bytes()))
    }

    /// Inserts or replaces the slot for `key`, recomputing the EBC of
    /// the new slot and of its immediate successor (whose EBC is
    /// relative to the newly inserted key).
    pub fn upsert(&mut self, key: &Key, value: Vec<u8>) {
        match self.find_slot(key) {
            Ok(index) => {
                let ebc = self.slots[index].ebc;
                self.slots[index] = Slot {
                    ebc,
                    key_tail: key.encoded_bytes()[ebc as usize..].to_vec(),
                    value,
                };
            }
            Err(index) => {
                let prev_key = if index == 0 {
                    Key::new()
                } else {
                    self.full_key(index - 1)
                };
                let ebc = prev_key.common_prefix_len(key) as u16;
                let new_slot = Slot {
                    ebc,
                    key_tail: key.encoded_bytes()[ebc as usize..].to_vec(),
                    value,
                };
                self.slots.insert(index, new_slot);
                self.reebc_successor(index);
            }
        }
        self.fast_index.invalidate();
    }

    /// Removes the slot for `key` if present, returning its value bytes.
    pub fn remove(&mut self, key: &Key) -> Option<Vec<u8>> {
        let index = self.find_slot(key).ok()?;
        let removed_full_key = self.full_key(index);
        let removed = self.slots.remove(index);
        self.fast_index.invalidate();
        self.reebc_after_removal(index, &removed_full_key);
        Some(removed.value)
    }

    /// Recomputes the EBC of the slot that now sits at `index` after a
    /// removal shifted it left: its stored tail was elided against the
    /// just-removed key, so it must first be reconstituted against that
    /// key before being re-elided against its new predecessor.
    fn reebc_after_removal(&mut self, index: usize, removed_full_key: &Key) {
        if index >= self.slots.len() {
            return;
        }
        let ebc_old = self.slots[index].ebc as usize;
        let mut bytes =
            removed_full_key.encoded_bytes()[..ebc_old.min(removed_full_key.encoded_len())].to_vec();
        bytes.extend_from_slice(&self.slots[index].key_tail);
        let full = Key::from_encoded(&bytes);

        let new_prev = if index == 0 {
            Key::new()
        } else {
            self.full_key(index - 1)
        };
        let ebc = new_prev.common_prefix_len(&full) as u16;
        self.slots[index].key_tail = full.encoded_bytes()[ebc as usize..].to_vec();
        self.slots[index].ebc = ebc;
    }

    /// Recomputes the EBC of the slot immediately after a freshly
    /// inserted one: its stored tail was elided against the insertion
    /// point's old predecessor, and must be re-elided against the newly
    /// inserted key instead.
    fn reebc_successor(&mut self, inserted_index: usize) {
        let next = inserted_index + 1;
        if next >= self.slots.len() {
            return;
        }
        let old_prev = if inserted_index == 0 {
            Key::new()
        } else {
            self.full_key(inserted_index - 1)
        };
        let ebc_old = self.slots[next].ebc as usize;
        let mut bytes = old_prev.encoded_bytes()[..ebc_old.min(old_prev.encoded_len())].to_vec();
        bytes.extend_from_slice(&self.slots[next].key_tail);
        let next_full = Key::from_encoded(&bytes);

        let inserted_key = self.full_key(inserted_index);
        let ebc = inserted_key.common_prefix_len(&next_full) as u16;
        self.slots[next].key_tail = next_full.encoded_bytes()[ebc as usize..].to_vec();
        self.slots[next].ebc = ebc;
    }

    /// Borrows the slot at `index` (panics if out of range).
    pub fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    /// Appends an already-EBC-computed slot without recomputing
    /// anything; used by split/merge/rebalance, which build a fresh
    /// page's slots directly from an ordered source.
    pub fn push_raw_slot(&mut self, slot: Slot) {
        self.slots.push(slot);
        self.fast_index.invalidate();
    }

    /// Splits the slot vector at `at`, keeping `[0, at)` in `self` and
    /// returning `[at, len)` as the caller's responsibility to install
    /// into a fresh page.
    pub fn split_off_slots(&mut self, at: usize) -> Vec<Key> {
        let all_keys = self.keys();
        let removed_keys = all_keys[at..].to_vec();
        self.slots.truncate(at);
        self.fast_index.invalidate();
        removed_keys
    }

    /// Drains and returns every slot along with its reconstructed full
    /// key, leaving the page empty. Used by merge/rebalance to rebuild
    /// two pages' worth of slots from scratch.
    pub fn drain_with_keys(&mut self) -> Vec<(Key, Vec<u8>)> {
        let keys = self.keys();
        let values = self
            .slots
            .drain(..)
            .map(|slot| slot.value)
            .collect::<Vec<_>>();
        self.fast_index.invalidate();
        keys.into_iter().zip(values).collect()
    }

    /// Rebuilds this page's slot vector from an ordered `(key, value)`
    /// sequence, recomputing EBCs from scratch - the only correct way to
    /// avoid propagating a stale separator across a multi-page merge
    /// (historical defect class referenced by spec §4.2, Bug1058254).
    pub fn rebuild_from(&mut self, entries: &[(Key, Vec<u8>)]) {
        self.slots.clear();
        let mut prev = Key::new();
        for (key, value) in entries {
            let ebc = prev.common_prefix_len(key) as u16;
            self.slots.push(Slot {
                ebc,
                key_tail: key.encoded_bytes()[ebc as usize..].to_vec(),
                value: value.clone(),
            });
            prev = key.clone();
        }
        self.fast_index.invalidate();
    }

    /// Encodes the page into raw, checksummed bytes for disk I/O.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.page_size];
        buf[TYPE_OFF] = self.page_type.to_u8();
        buf[KEY_COUNT_OFF..KEY_COUNT_OFF + 2]
            .copy_from_slice(&(self.slots.len() as u16).to_be_bytes());
        buf[ADDR_OFF..ADDR_OFF + 8].copy_from_slice(&self.addr.0.to_be_bytes());
        buf[RIGHT_SIBLING_OFF..RIGHT_SIBLING_OFF + 8]
            .copy_from_slice(&self.right_sibling.0.to_be_bytes());
        buf[TIMESTAMP_OFF..TIMESTAMP_OFF + 8].copy_from_slice(&self.timestamp.to_be_bytes());

        if self.page_type.is_slotted() {
            let dir_start = PAGE_HDR_LEN;
            let mut body_cursor = self.page_size;
            for (i, slot) in self.slots.iter().enumerate() {
                let body_len = slot.key_tail.len() + slot.value.len();
                body_cursor -= body_len;
                let entry_off = dir_start + i * SLOT_ENTRY_LEN;
                buf[entry_off..entry_off + 2].copy_from_slice(&slot.ebc.to_be_bytes());
                buf[entry_off + 2..entry_off + 4]
                    .copy_from_slice(&(slot.key_tail.len() as u16).to_be_bytes());
                buf[entry_off + 4..entry_off + 8]
                    .copy_from_slice(&(slot.value.len() as u32).to_be_bytes());
                buf[entry_off + 8..entry_off + 10]
                    .copy_from_slice(&(body_cursor as u16).to_be_bytes());
                buf[body_cursor..body_cursor + slot.key_tail.len()]
                    .copy_from_slice(&slot.key_tail);
                buf[body_cursor + slot.key_tail.len()..body_cursor + body_len]
                    .copy_from_slice(&slot.value);
            }
            let free_start = dir_start + self.slots.len() * SLOT_ENTRY_LEN;
            buf[FREE_START_OFF..FREE_START_OFF + 2]
                .copy_from_slice(&(free_start as u16).to_be_bytes());
            buf[FREE_END_OFF..FREE_END_OFF + 2]
                .copy_from_slice(&(body_cursor as u16).to_be_bytes());
        } else {
            let start = PAGE_HDR_LEN;
            let end = (start + self.payload.len()).min(self.page_size);
            buf[start..end].copy_from_slice(&self.payload[..end - start]);
            buf[FREE_START_OFF..FREE_START_OFF + 2]
                .copy_from_slice(&(end as u16).to_be_bytes());
            buf[FREE_END_OFF..FREE_END_OFF + 2]
                .copy_from_slice(&(self.page_size as u16).to_be_bytes());
        }

        buf[CHECKSUM_OFF..CHECKSUM_OFF + 4].fill(0);
        let checksum = crc32fast::hash(&buf);
        buf[CHECKSUM_OFF..CHECKSUM_OFF + 4].copy_from_slice(&checksum.to_be_bytes());
        buf
    }

    /// Decodes and checksum-validates a page previously produced by
    /// [`Page::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PAGE_HDR_LEN {
            return Err(StrataError::CorruptPage("page shorter than header".into()));
        }
        let mut check_buf = bytes.to_vec();
        let stored_checksum =
            u32::from_be_bytes(bytes[CHECKSUM_OFF..CHECKSUM_OFF + 4].try_into().unwrap());
        check_buf[CHECKSUM_OFF..CHECKSUM_OFF + 4].fill(0);
        let computed = crc32fast::hash(&check_buf);
        if computed != stored_checksum {
            return Err(StrataError::CorruptPage(format!(
                "checksum mismatch: stored {stored_checksum:#x}, computed {computed:#x}"
            )));
        }

        let page_type = PageType::from_u8(bytes[TYPE_OFF])?;
        let key_count = u16::from_be_bytes(bytes[KEY_COUNT_OFF..KEY_COUNT_OFF + 2].try_into().unwrap());
        let addr = PageAddress(u64::from_be_bytes(bytes[ADDR_OFF..ADDR_OFF + 8].try_into().unwrap()));
        let right_sibling = PageAddress(u64::from_be_bytes(
            bytes[RIGHT_SIBLING_OFF..RIGHT_SIBLING_OFF + 8].try_into().unwrap(),
        ));
        let timestamp = u64::from_be_bytes(
            bytes[TIMESTAMP_OFF..TIMESTAMP_OFF + 8].try_into().unwrap(),
        );

        let mut page = Page {
            page_type,
            addr,
            right_sibling,
            timestamp,
            slots: Vec::new(),
            payload: Vec::new(),
            page_size: bytes.len(),
            fast_index: FastIndex::default(),
        };

        if page_type.is_slotted() {
            let dir_start = PAGE_HDR_LEN;
            for i in 0..key_count as usize {
                let entry_off = dir_start + i * SLOT_ENTRY_LEN;
                if entry_off + SLOT_ENTRY_LEN > bytes.len() {
                    return Err(StrataError::CorruptPage(
                        "slot directory exceeds page bounds".into(),
                    ));
                }
                let ebc = u16::from_be_bytes(bytes[entry_off..entry_off + 2].try_into().unwrap());
                let key_tail_len =
                    u16::from_be_bytes(bytes[entry_off + 2..entry_off + 4].try_into().unwrap())
                        as usize;
                let value_len =
                    u32::from_be_bytes(bytes[entry_off + 4..entry_off + 8].try_into().unwrap())
                        as usize;
                let body_offset =
                    u16::from_be_bytes(bytes[entry_off + 8..entry_off + 10].try_into().unwrap())
                        as usize;
                let body_end = body_offset + key_tail_len + value_len;
                if body_end > bytes.len() {
                    return Err(StrataError::CorruptPage(
                        "slot body exceeds page bounds".into(),
                    ));
                }
                let key_tail = bytes[body_offset..body_offset + key_tail_len].to_vec();
                let value = bytes[body_offset + key_tail_len..body_end].to_vec();
                page.slots.push(Slot {
                    ebc,
                    key_tail,
                    value,
                });
            }
        } else {
            let start = PAGE_HDR_LEN;
            let end = u16::from_be_bytes(bytes[FREE_START_OFF..FREE_START_OFF + 2].try_into().unwrap())
                as usize;
            if end < start || end > bytes.len() {
                return Err(StrataError::CorruptPage("payload bounds invalid".into()));
            }
            page.payload = bytes[start..end].to_vec();
        }

        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_int(v: i64) -> Key {
        let mut k = Key::new();
        k.append_int(v);
        k
    }

    #[test]
    fn insert_and_find_roundtrip() {
        let mut page = Page::new(PageType::DataLeaf, PageAddress(1), 4096);
        page.upsert(&key_int(10), b"ten".to_vec());
        page.upsert(&key_int(20), b"twenty".to_vec());
        page.upsert(&key_int(5), b"five".to_vec());

        let keys = page.keys();
        assert_eq!(keys, vec![key_int(5), key_int(10), key_int(20)]);
        let idx = page.find_slot(&key_int(10)).unwrap();
        assert_eq!(page.slot(idx).value, b"ten");
    }

    #[test]
    fn ebc_compresses_shared_prefix() {
        let mut page = Page::new(PageType::DataLeaf, PageAddress(1), 4096);
        let mut a = Key::new();
        a.append_str("apple");
        let mut b = Key::new();
        b.append_str("application");
        page.upsert(&a, b"a".to_vec());
        page.upsert(&b, b"b".to_vec());
        // "application"'s tag+4 bytes ("appl") are shared with "apple"'s encoding.
        assert!(page.slot(1).ebc > 0);
        assert_eq!(page.full_key(1), b);
    }

    #[test]
    fn remove_recomputes_successor_ebc() {
        let mut page = Page::new(PageType::DataLeaf, PageAddress(1), 4096);
        let mut a = Key::new();
        a.append_str("apple");
        let mut b = Key::new();
        b.append_str("appliance");
        let mut c = Key::new();
        c.append_str("application");
        page.upsert(&a, b"a".to_vec());
        page.upsert(&b, b"b".to_vec());
        page.upsert(&c, b"c".to_vec());
        page.remove(&b);
        let keys = page.keys();
        assert_eq!(keys, vec![a, c.clone()]);
        assert_eq!(page.full_key(1), c);
    }

    #[test]
    fn encode_decode_round_trip_with_checksum() {
        let mut page = Page::new(PageType::DataLeaf, PageAddress(42), 4096);
        page.set_timestamp(99);
        page.set_right_sibling(PageAddress(43));
        page.upsert(&key_int(1), b"one".to_vec());
        page.upsert(&key_int(2), b"two".to_vec());
        let bytes = page.encode();
        let decoded = Page::decode(&bytes).unwrap();
        assert_eq!(decoded.addr(), PageAddress(42));
        assert_eq!(decoded.timestamp(), 99);
        assert_eq!(decoded.right_sibling(), PageAddress(43));
        assert_eq!(decoded.keys(), vec![key_int(1), key_int(2)]);
        assert_eq!(decoded.slot(0).value, b"one");
    }

    #[test]
    fn decode_rejects_corrupted_checksum() {
        let mut page = Page::new(PageType::DataLeaf, PageAddress(1), 4096);
        page.upsert(&key_int(1), b"one".to_vec());
        let mut bytes = page.encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(Page::decode(&bytes).is_err());
    }

    #[test]
    fn non_slotted_payload_round_trips() {
        let mut page = Page::new(PageType::LongRecord, PageAddress(9), 1024);
        page.set_payload(vec![7u8; 200]);
        let bytes = page.encode();
        let decoded = Page::decode(&bytes).unwrap();
        assert_eq!(decoded.payload(), &vec![7u8; 200][..]);
    }
}
