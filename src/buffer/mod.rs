//! Buffer pool: a fixed-size cache of decoded [`Page`]s behind
//! multi-reader/single-writer claims, with clock-hand eviction (spec
//! §3.4, §4.1).
//!
//! The pool has no knowledge of volumes or journals - it is handed a
//! loader closure on a miss and a writeback closure when flushing dirty
//! frames, so the volume layer owns file I/O and the journal layer owns
//! durability while the pool only owns caching and claim bookkeeping.

use crate::error::{Result, StrataError};
use crate::page::{Page, PageAddress};
use ahash::AHashMap;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use std::sync::Arc;

struct Frame {
    addr: Option<PageAddress>,
    content: Arc<RwLock<Page>>,
    pin_count: u32,
    dirty: bool,
    /// Clock "second chance" bit, set on every access and cleared the
    /// first time the clock hand passes over it.
    reference: bool,
}

impl Frame {
    fn empty(page_size: u32) -> Self {
        Self {
            addr: None,
            content: Arc::new(RwLock::new(Page::new(
                crate::page::PageType::DataLeaf,
                PageAddress::NONE,
                page_size,
            ))),
            pin_count: 0,
            dirty: false,
            reference: false,
        }
    }
}

struct Inner {
    frames: Vec<Frame>,
    page_table: AHashMap<PageAddress, usize>,
    clock_hand: usize,
}

impl Inner {
    /// Runs the clock algorithm to find an unpinned, clean frame to
    /// reuse, giving a frame a second chance if its reference bit is
    /// set (spec §4.1: "clock/LRU eviction"). A dirty frame is never a
    /// victim: its bytes have not yet been made durable via the
    /// journal, so discarding it would silently lose the write (spec
    /// §4.1 "dirty frames must be flushed first via the journal").
    /// Such a frame must be flushed by its owner (the journal/volume
    /// layer) before it can be reused; until then the clock hand skips
    /// past it just like a pinned frame.
    fn find_victim(&mut self) -> Option<usize> {
        let n = self.frames.len();
        for _ in 0..(2 * n) {
            let idx = self.clock_hand;
            self.clock_hand = (self.clock_hand + 1) % n;
            let frame = &mut self.frames[idx];
            if frame.pin_count > 0 || frame.dirty {
                continue;
            }
            if frame.addr.is_none() {
                return Some(idx);
            }
            if frame.reference {
                frame.reference = false;
                continue;
            }
            return Some(idx);
        }
        None
    }
}

/// Outcome of resolving a page into a frame: whether it was already
/// resident or had to be loaded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResolveOutcome {
    /// The page was already cached.
    Hit,
    /// The page was loaded via the caller's loader closure.
    Miss,
}

/// A shared-read claim on a cached page. Multiple `ReadClaim`s on the
/// same page may coexist; dropping one releases the frame's pin.
pub struct ReadClaim {
    guard: ArcRwLockReadGuard<RawRwLock, Page>,
    pool: Arc<Mutex<Inner>>,
    frame_idx: usize,
}

impl std::ops::Deref for ReadClaim {
    type Target = Page;
    fn deref(&self) -> &Page {
        &self.guard
    }
}

impl Drop for ReadClaim {
    fn drop(&mut self) {
        let mut inner = self.pool.lock();
        if let Some(frame) = inner.frames.get_mut(self.frame_idx) {
            frame.pin_count = frame.pin_count.saturating_sub(1);
        }
    }
}

/// An exclusive-write claim on a cached page. Acquiring one marks the
/// frame dirty immediately, matching the teacher's "any write claim
/// dirties the frame" convention.
pub struct WriteClaim {
    guard: ArcRwLockWriteGuard<RawRwLock, Page>,
    pool: Arc<Mutex<Inner>>,
    frame_idx: usize,
}

impl std::ops::Deref for WriteClaim {
    type Target = Page;
    fn deref(&self) -> &Page {
        &self.guard
    }
}

impl std::ops::DerefMut for WriteClaim {
    fn deref_mut(&mut self) -> &mut Page {
        &mut self.guard
    }
}

impl Drop for WriteClaim {
    fn drop(&mut self) {
        let mut inner = self.pool.lock();
        if let Some(frame) = inner.frames.get_mut(self.frame_idx) {
            frame.pin_count = frame.pin_count.saturating_sub(1);
        }
    }
}

/// A fixed-capacity cache of decoded pages.
pub struct BufferPool {
    page_size: u32,
    inner: Arc<Mutex<Inner>>,
}

impl BufferPool {
    /// Creates an empty pool with room for `capacity` pages of
    /// `page_size` bytes each.
    pub fn new(capacity: usize, page_size: u32) -> Self {
        let capacity = capacity.max(1);
        let frames = (0..capacity).map(|_| Frame::empty(page_size)).collect();
        Self {
            page_size,
            inner: Arc::new(Mutex::new(Inner {
                frames,
                page_table: AHashMap::default(),
                clock_hand: 0,
            })),
        }
    }

    /// Page size this pool was configured for.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of frames in the pool.
    pub fn capacity(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// Number of frames currently holding a page.
    pub fn resident_count(&self) -> usize {
        self.inner.lock().page_table.len()
    }

    fn resolve_frame<F>(&self, addr: PageAddress, load: F) -> Result<(usize, ResolveOutcome)>
    where
        F: FnOnce() -> Result<Page>,
    {
        let mut inner = self.inner.lock();
        if let Some(&idx) = inner.page_table.get(&addr) {
            inner.frames[idx].pin_count += 1;
            inner.frames[idx].reference = true;
            return Ok((idx, ResolveOutcome::Hit));
        }
        let idx = inner
            .find_victim()
            .ok_or_else(|| StrataError::BufferPoolExhausted(format!(
                "no free frame for page {addr} ({} frames, all pinned)",
                inner.frames.len()
            )))?;
        if let Some(old_addr) = inner.frames[idx].addr.take() {
            inner.page_table.remove(&old_addr);
        }
        // Drop the pool lock while the (potentially slow) loader runs so
        // other frames stay usable; the frame is already detached from
        // page_table so nobody else can observe it mid-load.
        drop(inner);
        let page = load()?;

        let mut inner = self.inner.lock();
        inner.frames[idx].content = Arc::new(RwLock::new(page));
        inner.frames[idx].addr = Some(addr);
        inner.frames[idx].dirty = false;
        inner.frames[idx].reference = true;
        inner.frames[idx].pin_count = 1;
        inner.page_table.insert(addr, idx);
        Ok((idx, ResolveOutcome::Miss))
    }

    /// Acquires a shared-read claim on `addr`, loading it via `load` on a
    /// cache miss.
    pub fn get<F>(&self, addr: PageAddress, load: F) -> Result<ReadClaim>
    where
        F: FnOnce() -> Result<Page>,
    {
        let (idx, _) = self.resolve_frame(addr, load)?;
        let content = self.inner.lock().frames[idx].content.clone();
        let guard = content.read_arc();
        Ok(ReadClaim {
            guard,
            pool: self.inner.clone(),
            frame_idx: idx,
        })
    }

    /// Acquires an exclusive-write claim on `addr`, loading it via `load`
    /// on a cache miss. The frame is marked dirty as soon as the claim is
    /// created (spec §4.1: "dirty propagation").
    pub fn get_mut<F>(&self, addr: PageAddress, load: F) -> Result<WriteClaim>
    where
        F: FnOnce() -> Result<Page>,
    {
        let (idx, _) = self.resolve_frame(addr, load)?;
        let content = {
            let mut inner = self.inner.lock();
            inner.frames[idx].dirty = true;
            inner.frames[idx].content.clone()
        };
        let guard = content.write_arc();
        Ok(WriteClaim {
            guard,
            pool: self.inner.clone(),
            frame_idx: idx,
        })
    }

    /// Inserts a freshly allocated page directly into the pool as dirty,
    /// without going through a loader (used when a B+tree split or a
    /// volume grows a brand-new page).
    pub fn insert_new(&self, addr: PageAddress, page: Page) -> Result<WriteClaim> {
        self.get_mut(addr, move || Ok(page))
    }

    /// Drops a cached page entirely (used after deallocation onto the
    /// garbage chain); refuses if any claim is outstanding.
    pub fn invalidate(&self, addr: PageAddress) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(&idx) = inner.page_table.get(&addr) {
            if inner.frames[idx].pin_count > 0 {
                return Err(StrataError::InUse(format!(
                    "page {addr} has outstanding claims"
                )));
            }
            inner.frames[idx].addr = None;
            inner.frames[idx].dirty = false;
            inner.page_table.remove(&addr);
        }
        Ok(())
    }

    /// Calls `writeback` for every dirty, unpinned frame and clears its
    /// dirty bit on success. Used by the checkpoint manager to durably
    /// flush pages after the journal has recorded them (spec §4.8).
    pub fn flush_dirty<F>(&self, mut writeback: F) -> Result<usize>
    where
        F: FnMut(PageAddress, &Page) -> Result<()>,
    {
        let dirty_addrs: Vec<PageAddress> = {
            let inner = self.inner.lock();
            inner
                .frames
                .iter()
                .filter(|f| f.dirty && f.addr.is_some())
                .map(|f| f.addr.unwrap())
                .collect()
        };
        let mut flushed = 0;
        for addr in dirty_addrs {
            let claim = self.get(addr, || {
                Err(StrataError::Fatal(format!(
                    "dirty page {addr} evicted before flush"
                )))
            })?;
            writeback(addr, &claim)?;
            drop(claim);
            let mut inner = self.inner.lock();
            if let Some(&idx) = inner.page_table.get(&addr) {
                inner.frames[idx].dirty = false;
            }
            flushed += 1;
        }
        Ok(flushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageType;

    fn fresh_page(addr: u64) -> Page {
        Page::new(PageType::DataLeaf, PageAddress(addr), 4096)
    }

    #[test]
    fn miss_then_hit_does_not_reload() {
        let pool = BufferPool::new(4, 4096);
        let mut loads = 0;
        {
            let _claim = pool
                .get(PageAddress(1), || {
                    loads += 1;
                    Ok(fresh_page(1))
                })
                .unwrap();
        }
        let _claim = pool
            .get(PageAddress(1), || {
                loads += 1;
                Ok(fresh_page(1))
            })
            .unwrap();
        assert_eq!(loads, 1);
    }

    #[test]
    fn write_claim_marks_frame_dirty_and_flush_visits_it() {
        let pool = BufferPool::new(4, 4096);
        {
            let mut claim = pool.get_mut(PageAddress(7), || Ok(fresh_page(7))).unwrap();
            claim.set_timestamp(42);
        }
        let mut seen = Vec::new();
        let flushed = pool
            .flush_dirty(|addr, page| {
                seen.push((addr, page.timestamp()));
                Ok(())
            })
            .unwrap();
        assert_eq!(flushed, 1);
        assert_eq!(seen, vec![(PageAddress(7), 42)]);
    }

    #[test]
    fn eviction_reclaims_unpinned_frames_when_full() {
        let pool = BufferPool::new(2, 4096);
        let _a = pool.get(PageAddress(1), || Ok(fresh_page(1))).unwrap();
        let _b = pool.get(PageAddress(2), || Ok(fresh_page(2))).unwrap();
        // Both claims still held; pool is full and fully pinned.
        let err = pool.get(PageAddress(3), || Ok(fresh_page(3))).unwrap_err();
        assert!(matches!(err, StrataError::BufferPoolExhausted(_)));
    }

    #[test]
    fn eviction_succeeds_once_a_claim_is_released() {
        let pool = BufferPool::new(2, 4096);
        {
            let _a = pool.get(PageAddress(1), || Ok(fresh_page(1))).unwrap();
        }
        let _b = pool.get(PageAddress(2), || Ok(fresh_page(2))).unwrap();
        let _c = pool.get(PageAddress(3), || Ok(fresh_page(3))).unwrap();
        assert_eq!(pool.resident_count(), 2);
    }

    #[test]
    fn eviction_never_discards_a_dirty_unpinned_frame() {
        let pool = BufferPool::new(2, 4096);
        {
            // Written and released: unpinned, but left dirty.
            let mut claim = pool.get_mut(PageAddress(1), || Ok(fresh_page(1))).unwrap();
            claim.set_timestamp(1);
        }
        {
            let mut claim = pool.get_mut(PageAddress(2), || Ok(fresh_page(2))).unwrap();
            claim.set_timestamp(2);
        }
        // Both frames are unpinned now, but both are still dirty, so
        // neither may be picked as the victim for a third page.
        let err = pool.get(PageAddress(3), || Ok(fresh_page(3))).unwrap_err();
        assert!(matches!(err, StrataError::BufferPoolExhausted(_)));

        // Flushing clears the dirty bit, after which eviction succeeds.
        pool.flush_dirty(|_, _| Ok(())).unwrap();
        let _c = pool.get(PageAddress(3), || Ok(fresh_page(3))).unwrap();
        assert_eq!(pool.resident_count(), 2);
    }

    #[test]
    fn invalidate_refuses_while_pinned() {
        let pool = BufferPool::new(4, 4096);
        let claim = pool.get(PageAddress(1), || Ok(fresh_page(1))).unwrap();
        let err = pool.invalidate(PageAddress(1)).unwrap_err();
        assert!(matches!(err, StrataError::InUse(_)));
        drop(claim);
        pool.invalidate(PageAddress(1)).unwrap();
        assert_eq!(pool.resident_count(), 0);
    }
}
