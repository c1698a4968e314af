//! Volume: the on-disk container for one or more trees (spec §3.4, §4.3).
//!
//! A volume owns a single file laid out as a page-0 header, a directory
//! tree mapping tree names to their root page, a garbage chain of
//! deallocated pages available for reuse, and the allocator's
//! high-water mark for brand-new pages. Temporary volumes keep the same
//! shape in memory but are never backed by a journal or by handles
//! (spec §11: "temporary volumes never journalled").

use crate::buffer::BufferPool;
use crate::error::{Result, StrataError};
use crate::key::Key;
use crate::page::{Page, PageAddress, PageType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Identifies one volume among those open in a [`crate::Strata`] context.
pub type VolumeHandle = u32;

/// A tree's root page address plus its name, as recorded in the
/// volume's directory (spec §3.4: "Tree struct/handle").
#[derive(Clone, Debug)]
pub struct TreeInfo {
    /// The tree's human-readable name.
    pub name: String,
    /// Address of the tree's root index/leaf page.
    pub root: PageAddress,
}

struct VolumeState {
    next_page: u64,
    garbage_head: PageAddress,
    directory: HashMap<String, PageAddress>,
}

/// Backing storage for a volume: either a real file on disk or an
/// in-memory volume that is never written to a journal (spec §11).
enum Backing {
    File(Mutex<File>),
    Memory,
}

/// One open volume: its page cache, allocator state, and tree directory.
pub struct Volume {
    path: Option<PathBuf>,
    backing: Backing,
    page_size: u32,
    pool: BufferPool,
    state: Mutex<VolumeState>,
    temporary: bool,
}

const HEADER_MAGIC: &[u8; 8] = b"STRATAV1";

impl Volume {
    /// Creates a brand-new, empty volume file at `path`.
    pub fn create(path: impl AsRef<Path>, page_size: u32, cache_pages: usize) -> Result<Self> {
        if !crate::page::VALID_PAGE_SIZES.contains(&page_size) {
            return Err(StrataError::InvalidVolumeSpecification(format!(
                "page size {page_size} is not one of {:?}",
                crate::page::VALID_PAGE_SIZES
            )));
        }
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;
        let header_page = encode_head_page(page_size, 1, PageAddress::NONE, &HashMap::new());
        file.write_all(&header_page)?;
        file.sync_all()?;
        Ok(Self {
            path: Some(path),
            backing: Backing::File(Mutex::new(file)),
            page_size,
            pool: BufferPool::new(cache_pages, page_size),
            state: Mutex::new(VolumeState {
                next_page: 1,
                garbage_head: PageAddress::NONE,
                directory: HashMap::new(),
            }),
            temporary: false,
        })
    }

    /// Opens an existing volume file at `path`, reading its header.
    pub fn open(path: impl AsRef<Path>, cache_pages: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mut header_bytes = Vec::new();
        file.read_to_end(&mut header_bytes)?;
        let (page_size, next_page, garbage_head, directory) = decode_head_page(&header_bytes)?;
        Ok(Self {
            path: Some(path),
            backing: Backing::File(Mutex::new(file)),
            page_size,
            pool: BufferPool::new(cache_pages, page_size),
            state: Mutex::new(VolumeState {
                next_page,
                garbage_head,
                directory,
            }),
            temporary: false,
        })
    }

    /// Creates a temporary, in-memory-only volume: never backed by a
    /// file, never journalled, and holds no durable handle (spec §11).
    pub fn create_temporary(page_size: u32, cache_pages: usize) -> Self {
        Self {
            path: None,
            backing: Backing::Memory,
            page_size,
            pool: BufferPool::new(cache_pages, page_size),
            state: Mutex::new(VolumeState {
                next_page: 1,
                garbage_head: PageAddress::NONE,
                directory: HashMap::new(),
            }),
            temporary: true,
        }
    }

    /// `true` for volumes created with [`Volume::create_temporary`].
    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    /// Path to the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Configured page size.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// The buffer pool caching this volume's pages.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Looks up a tree's root page by name.
    pub fn tree_root(&self, name: &str) -> Option<PageAddress> {
        self.state.lock().directory.get(name).copied()
    }

    /// Lists every tree currently registered in this volume's directory.
    pub fn list_trees(&self) -> Vec<TreeInfo> {
        self.state
            .lock()
            .directory
            .iter()
            .map(|(name, &root)| TreeInfo {
                name: name.clone(),
                root,
            })
            .collect()
    }

    /// Creates a new, empty tree with a single empty leaf as its root,
    /// registering it in the directory.
    pub fn create_tree(&self, name: &str) -> Result<PageAddress> {
        let mut state = self.state.lock();
        if state.directory.contains_key(name) {
            return Err(StrataError::InvalidVolumeSpecification(format!(
                "tree {name} already exists"
            )));
        }
        let root_addr = self.allocate_page_locked(&mut state);
        let root_page = Page::new(PageType::DataLeaf, root_addr, self.page_size);
        self.pool.insert_new(root_addr, root_page)?;
        state.directory.insert(name.to_string(), root_addr);
        Ok(root_addr)
    }

    /// Updates the directory entry for `name` to point at `new_root`
    /// (called after a root split changes which page is the root).
    pub fn set_tree_root(&self, name: &str, new_root: PageAddress) -> Result<()> {
        let mut state = self.state.lock();
        let slot = state
            .directory
            .get_mut(name)
            .ok_or_else(|| StrataError::InvalidVolumeSpecification(format!("no such tree {name}")))?;
        *slot = new_root;
        Ok(())
    }

    /// Removes a tree from the directory. The caller is responsible for
    /// walking and deallocating the tree's pages onto the garbage chain
    /// first (spec §4.3, and see [`crate::cleanup`]).
    pub fn drop_tree(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state
            .directory
            .remove(name)
            .ok_or_else(|| StrataError::InvalidVolumeSpecification(format!("no such tree {name}")))?;
        Ok(())
    }

    fn allocate_page_locked(&self, state: &mut VolumeState) -> PageAddress {
        if !state.garbage_head.is_none() {
            let reused = state.garbage_head;
            if let Ok(claim) = self.pool.get(reused, || self.read_page_from_disk(reused)) {
                let next = claim.right_sibling();
                drop(claim);
                state.garbage_head = next;
                return reused;
            }
        }
        let addr = PageAddress(state.next_page);
        state.next_page += 1;
        addr
    }

    /// Allocates a fresh page address, preferring reuse from the garbage
    /// chain over growing the volume (spec §4.3/§4.4).
    pub fn allocate_page(&self) -> PageAddress {
        let mut state = self.state.lock();
        self.allocate_page_locked(&mut state)
    }

    /// Parks `addr` on the garbage chain for future reuse (spec §4.4:
    /// "garbage chain: singly linked list of deallocated pages").
    pub fn deallocate_page(&self, addr: PageAddress) -> Result<()> {
        let mut state = self.state.lock();
        let mut garbage_page = Page::new(PageType::Garbage, addr, self.page_size);
        garbage_page.set_right_sibling(state.garbage_head);
        self.pool.invalidate(addr).ok();
        self.pool.insert_new(addr, garbage_page)?;
        state.garbage_head = addr;
        Ok(())
    }

    fn read_page_from_disk(&self, addr: PageAddress) -> Result<Page> {
        match &self.backing {
            Backing::Memory => Err(StrataError::CorruptVolume(format!(
                "page {addr} not resident in temporary volume"
            ))),
            Backing::File(file) => {
                let mut file = file.lock();
                let offset = addr.0 * self.page_size as u64;
                let mut buf = vec![0u8; self.page_size as usize];
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(&mut buf)?;
                Page::decode(&buf)
            }
        }
    }

    /// Writes a recovered page image directly into this volume's
    /// backing file, bypassing the buffer pool, and bumps the page
    /// allocator's high-water mark past it if needed (spec §4.9 step
    /// 2: "a second pass... applies committed transactions not yet
    /// reflected in the page map"). Temporary volumes are never
    /// journalled (spec §11), so they never receive recovered images
    /// and this is a no-op for them.
    pub fn apply_recovered_page(&self, addr: PageAddress, image: &[u8]) -> Result<()> {
        match &self.backing {
            Backing::Memory => Ok(()),
            Backing::File(file) => {
                // Validate before committing a possibly-corrupt image to disk.
                Page::decode(image)?;
                {
                    let mut file = file.lock();
                    let offset = addr.0 * self.page_size as u64;
                    file.seek(SeekFrom::Start(offset))?;
                    file.write_all(image)?;
                    file.sync_all()?;
                }
                // Drop any stale cached copy so the next read reloads
                // the just-redone image from disk.
                self.pool.invalidate(addr).ok();
                let mut state = self.state.lock();
                if addr.0 >= state.next_page {
                    state.next_page = addr.0 + 1;
                }
                Ok(())
            }
        }
    }

    /// Fetches a read claim on `addr`, loading from disk on a pool miss.
    pub fn read_page(&self, addr: PageAddress) -> Result<crate::buffer::ReadClaim> {
        self.pool.get(addr, || self.read_page_from_disk(addr))
    }

    /// Fetches a write claim on `addr`, loading from disk on a pool miss.
    pub fn write_page(&self, addr: PageAddress) -> Result<crate::buffer::WriteClaim> {
        self.pool.get_mut(addr, || self.read_page_from_disk(addr))
    }

    /// Writes every dirty page back to the volume file and fsyncs it.
    /// Temporary volumes accept and discard flush requests since they
    /// have nothing to persist (spec §11).
    pub fn flush(&self) -> Result<usize> {
        let flushed = match &self.backing {
            Backing::Memory => 0,
            Backing::File(file) => {
                let page_size = self.page_size as u64;
                self.pool.flush_dirty(|addr, page| {
                    let mut file = file.lock();
                    file.seek(SeekFrom::Start(addr.0 * page_size))?;
                    file.write_all(&page.encode())?;
                    Ok(())
                })?
            }
        };
        if let Backing::File(file) = &self.backing {
            self.write_header()?;
            file.lock().sync_all()?;
        }
        Ok(flushed)
    }

    fn write_header(&self) -> Result<()> {
        let Backing::File(file) = &self.backing else {
            return Ok(());
        };
        let state = self.state.lock();
        let header = encode_head_page(
            self.page_size,
            state.next_page,
            state.garbage_head,
            &state.directory,
        );
        let mut file = file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header)?;
        Ok(())
    }
}

fn encode_head_page(
    page_size: u32,
    next_page: u64,
    garbage_head: PageAddress,
    directory: &HashMap<String, PageAddress>,
) -> Vec<u8> {
    let mut page = Page::new(PageType::Head, PageAddress(0), page_size);
    let mut payload = Vec::new();
    payload.extend_from_slice(HEADER_MAGIC);
    payload.extend_from_slice(&page_size.to_be_bytes());
    payload.extend_from_slice(&next_page.to_be_bytes());
    payload.extend_from_slice(&garbage_head.0.to_be_bytes());
    payload.extend_from_slice(&(directory.len() as u32).to_be_bytes());
    for (name, root) in directory {
        let mut key = Key::new();
        key.append_str(name);
        let name_bytes = key.encoded_bytes();
        payload.extend_from_slice(&(name_bytes.len() as u32).to_be_bytes());
        payload.extend_from_slice(name_bytes);
        payload.extend_from_slice(&root.0.to_be_bytes());
    }
    page.set_payload(payload);
    page.encode()
}

fn decode_head_page(
    bytes: &[u8],
) -> Result<(u32, u64, PageAddress, HashMap<String, PageAddress>)> {
    let page = Page::decode(bytes)?;
    if page.page_type() != PageType::Head {
        return Err(StrataError::CorruptVolume(
            "page 0 is not a volume head page".into(),
        ));
    }
    let payload = page.payload();
    if payload.len() < 8 || &payload[0..8] != HEADER_MAGIC {
        return Err(StrataError::CorruptVolume(
            "volume header magic mismatch".into(),
        ));
    }
    let mut cursor = 8;
    let page_size = u32::from_be_bytes(payload[cursor..cursor + 4].try_into().unwrap());
    cursor += 4;
    let next_page = u64::from_be_bytes(payload[cursor..cursor + 8].try_into().unwrap());
    cursor += 8;
    let garbage_head = PageAddress(u64::from_be_bytes(
        payload[cursor..cursor + 8].try_into().unwrap(),
    ));
    cursor += 8;
    let tree_count = u32::from_be_bytes(payload[cursor..cursor + 4].try_into().unwrap()) as usize;
    cursor += 4;
    let mut directory = HashMap::with_capacity(tree_count);
    for _ in 0..tree_count {
        if cursor + 4 > payload.len() {
            return Err(StrataError::CorruptVolume(
                "volume directory truncated".into(),
            ));
        }
        let name_len =
            u32::from_be_bytes(payload[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;
        if cursor + name_len + 8 > payload.len() {
            return Err(StrataError::CorruptVolume(
                "volume directory entry truncated".into(),
            ));
        }
        let name_key = Key::from_encoded(&payload[cursor..cursor + name_len]);
        cursor += name_len;
        let root = PageAddress(u64::from_be_bytes(
            payload[cursor..cursor + 8].try_into().unwrap(),
        ));
        cursor += 8;
        let name = match name_key.segments()?.into_iter().next() {
            Some(crate::key::Segment::String(s)) => s,
            _ => {
                return Err(StrataError::CorruptVolume(
                    "volume directory entry is not a string key".into(),
                ))
            }
        };
        directory.insert(name, root);
    }
    Ok((page_size, next_page, garbage_head, directory))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_and_reopen_preserves_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vol.strata");
        {
            let volume = Volume::create(&path, 4096, 8).unwrap();
            let root = volume.create_tree("widgets").unwrap();
            assert_eq!(volume.tree_root("widgets"), Some(root));
            volume.flush().unwrap();
        }
        let reopened = Volume::open(&path, 8).unwrap();
        assert!(reopened.tree_root("widgets").is_some());
    }

    #[test]
    fn rejects_invalid_page_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vol.strata");
        let err = Volume::create(&path, 3000, 8).unwrap_err();
        assert!(matches!(err, StrataError::InvalidVolumeSpecification(_)));
    }

    #[test]
    fn temporary_volume_has_no_path_and_ignores_flush() {
        let volume = Volume::create_temporary(4096, 8);
        assert!(volume.is_temporary());
        assert!(volume.path().is_none());
        let root = volume.create_tree("scratch").unwrap();
        assert_eq!(volume.tree_root("scratch"), Some(root));
        assert_eq!(volume.flush().unwrap(), 0);
    }

    #[test]
    fn deallocate_then_allocate_reuses_page() {
        let volume = Volume::create_temporary(4096, 8);
        let addr = volume.allocate_page();
        volume.deallocate_page(addr).unwrap();
        let reused = volume.allocate_page();
        assert_eq!(reused, addr);
    }

    #[test]
    fn apply_recovered_page_overwrites_the_stale_on_disk_image() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vol.strata");
        let volume = Volume::create(&path, 4096, 8).unwrap();
        let root = volume.create_tree("widgets").unwrap();
        volume.flush().unwrap();

        let mut redone = Page::new(PageType::DataLeaf, root, 4096);
        redone.set_timestamp(999);
        let image = redone.encode();
        volume.apply_recovered_page(root, &image).unwrap();

        let claim = volume.read_page(root).unwrap();
        assert_eq!(claim.timestamp(), 999);
    }

    #[test]
    fn create_tree_twice_fails() {
        let volume = Volume::create_temporary(4096, 8);
        volume.create_tree("widgets").unwrap();
        let err = volume.create_tree("widgets").unwrap_err();
        assert!(matches!(err, StrataError::InvalidVolumeSpecification(_)));
    }
}
