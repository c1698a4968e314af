//! Write-ahead journal manager (spec §4.8): an append-only sequence of
//! fixed-size journal files ("blocks"), each holding a run of typed,
//! length-prefixed, checksummed records.
//!
//! Mirrors the teacher's [`crate::primitives::wal`] framing (magic +
//! format version file header, `type/length/checksum` record framing,
//! segment rollover) but records the record types spec §4.8 names
//! instead of page-level WAL frames directly.

pub mod record;

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StrataError};
use crate::ts::Timestamp;
use crate::txn::{CommitPolicy, JournalSink};

pub use record::{JournalRecord, RecordType};

const FILE_MAGIC: &[u8; 8] = b"STRATAJL";
const FILE_FORMAT_VERSION: u16 = 1;
const FILE_HEADER_LEN: usize = 16;

/// Rollover threshold: once the current file's length exceeds this, a
/// new journal file is opened (spec §4.8 "Rollover").
const DEFAULT_ROLLOVER_BYTES: u64 = 64 * 1024 * 1024;

struct OpenFile {
    sequence: u64,
    file: File,
    len: u64,
}

struct Inner {
    dir: PathBuf,
    rollover_bytes: u64,
    current: OpenFile,
    /// Earliest journal address (file sequence, offset) any live
    /// committed page or live transaction still refers to. Only moves
    /// forward, via checkpoint + copyback (spec §4.8 "base address").
    base_sequence: u64,
    /// First file sequence a transaction's own records (chunk, commit,
    /// or rollback) were ever appended into, keyed by `start_ts`. Lets
    /// the checkpoint manager compute a real base sequence instead of a
    /// constant: a transaction still active or still long-running pins
    /// the base at (at most) the sequence it was first written into.
    ts_sequence: std::collections::HashMap<Timestamp, u64>,
}

/// Append-only journal manager. One instance per `Strata` context; all
/// volumes/transactions share it.
pub struct JournalManager {
    inner: Mutex<Inner>,
}

fn file_path(dir: &Path, sequence: u64) -> PathBuf {
    dir.join(format!("journal-{sequence:020}.jnl"))
}

fn encode_file_header() -> [u8; FILE_HEADER_LEN] {
    let mut buf = [0u8; FILE_HEADER_LEN];
    buf[0..8].copy_from_slice(FILE_MAGIC);
    buf[8..10].copy_from_slice(&FILE_FORMAT_VERSION.to_be_bytes());
    buf
}

fn validate_file_header(bytes: &[u8]) -> Result<()> {
    if bytes.len() < FILE_HEADER_LEN {
        return Err(StrataError::CorruptJournal("file header truncated".into()));
    }
    if &bytes[0..8] != FILE_MAGIC {
        return Err(StrataError::CorruptJournal("bad journal magic".into()));
    }
    let version = u16::from_be_bytes(bytes[8..10].try_into().unwrap());
    if version != FILE_FORMAT_VERSION {
        return Err(StrataError::CorruptJournal(format!(
            "unsupported journal format version {version}"
        )));
    }
    Ok(())
}

impl JournalManager {
    /// Opens (creating if absent) the journal directory, starting a
    /// fresh file at `sequence` 0 if the directory was empty, or
    /// appending to the highest-numbered existing file otherwise.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let mut sequences: Vec<u64> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.file_name()
                    .to_str()?
                    .strip_prefix("journal-")?
                    .strip_suffix(".jnl")?
                    .parse::<u64>()
                    .ok()
            })
            .collect();
        sequences.sort_unstable();

        let current = match sequences.last() {
            Some(&sequence) => {
                let path = file_path(&dir, sequence);
                let mut file = OpenOptions::new().read(true).append(true).open(&path)?;
                let len = file.metadata()?.len();
                if len < FILE_HEADER_LEN as u64 {
                    return Err(StrataError::CorruptJournal(format!(
                        "{path:?} shorter than the file header"
                    )));
                }
                let mut header = [0u8; FILE_HEADER_LEN];
                file.seek(SeekFrom::Start(0))?;
                file.read_exact(&mut header)?;
                validate_file_header(&header)?;
                OpenFile { sequence, file, len }
            }
            None => Self::create_file(&dir, 0)?,
        };

        info!(sequence = current.sequence, len = current.len, "journal.open");
        Ok(Self {
            inner: Mutex::new(Inner {
                dir,
                rollover_bytes: DEFAULT_ROLLOVER_BYTES,
                current,
                base_sequence: sequences.first().copied().unwrap_or(0),
                ts_sequence: std::collections::HashMap::new(),
            }),
        })
    }

    fn create_file(dir: &Path, sequence: u64) -> Result<OpenFile> {
        let path = file_path(dir, sequence);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let header = encode_file_header();
        file.write_all(&header)?;
        file.sync_all()?;
        Ok(OpenFile {
            sequence,
            file,
            len: header.len() as u64,
        })
    }

    /// Appends one record, rolling over to a new file first if the
    /// current one has crossed the configured threshold.
    pub fn append(&self, record: &JournalRecord) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.current.len >= inner.rollover_bytes {
            self.rollover_locked(&mut inner)?;
        }
        let bytes = record.encode();
        inner.current.file.write_all(&bytes)?;
        inner.current.len += bytes.len() as u64;
        Ok(())
    }

    fn rollover_locked(&self, inner: &mut Inner) -> Result<()> {
        let old_sequence = inner.current.sequence;
        // Spec §4.8: a JE record closes the outgoing file before the
        // transition to the next one.
        let je = JournalRecord::new(RecordType::JournalEnd, 0, Vec::new());
        let bytes = je.encode();
        inner.current.file.write_all(&bytes)?;
        inner.current.file.sync_all()?;

        let new_sequence = old_sequence + 1;
        inner.current = Self::create_file(&inner.dir, new_sequence)?;
        let sr = JournalRecord::new(RecordType::StartRecord, 0, Vec::new());
        let bytes = sr.encode();
        inner.current.file.write_all(&bytes)?;
        inner.current.len += bytes.len() as u64;
        debug!(old_sequence, new_sequence, "journal.rollover");
        Ok(())
    }

    /// Force-fsyncs the current file (spec §4.10 checkpoint step 3).
    pub fn fsync(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.current.file.sync_all()?;
        Ok(())
    }

    /// Writes a checkpoint record carrying `base_address` (spec §4.10
    /// step 4).
    pub fn write_checkpoint(&self, cp_ts: Timestamp, base_sequence: u64) -> Result<()> {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&base_sequence.to_be_bytes());
        let record = JournalRecord::new(RecordType::Checkpoint, cp_ts, payload);
        self.append(&record)?;
        self.fsync()?;
        let mut inner = self.inner.lock();
        inner.base_sequence = inner.base_sequence.max(base_sequence);
        Ok(())
    }

    /// Deletes journal files strictly older than the current base
    /// sequence (spec §4.8 "Copier"): called once the copier has
    /// persisted every PA record they contain and no live transaction
    /// still references them.
    pub fn reclaim_before_base(&self) -> Result<usize> {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        for entry in fs::read_dir(&inner.dir)? {
            let entry = entry?;
            let Some(sequence) = entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_prefix("journal-"))
                .and_then(|n| n.strip_suffix(".jnl"))
                .and_then(|n| n.parse::<u64>().ok())
            else {
                continue;
            };
            if sequence < inner.base_sequence && sequence != inner.current.sequence {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        let base_sequence = inner.base_sequence;
        inner.ts_sequence.retain(|_, sequence| *sequence >= base_sequence);
        if removed > 0 {
            info!(removed, base_sequence = inner.base_sequence, "journal.reclaim");
        }
        Ok(removed)
    }

    /// The journal directory, for recovery to scan.
    pub fn dir(&self) -> PathBuf {
        self.inner.lock().dir.clone()
    }

    /// Overrides the file-size rollover threshold (default 64 MiB);
    /// mainly useful for exercising rollover/reclaim behavior in tests
    /// without writing tens of megabytes of records.
    pub fn set_rollover_bytes(&self, bytes: u64) {
        self.inner.lock().rollover_bytes = bytes;
    }

    /// The sequence number of the file currently being written to.
    pub fn current_sequence(&self) -> u64 {
        self.inner.lock().current.sequence
    }

    /// The first file sequence `start_ts`'s own journal records (chunk,
    /// commit, or rollback) were appended into, if any were ever
    /// written by this manager instance.
    pub fn sequence_for_ts(&self, start_ts: Timestamp) -> Option<u64> {
        self.inner.lock().ts_sequence.get(&start_ts).copied()
    }

    /// Records the sequence a transaction's record just landed in, the
    /// first time it is seen for that `start_ts` (spec §4.8 base
    /// address bookkeeping).
    fn note_ts_sequence(&self, start_ts: Timestamp) {
        let mut inner = self.inner.lock();
        let sequence = inner.current.sequence;
        inner.ts_sequence.entry(start_ts).or_insert(sequence);
    }

    /// Reads every record from every journal file on disk, in file and
    /// then intra-file order, tolerating a truncated tail on the last
    /// file (spec §4.9: recovery "scans the journal from the last valid
    /// CP forward" and "must tolerate truncated tails").
    pub fn scan_all_records(&self) -> Result<Vec<JournalRecord>> {
        let dir = self.dir();
        let mut sequences: Vec<u64> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.file_name()
                    .to_str()?
                    .strip_prefix("journal-")?
                    .strip_suffix(".jnl")?
                    .parse::<u64>()
                    .ok()
            })
            .collect();
        sequences.sort_unstable();

        let mut all = Vec::new();
        for sequence in sequences {
            let path = file_path(&dir, sequence);
            let mut bytes = Vec::new();
            File::open(&path)?.read_to_end(&mut bytes)?;
            if bytes.len() < FILE_HEADER_LEN {
                continue;
            }
            validate_file_header(&bytes)?;
            all.extend(record::decode_stream(&bytes[FILE_HEADER_LEN..]));
        }
        Ok(all)
    }

    /// Binds a volume handle (spec §4.8 `IV` record).
    pub fn bind_volume(&self, handle: u32, path: &str) -> Result<()> {
        let mut payload = handle.to_be_bytes().to_vec();
        payload.extend_from_slice(path.as_bytes());
        self.append(&JournalRecord::new(RecordType::VolumeHandle, 0, payload))
    }

    /// Binds a tree handle (spec §4.8 `IT` record).
    pub fn bind_tree(&self, volume_handle: u32, tree_name: &str) -> Result<()> {
        let mut payload = volume_handle.to_be_bytes().to_vec();
        payload.extend_from_slice(tree_name.as_bytes());
        self.append(&JournalRecord::new(RecordType::TreeHandle, 0, payload))
    }

    /// Appends a page image (spec §4.8 "Every dirty page eviction
    /// appends a PA record before the frame can be reused").
    pub fn append_page_image(&self, ts: Timestamp, volume_handle: u32, page_addr: u64, image: &[u8]) -> Result<()> {
        let mut payload = volume_handle.to_be_bytes().to_vec();
        payload.extend_from_slice(&page_addr.to_be_bytes());
        payload.extend_from_slice(image);
        self.append(&JournalRecord::new(RecordType::PageImage, ts, payload))
    }
}

impl JournalSink for JournalManager {
    fn append_tx_chunk(&self, start_ts: Timestamp, bytes: &[u8]) -> Result<()> {
        self.append(&JournalRecord::new(RecordType::Transaction, start_ts, bytes.to_vec()))?;
        self.note_ts_sequence(start_ts);
        Ok(())
    }

    fn append_commit(&self, start_ts: Timestamp, commit_ts: Timestamp, policy: CommitPolicy) -> Result<()> {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&commit_ts.to_be_bytes());
        self.append(&JournalRecord::new(RecordType::Transaction, start_ts, payload))?;
        self.note_ts_sequence(start_ts);
        match policy {
            CommitPolicy::Soft => {}
            CommitPolicy::Hard | CommitPolicy::Group => self.fsync()?,
        }
        Ok(())
    }

    fn append_rollback(&self, start_ts: Timestamp) -> Result<()> {
        self.append(&JournalRecord::new(RecordType::Transaction, start_ts, vec![0xff]))?;
        self.note_ts_sequence(start_ts);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_file_zero_and_reopen_preserves_it() {
        let dir = tempdir().unwrap();
        {
            let journal = JournalManager::open(dir.path()).unwrap();
            journal
                .append(&JournalRecord::new(RecordType::PageImage, 1, vec![1, 2, 3]))
                .unwrap();
        }
        let journal = JournalManager::open(dir.path()).unwrap();
        journal.fsync().unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn rollover_on_size_threshold_creates_second_file() {
        let dir = tempdir().unwrap();
        let journal = JournalManager::open(dir.path()).unwrap();
        journal.inner.lock().rollover_bytes = 64;
        for i in 0..10u64 {
            journal
                .append(&JournalRecord::new(RecordType::PageImage, i, vec![0u8; 32]))
                .unwrap();
        }
        let count = fs::read_dir(dir.path()).unwrap().count();
        assert!(count >= 2, "expected rollover to produce multiple files, got {count}");
    }

    #[test]
    fn commit_sink_fsyncs_under_hard_policy() {
        let dir = tempdir().unwrap();
        let journal = JournalManager::open(dir.path()).unwrap();
        journal.append_commit(5, 6, CommitPolicy::Hard).unwrap();
    }

    #[test]
    fn reclaim_before_base_removes_only_old_files() {
        let dir = tempdir().unwrap();
        let journal = JournalManager::open(dir.path()).unwrap();
        journal.inner.lock().rollover_bytes = 32;
        for i in 0..8u64 {
            journal
                .append(&JournalRecord::new(RecordType::PageImage, i, vec![0u8; 16]))
                .unwrap();
        }
        let current_sequence = journal.inner.lock().current.sequence;
        journal.write_checkpoint(100, current_sequence).unwrap();
        let removed = journal.reclaim_before_base().unwrap();
        assert!(removed > 0);
        let remaining: Vec<u64> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| {
                e.ok()?
                    .file_name()
                    .to_str()?
                    .strip_prefix("journal-")?
                    .strip_suffix(".jnl")?
                    .parse()
                    .ok()
            })
            .collect();
        assert!(remaining.iter().all(|&s| s >= current_sequence));
    }
}
