//! Journal record framing (spec §4.8): type/length/timestamp header, a
//! variable-length payload, and a CRC32 trailer. Mirrors the teacher's
//! [`crate::journal`] file-level framing (magic + version file header,
//! `type/length/checksum` record framing) one level down, at the
//! per-record granularity.

use crate::error::{Result, StrataError};
use crate::ts::Timestamp;

/// Fixed-size record header: `type(1) + reserved(1) + len(4) + ts(8)`.
pub const RECORD_HEADER_LEN: usize = 14;
/// Trailing CRC32 checksum over the header and payload bytes.
pub const RECORD_TRAILER_LEN: usize = 4;

/// Tagged journal record kind (spec §4.8 record type table).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordType {
    /// `IV`: binds a volume handle to a path.
    VolumeHandle,
    /// `IT`: binds a tree handle within a volume.
    TreeHandle,
    /// `PA`: a page image, written before a dirty frame may be evicted.
    PageImage,
    /// `TX`: one segment of a transaction's write buffer, or its closing
    /// commit/rollback marker.
    Transaction,
    /// `CP`: a checkpoint boundary.
    Checkpoint,
    /// `CU`: a cleanup-manager action record (prune/dealloc/fix-hole).
    Cleanup,
    /// `SR`: start-of-file marker written at the head of a journal file.
    StartRecord,
    /// `JE`: end-of-file marker written before rollover.
    JournalEnd,
    /// `PM`: a page map snapshot, emitted (twice) during rollover.
    PageMap,
    /// `TM`: a transaction map snapshot, emitted during rollover.
    TransactionMap,
}

impl RecordType {
    fn to_u8(self) -> u8 {
        match self {
            RecordType::VolumeHandle => 0,
            RecordType::TreeHandle => 1,
            RecordType::PageImage => 2,
            RecordType::Transaction => 3,
            RecordType::Checkpoint => 4,
            RecordType::Cleanup => 5,
            RecordType::StartRecord => 6,
            RecordType::JournalEnd => 7,
            RecordType::PageMap => 8,
            RecordType::TransactionMap => 9,
        }
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(RecordType::VolumeHandle),
            1 => Ok(RecordType::TreeHandle),
            2 => Ok(RecordType::PageImage),
            3 => Ok(RecordType::Transaction),
            4 => Ok(RecordType::Checkpoint),
            5 => Ok(RecordType::Cleanup),
            6 => Ok(RecordType::StartRecord),
            7 => Ok(RecordType::JournalEnd),
            8 => Ok(RecordType::PageMap),
            9 => Ok(RecordType::TransactionMap),
            other => Err(StrataError::CorruptJournal(format!(
                "unknown journal record type {other:#x}"
            ))),
        }
    }
}

/// One decoded journal record.
#[derive(Clone, Debug)]
pub struct JournalRecord {
    /// This record's tagged type.
    pub record_type: RecordType,
    /// The timestamp carried by the record (commit-ts, checkpoint-ts,
    /// page mutation ts, or `0` for records with no natural timestamp).
    pub ts: Timestamp,
    /// Record-specific payload bytes.
    pub payload: Vec<u8>,
}

impl JournalRecord {
    /// Builds a record ready for [`JournalRecord::encode`].
    pub fn new(record_type: RecordType, ts: Timestamp, payload: Vec<u8>) -> Self {
        Self {
            record_type,
            ts,
            payload,
        }
    }

    /// Encodes the record to its on-disk byte form: header, payload,
    /// then a CRC32 trailer over both.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_HEADER_LEN + self.payload.len() + RECORD_TRAILER_LEN);
        buf.push(self.record_type.to_u8());
        buf.push(0);
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.ts.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        let checksum = crc32fast::hash(&buf);
        buf.extend_from_slice(&checksum.to_be_bytes());
        buf
    }

    /// Decodes exactly one record from the front of `bytes`, returning
    /// it along with the number of bytes consumed. Used by the journal
    /// writer's self-tests and by [`decode_stream`] for recovery replay.
    pub fn decode_one(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < RECORD_HEADER_LEN {
            return Err(StrataError::CorruptJournal("record header truncated".into()));
        }
        let record_type = RecordType::from_u8(bytes[0])?;
        let len = u32::from_be_bytes(bytes[2..6].try_into().unwrap()) as usize;
        let ts = Timestamp::from_be_bytes(bytes[6..14].try_into().unwrap());
        let total = RECORD_HEADER_LEN + len + RECORD_TRAILER_LEN;
        if bytes.len() < total {
            return Err(StrataError::CorruptJournal("record payload truncated".into()));
        }
        let payload = bytes[RECORD_HEADER_LEN..RECORD_HEADER_LEN + len].to_vec();
        let stored_checksum =
            u32::from_be_bytes(bytes[RECORD_HEADER_LEN + len..total].try_into().unwrap());
        let computed = crc32fast::hash(&bytes[..RECORD_HEADER_LEN + len]);
        if computed != stored_checksum {
            return Err(StrataError::CorruptJournal(format!(
                "record checksum mismatch: stored {stored_checksum:#x}, computed {computed:#x}"
            )));
        }
        Ok((
            JournalRecord {
                record_type,
                ts,
                payload,
            },
            total,
        ))
    }
}

/// Decodes every well-formed record from `bytes` in order, stopping at
/// the first record that fails to parse or checksum rather than
/// propagating an error - the accepted prefix is the recoverable state
/// (spec §4.9 step 5: "the prefix is accepted as the recoverable
/// state"), which lets recovery tolerate a truncated tail from a crash
/// mid-write.
pub fn decode_stream(bytes: &[u8]) -> Vec<JournalRecord> {
    let mut out = Vec::new();
    let mut cursor = 0;
    while cursor < bytes.len() {
        match JournalRecord::decode_one(&bytes[cursor..]) {
            Ok((record, consumed)) => {
                cursor += consumed;
                out.push(record);
            }
            Err(_) => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trips() {
        let record = JournalRecord::new(RecordType::PageImage, 42, vec![1, 2, 3, 4]);
        let bytes = record.encode();
        let (decoded, consumed) = JournalRecord::decode_one(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.ts, 42);
        assert_eq!(decoded.payload, vec![1, 2, 3, 4]);
        assert!(matches!(decoded.record_type, RecordType::PageImage));
    }

    #[test]
    fn decode_one_rejects_corrupted_checksum() {
        let record = JournalRecord::new(RecordType::Checkpoint, 1, vec![9, 9]);
        let mut bytes = record.encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(JournalRecord::decode_one(&bytes).is_err());
    }

    #[test]
    fn decode_stream_accepts_truncated_tail_as_prefix() {
        let a = JournalRecord::new(RecordType::PageImage, 1, vec![1]);
        let b = JournalRecord::new(RecordType::PageImage, 2, vec![2]);
        let mut bytes = a.encode();
        bytes.extend(b.encode());
        bytes.truncate(bytes.len() - 3); // sever the second record mid-trailer
        let decoded = decode_stream(&bytes);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].ts, 1);
    }

    #[test]
    fn decode_stream_handles_multiple_records_back_to_back() {
        let records = vec![
            JournalRecord::new(RecordType::StartRecord, 0, Vec::new()),
            JournalRecord::new(RecordType::PageImage, 5, vec![0xab; 10]),
            JournalRecord::new(RecordType::JournalEnd, 0, Vec::new()),
        ];
        let mut bytes = Vec::new();
        for record in &records {
            bytes.extend(record.encode());
        }
        let decoded = decode_stream(&bytes);
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[1].payload, vec![0xab; 10]);
    }
}
