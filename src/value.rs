//! Value encoding: opaque byte values, long-record pointers, and
//! multi-version values (spec §3.2).
//!
//! A slot's raw bytes are one of three shapes, distinguished by a leading
//! tag byte: a plain value (non-transactional / primordial writes), a
//! long-record pointer (payload lives in an overflow page chain), or an
//! MVV - a sequence of `(version_handle, payload)` tuples in the order
//! they were appended. MVV payloads are themselves either inline bytes,
//! an antivalue tombstone, or a long-record pointer; per spec §4.5 the
//! sequence is never re-sorted by timestamp.

use crate::error::{Result, StrataError};
use crate::page::PageAddress;
use crate::ts::ValueHandle;

const TAG_PLAIN: u8 = 0;
const TAG_LONG_RECORD: u8 = 1;
const TAG_MVV: u8 = 2;

const PAYLOAD_BYTES: u8 = 0;
const PAYLOAD_ANTIVALUE: u8 = 1;
const PAYLOAD_LONG_RECORD: u8 = 2;

/// Fixed-size stub pointing at the head of an overflow page chain holding
/// a value too large to fit in a page (spec §3.2, §4.4).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LongRecordPointer {
    /// Address of the first page in the overflow chain.
    pub head_page: PageAddress,
    /// Total logical length of the assembled value, in bytes.
    pub total_len: u64,
}

impl LongRecordPointer {
    const ENCODED_LEN: usize = 16;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.head_page.0.to_be_bytes());
        out.extend_from_slice(&self.total_len.to_be_bytes());
    }

    fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < Self::ENCODED_LEN {
            return Err(StrataError::CorruptPage(
                "long record pointer truncated".into(),
            ));
        }
        let head_page = PageAddress(u64::from_be_bytes(bytes[0..8].try_into().unwrap()));
        let total_len = u64::from_be_bytes(bytes[8..16].try_into().unwrap());
        Ok((
            LongRecordPointer {
                head_page,
                total_len,
            },
            Self::ENCODED_LEN,
        ))
    }
}

/// Payload of one MVV version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionPayload {
    /// Inline value bytes.
    Bytes(Vec<u8>),
    /// Tombstone marker: the key is logically absent as of this version.
    AntiValue,
    /// Value stored out-of-line in an overflow chain.
    LongRecord(LongRecordPointer),
}

impl VersionPayload {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            VersionPayload::Bytes(bytes) => {
                out.push(PAYLOAD_BYTES);
                out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                out.extend_from_slice(bytes);
            }
            VersionPayload::AntiValue => {
                out.push(PAYLOAD_ANTIVALUE);
            }
            VersionPayload::LongRecord(ptr) => {
                out.push(PAYLOAD_LONG_RECORD);
                ptr.encode(out);
            }
        }
    }

    fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.is_empty() {
            return Err(StrataError::CorruptPage("mvv payload truncated".into()));
        }
        match bytes[0] {
            PAYLOAD_BYTES => {
                if bytes.len() < 5 {
                    return Err(StrataError::CorruptPage("mvv payload truncated".into()));
                }
                let len = u32::from_be_bytes(bytes[1..5].try_into().unwrap()) as usize;
                if bytes.len() < 5 + len {
                    return Err(StrataError::CorruptPage("mvv payload truncated".into()));
                }
                Ok((
                    VersionPayload::Bytes(bytes[5..5 + len].to_vec()),
                    5 + len,
                ))
            }
            PAYLOAD_ANTIVALUE => Ok((VersionPayload::AntiValue, 1)),
            PAYLOAD_LONG_RECORD => {
                let (ptr, consumed) = LongRecordPointer::decode(&bytes[1..])?;
                Ok((VersionPayload::LongRecord(ptr), 1 + consumed))
            }
            other => Err(StrataError::CorruptPage(format!(
                "unknown mvv payload tag {other:#x}"
            ))),
        }
    }

    /// `true` if this payload is a tombstone.
    pub fn is_antivalue(&self) -> bool {
        matches!(self, VersionPayload::AntiValue)
    }
}

/// One entry in an MVV: the writer's version handle plus its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MvvVersion {
    /// `(ts << 8) | step` of the writer.
    pub handle: ValueHandle,
    /// The version's payload.
    pub payload: VersionPayload,
}

/// The decoded shape of a slot's raw value bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawValue {
    /// Non-transactional ("primordial") plain value.
    Plain(Vec<u8>),
    /// Pointer to an overflow chain, outside of any MVV wrapping.
    LongRecord(LongRecordPointer),
    /// Multi-version value: insertion-ordered list of versions.
    Mvv(Vec<MvvVersion>),
}

impl RawValue {
    /// Encodes the value into a byte buffer suitable for writing to a
    /// page slot.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            RawValue::Plain(bytes) => {
                out.push(TAG_PLAIN);
                out.extend_from_slice(bytes);
            }
            RawValue::LongRecord(ptr) => {
                out.push(TAG_LONG_RECORD);
                ptr.encode(&mut out);
            }
            RawValue::Mvv(versions) => {
                out.push(TAG_MVV);
                out.extend_from_slice(&(versions.len() as u32).to_be_bytes());
                for version in versions {
                    out.extend_from_slice(&version.handle.to_be_bytes());
                    version.payload.encode(&mut out);
                }
            }
        }
        out
    }

    /// Decodes a slot's raw value bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(StrataError::CorruptPage("value bytes empty".into()));
        }
        match bytes[0] {
            TAG_PLAIN => Ok(RawValue::Plain(bytes[1..].to_vec())),
            TAG_LONG_RECORD => {
                let (ptr, _) = LongRecordPointer::decode(&bytes[1..])?;
                Ok(RawValue::LongRecord(ptr))
            }
            TAG_MVV => {
                if bytes.len() < 5 {
                    return Err(StrataError::CorruptPage("mvv count truncated".into()));
                }
                let count = u32::from_be_bytes(bytes[1..5].try_into().unwrap()) as usize;
                let mut cursor = 5;
                let mut versions = Vec::with_capacity(count);
                for _ in 0..count {
                    if bytes.len() < cursor + 8 {
                        return Err(StrataError::CorruptPage("mvv handle truncated".into()));
                    }
                    let handle =
                        ValueHandle::from_be_bytes(bytes[cursor..cursor + 8].try_into().unwrap());
                    cursor += 8;
                    let (payload, consumed) = VersionPayload::decode(&bytes[cursor..])?;
                    cursor += consumed;
                    versions.push(MvvVersion { handle, payload });
                }
                Ok(RawValue::Mvv(versions))
            }
            other => Err(StrataError::CorruptPage(format!(
                "unknown value tag {other:#x}"
            ))),
        }
    }

    /// Wraps a non-MVV value as a one-version MVV written by `handle`
    /// (spec §4.5 step 1: "if not already an MVV, wrap as one-version
    /// MVV").
    pub fn into_mvv(self, handle: ValueHandle) -> Vec<MvvVersion> {
        match self {
            RawValue::Plain(bytes) => vec![MvvVersion {
                handle,
                payload: VersionPayload::Bytes(bytes),
            }],
            RawValue::LongRecord(ptr) => vec![MvvVersion {
                handle,
                payload: VersionPayload::LongRecord(ptr),
            }],
            RawValue::Mvv(versions) => versions,
        }
    }
}
