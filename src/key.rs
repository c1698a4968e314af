//! Order-preserving key codec (spec §3.1).
//!
//! A [`Key`] is a sequence of typed segments. The byte encoding of the
//! whole sequence is built so that lexicographic comparison of the raw
//! bytes agrees with the logical ordering of the segment sequence: each
//! segment type has a fixed tag byte, tags are chosen in the order they
//! should sort against each other, and variable-length payloads are
//! escaped so that one segment's encoding is never a byte-for-byte prefix
//! of another's.

use crate::error::{Result, StrataError};
use smallvec::SmallVec;
use std::cmp::Ordering;

const TAG_BEFORE: u8 = 0x01;
const TAG_NULL: u8 = 0x10;
const TAG_INTEGER: u8 = 0x20;
const TAG_FLOAT: u8 = 0x21;
const TAG_BYTES: u8 = 0x30;
const TAG_STRING: u8 = 0x31;
const TAG_AFTER: u8 = 0xff;

/// Maximum encoded key size, derived from the smallest supported page
/// size (spec §3.1: "encoded size ... derived from the maximum page
/// size"); a key may never exceed roughly a quarter of the smallest page
/// so that a handful of keys always fit in one index page.
pub const MAX_KEY_SIZE: usize = 256;

/// One typed, order-comparable element of a composite [`Key`].
#[derive(Clone, Debug, PartialEq)]
pub enum Segment {
    /// The reserved edge value sorting below every real key.
    Before,
    /// SQL-null-like marker, sorts below all populated segments.
    Null,
    /// Signed 64-bit integer.
    Integer(i64),
    /// IEEE-754 double.
    Float(f64),
    /// Raw byte string.
    Bytes(Vec<u8>),
    /// UTF-8 string.
    String(String),
    /// The reserved edge value sorting above every real key.
    After,
}

/// An order-preserving, composite key.
///
/// Keys are built by successive [`Key::append_*`] calls ("depth" is the
/// number of segments appended) and compared by their encoded bytes,
/// never by decoding - this keeps B+tree page search a plain binary
/// search over byte slices.
#[derive(Clone, Debug, Default, Eq, PartialEq, PartialOrd, Ord)]
pub struct Key {
    encoded: SmallVec<[u8; 32]>,
    depth: u32,
}

impl Key {
    /// Creates an empty key (depth zero).
    pub fn new() -> Self {
        Self::default()
    }

    /// The reserved key sorting below every real key in a tree.
    pub fn before() -> Self {
        let mut key = Self::new();
        key.encoded.push(TAG_BEFORE);
        key.depth = 1;
        key
    }

    /// The reserved key sorting above every real key in a tree.
    pub fn after() -> Self {
        let mut key = Self::new();
        key.encoded.push(TAG_AFTER);
        key.depth = 1;
        key
    }

    /// Builds a key directly from already-encoded bytes (e.g. a slot key
    /// read back off a page). The caller is responsible for the bytes
    /// having been produced by this codec.
    pub fn from_encoded(bytes: &[u8]) -> Self {
        Self {
            encoded: SmallVec::from_slice(bytes),
            depth: count_segments(bytes),
        }
    }

    /// The raw encoded bytes, suitable for storing in a page slot and for
    /// byte-wise comparison against other encoded keys.
    pub fn encoded_bytes(&self) -> &[u8] {
        &self.encoded
    }

    /// Number of segments appended to this key.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        self.encoded.len()
    }

    /// Appends a null segment.
    pub fn append_null(&mut self) -> &mut Self {
        self.encoded.push(TAG_NULL);
        self.depth += 1;
        self
    }

    /// Appends a signed integer segment.
    pub fn append_int(&mut self, value: i64) -> &mut Self {
        self.encoded.push(TAG_INTEGER);
        let flipped = (value as u64) ^ 0x8000_0000_0000_0000;
        self.encoded.extend_from_slice(&flipped.to_be_bytes());
        self.depth += 1;
        self
    }

    /// Appends a floating-point segment.
    pub fn append_float(&mut self, value: f64) -> &mut Self {
        self.encoded.push(TAG_FLOAT);
        self.encoded
            .extend_from_slice(&order_preserving_float_bits(value).to_be_bytes());
        self.depth += 1;
        self
    }

    /// Appends a raw byte-string segment.
    pub fn append_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.encoded.push(TAG_BYTES);
        encode_escaped(value, &mut self.encoded);
        self.depth += 1;
        self
    }

    /// Appends a UTF-8 string segment.
    pub fn append_str(&mut self, value: &str) -> &mut Self {
        self.encoded.push(TAG_STRING);
        encode_escaped(value.as_bytes(), &mut self.encoded);
        self.depth += 1;
        self
    }

    /// Decodes the key back into its segment sequence.
    pub fn segments(&self) -> Result<Vec<Segment>> {
        decode_all(&self.encoded)
    }

    /// Returns a key consisting of just the first `n` segments of `self`,
    /// used to build parent-index separators from a longer leaf key.
    pub fn prefix(&self, n: u32) -> Result<Key> {
        if n == 0 {
            return Ok(Key::new());
        }
        let offsets = segment_offsets(&self.encoded)?;
        let end = offsets
            .get(n as usize)
            .copied()
            .unwrap_or(self.encoded.len());
        Ok(Key {
            encoded: SmallVec::from_slice(&self.encoded[..end]),
            depth: n.min(self.depth),
        })
    }

    /// Returns `true` if `self` is a byte-wise prefix of `other`'s
    /// encoding (used by elision-byte-count computation in the page
    /// layout).
    pub fn is_prefix_of(&self, other: &Key) -> bool {
        other.encoded.starts_with(&self.encoded[..])
    }

    /// Number of leading bytes shared with `other` (the elision byte
    /// count used by slotted page compression, spec §3.3/§4.2).
    pub fn common_prefix_len(&self, other: &Key) -> usize {
        self.encoded
            .iter()
            .zip(other.encoded.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// The smallest key whose encoding strictly follows `self` (spec
    /// §3.1: `nudge_right`). Used to obtain an exclusive-lower-bound
    /// cursor position from an inclusive one.
    pub fn nudge_right(&self) -> Key {
        let mut encoded = self.encoded.clone();
        encoded.push(0x00);
        Key {
            encoded,
            depth: self.depth,
        }
    }

    /// The largest key whose encoding strictly precedes `self` within the
    /// same encoded length class (spec §3.1: `nudge_left`). Used to
    /// obtain an exclusive-upper-bound cursor position from an inclusive
    /// one.
    pub fn nudge_left(&self) -> Key {
        let mut encoded = self.encoded.clone();
        while let Some(&last) = encoded.last() {
            if last == 0x00 {
                encoded.pop();
                continue;
            }
            let len = encoded.len();
            encoded[len - 1] = last - 1;
            encoded.push(0xff);
            break;
        }
        Key {
            encoded,
            depth: self.depth,
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.segments() {
            Ok(segments) => write!(f, "{:?}", segments),
            Err(_) => write!(f, "<undecodable:{} bytes>", self.encoded.len()),
        }
    }
}

/// Flips the bits of an `f64` so that big-endian comparison of the
/// resulting `u64` agrees with `f64` comparison (for all finite values
/// including negatives; NaN is rejected by callers upstream).
fn order_preserving_float_bits(value: f64) -> u64 {
    let bits = value.to_bits();
    if value.is_sign_negative() {
        !bits
    } else {
        bits | 0x8000_0000_0000_0000
    }
}

fn decode_order_preserving_float_bits(bits: u64) -> f64 {
    let restored = if bits & 0x8000_0000_0000_0000 != 0 {
        bits & 0x7fff_ffff_ffff_ffff
    } else {
        !bits
    };
    f64::from_bits(restored)
}

/// Escapes `0x00` bytes as `0x00 0xff` and terminates with `0x00 0x00` so
/// that no encoded byte-string segment is a prefix of another (classic
/// order-preserving C-string escaping).
fn encode_escaped(value: &[u8], out: &mut SmallVec<[u8; 32]>) {
    for &byte in value {
        if byte == 0x00 {
            out.push(0x00);
            out.push(0xff);
        } else {
            out.push(byte);
        }
    }
    out.push(0x00);
    out.push(0x00);
}

fn decode_escaped(bytes: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            0x00 if bytes.get(i + 1) == Some(&0xff) => {
                out.push(0x00);
                i += 2;
            }
            0x00 => {
                return Ok((out, i + 2));
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Err(StrataError::CorruptPage(
        "unterminated escaped key segment".into(),
    ))
}

fn escaped_len(bytes: &[u8]) -> Result<usize> {
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            0x00 if bytes.get(i + 1) == Some(&0xff) => i += 2,
            0x00 => return Ok(i + 2),
            _ => i += 1,
        }
    }
    Err(StrataError::CorruptPage(
        "unterminated escaped key segment".into(),
    ))
}

fn count_segments(bytes: &[u8]) -> u32 {
    segment_offsets(bytes).map(|v| v.len() as u32 - 1).unwrap_or(0)
}

/// Returns the byte offset immediately after each segment, with a
/// leading `0` sentinel - `offsets[n]` is the end of the `n`-th segment.
fn segment_offsets(bytes: &[u8]) -> Result<Vec<usize>> {
    let mut offsets = vec![0usize];
    let mut i = 0;
    while i < bytes.len() {
        let tag = bytes[i];
        i += 1;
        i += match tag {
            TAG_BEFORE | TAG_AFTER | TAG_NULL => 0,
            TAG_INTEGER | TAG_FLOAT => 8,
            TAG_BYTES | TAG_STRING => escaped_len(&bytes[i..])?,
            _ => {
                return Err(StrataError::CorruptPage(format!(
                    "unknown key segment tag {tag:#x}"
                )))
            }
        };
        offsets.push(i);
    }
    Ok(offsets)
}

fn decode_all(bytes: &[u8]) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let tag = bytes[i];
        i += 1;
        let segment = match tag {
            TAG_BEFORE => Segment::Before,
            TAG_AFTER => Segment::After,
            TAG_NULL => Segment::Null,
            TAG_INTEGER => {
                let raw = u64::from_be_bytes(bytes[i..i + 8].try_into().unwrap());
                i += 8;
                Segment::Integer((raw ^ 0x8000_0000_0000_0000) as i64)
            }
            TAG_FLOAT => {
                let raw = u64::from_be_bytes(bytes[i..i + 8].try_into().unwrap());
                i += 8;
                Segment::Float(decode_order_preserving_float_bits(raw))
            }
            TAG_BYTES => {
                let (value, consumed) = decode_escaped(&bytes[i..])?;
                i += consumed;
                Segment::Bytes(value)
            }
            TAG_STRING => {
                let (value, consumed) = decode_escaped(&bytes[i..])?;
                i += consumed;
                Segment::String(String::from_utf8(value).map_err(|_| {
                    StrataError::CorruptPage("string key segment is not valid utf-8".into())
                })?)
            }
            other => {
                return Err(StrataError::CorruptPage(format!(
                    "unknown key segment tag {other:#x}"
                )))
            }
        };
        segments.push(segment);
    }
    Ok(segments)
}

/// Compares two encoded keys byte-for-byte; the primary ordering used
/// throughout the B+tree.
pub fn compare_encoded(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}
