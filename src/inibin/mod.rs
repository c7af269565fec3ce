//! Inibin v2 binary codec.
//!
//! # Layout
//! ```text
//! u8  version (= 2)
//! u16 strings_len
//! u16 presence flags        bit i set => block for type id i follows
//! per set bit, ascending:
//!     u16 count | u32 hash[count] | payload
//! ```
//! Payloads are fixed-size values, except booleans (`ceil(count/8)` bytes,
//! bit `i % 8` of byte `i / 8`) and strings (`u16 offset[count]` followed by
//! the shared `strings_len`-byte block of NUL-terminated UTF-8 runs).
//!
//! All integers are little-endian.  Sections have no on-disk form: the
//! reader returns every property in one synthetic section and the writer
//! flattens all sections, so section membership does not survive a
//! write/read cycle on its own.

pub mod reader;
pub mod writer;

use std::io;
use thiserror::Error;

use crate::model::ValueType;

pub use reader::InibinReader;
pub use writer::InibinWriter;

/// Number of presence bits.
pub const TYPE_SLOTS: u8 = 16;
/// Scale applied to the byte-encoded float types.
pub const BYTE_SCALE: f32 = 0.1;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum InibinError {
    #[error("Unsupported Inibin version: {0}")]
    UnsupportedVersion(u8),
    #[error("Inibin version 1 is recognised but not supported")]
    VersionOneUnsupported,
    #[error("Malformed header: {0}")]
    MalformedHeader(String),
    #[error("Truncated data")]
    TruncatedData,
    #[error("Reserved type block {0} is present")]
    UnsupportedType(u8),
    #[error("Property {hash:#010x} does not hold a {ty} value")]
    EncodingTypeMismatch { hash: u32, ty: ValueType },
    #[error("Property {hash:#010x} has type {ty}, which has no Inibin block")]
    NoBlockForType { hash: u32, ty: ValueType },
    #[error("Too large for the format: {0}")]
    TooLarge(String),
    #[error("IO error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for InibinError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => InibinError::TruncatedData,
            _ => InibinError::Io(e),
        }
    }
}

/// Decode a byte-scaled float.
#[inline]
pub fn byte_to_scaled(b: u8) -> f32 {
    b as f32 * BYTE_SCALE
}

/// Encode a byte-scaled float with truncation: `12.34` becomes `123`.
/// Out-of-range values saturate to `0..=255`.
#[inline]
pub fn scaled_to_byte(v: f32) -> u8 {
    (v * 10.0) as u8
}
