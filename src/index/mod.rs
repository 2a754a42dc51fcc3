//! Slice planning and the variable-width index table.
//!
//! ```text
//! +------+---------+...+---------+---------+----------+...+----------+
//! |Header|index for|   |index for|index for|compressed|   |compressed|
//! |      | slice 0 |   |slice N-1|   EOF   |  slice 0 |   |slice N-1 |
//! +------+---------+...+---------+---------+----------+...+----------+
//!        <--------- (N + 1) * index_size ------>
//! ```
//!
//! Every entry is an absolute, big-endian file offset.  The extra trailing
//! entry is the sentinel: the offset just past the last compressed slice.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::error::{EbzError, Result};
use crate::header::HEADER_SIZE;

/// Page size of an EB/EPWING book file; level 0 slices are one page.
pub const PAGE_SIZE: usize = 2048;
/// Highest supported compression level (slice = `PAGE_SIZE << 5` = 64 KiB).
pub const MAX_LEVEL: u8 = 5;
/// Level used when none is requested.
pub const DEFAULT_LEVEL: u8 = 0;

/// Derived slice geometry for one file.  Pure; no I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlicePlan {
    pub file_size:    u64,
    pub level:        u8,
    pub slice_size:   usize,
    pub total_slices: u64,
    pub index_size:   usize,
}

impl SlicePlan {
    pub fn new(file_size: u64, level: u8) -> Result<Self> {
        if level > MAX_LEVEL {
            return Err(EbzError::InvalidLevel(level));
        }
        let slice_size = PAGE_SIZE << level;
        Ok(Self {
            file_size,
            level,
            slice_size,
            total_slices: file_size.div_ceil(slice_size as u64),
            index_size:   index_width(file_size),
        })
    }

    /// Bytes occupied by the index table, sentinel included.
    pub fn index_length(&self) -> u64 {
        (self.total_slices + 1) * self.index_size as u64
    }

    /// Offset of the first compressed slice.
    pub fn data_start(&self) -> u64 {
        HEADER_SIZE as u64 + self.index_length()
    }

    /// Absolute offset of index entry `i` (`i == total_slices` is the sentinel).
    pub fn entry_offset(&self, i: u64) -> u64 {
        HEADER_SIZE as u64 + i * self.index_size as u64
    }

    /// Real (unpadded) byte count of slice `i`.
    pub fn slice_len(&self, i: u64) -> usize {
        let start = i * self.slice_size as u64;
        self.file_size.saturating_sub(start).min(self.slice_size as u64) as usize
    }

    /// Progress is reported every this many slices.
    pub fn progress_interval(&self) -> u64 {
        let base = 1024u64 >> self.level;
        base.max(self.total_slices.div_ceil(1000)).max(1)
    }
}

/// Smallest entry width in {2, 3, 4, 5} able to address `size`.
pub fn index_width(size: u64) -> usize {
    match size {
        s if s < 1 << 16 => 2,
        s if s < 1 << 24 => 3,
        s if s < 1 << 32 => 4,
        _                => 5,
    }
}

/// Encode one index entry into `width` big-endian bytes.
pub fn write_entry<W: Write>(mut writer: W, value: u64, width: usize) -> Result<()> {
    if width < 8 && value >> (width * 8) != 0 {
        return Err(EbzError::IndexOverflow { value, width });
    }
    writer.write_uint::<BigEndian>(value, width)?;
    Ok(())
}

/// Decode one `width`-byte big-endian index entry.
pub fn read_entry<R: Read>(mut reader: R, width: usize) -> io::Result<u64> {
    reader.read_uint::<BigEndian>(width)
}

/// Encode the start/end entry pair for one slice, as patched by the writer.
pub fn entry_pair(start: u64, end: u64, width: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(width * 2);
    write_entry(&mut buf, start, width)?;
    write_entry(&mut buf, end, width)?;
    Ok(buf)
}
