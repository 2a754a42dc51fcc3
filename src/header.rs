//! The fixed 22-byte EBZip header.
//!
//! | off | len | field                                              |
//! |-----|-----|----------------------------------------------------|
//! |  0  |  5  | magic `"EBZip"`                                    |
//! |  5  |  1  | size class (high nibble) / compression level (low) |
//! |  6  |  3  | reserved, zero                                     |
//! |  9  |  5  | original file size                                 |
//! | 14  |  4  | Adler-32 of the original content                   |
//! | 18  |  4  | modification time (seconds since epoch)            |
//!
//! All integers are big-endian.  The writer lays a zeroed placeholder at
//! offset 0 and overwrites it with the real header once the checksum is known.

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use std::io::{self, Read, Write};
use thiserror::Error;

use crate::index::MAX_LEVEL;

pub const MAGIC: &[u8; 5] = b"EBZip";
pub const HEADER_SIZE: usize = 22;

/// Size class for originals below 4 GiB.
pub const SIZE_CLASS_32: u8 = 1;
/// Size class for originals of 4 GiB and above (40-bit size field).
pub const SIZE_CLASS_40: u8 = 2;
/// Largest original size the 5-byte field can hold.
pub const MAX_FILE_SIZE: u64 = (1 << 40) - 1;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Invalid magic: expected \"EBZip\", got {}", hex::encode(.0))]
    InvalidMagic([u8; 5]),
    #[error("Unsupported size class {0} in header")]
    UnsupportedVersion(u8),
    #[error("Invalid compression level {0} in header (maximum {})", MAX_LEVEL)]
    InvalidLevel(u8),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbzHeader {
    pub size_class: u8,
    pub level:      u8,
    pub file_size:  u64,
    pub checksum:   u32,
    pub mtime:      u32,
}

impl EbzHeader {
    pub fn new(file_size: u64, level: u8, checksum: u32, mtime: u32) -> Self {
        let size_class = if file_size < 1 << 32 { SIZE_CLASS_32 } else { SIZE_CLASS_40 };
        Self { size_class, level, file_size, checksum, mtime }
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..5].copy_from_slice(MAGIC);
        out[5] = (self.size_class << 4) | (self.level & 0x0f);
        BigEndian::write_uint(&mut out[9..14], self.file_size & MAX_FILE_SIZE, 5);
        BigEndian::write_u32(&mut out[14..18], self.checksum);
        BigEndian::write_u32(&mut out[18..22], self.mtime);
        out
    }

    pub fn read<R: Read>(mut reader: R) -> Result<Self, HeaderError> {
        let mut magic = [0u8; 5];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(HeaderError::InvalidMagic(magic));
        }
        let mode = reader.read_u8()?;
        let size_class = mode >> 4;
        let level = mode & 0x0f;
        if size_class != SIZE_CLASS_32 && size_class != SIZE_CLASS_40 {
            return Err(HeaderError::UnsupportedVersion(size_class));
        }
        if level > MAX_LEVEL {
            return Err(HeaderError::InvalidLevel(level));
        }
        let mut reserved = [0u8; 3];
        reader.read_exact(&mut reserved)?;
        Ok(Self {
            size_class,
            level,
            file_size: reader.read_uint::<BigEndian>(5)?,
            checksum:  reader.read_u32::<BigEndian>()?,
            mtime:     reader.read_u32::<BigEndian>()?,
        })
    }
}
