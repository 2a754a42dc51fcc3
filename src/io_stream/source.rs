//! Seekable, page-addressable view of a book file.
//!
//! The engine never reads a file directly; it reads through [`BookSource`],
//! which presents the *uncompressed* content of a file whatever its on-disk
//! format.  [`PlainSource`] covers uncompressed files and
//! [`EbzReader`](super::EbzReader) covers EBZip containers.  Readers for other
//! legacy formats are supplied by the caller.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{EbzError, Result};

pub trait BookSource {
    /// Position the next `read` at `pos` within the uncompressed content.
    fn seek(&mut self, pos: u64) -> Result<()>;

    /// Fill as much of `buf` as the content allows.  Returns 0 only at EOF.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Uncompressed content size.
    fn file_size(&self) -> u64;

    /// Size of the file as stored on disk.
    fn real_file_size(&self) -> u64 {
        self.file_size()
    }

    /// Checksum recorded by the container, when the format keeps one.
    fn checksum(&self) -> Option<u32> {
        None
    }

    /// Compression level recorded by the container, when the format keeps one.
    fn level(&self) -> Option<u8> {
        None
    }
}

impl<S: BookSource + ?Sized> BookSource for Box<S> {
    fn seek(&mut self, pos: u64) -> Result<()>          { (**self).seek(pos) }
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> { (**self).read(buf) }
    fn file_size(&self) -> u64                          { (**self).file_size() }
    fn real_file_size(&self) -> u64                     { (**self).real_file_size() }
    fn checksum(&self) -> Option<u32>                   { (**self).checksum() }
    fn level(&self) -> Option<u8>                       { (**self).level() }
}

/// Read the span `[offset, offset + buf.len())`, clamped to the file size,
/// validating the byte count against what the file size promises.
///
/// Returns the number of real bytes placed at the front of `buf`.
pub fn read_span<S: BookSource + ?Sized>(source: &mut S, offset: u64, buf: &mut [u8]) -> Result<usize> {
    let file_size = source.file_size();
    let wanted = file_size.saturating_sub(offset).min(buf.len() as u64) as usize;
    if wanted == 0 {
        return Err(EbzError::UnexpectedEof { offset, expected: buf.len() as u64 });
    }
    source.seek(offset)?;
    let got = source.read(&mut buf[..wanted])?;
    if got == 0 {
        return Err(EbzError::UnexpectedEof { offset, expected: wanted as u64 });
    }
    if got != wanted {
        return Err(EbzError::ShortRead { offset, got, wanted });
    }
    Ok(got)
}

// ── Plain files ──────────────────────────────────────────────────────────────

/// An uncompressed file: content size and stored size are the same.
pub struct PlainSource<R: Read + Seek> {
    reader: R,
    size:   u64,
}

impl PlainSource<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(File::open(path)?)
    }
}

impl<R: Read + Seek> PlainSource<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self { reader, size })
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read + Seek> BookSource for PlainSource<R> {
    fn seek(&mut self, pos: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn file_size(&self) -> u64 {
        self.size
    }
}
