//! Streaming EBZip writer and reader.
//!
//! # Writer
//! [`EbzWriter`] plans the container from the source's size, lays down a
//! zeroed header + index placeholder, then compresses one slice at a time.
//! Each slice is appended at the running data cursor and its index entry
//! pair is patched in place immediately.  The header is written last, once
//! the Adler-32 of the whole content is known.  Every write group seeks
//! first: appends and patches land at unrelated offsets.
//!
//! # Reader
//! [`EbzReader`] reads only the header on open.  Slices are located through
//! the index on demand, inflated (or passed through when stored raw), and
//! cached one at a time, so the reader doubles as a random-access
//! [`BookSource`] over the original content.

pub mod source;

use adler2::Adler32;
use chrono::Utc;
use serde::Serialize;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::{debug, trace};

use crate::codec::{SliceCompressor, SliceDecompressor};
use crate::error::{EbzError, Result};
use crate::header::{EbzHeader, MAX_FILE_SIZE};
use crate::index::{entry_pair, read_entry, write_entry, SlicePlan};
pub use source::{read_span, BookSource, PlainSource};

// ── Reporting types ──────────────────────────────────────────────────────────

/// Byte counts for one processed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ZipStats {
    pub input_bytes:  u64,
    pub output_bytes: u64,
    pub slices:       u64,
}

impl ZipStats {
    /// Output as a percentage of input; `None` for an empty input.
    pub fn ratio(&self) -> Option<f64> {
        (self.input_bytes != 0)
            .then(|| self.output_bytes as f64 / self.input_bytes as f64 * 100.0)
    }
}

/// Snapshot handed to progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub slices_done:  u64,
    pub total_slices: u64,
    pub bytes_done:   u64,
    pub total_bytes:  u64,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total_slices == 0 { return 100.0; }
        self.slices_done as f64 / self.total_slices as f64 * 100.0
    }
}

fn unix_mtime() -> u32 {
    // The header keeps 32 bits of seconds.
    Utc::now().timestamp() as u32
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct EbzWriter<W: Write + Seek> {
    writer: W,
    level:  u8,
}

impl<W: Write + Seek> EbzWriter<W> {
    pub fn new(writer: W, level: u8) -> Result<Self> {
        // Validates the level before any byte is written.
        SlicePlan::new(0, level)?;
        Ok(Self { writer, level })
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub fn compress<S: BookSource + ?Sized>(&mut self, source: &mut S) -> Result<ZipStats> {
        self.compress_with_progress(source, None::<&mut fn(Progress)>)
    }

    /// Compress `source` into the destination, calling `progress` every
    /// [`SlicePlan::progress_interval`] slices.
    pub fn compress_with_progress<S, F>(
        &mut self,
        source:       &mut S,
        mut progress: Option<&mut F>,
    ) -> Result<ZipStats>
    where
        S: BookSource + ?Sized,
        F: FnMut(Progress),
    {
        let file_size = source.file_size();
        if file_size > MAX_FILE_SIZE {
            return Err(EbzError::IndexOverflow { value: file_size, width: 5 });
        }
        let plan = SlicePlan::new(file_size, self.level)?;
        debug!(
            file_size,
            level = plan.level,
            slice_size = plan.slice_size,
            total_slices = plan.total_slices,
            index_size = plan.index_size,
            "planned container"
        );

        self.writer.seek(SeekFrom::Start(0))?;
        io::copy(&mut io::repeat(0).take(plan.data_start()), &mut self.writer)?;

        let mut adler    = Adler32::new();
        let mut codec    = SliceCompressor::new(plan.slice_size);
        let mut buf      = vec![0u8; plan.slice_size];
        let mut cursor   = plan.data_start();
        let mut in_total = 0u64;
        let interval     = plan.progress_interval();

        for i in 0..plan.total_slices {
            let n = read_span(source, in_total, &mut buf)?;
            adler.write_slice(&buf[..n]);
            buf[n..].fill(0);

            let blob = codec.compress(&buf)?;
            let bytes = blob.bytes();
            let next = cursor + bytes.len() as u64;

            self.writer.seek(SeekFrom::Start(cursor))?;
            self.writer.write_all(bytes)?;

            let pair = entry_pair(cursor, next, plan.index_size)?;
            self.writer.seek(SeekFrom::Start(plan.entry_offset(i)))?;
            self.writer.write_all(&pair)?;
            trace!(slice = i, start = cursor, len = bytes.len(), raw = blob.is_raw(), "slice written");

            in_total += n as u64;
            cursor = next;

            if (i % interval) + 1 == interval {
                if let Some(cb) = progress.as_mut() {
                    cb(Progress {
                        slices_done:  i + 1,
                        total_slices: plan.total_slices,
                        bytes_done:   in_total,
                        total_bytes:  file_size,
                    });
                }
            }
        }

        if plan.total_slices == 0 {
            // No slice patched the sentinel.
            self.writer.seek(SeekFrom::Start(plan.entry_offset(0)))?;
            write_entry(&mut self.writer, cursor, plan.index_size)?;
        }

        let header = EbzHeader::new(file_size, self.level, adler.checksum(), unix_mtime());
        self.writer.seek(SeekFrom::Start(0))?;
        header.write(&mut self.writer)?;
        self.writer.flush()?;

        Ok(ZipStats {
            input_bytes:  source.real_file_size(),
            output_bytes: cursor,
            slices:       plan.total_slices,
        })
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct EbzReader<R: Read + Seek> {
    reader:    R,
    header:    EbzHeader,
    plan:      SlicePlan,
    real_size: u64,
    codec:     SliceDecompressor,
    blob:      Vec<u8>,
    cache:     Vec<u8>,
    cached:    Option<u64>,
    pos:       u64,
}

impl<R: Read + Seek> EbzReader<R> {
    /// Read and validate the header.  No slice is touched.
    pub fn open(mut reader: R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let header = EbzHeader::read(&mut reader)?;
        let plan = SlicePlan::new(header.file_size, header.level)?;
        let real_size = reader.seek(SeekFrom::End(0))?;
        debug!(
            file_size = header.file_size,
            real_size,
            level = header.level,
            total_slices = plan.total_slices,
            "opened container"
        );
        Ok(Self {
            reader,
            header,
            plan,
            real_size,
            codec:  SliceDecompressor::new(plan.slice_size),
            blob:   Vec::with_capacity(plan.slice_size),
            cache:  Vec::with_capacity(plan.slice_size),
            cached: None,
            pos:    0,
        })
    }

    pub fn header(&self) -> &EbzHeader {
        &self.header
    }

    pub fn plan(&self) -> &SlicePlan {
        &self.plan
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Start and end offsets of slice `i`'s stored blob.
    pub fn slice_bounds(&mut self, i: u64) -> Result<(u64, u64)> {
        let width = self.plan.index_size;
        self.reader.seek(SeekFrom::Start(self.plan.entry_offset(i)))?;
        let start = read_entry(&mut self.reader, width).map_err(|e| eof_at(e, self.plan.entry_offset(i), width))?;
        let end = read_entry(&mut self.reader, width).map_err(|e| eof_at(e, self.plan.entry_offset(i + 1), width))?;
        if end < start {
            return Err(EbzError::IntegrityMismatch(format!(
                "index entries for slice {i} decrease ({start} -> {end})"
            )));
        }
        Ok((start, end))
    }

    /// Uncompressed content of slice `i`, without padding.
    pub fn read_slice(&mut self, i: u64) -> Result<&[u8]> {
        if self.cached != Some(i) {
            if i >= self.plan.total_slices {
                return Err(EbzError::UnexpectedEof {
                    offset:   i * self.plan.slice_size as u64,
                    expected: self.plan.slice_size as u64,
                });
            }
            self.cached = None;
            let (start, end) = self.slice_bounds(i)?;
            let len = (end - start) as usize;
            if len > self.plan.slice_size {
                return Err(EbzError::IntegrityMismatch(format!(
                    "slice {i} occupies {len} bytes, larger than the {}-byte slice size",
                    self.plan.slice_size
                )));
            }
            self.blob.resize(len, 0);
            self.reader.seek(SeekFrom::Start(start))?;
            self.reader.read_exact(&mut self.blob).map_err(|e| eof_at(e, start, len))?;

            self.codec.decompress(i, &self.blob, &mut self.cache)?;
            self.cache.truncate(self.plan.slice_len(i));
            trace!(slice = i, start, len, raw = len == self.plan.slice_size, "slice loaded");
            self.cached = Some(i);
        }
        Ok(&self.cache)
    }
}

fn eof_at(e: io::Error, offset: u64, len: usize) -> EbzError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        EbzError::UnexpectedEof { offset, expected: len as u64 }
    } else {
        EbzError::Io(e)
    }
}

impl<R: Read + Seek> BookSource for EbzReader<R> {
    fn seek(&mut self, pos: u64) -> Result<()> {
        self.pos = pos;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let slice_size = self.plan.slice_size as u64;
        let mut filled = 0;
        while filled < buf.len() && self.pos < self.plan.file_size {
            let index = self.pos / slice_size;
            let offset = (self.pos % slice_size) as usize;
            let data = self.read_slice(index)?;
            let n = (data.len() - offset).min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&data[offset..offset + n]);
            filled += n;
            self.pos += n as u64;
        }
        Ok(filled)
    }

    fn file_size(&self) -> u64 {
        self.header.file_size
    }

    fn real_file_size(&self) -> u64 {
        self.real_size
    }

    fn checksum(&self) -> Option<u32> {
        Some(self.header.checksum)
    }

    fn level(&self) -> Option<u8> {
        Some(self.header.level)
    }
}

// ── Sequential expansion ─────────────────────────────────────────────────────

/// Result of streaming a source's full content out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expanded {
    pub bytes:    u64,
    pub checksum: u32,
}

/// Copy the whole uncompressed content of `source` to `writer`, `chunk`
/// bytes at a time, accumulating Adler-32 over what was written.
pub fn expand<S, W, F>(
    source:       &mut S,
    mut writer:   W,
    chunk:        usize,
    mut progress: Option<&mut F>,
) -> Result<Expanded>
where
    S: BookSource + ?Sized,
    W: Write,
    F: FnMut(Progress),
{
    let file_size = source.file_size();
    let chunk = chunk.max(1);
    let total_slices = file_size.div_ceil(chunk as u64);
    let interval = 1024u64.max(total_slices.div_ceil(1000));

    let mut adler = Adler32::new();
    let mut buf = vec![0u8; chunk];
    let mut total = 0u64;
    for i in 0..total_slices {
        let n = read_span(source, total, &mut buf)?;
        adler.write_slice(&buf[..n]);
        writer.write_all(&buf[..n])?;
        total += n as u64;

        if (i % interval) + 1 == interval {
            if let Some(cb) = progress.as_mut() {
                cb(Progress {
                    slices_done:  i + 1,
                    total_slices,
                    bytes_done:   total,
                    total_bytes:  file_size,
                });
            }
        }
    }
    writer.flush()?;
    Ok(Expanded { bytes: total, checksum: adler.checksum() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::HEADER_SIZE;
    use std::io::Cursor;

    fn dictionary_text(len: usize) -> Vec<u8> {
        b"headword\x1f\x09definition text, "
            .iter()
            .cycle()
            .take(len)
            .copied()
            .collect()
    }

    fn compress_bytes(data: &[u8], level: u8) -> (Vec<u8>, ZipStats) {
        let mut src = PlainSource::new(Cursor::new(data.to_vec())).unwrap();
        let mut w = EbzWriter::new(Cursor::new(Vec::new()), level).unwrap();
        let stats = w.compress(&mut src).unwrap();
        (w.into_inner().into_inner(), stats)
    }

    #[test]
    fn container_length_equals_sentinel() {
        let data = dictionary_text(10240);
        let (ebz, stats) = compress_bytes(&data, 0);
        assert_eq!(stats.slices, 5);
        assert_eq!(stats.input_bytes, 10240);
        assert_eq!(stats.output_bytes, ebz.len() as u64);
        let sentinel = read_entry(&ebz[HEADER_SIZE + 5 * 2..], 2).unwrap();
        assert_eq!(sentinel, ebz.len() as u64);
        let first = read_entry(&ebz[HEADER_SIZE..], 2).unwrap();
        assert_eq!(first, (HEADER_SIZE + 12) as u64);
    }

    #[test]
    fn reader_gives_random_access() {
        let data: Vec<u8> = (0..9000u32).map(|i| (i % 251) as u8).collect();
        let (ebz, _) = compress_bytes(&data, 1);
        let mut r = EbzReader::open(Cursor::new(ebz)).unwrap();
        assert_eq!(r.file_size(), 9000);
        assert_eq!(r.level(), Some(1));

        let mut buf = [0u8; 300];
        r.seek(4000).unwrap();
        assert_eq!(r.read(&mut buf).unwrap(), 300);
        assert_eq!(&buf[..], &data[4000..4300]);

        r.seek(8900).unwrap();
        assert_eq!(r.read(&mut buf).unwrap(), 100);
        assert_eq!(&buf[..100], &data[8900..]);

        r.seek(9000).unwrap();
        assert_eq!(r.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn expand_reproduces_content_and_checksum() {
        let data = dictionary_text(7000);
        let (ebz, _) = compress_bytes(&data, 0);
        let mut r = EbzReader::open(Cursor::new(ebz)).unwrap();
        let mut out = Vec::new();
        let done = expand(&mut r, &mut out, 2048, None::<&mut fn(Progress)>).unwrap();
        assert_eq!(out, data);
        assert_eq!(done.bytes, 7000);
        assert_eq!(Some(done.checksum), r.checksum());
    }

    #[test]
    fn empty_source_writes_header_and_sentinel() {
        let (ebz, stats) = compress_bytes(&[], 0);
        assert_eq!(ebz.len(), HEADER_SIZE + 2);
        assert_eq!(stats.ratio(), None);
        assert_eq!(read_entry(&ebz[HEADER_SIZE..], 2).unwrap(), ebz.len() as u64);
        let hdr = EbzHeader::read(&ebz[..]).unwrap();
        assert_eq!(hdr.file_size, 0);
        assert_eq!(hdr.checksum, 1);
    }

    #[test]
    fn progress_fires_on_interval_boundaries() {
        let data = dictionary_text(40 * 65536);
        let mut src = PlainSource::new(Cursor::new(data)).unwrap();
        let mut w = EbzWriter::new(Cursor::new(Vec::new()), 5).unwrap();
        let mut seen = Vec::new();
        let mut cb = |p: Progress| seen.push(p.slices_done);
        w.compress_with_progress(&mut src, Some(&mut cb)).unwrap();
        assert_eq!(seen, vec![32]);
    }

    #[test]
    fn writer_rejects_level_above_max() {
        assert!(matches!(
            EbzWriter::new(Cursor::new(Vec::new()), 9),
            Err(EbzError::InvalidLevel(9))
        ));
    }

    /// Claims `claimed` bytes but only holds what its buffer holds.
    struct Overstated {
        inner:   PlainSource<Cursor<Vec<u8>>>,
        claimed: u64,
    }

    impl BookSource for Overstated {
        fn seek(&mut self, pos: u64) -> Result<()>          { self.inner.seek(pos) }
        fn read(&mut self, buf: &mut [u8]) -> Result<usize> { self.inner.read(buf) }
        fn file_size(&self) -> u64                          { self.claimed }
    }

    fn overstated(real: usize, claimed: u64) -> Overstated {
        Overstated {
            inner: PlainSource::new(Cursor::new(dictionary_text(real))).unwrap(),
            claimed,
        }
    }

    #[test]
    fn writer_stops_on_short_slice_and_keeps_partial_output() {
        let mut src = overstated(3000, 6000);
        let mut w = EbzWriter::new(Cursor::new(Vec::new()), 0).unwrap();
        let err = w.compress(&mut src).unwrap_err();
        assert!(matches!(err, EbzError::ShortRead { offset: 2048, got: 952, wanted: 2048 }), "{err}");

        let partial = w.into_inner().into_inner();
        let plan = SlicePlan::new(6000, 0).unwrap();
        // Header placeholder is still zero; slice 0 and its entries are in.
        assert!(partial[..HEADER_SIZE].iter().all(|&b| b == 0));
        assert_eq!(read_entry(&partial[HEADER_SIZE..], 2).unwrap(), plan.data_start());
        let end = read_entry(&partial[HEADER_SIZE + 2..], 2).unwrap();
        assert_eq!(end, partial.len() as u64);
        assert!(end > plan.data_start());
    }

    #[test]
    fn writer_stops_when_source_runs_dry() {
        let mut src = overstated(2048, 6000);
        let mut w = EbzWriter::new(Cursor::new(Vec::new()), 0).unwrap();
        assert!(matches!(
            w.compress(&mut src),
            Err(EbzError::UnexpectedEof { offset: 2048, expected: 2048 })
        ));
    }

    #[test]
    fn reader_rejects_foreign_file() {
        let mut data = vec![0u8; 64];
        data[..5].copy_from_slice(b"PK\x03\x04\x14");
        assert!(matches!(
            EbzReader::open(Cursor::new(data)),
            Err(EbzError::Header(crate::header::HeaderError::InvalidMagic(_)))
        ));
    }

    #[test]
    fn truncated_container_reports_eof() {
        let data = dictionary_text(10240);
        let (mut ebz, _) = compress_bytes(&data, 0);
        ebz.truncate(ebz.len() - 10);
        let mut r = EbzReader::open(Cursor::new(ebz)).unwrap();
        assert!(matches!(r.read_slice(4), Err(EbzError::UnexpectedEof { .. })));
    }
}
