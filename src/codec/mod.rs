//! Per-slice zlib codec with store-raw fallback.
//!
//! Each slice is an independent zlib stream: the deflater is reset before
//! every slice so any slice can be inflated on its own.  When deflate output
//! is not strictly smaller than the slice, the raw slice is stored instead.
//! On disk the two cases are told apart only by length: a blob exactly
//! `slice_size` long is raw, anything shorter is zlib.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use tracing::trace;

use crate::error::{EbzError, Result};

/// Outcome of compressing one padded slice.
#[derive(Debug, PartialEq, Eq)]
pub enum SliceBlob<'a> {
    Compressed(&'a [u8]),
    StoredRaw(&'a [u8]),
}

impl<'a> SliceBlob<'a> {
    pub fn bytes(&self) -> &'a [u8] {
        match self {
            SliceBlob::Compressed(b) | SliceBlob::StoredRaw(b) => b,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, SliceBlob::StoredRaw(_))
    }
}

// ── Compressor ───────────────────────────────────────────────────────────────

pub struct SliceCompressor {
    deflater:   Compress,
    out:        Vec<u8>,
    slice_size: usize,
}

impl SliceCompressor {
    pub fn new(slice_size: usize) -> Self {
        Self {
            deflater: Compress::new(Compression::best(), true),
            out:      Vec::with_capacity(slice_size),
            slice_size,
        }
    }

    /// Compress one full (already zero-padded) slice.
    ///
    /// The output buffer is capped at `slice_size`; a stream that does not
    /// finish inside it is by definition no smaller than the input.
    pub fn compress<'a>(&'a mut self, slice: &'a [u8]) -> Result<SliceBlob<'a>> {
        self.deflater.reset();
        self.out.clear();
        let status = self
            .deflater
            .compress_vec(slice, &mut self.out, FlushCompress::Finish)
            .map_err(|e| EbzError::Io(std::io::Error::other(e)))?;

        if status == Status::StreamEnd && self.out.len() < self.slice_size {
            trace!(raw = slice.len(), deflated = self.out.len(), "slice deflated");
            Ok(SliceBlob::Compressed(&self.out))
        } else {
            trace!(raw = slice.len(), "slice stored raw");
            Ok(SliceBlob::StoredRaw(slice))
        }
    }
}

// ── Decompressor ─────────────────────────────────────────────────────────────

pub struct SliceDecompressor {
    inflater:   Decompress,
    slice_size: usize,
}

impl SliceDecompressor {
    pub fn new(slice_size: usize) -> Self {
        Self { inflater: Decompress::new(true), slice_size }
    }

    /// Expand one stored blob into `out` (cleared first).  `out` always ends
    /// up exactly `slice_size` long on success.
    pub fn decompress(&mut self, slice_index: u64, blob: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.clear();
        if blob.len() > self.slice_size {
            return Err(EbzError::IntegrityMismatch(format!(
                "slice {slice_index} is {} bytes, larger than the {}-byte slice size",
                blob.len(), self.slice_size
            )));
        }
        if blob.len() == self.slice_size {
            out.extend_from_slice(blob);
            return Ok(());
        }

        out.reserve_exact(self.slice_size);
        self.inflater.reset(true);
        match self.inflater.decompress_vec(blob, out, FlushDecompress::Finish) {
            Ok(_) if out.len() == self.slice_size => Ok(()),
            Ok(_) => Err(EbzError::IntegrityMismatch(format!(
                "slice {slice_index} inflated to {} bytes, expected {}",
                out.len(), self.slice_size
            ))),
            Err(e) => Err(EbzError::IntegrityMismatch(format!(
                "slice {slice_index} failed to inflate: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repetitive_slice_is_deflated() {
        let slice = vec![b'a'; 2048];
        let mut c = SliceCompressor::new(2048);
        let blob = c.compress(&slice).unwrap();
        assert!(!blob.is_raw());
        assert!(blob.bytes().len() < 2048);

        let stored = blob.bytes().to_vec();
        let mut d = SliceDecompressor::new(2048);
        let mut out = Vec::new();
        d.decompress(0, &stored, &mut out).unwrap();
        assert_eq!(out, slice);
    }

    #[test]
    fn incompressible_slice_is_stored_raw() {
        // xorshift noise does not deflate below its own size.
        let mut x = 0x2545_F491u32;
        let slice: Vec<u8> = (0..2048)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                x as u8
            })
            .collect();
        let mut c = SliceCompressor::new(2048);
        let blob = c.compress(&slice).unwrap();
        assert_eq!(blob, SliceBlob::StoredRaw(&slice[..]));
        assert_eq!(blob.bytes().len(), 2048);
    }

    #[test]
    fn compressor_is_reset_between_slices() {
        let mut c = SliceCompressor::new(2048);
        let first = c.compress(&[7u8; 2048]).unwrap().bytes().to_vec();
        let second = c.compress(&[7u8; 2048]).unwrap().bytes().to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn oversized_blob_is_rejected() {
        let mut d = SliceDecompressor::new(2048);
        let mut out = Vec::new();
        let err = d.decompress(3, &[0u8; 2049], &mut out).unwrap_err();
        assert!(matches!(err, EbzError::IntegrityMismatch(_)));
    }

    #[test]
    fn garbage_blob_fails_integrity() {
        let mut d = SliceDecompressor::new(2048);
        let mut out = Vec::new();
        let err = d.decompress(0, &[0xffu8; 16], &mut out).unwrap_err();
        assert!(matches!(err, EbzError::IntegrityMismatch(_)));
    }
}
