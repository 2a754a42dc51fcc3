//! Error type shared by every per-file operation.
//!
//! Each variant describes why *one* file could not be processed.  The batch
//! driver turns these into per-file outcomes and moves on to the next file.
//! Header parsing reports its own [`HeaderError`], folded in here.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::header::HeaderError;

pub type Result<T> = std::result::Result<T, EbzError>;

#[derive(Error, Debug)]
pub enum EbzError {
    // ── Source / container consistency ───────────────────────────────────────
    #[error("Unexpected EOF at offset {offset} (expected {expected} bytes)")]
    UnexpectedEof { offset: u64, expected: u64 },

    #[error("Short read at offset {offset}: got {got} bytes, wanted {wanted}")]
    ShortRead { offset: u64, got: usize, wanted: usize },

    #[error("Integrity mismatch: {0}")]
    IntegrityMismatch(String),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error("Invalid compression level {0} (maximum {})", crate::index::MAX_LEVEL)]
    InvalidLevel(u8),

    #[error("Index entry {value} does not fit in {width} bytes")]
    IndexOverflow { value: u64, width: usize },

    // ── Destination handling (skips, not failures) ───────────────────────────
    #[error("Output already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Input and output are the same file: {}", .0.display())]
    SameFile(PathBuf),

    // ── Collaborators ────────────────────────────────────────────────────────
    #[error("No reader available for {format} file {}", path.display())]
    UnsupportedFormat { format: &'static str, path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl EbzError {
    /// True for the deliberate skips (existing or identical destination).
    pub fn is_skip(&self) -> bool {
        matches!(self, EbzError::AlreadyExists(_) | EbzError::SameFile(_))
    }
}
