//! Per-file operations: compress, decompress, copy and info.
//!
//! ```no_run
//! use ebzip::archive::{compress, decompress, ZipOptions};
//! use ebzip::io_stream::{EbzReader, PlainSource};
//! use std::fs::File;
//!
//! let opts = ZipOptions::default();
//! let mut src = PlainSource::open("HONMON")?;
//! compress(&mut src, "HONMON.ebz".as_ref(), &opts)?;
//!
//! let mut ebz = EbzReader::open(File::open("HONMON.ebz")?)?;
//! decompress(&mut ebz, "HONMON.out".as_ref(), &opts)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use serde::Serialize;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{EbzError, Result};
use crate::index::{SlicePlan, DEFAULT_LEVEL, PAGE_SIZE};
use crate::io_stream::{expand, BookSource, EbzReader, EbzWriter, PlainSource, Progress, ZipStats};

// ── ZipOptions ───────────────────────────────────────────────────────────────

/// Configuration shared by every operation of a run.
#[derive(Debug, Clone)]
pub struct ZipOptions {
    /// EBZip level, 0..=5; slice size is `PAGE_SIZE << level`.
    pub level:     u8,
    /// Replace existing outputs instead of skipping them.
    pub overwrite: bool,
    /// Keep originals after a successful operation.
    pub keep:      bool,
    /// Root the output paths are mapped under.
    pub out_dir:   PathBuf,
    /// Root of the book the inputs belong to.
    pub book_dir:  PathBuf,
}

impl Default for ZipOptions {
    fn default() -> Self {
        Self {
            level:     DEFAULT_LEVEL,
            overwrite: false,
            keep:      false,
            out_dir:   PathBuf::from("."),
            book_dir:  PathBuf::from("."),
        }
    }
}

impl ZipOptions {
    pub fn validate(&self) -> Result<()> {
        SlicePlan::new(0, self.level).map(|_| ())
    }
}

// ── Book files ───────────────────────────────────────────────────────────────

/// On-disk format of a book file, as detected by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BookFormat {
    Plain,
    Ebzip,
    Sebxa,
    Epwing,
}

impl BookFormat {
    pub fn name(self) -> &'static str {
        match self {
            BookFormat::Plain  => "plain",
            BookFormat::Ebzip  => "EBZip",
            BookFormat::Sebxa  => "S-EBXA",
            BookFormat::Epwing => "EPWING",
        }
    }

    /// Guess from the file name: `.ebz` is EBZip, anything else plain.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("ebz") => BookFormat::Ebzip,
            _ => BookFormat::Plain,
        }
    }
}

/// A file of a book tagged with its current format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookFile {
    pub path:   PathBuf,
    pub format: BookFormat,
}

impl BookFile {
    pub fn new<P: Into<PathBuf>>(path: P, format: BookFormat) -> Self {
        Self { path: path.into(), format }
    }
}

/// Supplies a [`BookSource`] for a book file.
pub trait SourceOpener: Sync {
    fn open(&self, file: &BookFile) -> Result<Box<dyn BookSource>>;
}

/// Opens plain files and EBZip containers from the filesystem.  Other
/// formats need a caller-provided opener.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsOpener;

impl SourceOpener for FsOpener {
    fn open(&self, file: &BookFile) -> Result<Box<dyn BookSource>> {
        match file.format {
            BookFormat::Plain => Ok(Box::new(PlainSource::open(&file.path)?)),
            BookFormat::Ebzip => Ok(Box::new(open_ebz(&file.path)?)),
            other => Err(EbzError::UnsupportedFormat {
                format: other.name(),
                path:   file.path.clone(),
            }),
        }
    }
}

pub fn open_ebz<P: AsRef<Path>>(path: P) -> Result<EbzReader<File>> {
    EbzReader::open(File::open(path)?)
}

// ── Destination handling ─────────────────────────────────────────────────────

/// Refuse an existing destination unless overwriting, and create its parent
/// directory.  Runs before any byte of output is written.
pub fn prepare_destination(dest: &Path, overwrite: bool) -> Result<()> {
    if dest.exists() && !overwrite {
        return Err(EbzError::AlreadyExists(dest.to_path_buf()));
    }
    if let Some(dir) = dest.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}

fn log_progress(what: &'static str) -> impl FnMut(Progress) {
    move |p: Progress| {
        info!("{what}: {:.1}% done ({} / {} bytes)", p.percent(), p.bytes_done, p.total_bytes);
    }
}

// ── Compress ─────────────────────────────────────────────────────────────────

/// Compress the content of `source` into a new container at `dest`.
///
/// On failure the partially written container is left as is.
pub fn compress<S: BookSource + ?Sized>(source: &mut S, dest: &Path, opts: &ZipOptions) -> Result<ZipStats> {
    opts.validate()?;
    prepare_destination(dest, opts.overwrite)?;
    debug!(dest = %dest.display(), level = opts.level, "compressing");

    let mut writer = EbzWriter::new(File::create(dest)?, opts.level)?;
    let mut progress = log_progress("compress");
    let stats = writer.compress_with_progress(source, Some(&mut progress))?;
    writer.into_inner().sync_all()?;

    info!(
        "completed ({} / {} bytes)",
        source.file_size(),
        source.file_size()
    );
    if let Some(rate) = stats.ratio() {
        info!("{} -> {} bytes ({rate:.1}%)", stats.input_bytes, stats.output_bytes);
    }
    Ok(stats)
}

// ── Decompress ───────────────────────────────────────────────────────────────

/// Write the full content of `source` to `dest` and, when the source records
/// a checksum, verify it.
///
/// A checksum mismatch is reported as [`EbzError::IntegrityMismatch`]; the
/// unverified output stays on disk for inspection.
pub fn decompress<S: BookSource + ?Sized>(source: &mut S, dest: &Path, opts: &ZipOptions) -> Result<ZipStats> {
    prepare_destination(dest, opts.overwrite)?;
    debug!(dest = %dest.display(), "uncompressing");

    let chunk = match source.level() {
        Some(level) => PAGE_SIZE << level,
        None        => PAGE_SIZE,
    };
    let mut out = BufWriter::new(File::create(dest)?);
    let mut progress = log_progress("uncompress");
    let done = expand(source, &mut out, chunk, Some(&mut progress))?;
    out.into_inner().map_err(|e| EbzError::Io(e.into_error()))?.sync_all()?;

    let stats = ZipStats {
        input_bytes:  source.real_file_size(),
        output_bytes: done.bytes,
        slices:       done.bytes.div_ceil(chunk as u64),
    };
    info!("completed ({} / {} bytes)", source.file_size(), source.file_size());
    info!("{} -> {} bytes", stats.input_bytes, stats.output_bytes);

    if let Some(expected) = source.checksum() {
        if expected != done.checksum {
            warn!(dest = %dest.display(), "checksum error, output left in place");
            return Err(EbzError::IntegrityMismatch(format!(
                "checksum {:08x} does not match header {:08x}",
                done.checksum, expected
            )));
        }
    }
    Ok(stats)
}

// ── Copy ─────────────────────────────────────────────────────────────────────

/// Copy a file verbatim (catalogs, movies, already-plain files).
pub fn copy(src: &Path, dest: &Path, opts: &ZipOptions) -> Result<ZipStats> {
    prepare_destination(dest, opts.overwrite)?;
    let n = fs::copy(src, dest)?;
    info!("completed ({n} / {n} bytes)");
    Ok(ZipStats { input_bytes: n, output_bytes: n, slices: 0 })
}

// ── Info ─────────────────────────────────────────────────────────────────────

/// Header-level description of one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InfoReport {
    pub format:    BookFormat,
    pub level:     Option<u8>,
    pub file_size: u64,
    pub real_size: u64,
}

impl InfoReport {
    /// Stored size as a percentage of the original; `None` when the
    /// original is empty.
    pub fn ratio(&self) -> Option<f64> {
        (self.file_size != 0)
            .then(|| self.real_size as f64 / self.file_size as f64 * 100.0)
    }

    fn compression_label(&self) -> Option<String> {
        match self.format {
            BookFormat::Plain  => None,
            BookFormat::Ebzip  => Some(format!("ebzip level {} compression", self.level.unwrap_or(0))),
            BookFormat::Sebxa  => Some("S-EBXA compression".to_string()),
            BookFormat::Epwing => Some("EPWING compression".to_string()),
        }
    }
}

impl fmt::Display for InfoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(label) = self.compression_label() else {
            return write!(f, "{} bytes (not compressed)", self.file_size);
        };
        write!(f, "{} -> {} bytes (", self.file_size, self.real_size)?;
        match self.ratio() {
            Some(rate) => write!(f, "{rate:.1}%, ")?,
            None       => write!(f, "empty original file, ")?,
        }
        write!(f, "{label})")
    }
}

/// Describe `source` from its header only; no slice is read.
pub fn info<S: BookSource + ?Sized>(format: BookFormat, source: &S) -> InfoReport {
    InfoReport {
        format,
        level:     source.level(),
        file_size: source.file_size(),
        real_size: source.real_file_size(),
    }
}

pub fn info_file(file: &BookFile, opener: &dyn SourceOpener) -> Result<InfoReport> {
    let source = opener.open(file)?;
    Ok(info(file.format, &*source))
}

/// Print one report as a `==> path <==` block.
pub fn write_report<W: Write>(mut out: W, path: &Path, report: &InfoReport) -> std::io::Result<()> {
    writeln!(out, "==> {} <==", path.display())?;
    writeln!(out, "{report}")?;
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(format: BookFormat, level: Option<u8>, file_size: u64, real_size: u64) -> InfoReport {
        InfoReport { format, level, file_size, real_size }
    }

    #[test]
    fn display_matches_tool_output() {
        assert_eq!(
            report(BookFormat::Ebzip, Some(0), 10240, 2337).to_string(),
            "10240 -> 2337 bytes (22.8%, ebzip level 0 compression)"
        );
        assert_eq!(
            report(BookFormat::Plain, None, 2048, 2048).to_string(),
            "2048 bytes (not compressed)"
        );
        assert_eq!(
            report(BookFormat::Sebxa, None, 4096, 1024).to_string(),
            "4096 -> 1024 bytes (25.0%, S-EBXA compression)"
        );
    }

    #[test]
    fn empty_original_has_no_ratio() {
        let r = report(BookFormat::Ebzip, Some(2), 0, 24);
        assert_eq!(r.ratio(), None);
        assert_eq!(r.to_string(), "0 -> 24 bytes (empty original file, ebzip level 2 compression)");
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(BookFormat::from_path(Path::new("DATA/HONMON.EBZ")), BookFormat::Ebzip);
        assert_eq!(BookFormat::from_path(Path::new("DATA/HONMON")), BookFormat::Plain);
    }

    #[test]
    fn fs_opener_refuses_legacy_formats() {
        let file = BookFile::new("HONMON", BookFormat::Sebxa);
        assert!(matches!(
            FsOpener.open(&file),
            Err(EbzError::UnsupportedFormat { format: "S-EBXA", .. })
        ));
    }
}
