//! Batch driver: run one action over many book files.
//!
//! Every file is processed to completion or abandoned on its own error; the
//! failure is recorded and the batch moves on.  Existing or identical
//! destinations are skips, not failures.
//!
//! Output paths mirror the input's position under the book directory,
//! re-rooted under the output directory:
//!
//! | action                     | output name        |
//! |----------------------------|--------------------|
//! | compress                   | `NAME.ebz`         |
//! | uncompress EBZip           | `NAME`             |
//! | uncompress S-EBXA / EPWING | `NAME.org`         |
//! | copy, uncompress plain     | `NAME`             |
//!
//! A trailing `.ebz` or `.org` on the input name is dropped first.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::archive::{self, BookFile, BookFormat, InfoReport, SourceOpener, ZipOptions};
use crate::error::{EbzError, Result};
use crate::io_stream::ZipStats;
use crate::legacy::fix_legacy_index;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Compress,
    Uncompress,
    Info,
    Copy,
}

impl Action {
    fn verb(self) -> &'static str {
        match self {
            Action::Compress   => "compress",
            Action::Uncompress => "uncompress",
            Action::Info       => "info",
            Action::Copy       => "copy",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub file:   BookFile,
    pub action: Action,
}

impl Job {
    pub fn new(file: BookFile, action: Action) -> Self {
        Self { file, action }
    }
}

// ── Outcomes ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    Done { output: PathBuf, stats: ZipStats },
    Reported { report: InfoReport },
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub path:    PathBuf,
    pub action:  Action,
    pub outcome: Outcome,
}

#[derive(Debug, Default, Serialize)]
pub struct BatchSummary {
    pub results:  Vec<FileResult>,
    pub done:     usize,
    pub reported: usize,
    pub skipped:  usize,
    pub failed:   usize,
}

impl BatchSummary {
    pub fn from_results(results: Vec<FileResult>) -> Self {
        let mut summary = Self::default();
        for r in &results {
            match r.outcome {
                Outcome::Done { .. }     => summary.done += 1,
                Outcome::Reported { .. } => summary.reported += 1,
                Outcome::Skipped { .. }  => summary.skipped += 1,
                Outcome::Failed { .. }   => summary.failed += 1,
            }
        }
        summary.results = results;
        summary
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

// ── Output paths ─────────────────────────────────────────────────────────────

fn relative_to_book(input: &Path, book_dir: &Path) -> PathBuf {
    let canon = |p: &Path| fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    match canon(input).strip_prefix(canon(book_dir)) {
        Ok(rel) => rel.to_path_buf(),
        Err(_)  => input.file_name().map(PathBuf::from).unwrap_or_default(),
    }
}

/// Destination for `input` under `opts.out_dir`, with `suffix` appended.
pub fn output_path(input: &Path, suffix: Option<&str>, opts: &ZipOptions) -> PathBuf {
    let relative = relative_to_book(input, &opts.book_dir);
    let mut name = relative
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if name.len() > 4 {
        let cut = name.len() - 4;
        if let Some(tail) = name.get(cut..) {
            if tail.eq_ignore_ascii_case(".ebz") || tail.eq_ignore_ascii_case(".org") {
                name.truncate(cut);
            }
        }
    }
    if let Some(suffix) = suffix {
        name.push_str(suffix);
    }
    opts.out_dir.join(relative.with_file_name(name))
}

fn ensure_distinct(input: &Path, output: &Path) -> Result<()> {
    if let (Ok(a), Ok(b)) = (fs::canonicalize(input), fs::canonicalize(output)) {
        if a == b {
            return Err(EbzError::SameFile(output.to_path_buf()));
        }
    }
    Ok(())
}

// ── Per-file actions ─────────────────────────────────────────────────────────

fn copy_file(file: &BookFile, opts: &ZipOptions) -> Result<(PathBuf, ZipStats)> {
    let dest = output_path(&file.path, None, opts);
    info!("==> copy {} <==", file.path.display());
    info!("output to {}", dest.display());
    ensure_distinct(&file.path, &dest)?;
    let stats = archive::copy(&file.path, &dest, opts)?;
    Ok((dest, stats))
}

fn compress_file(file: &BookFile, opts: &ZipOptions, opener: &dyn SourceOpener) -> Result<(PathBuf, ZipStats)> {
    let dest = output_path(&file.path, Some(".ebz"), opts);
    info!("==> compress {} <==", file.path.display());
    info!("output to {}", dest.display());
    ensure_distinct(&file.path, &dest)?;
    let mut source = opener.open(file)?;
    let stats = archive::compress(&mut source, &dest, opts)?;
    Ok((dest, stats))
}

fn uncompress_file(file: &BookFile, opts: &ZipOptions, opener: &dyn SourceOpener) -> Result<(PathBuf, ZipStats)> {
    let suffix = match file.format {
        BookFormat::Plain                      => return copy_file(file, opts),
        BookFormat::Ebzip                      => None,
        BookFormat::Sebxa | BookFormat::Epwing => Some(".org"),
    };
    let dest = output_path(&file.path, suffix, opts);
    info!("==> uncompress {} <==", file.path.display());
    info!("output to {}", dest.display());
    ensure_distinct(&file.path, &dest)?;
    let mut source = opener.open(file)?;
    let stats = archive::decompress(&mut source, &dest, opts)?;

    if file.format == BookFormat::Sebxa {
        info!("==> fix {} <==", dest.display());
        fix_legacy_index(&dest)?;
    }
    Ok((dest, stats))
}

/// Run one job; never fails, the outcome carries any error.
pub fn run_job(job: &Job, opts: &ZipOptions, opener: &dyn SourceOpener) -> FileResult {
    let path = job.file.path.clone();
    let result = match job.action {
        Action::Info => {
            let outcome = match archive::info_file(&job.file, opener) {
                Ok(report) => {
                    info!("==> {} <==", path.display());
                    info!("{report}");
                    Outcome::Reported { report }
                }
                Err(e) => {
                    error!(path = %path.display(), "{e}");
                    Outcome::Failed { error: e.to_string() }
                }
            };
            return FileResult { path, action: job.action, outcome };
        }
        Action::Copy       => copy_file(&job.file, opts),
        Action::Compress   => compress_file(&job.file, opts, opener),
        Action::Uncompress => uncompress_file(&job.file, opts, opener),
    };

    let outcome = match result {
        Ok((output, stats)) => {
            if !opts.keep {
                if let Err(e) = fs::remove_file(&job.file.path) {
                    warn!(path = %path.display(), "failed to delete the file: {e}");
                }
            }
            Outcome::Done { output, stats }
        }
        Err(e) if e.is_skip() => {
            warn!(path = %path.display(), "{} skipped: {e}", job.action.verb());
            Outcome::Skipped { reason: e.to_string() }
        }
        Err(e) => {
            error!(path = %path.display(), "{} failed: {e}", job.action.verb());
            Outcome::Failed { error: e.to_string() }
        }
    };
    FileResult { path, action: job.action, outcome }
}

/// Run every job and collect the outcomes in job order.
///
/// With the `parallel` feature, independent files are processed
/// concurrently; jobs must then target distinct destinations.
pub fn run_batch(jobs: &[Job], opts: &ZipOptions, opener: &dyn SourceOpener) -> BatchSummary {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        let results = jobs.par_iter().map(|job| run_job(job, opts, opener)).collect();
        BatchSummary::from_results(results)
    }

    #[cfg(not(feature = "parallel"))]
    {
        let results = jobs.iter().map(|job| run_job(job, opts, opener)).collect();
        BatchSummary::from_results(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(book: &str, out: &str) -> ZipOptions {
        ZipOptions {
            book_dir: PathBuf::from(book),
            out_dir: PathBuf::from(out),
            ..ZipOptions::default()
        }
    }

    #[test]
    fn output_path_reroots_and_swaps_suffix() {
        let o = opts("/books/kojien", "/out");
        assert_eq!(
            output_path(Path::new("/books/kojien/test/DATA/HONMON"), Some(".ebz"), &o),
            PathBuf::from("/out/test/DATA/HONMON.ebz")
        );
        assert_eq!(
            output_path(Path::new("/books/kojien/test/DATA/HONMON.EBZ"), None, &o),
            PathBuf::from("/out/test/DATA/HONMON")
        );
        assert_eq!(
            output_path(Path::new("/books/kojien/test/DATA/HONMON.org"), Some(".org"), &o),
            PathBuf::from("/out/test/DATA/HONMON.org")
        );
    }

    #[test]
    fn output_path_outside_book_uses_file_name() {
        let o = opts("/books/kojien", "/out");
        assert_eq!(
            output_path(Path::new("/elsewhere/CATALOGS"), None, &o),
            PathBuf::from("/out/CATALOGS")
        );
    }

    #[test]
    fn short_names_are_not_trimmed() {
        let o = opts("/b", "/o");
        assert_eq!(output_path(Path::new("/b/.ebz"), None, &o), PathBuf::from("/o/.ebz"));
    }

    #[test]
    fn summary_counts_outcomes() {
        let mk = |outcome| FileResult { path: PathBuf::from("x"), action: Action::Compress, outcome };
        let s = BatchSummary::from_results(vec![
            mk(Outcome::Skipped { reason: "exists".into() }),
            mk(Outcome::Failed { error: "eof".into() }),
            mk(Outcome::Done {
                output: PathBuf::from("x.ebz"),
                stats: ZipStats { input_bytes: 1, output_bytes: 25, slices: 1 },
            }),
        ]);
        assert_eq!((s.done, s.skipped, s.failed, s.reported), (1, 1, 1, 0));
        assert!(!s.is_success());
        assert!(s.to_json().unwrap().contains("\"status\": \"failed\""));
    }
}
