//! S-EBXA index page fix-up.
//!
//! A text file unpacked from S-EBXA still carries that format's compression
//! records in its first page.  Readers treat the plain file as compressed
//! unless those records are removed.  Page layout:
//!
//! ```text
//! 0      1      2            16           32           48
//! +------+------+-- ... -----+------------+------------+-- ...
//! |      |count |            | record 0   | record 1   |
//! +------+------+-- ... -----+------------+------------+-- ...
//! ```
//!
//! A record whose first byte is [`SEBXA_MARKER_A`] or [`SEBXA_MARKER_B`] is
//! dropped; the rest slide forward in order and the vacated tail is zeroed.
//! Bytes 0..16 (the count included) are left untouched, and the file keeps
//! its size.

use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{EbzError, Result};
use crate::index::PAGE_SIZE;

pub const RECORD_SIZE: usize = 16;
pub const TABLE_OFFSET: usize = 16;
pub const COUNT_OFFSET: usize = 1;
pub const SEBXA_MARKER_A: u8 = 0x21;
pub const SEBXA_MARKER_B: u8 = 0x22;

/// Records that fit in one page after the page header.
pub const MAX_RECORDS: usize = (PAGE_SIZE - TABLE_OFFSET) / RECORD_SIZE;

/// Strip S-EBXA marker records from an index page in memory.
/// Returns how many records were removed.
pub fn fix_index_page(page: &mut [u8; PAGE_SIZE]) -> usize {
    let count = (page[COUNT_OFFSET] as usize).min(MAX_RECORDS);
    let mut out = TABLE_OFFSET;
    let mut removed = 0;

    for i in 0..count {
        let at = TABLE_OFFSET + i * RECORD_SIZE;
        let tag = page[at];
        if tag == SEBXA_MARKER_A || tag == SEBXA_MARKER_B {
            removed += 1;
            continue;
        }
        if at != out {
            page.copy_within(at..at + RECORD_SIZE, out);
        }
        out += RECORD_SIZE;
    }

    let end = out + removed * RECORD_SIZE;
    page[out..end].fill(0);
    removed
}

/// Rewrite the first page of the file at `path` in place.
pub fn fix_legacy_index<P: AsRef<Path>>(path: P) -> Result<usize> {
    let path = path.as_ref();
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;

    let mut page = [0u8; PAGE_SIZE];
    file.read_exact(&mut page).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => EbzError::UnexpectedEof { offset: 0, expected: PAGE_SIZE as u64 },
        _ => EbzError::Io(e),
    })?;

    let removed = fix_index_page(&mut page);
    debug!(path = %path.display(), removed, "patched index page");

    file.seek(SeekFrom::Start(0))?;
    file.write_all(&page)?;
    file.flush()?;
    info!(path = %path.display(), removed, "removed S-EBXA index records");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tag: u8, fill: u8) -> [u8; RECORD_SIZE] {
        let mut r = [fill; RECORD_SIZE];
        r[0] = tag;
        r
    }

    fn page_with(records: &[[u8; RECORD_SIZE]]) -> [u8; PAGE_SIZE] {
        let mut page = [0u8; PAGE_SIZE];
        page[0] = 0x00;
        page[COUNT_OFFSET] = records.len() as u8;
        page[2..16].copy_from_slice(b"page-header-14");
        for (i, r) in records.iter().enumerate() {
            let at = TABLE_OFFSET + i * RECORD_SIZE;
            page[at..at + RECORD_SIZE].copy_from_slice(r);
        }
        page
    }

    #[test]
    fn markers_are_removed_and_order_kept() {
        let mut page = page_with(&[
            record(0x00, 1),
            record(SEBXA_MARKER_A, 2),
            record(0x10, 3),
            record(SEBXA_MARKER_B, 4),
            record(0x91, 5),
        ]);
        let header_before: Vec<u8> = page[..TABLE_OFFSET].to_vec();

        assert_eq!(fix_index_page(&mut page), 2);

        assert_eq!(&page[..TABLE_OFFSET], &header_before[..]);
        assert_eq!(page[16..32], record(0x00, 1));
        assert_eq!(page[32..48], record(0x10, 3));
        assert_eq!(page[48..64], record(0x91, 5));
        assert!(page[64..96].iter().all(|&b| b == 0));
    }

    #[test]
    fn page_without_markers_is_unchanged() {
        let mut page = page_with(&[record(0x00, 9), record(0x70, 8)]);
        let before = page;
        assert_eq!(fix_index_page(&mut page), 0);
        assert_eq!(page, before);
    }

    #[test]
    fn count_larger_than_page_is_clamped() {
        let mut page = [SEBXA_MARKER_A; PAGE_SIZE];
        page[COUNT_OFFSET] = 0xff;
        assert_eq!(fix_index_page(&mut page), MAX_RECORDS);
        assert!(page[TABLE_OFFSET..].iter().all(|&b| b == 0));
        assert_eq!(page[COUNT_OFFSET], 0xff);
    }
}
