pub mod error;
pub mod header;
pub mod index;
pub mod codec;
pub mod io_stream;
pub mod legacy;
pub mod archive;
pub mod batch;

pub use error::{EbzError, Result};
pub use header::{EbzHeader, HeaderError, HEADER_SIZE};
pub use index::{SlicePlan, PAGE_SIZE, MAX_LEVEL};
pub use io_stream::{BookSource, EbzReader, EbzWriter, PlainSource, ZipStats};
pub use archive::{compress, decompress, info, BookFile, BookFormat, InfoReport, ZipOptions};
pub use legacy::fix_legacy_index;
