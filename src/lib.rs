pub mod allocator;
pub mod driver;
pub mod error;
pub mod header;
pub mod pageio;
pub mod rewriter;
pub mod schema;
pub mod varint;

use std::path::Path;

pub use error::{ScrubError, ScrubResult};

/// Produce a scrubbed, defragmented copy of a SQLite-format database file
/// at `source`, writing it to `dest`.
///
/// `source` is read under a read transaction (a full WAL checkpoint is run
/// first so raw page reads see all committed content); `dest` must not
/// already exist as a non-empty database. On success, `dest` holds all of
/// `source`'s live content with free-list pages dropped, deleted byte
/// ranges zeroed, pages densely renumbered, and auto-vacuum disabled. On
/// any error, `dest` is left in an aborted, unusable state and should be
/// treated as garbage by the caller (deleting it is recommended but not
/// done automatically).
pub fn scrub_and_defrag(source: &Path, dest: &Path) -> ScrubResult<()> {
    driver::Driver::scrub_and_defrag(source, dest)
}
