use std::fs::File;
use std::path::Path;

use log::{debug, info};
use rusqlite::{Connection, OpenFlags};

use crate::allocator::PageNumberAllocator;
use crate::error::{ScrubError, ScrubResult};
use crate::header;
use crate::pageio::PageIo;
use crate::rewriter::BTreePageRewriter;
use crate::schema::SchemaRelocator;

/// The page number reserved by the format for OS-level byte-range locking;
/// derived from `PENDING_BYTE` (`0x40000000 - page_size`) the same way
/// SQLite itself does.
const PENDING_BYTE: i64 = 1_073_742_335;

/// Opens both files, drives open-source -> open-dest -> read page 1 ->
/// fix header -> rewrite trees -> relocate roots -> close.
pub struct Driver;

/// Releases the source's read transaction on every exit path, mirroring
/// the original C implementation's `scrub_abort:` label, which always ran
/// `COMMIT` on the source connection no matter where the error occurred.
struct ReadTxnGuard<'a> {
    conn: &'a Connection,
}

impl Drop for ReadTxnGuard<'_> {
    fn drop(&mut self) {
        let _ = self.conn.execute_batch("COMMIT;");
    }
}

impl Driver {
    pub fn scrub_and_defrag(source: &Path, dest: &Path) -> ScrubResult<()> {
        let src_conn = open_source(source)?;
        let _read_txn_guard = ReadTxnGuard { conn: &src_conn };

        let page_size: u32 = pragma_u32(&src_conn, "page_size")?;
        let n_src_page: u32 = pragma_u32(&src_conn, "page_count")?;
        let n_free_page: u32 = pragma_u32(&src_conn, "freelist_count")?;
        debug!("source: {n_src_page} pages, {n_free_page} freelist, page_size={page_size}");

        let src_file = File::open(source)?;

        // `dest_conn` holds the exclusive write transaction for the whole
        // raw-page-writing phase below, so no other accessor can observe a
        // partially rewritten file; the actual page bytes are written
        // through a second, independent `File` handle (rusqlite doesn't
        // expose the underlying `sqlite3_file` the original C used).
        let dest_conn = open_dest(dest, page_size)?;
        let dest_file = std::fs::OpenOptions::new().write(true).open(dest)?;

        let lock_page = (PENDING_BYTE / page_size as i64) as u32 + 1;

        let io_for_page1 = PageIo::new(page_size, u32::MAX);
        let mut page1 = io_for_page1.read_page(&src_file, 1)?;

        let n_dest_page = header::fix_header(&mut page1, n_src_page, n_free_page, lock_page);
        let usable_size = header::usable_size(page_size, &page1);

        let io = PageIo::new(page_size, n_dest_page);
        let mut alloc = PageNumberAllocator::new(lock_page);
        let mut rewriter =
            BTreePageRewriter::new(&src_file, &dest_file, &io, &mut alloc, usable_size, page1);

        let mappings = SchemaRelocator::relocate(&src_conn, &mut rewriter)?;
        drop(rewriter);
        drop(dest_file);
        // Close without committing: the exclusive transaction's only job
        // was to hold the lock during the raw writes above: committing it
        // here would let SQLite flush its own (stale) image of page 1 over
        // the one we just wrote by hand.
        drop(dest_conn);

        let script = SchemaRelocator::build_update_script(&mappings);
        let dest_conn = Connection::open(dest)?;
        dest_conn.execute_batch(&script)?;
        info!(
            "scrub-and-defrag complete: {n_dest_page} destination pages, {} roots relocated",
            mappings.len()
        );

        Ok(())
    }
}

fn open_source(path: &Path) -> ScrubResult<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
    )?;
    // Touch sqlite_master to force schema parsing, then hold a read
    // transaction for the rest of the run.
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })?;
    conn.execute_batch("BEGIN;")?;
    // Bring all WAL content into the main file so raw page reads see it.
    conn.query_row("PRAGMA wal_checkpoint(FULL)", [], |_| Ok(()))
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(()),
            other => Err(other),
        })?;
    Ok(conn)
}

fn open_dest(path: &Path, page_size: u32) -> ScrubResult<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(&format!("PRAGMA page_size({page_size});"))?;
    // Best-effort, matching the original's choice to ignore this pragma's
    // return code.
    let _ = conn.execute_batch("PRAGMA journal_mode=OFF;");
    conn.execute_batch("BEGIN EXCLUSIVE;")?;

    let existing_pages: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
    if existing_pages > 1 {
        return Err(ScrubError::Internal(format!(
            "destination database is not empty - holds {existing_pages} pages"
        )));
    }
    Ok(conn)
}

fn pragma_u32(conn: &Connection, name: &str) -> ScrubResult<u32> {
    let v: i64 = conn.query_row(&format!("PRAGMA {name}"), [], |row| row.get(0))?;
    Ok(v as u32)
}
