use std::fs::File;

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;

use crate::error::{ScrubError, ScrubResult};

/// Offset-based page read/write over a pair of opaque file handles (source,
/// destination). Page 1 is kept resident by the caller for the whole run;
/// every other page is read into per-call scratch buffers.
pub struct PageIo {
    pub page_size: u32,
    /// Destination page count; `write_page` refuses anything past it.
    pub n_dest_page: u32,
}

impl PageIo {
    pub fn new(page_size: u32, n_dest_page: u32) -> Self {
        PageIo {
            page_size,
            n_dest_page,
        }
    }

    /// Read page `pgno` (1-based) from `src` into a freshly allocated
    /// `page_size`-byte buffer.
    pub fn read_page(&self, src: &File, pgno: u32) -> ScrubResult<Vec<u8>> {
        let mut buf = vec![0u8; self.page_size as usize];
        self.read_page_into(src, pgno, &mut buf)?;
        Ok(buf)
    }

    /// Read page `pgno` into a caller-supplied, already-`page_size`-long
    /// buffer. Used by the overflow copier to reuse one scratch page across
    /// an entire chain instead of allocating per hop.
    pub fn read_page_into(&self, src: &File, pgno: u32, buf: &mut [u8]) -> ScrubResult<()> {
        let offset = (pgno as u64 - 1) * self.page_size as u64;
        read_exact_at(src, buf, offset).map_err(|_| ScrubError::ReadFailed { pgno })
    }

    /// Write `bytes` (exactly `page_size` long) to `dest` at page number
    /// `pgno`. `pgno` must be `<= n_dest_page`; violating that is a logic
    /// bug (or a corrupt source whose derived page count undercounted),
    /// not a failed write, hence `Internal` rather than `WriteFailed`.
    pub fn write_page(&self, dest: &File, pgno: u32, bytes: &[u8]) -> ScrubResult<()> {
        if pgno > self.n_dest_page {
            return Err(ScrubError::Internal(format!(
                "internal logic error or database is corrupt, please run 'pragma integrity_check': \
                 page {pgno} exceeds destination page count {}",
                self.n_dest_page
            )));
        }
        let offset = (pgno as u64 - 1) * self.page_size as u64;
        write_all_at(dest, bytes, offset).map_err(|_| ScrubError::WriteFailed { pgno })
    }
}

#[cfg(unix)]
fn read_exact_at(f: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    f.read_exact_at(buf, offset)
}

#[cfg(unix)]
fn write_all_at(f: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    f.write_all_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(f: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    while !buf.is_empty() {
        let n = f.seek_read(buf, offset)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "short read",
            ));
        }
        buf = &mut buf[n..];
        offset += n as u64;
    }
    Ok(())
}

#[cfg(windows)]
fn write_all_at(f: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
    while !buf.is_empty() {
        let n = f.seek_write(buf, offset)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "short write",
            ));
        }
        buf = &buf[n..];
        offset += n as u64;
    }
    Ok(())
}
