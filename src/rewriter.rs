/*
A b-tree page is divided into regions in the following order:

The 100-byte database file header (found on page 1 only)
The 8 or 12 byte b-tree page header
The cell pointer array
Unallocated space
The cell content area
The reserved region.

All multibyte header values are big-endian; every cell-content offset
stored in the header or the cell-pointer array is relative to the true
start of the page, including on page 1 (where the 100-byte file header
still precedes the b-tree header).
*/

use std::fs::File;

use log::debug;

use crate::allocator::PageNumberAllocator;
use crate::error::{ScrubError, ScrubResult};
use crate::pageio::PageIo;
use crate::varint;

const KIND_INDEX_INTERIOR: u8 = 0x02;
const KIND_TABLE_INTERIOR: u8 = 0x05;
const KIND_INDEX_LEAF: u8 = 0x0a;
const KIND_TABLE_LEAF: u8 = 0x0d;

const MAX_DEPTH: u32 = 50;

fn corrupt(page: u32, loc: &'static str) -> ScrubError {
    ScrubError::Corrupt { page, loc }
}

/// Parses one B-tree page, zeroes unused regions, walks cells, recurses
/// into children, copies overflow chains, and writes the rewritten page at
/// its newly allocated destination page number.
///
/// This is the core of the whole crate: a single off-by-one here corrupts
/// the destination.
pub struct BTreePageRewriter<'a> {
    src: &'a File,
    dest: &'a File,
    io: &'a PageIo,
    alloc: &'a mut PageNumberAllocator,
    usable_size: u32,
    /// Page 1's content, pinned for the whole run. `rewrite(1, ..)` mutates
    /// this directly rather than re-reading it from `src`.
    page1: Vec<u8>,
}

impl<'a> BTreePageRewriter<'a> {
    pub fn new(
        src: &'a File,
        dest: &'a File,
        io: &'a PageIo,
        alloc: &'a mut PageNumberAllocator,
        usable_size: u32,
        page1: Vec<u8>,
    ) -> Self {
        BTreePageRewriter {
            src,
            dest,
            io,
            alloc,
            usable_size,
            page1,
        }
    }

    /// The destination page number the next `rewrite(..., is_root: true)`
    /// call will land its root at. `SchemaRelocator` reads this right after
    /// each root finishes to learn that root's new page number.
    pub fn peek_next_dest_pgno(&self) -> u32 {
        self.alloc.peek()
    }

    /// Copy B-tree page `src_pgno`, and all of its children, from source to
    /// destination, zeroing deleted content along the way.
    pub fn rewrite(&mut self, src_pgno: u32, depth: u32, is_root: bool) -> ScrubResult<()> {
        if depth > MAX_DEPTH {
            return Err(corrupt(src_pgno, "btree_too_deep"));
        }

        let this_dest_pgno = self.alloc.peek();

        let mut buf = if src_pgno == 1 {
            std::mem::take(&mut self.page1)
        } else {
            self.io.read_page(self.src, src_pgno)?
        };

        let result = self.rewrite_buf(&mut buf, src_pgno, depth, is_root, this_dest_pgno);

        if src_pgno == 1 {
            self.page1 = buf;
        }

        result
    }

    fn rewrite_buf(
        &mut self,
        buf: &mut [u8],
        src_pgno: u32,
        depth: u32,
        is_root: bool,
        this_dest_pgno: u32,
    ) -> ScrubResult<()> {
        let n_prefix: usize = if src_pgno == 1 { 100 } else { 0 };
        let usable = self.usable_size as usize;

        let kind = buf[n_prefix];
        if !matches!(
            kind,
            KIND_INDEX_INTERIOR | KIND_TABLE_INTERIOR | KIND_INDEX_LEAF | KIND_TABLE_LEAF
        ) {
            return Err(corrupt(src_pgno, "bad_page_kind"));
        }
        debug!("page {src_pgno}: kind {kind:#04x} -> dest {this_dest_pgno}, depth {depth}");
        let is_interior = kind == KIND_INDEX_INTERIOR || kind == KIND_TABLE_INTERIOR;
        let szhdr: usize = if is_interior { 12 } else { 8 };

        let n_cell = varint::read_u16_be(&buf[n_prefix + 3..n_prefix + 5]) as usize;

        // Zero the gap between the end of the cell-pointer array and the
        // start of the cell content area.
        let cell_content_start = varint::read_u16_be(&buf[n_prefix + 5..n_prefix + 7]) as usize;
        if cell_content_start > usable {
            return Err(corrupt(src_pgno, "cell_content_start_oob"));
        }
        let gap_start = szhdr + n_prefix + n_cell * 2;
        if gap_start > cell_content_start {
            return Err(corrupt(src_pgno, "cell_ptr_array_overruns_content"));
        }
        if gap_start < cell_content_start {
            for b in &mut buf[gap_start..cell_content_start] {
                *b = 0;
            }
        }

        // Zero every free block's unused body.
        let mut pc = varint::read_u16_be(&buf[n_prefix + 1..n_prefix + 3]) as usize;
        if pc > 0 && pc < cell_content_start {
            return Err(corrupt(src_pgno, "freeblock_before_content"));
        }
        while pc != 0 {
            if pc > usable - 4 {
                return Err(corrupt(src_pgno, "freeblock_oob"));
            }
            let n = varint::read_u16_be(&buf[pc + 2..pc + 4]) as usize;
            if pc + n > usable {
                return Err(corrupt(src_pgno, "freeblock_size_oob"));
            }
            if n > 4 {
                for b in &mut buf[pc + 4..pc + n] {
                    *b = 0;
                }
            }
            let next = varint::read_u16_be(&buf[pc..pc + 2]) as usize;
            if next > 0 && next < pc + 4 {
                return Err(corrupt(src_pgno, "freeblock_non_increasing"));
            }
            pc = next;
        }

        // Walk cells in cell-pointer order, allocating fresh destination
        // page numbers for every child/overflow pointer we touch *before*
        // recursing, so the parent can be rewritten with corrected
        // pointers in a single pass.
        let cell_ptr_base = n_prefix + szhdr;
        for i in 0..n_cell {
            let ptr_off = cell_ptr_base + i * 2;
            let mut pc = varint::read_u16_be(&buf[ptr_off..ptr_off + 2]) as usize;
            if pc <= szhdr {
                return Err(corrupt(src_pgno, "cell_ptr_too_small"));
            }
            if pc > usable - 3 {
                return Err(corrupt(src_pgno, "cell_ptr_too_large"));
            }

            if is_interior {
                if pc + 4 > usable {
                    return Err(corrupt(src_pgno, "left_child_ptr_oob"));
                }
                let child = varint::read_u32_be(&buf[pc..pc + 4]);
                if child == 0 {
                    return Err(corrupt(src_pgno, "zero_left_child_ptr"));
                }
                self.alloc.advance();
                let child_dest = self.alloc.peek();
                varint::write_u32_be(&mut buf[pc..pc + 4], child_dest);
                debug!("page {src_pgno}: cell {i} left child {child} -> dest {child_dest}");
                self.rewrite(child, depth + 1, false)?;
                pc += 4;
                if kind == KIND_TABLE_INTERIOR {
                    continue;
                }
            }

            let (payload_size, varint_len) = varint::decode(&buf[pc..])?;
            pc += varint_len as usize;
            if pc >= usable {
                return Err(corrupt(src_pgno, "payload_varint_oob"));
            }

            let x: i64 = if kind == KIND_TABLE_LEAF {
                usable as i64 - 35
            } else {
                ((usable as i64 - 12) * 64 / 255) - 23
            };

            if payload_size <= x {
                // Fully local payload: the row-id varint (table leaves
                // only) is never decoded, since nothing past it needs to
                // change.
                continue;
            }

            let m: i64 = ((usable as i64 - 12) * 32 / 255) - 23;
            let k = m + ((payload_size - m).rem_euclid(usable as i64 - 4));

            if kind == KIND_TABLE_LEAF {
                // Only reached on the overflow path: skip (without
                // re-decoding) the row-id varint to reach the local
                // payload bytes.
                pc += varint::size_of(&buf[pc..])? as usize;
                if pc > usable - 4 {
                    return Err(corrupt(src_pgno, "rowid_varint_oob"));
                }
            }

            let n_local = (if k <= x { k } else { m }) as usize;

            if pc + n_local > usable - 4 {
                return Err(corrupt(src_pgno, "overflow_ptr_oob"));
            }
            let overflow_head = varint::read_u32_be(&buf[pc + n_local..pc + n_local + 4]);
            if overflow_head == 0 {
                return Err(corrupt(src_pgno, "zero_overflow_ptr"));
            }
            self.alloc.advance();
            let overflow_dest = self.alloc.peek();
            varint::write_u32_be(&mut buf[pc + n_local..pc + n_local + 4], overflow_dest);
            self.copy_overflow(overflow_head, (payload_size - n_local as i64) as u32)?;
        }

        // Right-most child, interior pages only.
        if is_interior {
            let off = n_prefix + 8;
            let child = varint::read_u32_be(&buf[off..off + 4]);
            if child == 0 {
                return Err(corrupt(src_pgno, "zero_right_child_ptr"));
            }
            self.alloc.advance();
            let child_dest = self.alloc.peek();
            varint::write_u32_be(&mut buf[off..off + 4], child_dest);
            self.rewrite(child, depth + 1, false)?;
        }

        if is_root {
            // Reserves the slot SchemaRelocator will read via `peek()` for
            // the *next* root's catalog-update mapping; this root itself
            // is written at `this_dest_pgno`, captured before any of this.
            self.alloc.advance();
        }

        self.io.write_page(self.dest, this_dest_pgno, buf)?;
        Ok(())
    }

    /// Copy an overflow chain from source to destination, zeroing the
    /// unused tail of the final page.
    fn copy_overflow(&mut self, mut pgno: u32, mut n_remaining: u32) -> ScrubResult<()> {
        let mut buf = vec![0u8; self.io.page_size as usize];
        let usable = self.usable_size;

        while n_remaining > 0 && pgno != 0 {
            self.io.read_page_into(self.src, pgno, &mut buf)?;

            if n_remaining >= usable - 4 {
                n_remaining -= usable - 4;
            } else {
                let x = (usable - 4) - n_remaining;
                let i = (usable - x) as usize;
                for b in &mut buf[i..usable as usize] {
                    *b = 0;
                }
                n_remaining = 0;
            }

            let next_src = varint::read_u32_be(&buf[0..4]);
            let this_dest = self.alloc.peek();
            if next_src != 0 {
                self.alloc.advance();
                let dest = self.alloc.peek();
                varint::write_u32_be(&mut buf[0..4], dest);
            }
            self.io.write_page(self.dest, this_dest, &buf)?;
            pgno = next_src;
        }
        Ok(())
    }
}
