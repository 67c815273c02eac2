use crate::varint::write_u32_be;

/// Byte offset, within page 1, of the reserved-space-per-page field.
pub const RESERVED_BYTES_OFFSET: usize = 20;

/// Compute the usable page size: the on-disk page size less the reserved
/// tail recorded at byte 20 of page 1.
pub fn usable_size(page_size: u32, page1: &[u8]) -> u32 {
    page_size - page1[RESERVED_BYTES_OFFSET] as u32
}

/// Adjusts page 1's database header fields for the destination: page
/// count, first freelist trunk, freelist count, auto-vacuum flag. Called
/// once, in memory, before any B-tree page is rewritten.
///
/// Returns `n_dest_page`, the page count written into the header, which the
/// rest of the run also uses to bound destination writes (`PageIo`'s
/// `pgno <= n_dest_page` check).
pub fn fix_header(page1: &mut [u8], n_src_page: u32, n_free_page: u32, lock_page: u32) -> u32 {
    let mut n_dest_page = n_src_page - n_free_page;
    // If the source crossed the lock page but the dense destination would
    // not, the destination is one page shorter than the naive subtraction:
    // it still has to skip the lock page number, but it never grows past
    // it, so the page count itself drops by one extra.
    if n_src_page >= lock_page && n_dest_page < lock_page {
        n_dest_page -= 1;
    }

    write_u32_be(&mut page1[28..32], n_dest_page); // page count
    write_u32_be(&mut page1[32..36], 0); // first freelist trunk page
    write_u32_be(&mut page1[36..40], 0); // freelist page count
    write_u32_be(&mut page1[52..56], 0); // largest root page / auto-vacuum

    n_dest_page
}
