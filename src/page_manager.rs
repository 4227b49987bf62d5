//! Page manager (spec.md §4.3): hands out and reclaims whole pages using
//! the region's slab/heap bitmaps and the `free_page` hint.
//!
//! Grounded in the teacher's `page.rs::Pager`, which plays the analogous
//! role of handing slab pages to callers — here specialised to the
//! region's own bitmap-backed supply instead of delegating to an external
//! `AllocPages` callback, since a region's pages always come from within
//! itself.

use crate::bitmap::{scan_first_clear_bit_or, Bitmap};
use crate::layout::{RegionHeader, PAGE_SIZE};
use crate::offset::Offset;

/// Return a page currently free in both bitmaps, or [`Offset::NULL`] if
/// none exists.
///
/// Also updates `header.free_page` to the next free page at or above the
/// one returned (spec.md §4.3), so repeated sequential allocation stays
/// amortised O(1). The caller is responsible for marking the returned
/// page's bit in whichever bitmap (slab or heap) it's about to use it for.
///
/// # Safety
///
/// `base` must be the region's current base address; `header` must be a
/// valid, initialised region header within it.
pub(crate) unsafe fn allocate_page(base: *mut u8, header: &mut RegionHeader) -> Offset {
    let p = header.free_page;
    if p.is_null() {
        return Offset::NULL;
    }

    let slab_bm = Bitmap::from_descriptor(base, header.caches.slab_bitmap);
    let heap_bm = Bitmap::from_descriptor(base, header.heap_bitmap);

    let page_bit = p.get() / PAGE_SIZE;
    // Scan starts at the word *after* the one containing `p`'s bit: that
    // bit is treated as still free even though it's about to be handed
    // out (spec.md §4.3: "the page bit for the initial free_page value
    // itself is treated as still free").
    let next_word = page_bit / 64 + 1;

    header.free_page = match scan_first_clear_bit_or(slab_bm.bytes(), heap_bm.bytes(), next_word) {
        Some(bit) => Offset::new(bit * PAGE_SIZE),
        None => Offset::NULL,
    };

    log::trace!("page_manager: allocated page {:?}, next hint {:?}", p, header.free_page);
    p
}

/// Clear `offset`'s bit in whichever bitmap holds it, and lower the
/// `free_page` hint if `offset` is lower than it (spec.md §4.3 and the
/// DESIGN NOTES item on hint correctness under out-of-order frees).
///
/// # Safety
///
/// Same preconditions as [`allocate_page`]; `offset` must be a
/// page-aligned offset whose bit is currently set in exactly one of the
/// two bitmaps.
pub(crate) unsafe fn free_page(base: *mut u8, header: &mut RegionHeader, offset: Offset) {
    let page_bit = offset.get() / PAGE_SIZE;

    let mut slab_bm = Bitmap::from_descriptor(base, header.caches.slab_bitmap);
    if slab_bm.get(page_bit) {
        slab_bm.set(page_bit, false);
    } else {
        let mut heap_bm = Bitmap::from_descriptor(base, header.heap_bitmap);
        heap_bm.set(page_bit, false);
    }

    if header.free_page.is_null() || offset < header.free_page {
        log::trace!("page_manager: lowering free_page hint to {:?}", offset);
        header.free_page = offset;
    }
}
